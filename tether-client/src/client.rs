//! The tether client
//!
//! [`TetherClient`] glues the [`Correlator`] to the [`BufferedChannel`]:
//! outbound messages are encoded and handed to the channel's `send`, and
//! every inbound payload the channel reads is decoded and routed by the
//! correlator. Lifecycle events from the channel are re-exposed unchanged.
//!
//! # Cloning
//!
//! Clones share one connection. The channel is closed when the last clone is
//! dropped, or earlier through [`TetherClient::close`]. Listeners that
//! capture a clone keep the client alive until `close` is called explicitly.
//!
//! # Outstanding requests
//!
//! Requests keep waiting across reconnects by default; responses may then
//! arrive arbitrarily late. With `PendingPolicy::RejectOnDisconnect` every
//! outstanding request fails with `Error::Disconnected` when the link drops.
//! Once the client is closed, every outstanding request fails with
//! `Error::ConnectionClosed` regardless of policy.

use crate::backoff::ReconnectionStrategy;
use crate::channel::{BufferedChannel, ConnectionState};
use crate::client_builder::PendingPolicy;
use crate::connector::Connector;
use crate::correlator::{Correlator, OutboundSink, ResponseFuture};
use crate::metrics::ClientMetrics;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    codec, Emitter, Error, Id, InboundRequest, ListenerId, OutboundMessage, Result, RpcError,
    TransportEvent,
};

impl OutboundSink for BufferedChannel {
    fn send_message(&self, message: &OutboundMessage) -> Result<()> {
        self.send(codec::encode(message)?)
    }
}

pub(crate) struct ClientInner {
    correlator: Arc<Correlator<BufferedChannel>>,
    events: Emitter<TransportEvent>,
    request_timeout: Option<Duration>,
}

impl ClientInner {
    fn channel(&self) -> &BufferedChannel {
        self.correlator.sink()
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.channel().close();
    }
}

/// Bidirectional JSON-RPC 2.0 client over a reconnecting channel
///
/// Built with [`ClientBuilder`](crate::ClientBuilder).
#[derive(Clone)]
pub struct TetherClient {
    inner: Arc<ClientInner>,
}

impl TetherClient {
    /// Wire a correlator to a new channel and start connecting
    pub(crate) fn launch<C: Connector>(
        connector: C,
        strategy: Box<dyn ReconnectionStrategy>,
        request_timeout: Option<Duration>,
        pending_policy: PendingPolicy,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Result<Self> {
        let events = Emitter::new();
        let channel = BufferedChannel::new(events.clone(), metrics.clone());
        let correlator = Arc::new(Correlator::new(channel.clone(), events.clone(), metrics));

        let weak = Arc::downgrade(&correlator);
        events.on(TransportEvent::CLOSE, move |_| {
            if let Some(correlator) = weak.upgrade() {
                correlator.fail_all(Error::ConnectionClosed);
            }
        });

        if pending_policy == PendingPolicy::RejectOnDisconnect {
            let weak = Arc::downgrade(&correlator);
            events.on(TransportEvent::DISCONNECT, move |_| {
                if let Some(correlator) = weak.upgrade() {
                    correlator.fail_all(Error::Disconnected);
                }
            });
        }

        let inbound = Arc::clone(&correlator);
        channel.start(connector, strategy, move |text| inbound.handle_text(&text))?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                correlator,
                events,
                request_timeout,
            }),
        })
    }

    /// Send a request with raw JSON params
    ///
    /// The request is registered and handed to the channel before this
    /// returns; awaiting the future only waits for the response. The
    /// builder's request timeout, if any, applies.
    pub fn call(&self, method: impl Into<String>, params: Option<Value>) -> ResponseFuture {
        let future = self.inner.correlator.call(method, params);
        match self.inner.request_timeout {
            Some(timeout) => future.with_timeout(timeout),
            None => future,
        }
    }

    /// Send a request and deserialize its result
    ///
    /// Params that serialize to `null` (such as `()`) are omitted from the
    /// wire. Like [`call`](Self::call), the request is sent immediately.
    pub fn request<P, R>(
        &self,
        method: impl Into<String>,
        params: P,
    ) -> impl Future<Output = Result<R>>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let method = method.into();
        let span = tracing::debug_span!("request", method = %method);
        let sent = span.in_scope(|| encode_params(params).map(|params| self.call(method, params)));
        async move { decode_result(sent?.await?) }
    }

    /// Like [`request`](Self::request) with an explicit deadline
    ///
    /// Fails with `Error::Timeout` if no response arrives in time; a late
    /// response is discarded.
    pub fn request_with_timeout<P, R>(
        &self,
        method: impl Into<String>,
        params: P,
        timeout: Duration,
    ) -> impl Future<Output = Result<R>>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let method = method.into();
        let span = tracing::debug_span!("request", method = %method);
        let sent = span.in_scope(|| {
            encode_params(params).map(|params| self.call(method, params).with_timeout(timeout))
        });
        async move { decode_result(sent?.await?) }
    }

    /// Send a notification; no response is expected or tracked
    pub fn notify<P: Serialize>(&self, method: impl Into<String>, params: P) -> Result<()> {
        self.inner.correlator.notify(method, encode_params(params)?)
    }

    /// Reply to a request the peer initiated
    pub fn respond<T: Serialize>(&self, id: Id, result: T) -> Result<()> {
        self.inner.correlator.respond(id, serde_json::to_value(result)?)
    }

    /// Reply to a request the peer initiated with an error object
    pub fn respond_error(&self, id: Id, error: RpcError) -> Result<()> {
        self.inner.correlator.respond_error(id, error)
    }

    /// Observe requests and notifications initiated by the peer
    ///
    /// Listeners run synchronously on the connection task. The client never
    /// answers on its own; use [`respond`](Self::respond).
    pub fn on_request<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&InboundRequest) + Send + Sync + 'static,
    {
        self.inner.events.on(TransportEvent::REQUEST, move |event| {
            if let TransportEvent::Request(request) = event {
                listener(request);
            }
        })
    }

    /// Called each time the channel reaches Open
    pub fn on_connect<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.events.on(TransportEvent::CONNECT, move |_| listener())
    }

    /// Called each time an open link is lost
    pub fn on_disconnect<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.events.on(TransportEvent::DISCONNECT, move |_| listener())
    }

    /// Called for every physical-layer error
    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.inner.events.on(TransportEvent::ERROR, move |event| {
            if let TransportEvent::Error(error) = event {
                listener(error);
            }
        })
    }

    /// Called once when the client is closed
    pub fn on_close<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.events.on(TransportEvent::CLOSE, move |_| listener())
    }

    /// Unregister a listener
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    /// Close the connection and stop reconnecting
    ///
    /// Idempotent. Outstanding requests fail with `Error::ConnectionClosed`.
    pub fn close(&self) {
        self.inner.channel().close();
    }

    /// True while the channel is Open
    pub fn is_connected(&self) -> bool {
        self.inner.channel().is_connected()
    }

    /// Consecutive failed connection attempts since the last Open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.channel().reconnect_attempts()
    }

    /// Current channel lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.inner.channel().state()
    }

    /// Wait until the channel is Open
    pub async fn ready(&self) -> Result<()> {
        self.inner.channel().ready().await
    }

    /// Requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Inbound messages dropped as undecodable or uncorrelated
    pub fn discarded_messages(&self) -> u64 {
        self.inner.correlator.discarded_count()
    }
}

fn encode_params<P: Serialize>(params: P) -> Result<Option<Value>> {
    match serde_json::to_value(params)? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}

fn decode_result<R: DeserializeOwned>(value: Value) -> Result<R> {
    serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{ExponentialBackoff, NoReconnect};
    use crate::channel::tests::{event_log, next_named, Outcome, ScriptedConnector};
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Mutex;

    fn launch(connector: &ScriptedConnector, policy: PendingPolicy) -> TetherClient {
        TetherClient::launch(
            connector.clone(),
            Box::new(ExponentialBackoff::default()),
            None,
            policy,
            None,
        )
        .unwrap()
    }

    async fn next_json(peer: &mut crate::channel::tests::Peer) -> Value {
        let text = peer.written.next().await.expect("link closed");
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_encode_params() {
        assert_eq!(encode_params(()).unwrap(), None);
        assert_eq!(encode_params(None::<i32>).unwrap(), None);
        assert_eq!(encode_params(json!([1, 2])).unwrap(), Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn test_request_before_open_is_buffered_then_resolved() {
        let connector = ScriptedConnector::new([Outcome::Accept]);
        let client = launch(&connector, PendingPolicy::KeepAcrossReconnect);

        let response = client.request::<_, i64>("foo", json!({"a": 1}));
        assert_eq!(client.pending_requests(), 1);

        client.ready().await.unwrap();
        let mut peer = connector.take_peer(0);
        assert_eq!(
            next_json(&mut peer).await,
            json!({"jsonrpc": "2.0", "method": "foo", "id": 1, "params": {"a": 1}})
        );

        peer.inbound
            .unbounded_send(Ok(r#"{"jsonrpc":"2.0","id":1,"result":42}"#.to_string()))
            .unwrap();
        assert_eq!(response.await.unwrap(), 42);
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_inbound_request_reaches_listener_and_reply_goes_out() {
        let connector = ScriptedConnector::new([Outcome::Accept]);
        let client = launch(&connector, PendingPolicy::KeepAcrossReconnect);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        client.on_request(move |req| s.lock().unwrap().push(req.clone()));

        client.ready().await.unwrap();
        let mut peer = connector.take_peer(0);
        peer.inbound
            .unbounded_send(Ok(r#"{"jsonrpc":"2.0","method":"ping","id":"p1"}"#.to_string()))
            .unwrap();

        // the reply is written after the request was delivered
        tokio::task::yield_now().await;
        let request = loop {
            if let Some(req) = seen.lock().unwrap().first().cloned() {
                break req;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(request.method, "ping");

        client.respond(request.id, "pong").unwrap();
        assert_eq!(
            next_json(&mut peer).await,
            json!({"jsonrpc": "2.0", "id": "p1", "result": "pong"})
        );
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_survive_disconnect_by_default() {
        let connector = ScriptedConnector::new([Outcome::Accept, Outcome::Accept]);
        let client = launch(&connector, PendingPolicy::KeepAcrossReconnect);
        let mut log = event_log(&client.inner.events);
        client.ready().await.unwrap();

        let response = client.call("slow", None);
        drop(connector.take_peer(0));
        next_named(&mut log, TransportEvent::DISCONNECT).await;
        assert_eq!(client.pending_requests(), 1);

        next_named(&mut log, TransportEvent::CONNECT).await;
        let peer = connector.take_peer(1);
        peer.inbound
            .unbounded_send(Ok(r#"{"id":1,"result":"late"}"#.to_string()))
            .unwrap();
        assert_eq!(response.await.unwrap(), json!("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_on_disconnect_policy() {
        let connector = ScriptedConnector::new([Outcome::Accept]);
        let client = launch(&connector, PendingPolicy::RejectOnDisconnect);
        client.ready().await.unwrap();

        let response = client.call("slow", None);
        drop(connector.take_peer(0));

        assert!(matches!(response.await, Err(Error::Disconnected)));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_close_rejects_outstanding_and_later_sends() {
        let connector = ScriptedConnector::new([Outcome::Accept]);
        let client = launch(&connector, PendingPolicy::KeepAcrossReconnect);
        client.ready().await.unwrap();

        let response = client.call("slow", None);
        client.close();
        client.close();

        assert!(matches!(response.await, Err(Error::ConnectionClosed)));
        assert!(matches!(
            client.request::<_, Value>("after", ()).await,
            Err(Error::ConnectionClosed)
        ));
        assert!(matches!(client.notify("after", ()), Err(Error::ConnectionClosed)));
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_dropping_last_clone_closes_channel() {
        let connector = ScriptedConnector::new([Outcome::Accept]);
        let client = TetherClient::launch(
            connector.clone(),
            Box::new(NoReconnect),
            None,
            PendingPolicy::KeepAcrossReconnect,
            None,
        )
        .unwrap();
        client.ready().await.unwrap();
        let channel = client.inner.channel().clone();

        let other = client.clone();
        drop(client);
        assert!(channel.is_connected());
        drop(other);
        assert_eq!(channel.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_result_type_mismatch_is_serialization_error() {
        let connector = ScriptedConnector::new([Outcome::Accept]);
        let client = launch(&connector, PendingPolicy::KeepAcrossReconnect);
        client.ready().await.unwrap();

        let response = client.request::<_, i64>("text", ());
        let peer = connector.take_peer(0);
        peer.inbound
            .unbounded_send(Ok(r#"{"id":1,"result":"not a number"}"#.to_string()))
            .unwrap();
        assert!(matches!(response.await, Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_request_with_owned_method_names() {
        let connector = ScriptedConnector::new([Outcome::Accept]);
        let client = launch(&connector, PendingPolicy::KeepAcrossReconnect);
        client.ready().await.unwrap();

        let method = String::from("sum");
        let plain = client.request::<_, i64>(method.clone(), [1, 2]);
        let bounded = client.request_with_timeout::<_, i64>(
            format!("{method}_slow"),
            (),
            Duration::from_secs(5),
        );

        let mut peer = connector.take_peer(0);
        assert_eq!(next_json(&mut peer).await["method"], "sum");
        assert_eq!(next_json(&mut peer).await["method"], "sum_slow");
        peer.inbound
            .unbounded_send(Ok(r#"{"id":2,"result":7}"#.to_string()))
            .unwrap();
        peer.inbound
            .unbounded_send(Ok(r#"{"id":1,"result":3}"#.to_string()))
            .unwrap();
        assert_eq!(plain.await.unwrap(), 3);
        assert_eq!(bounded.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_reply_echoes_fractional_peer_id() {
        let connector = ScriptedConnector::new([Outcome::Accept]);
        let client = launch(&connector, PendingPolicy::KeepAcrossReconnect);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        client.on_request(move |req| s.lock().unwrap().push(req.clone()));

        client.ready().await.unwrap();
        let mut peer = connector.take_peer(0);
        peer.inbound
            .unbounded_send(Ok(r#"{"jsonrpc":"2.0","method":"ping","id":2.5}"#.to_string()))
            .unwrap();
        let request = loop {
            if let Some(req) = seen.lock().unwrap().first().cloned() {
                break req;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(request.id, Id::Other(json!(2.5)));

        client.respond(request.id, "pong").unwrap();
        assert_eq!(
            next_json(&mut peer).await,
            json!({"jsonrpc": "2.0", "id": 2.5, "result": "pong"})
        );
    }

    #[tokio::test]
    async fn test_status_accessors() {
        let connector = ScriptedConnector::new([Outcome::Accept]);
        let client = launch(&connector, PendingPolicy::KeepAcrossReconnect);
        client.ready().await.unwrap();

        assert!(client.is_connected());
        assert_eq!(client.reconnect_attempts(), 0);
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(client.discarded_messages(), 0);
    }
}
