//! Request/response correlation
//!
//! The [`Correlator`] turns outgoing calls into futures and routes inbound
//! messages:
//!
//! 1. **Assign**: every request gets the next [`RequestId`] (1, 2, 3, ...)
//! 2. **Register**: a pending entry is stored *before* anything is sent
//! 3. **Send**: the request goes to the [`OutboundSink`], which may buffer it
//! 4. **Settle**: a response with a matching id removes the entry and
//!    resolves (`result`) or rejects (`error`) the future, exactly once
//!
//! Inbound messages carrying a `method` are peer-initiated calls and are
//! emitted as [`TransportEvent::Request`]. Independently, any message whose
//! id matches a pending entry settles it. Responses with no matching entry
//! (unknown, already settled or cancelled ids) are dropped, logged and
//! counted.
//!
//! Dropping a [`ResponseFuture`] before it settles removes its entry, so an
//! abandoned request cannot leak.

use crate::metrics::ClientMetrics;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};
use tether_core::{
    codec, Emitter, Error, Id, InboundRequest, Message, Notification, OutboundMessage, Request,
    RequestId, Response, Result, RpcError, TransportEvent,
};
use tokio::sync::oneshot;

/// Where the correlator writes serialized traffic
///
/// Implemented by the buffered channel; a send only fails once the channel
/// is closed.
pub trait OutboundSink: Send + Sync + 'static {
    /// Serialize and hand off one message
    fn send_message(&self, message: &OutboundMessage) -> Result<()>;
}

struct PendingEntry {
    method: String,
    sent_at: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct PendingTable {
    entries: Mutex<HashMap<RequestId, PendingEntry>>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: RequestId, entry: PendingEntry) {
        self.lock().insert(id, entry);
    }

    fn remove(&self, id: RequestId) -> Option<PendingEntry> {
        self.lock().remove(&id)
    }

    fn drain(&self) -> Vec<(RequestId, PendingEntry)> {
        self.lock().drain().collect()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Future returned by [`Correlator::call`]
///
/// Resolves with the peer's `result` (`Value::Null` when absent) or rejects
/// with the peer's error object as `Error::Rpc`. Dropping it cancels the
/// request locally; a response arriving later is discarded.
pub struct ResponseFuture {
    id: RequestId,
    rx: Option<oneshot::Receiver<Result<Value>>>,
    failed: Option<Error>,
    pending: Option<Arc<PendingTable>>,
    deadline: Option<tokio::time::Instant>,
    timer: Option<Pin<Box<tokio::time::Sleep>>>,
}

impl ResponseFuture {
    fn waiting(id: RequestId, rx: oneshot::Receiver<Result<Value>>, pending: Arc<PendingTable>) -> Self {
        Self {
            id,
            rx: Some(rx),
            failed: None,
            pending: Some(pending),
            deadline: None,
            timer: None,
        }
    }

    fn failed(id: RequestId, error: Error) -> Self {
        Self {
            id,
            rx: None,
            failed: Some(error),
            pending: None,
            deadline: None,
            timer: None,
        }
    }

    /// Identifier the request was sent with
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Reject with `Error::Timeout` unless settled within `timeout` from now
    ///
    /// The earlier deadline wins when called more than once.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = tokio::time::Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self.timer = None;
        self
    }

    fn expire(&mut self) {
        self.rx = None;
        if let Some(pending) = self.pending.take() {
            pending.remove(self.id);
        }
        tracing::debug!(id = %self.id, "Request timed out");
    }
}

impl Future for ResponseFuture {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Some(error) = this.failed.take() {
            return Poll::Ready(Err(error));
        }
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(Err(Error::Internal(
                "response future polled after completion".to_string(),
            )));
        };

        if let Poll::Ready(received) = Pin::new(rx).poll(cx) {
            this.rx = None;
            this.pending = None;
            // the sender only disappears without a value when the correlator is gone
            return Poll::Ready(received.unwrap_or(Err(Error::ConnectionClosed)));
        }

        let Some(deadline) = this.deadline else {
            return Poll::Pending;
        };
        let timer = this
            .timer
            .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
        ready!(timer.as_mut().poll(cx));

        this.expire();
        Poll::Ready(Err(Error::Timeout))
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            if pending.remove(self.id).is_some() {
                tracing::debug!(id = %self.id, "Pending request cancelled");
            }
        }
    }
}

/// Maps outgoing requests to their eventual responses
pub struct Correlator<S> {
    sink: S,
    next_id: AtomicU64,
    pending: Arc<PendingTable>,
    events: Emitter<TransportEvent>,
    discarded: AtomicU64,
    metrics: Option<Arc<ClientMetrics>>,
}

impl<S: OutboundSink> Correlator<S> {
    /// Create a correlator writing to `sink` and announcing inbound calls on
    /// `events`
    pub fn new(sink: S, events: Emitter<TransportEvent>, metrics: Option<Arc<ClientMetrics>>) -> Self {
        Self {
            sink,
            next_id: AtomicU64::new(1),
            pending: Arc::new(PendingTable::default()),
            events,
            discarded: AtomicU64::new(0),
            metrics,
        }
    }

    /// The sink traffic is written to
    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn next_id(&self) -> RequestId {
        loop {
            // zero is only seen again after u64 wraparound
            if let Some(id) = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed)) {
                return id;
            }
        }
    }

    /// Send a request and return a future for its response
    ///
    /// The pending entry exists before the request is handed to the sink. If
    /// the sink refuses the request the entry is removed again and the
    /// returned future fails immediately with the sink's error.
    pub fn call(&self, method: impl Into<String>, params: Option<Value>) -> ResponseFuture {
        let method = method.into();
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();

        self.pending.insert(
            id,
            PendingEntry {
                method: method.clone(),
                sent_at: Instant::now(),
                tx,
            },
        );

        let request = OutboundMessage::from(Request::new(method, params, id));
        if let Err(error) = self.sink.send_message(&request) {
            self.pending.remove(id);
            tracing::warn!(id = %id, method = request.method().unwrap_or_default(), error = %error, "Request not sent");
            if let Some(ref m) = self.metrics {
                m.record_error("send");
            }
            return ResponseFuture::failed(id, error);
        }

        tracing::debug!(id = %id, method = request.method().unwrap_or_default(), "Request sent");
        ResponseFuture::waiting(id, rx, Arc::clone(&self.pending))
    }

    /// Send a fire-and-forget notification (`"id": 0`)
    pub fn notify(&self, method: impl Into<String>, params: Option<Value>) -> Result<()> {
        let notification = OutboundMessage::from(Notification::new(method, params));
        self.sink.send_message(&notification)?;
        tracing::debug!(method = notification.method().unwrap_or_default(), "Notification sent");
        Ok(())
    }

    /// Answer a peer-initiated request successfully
    pub fn respond(&self, id: Id, result: Value) -> Result<()> {
        self.reply(Response::success(id, result))
    }

    /// Answer a peer-initiated request with an error object
    pub fn respond_error(&self, id: Id, error: RpcError) -> Result<()> {
        self.reply(Response::error(id, error))
    }

    fn reply(&self, response: Response) -> Result<()> {
        if response.id.is_sentinel() {
            return Err(Error::Internal(format!(
                "cannot respond to a message with id {}",
                response.id
            )));
        }
        self.sink.send_message(&OutboundMessage::from(response))
    }

    /// Decode and route one inbound payload
    ///
    /// Undecodable payloads are logged and counted, never fatal.
    pub fn handle_text(&self, text: &str) {
        match codec::decode(text) {
            Ok(message) => self.handle_inbound(message),
            Err(error) => {
                tracing::warn!(error = %error, "Undecodable inbound payload");
                self.discard("undecodable");
            }
        }
    }

    /// Route one inbound message
    ///
    /// - has a `method`: emitted as a `request` event
    /// - independently, a positive integer id with a pending entry settles
    ///   that entry
    /// - neither: discarded
    pub fn handle_inbound(&self, message: Message) {
        let is_request = message.is_request();
        if let Some(method) = message.method.clone() {
            let request = InboundRequest {
                method,
                id: message.id.clone(),
                params: message.params.clone(),
            };
            tracing::debug!(method = %request.method, id = %request.id, "Inbound request");
            if let Some(ref m) = self.metrics {
                m.record_inbound(&request.method);
            }
            self.events.emit(&TransportEvent::Request(request));
        }

        let Some(id) = message.response_id() else {
            if !is_request {
                tracing::warn!(id = %message.id, "Inbound message is neither a request nor a response");
                self.discard("uncorrelatable");
            }
            return;
        };

        let Some(entry) = self.pending.remove(id) else {
            if !is_request {
                tracing::warn!(id = %id, "Response for unknown request id");
                self.discard("unknown_id");
            }
            return;
        };

        let (status, outcome) = match message.rpc_error() {
            Some(error) => ("error", Err(Error::Rpc(error))),
            None => ("success", Ok(message.result.unwrap_or(Value::Null))),
        };

        let elapsed = entry.sent_at.elapsed().as_secs_f64();
        tracing::debug!(id = %id, method = %entry.method, status, elapsed, "Request settled");
        if let Some(ref m) = self.metrics {
            m.record_request(&entry.method, status, elapsed);
        }

        if entry.tx.send(outcome).is_err() {
            tracing::debug!(id = %id, "Requester stopped waiting");
        }
    }

    /// Reject every outstanding request with `error`
    ///
    /// Returns the number of requests rejected.
    pub fn fail_all(&self, error: Error) -> usize {
        let drained = self.pending.drain();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.tx.send(Err(error.clone()));
        }
        if count > 0 {
            tracing::info!(count, error = %error, "Rejected outstanding requests");
        }
        count
    }

    /// Requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Inbound messages dropped because they were undecodable or matched no
    /// pending request
    pub fn discarded_count(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn discard(&self, reason: &str) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        if let Some(ref m) = self.metrics {
            m.record_discarded(reason);
        }
    }
}
