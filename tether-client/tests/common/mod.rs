//! Common test utilities for tether-client integration tests
//!
//! A small WebSocket peer that records what the client writes, answers
//! through a handler, pushes unsolicited messages and can drop its
//! connections on demand.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

type Handler = Arc<dyn Fn(String) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    Kick,
}

/// Mock WebSocket peer
pub struct MockWsServer {
    addr: SocketAddr,
    control: broadcast::Sender<Control>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
    message_rx: mpsc::UnboundedReceiver<String>,
    accepted: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Peer that never answers
    pub async fn new() -> Self {
        Self::with_handler(|_| None).await
    }

    /// Peer that answers each text frame with the handler's output, if any
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(String) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, Arc::new(handler))
    }

    /// Peer listening on a specific address, e.g. to restart on the same port
    pub async fn bind_with_handler<F>(addr: SocketAddr, handler: F) -> Self
    where
        F: Fn(String) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::serve(listener, Arc::new(handler))
    }

    fn serve(listener: TcpListener, handler: Handler) -> Self {
        let addr = listener.local_addr().unwrap();
        let (control, _) = broadcast::channel(64);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let (msg_tx, message_rx) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));

        let accept_control = control.clone();
        let accept_count = Arc::clone(&accepted);
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        if let Ok((stream, _)) = accepted {
                            accept_count.fetch_add(1, Ordering::SeqCst);
                            // subscribe before the handshake so nothing pushed
                            // after the client sees Open is missed
                            let control_rx = accept_control.subscribe();
                            tokio::spawn(connection(
                                stream,
                                Arc::clone(&handler),
                                control_rx,
                                msg_tx.clone(),
                            ));
                        }
                    }
                }
            }
            // connections accepted while shutting down missed the first kick
            let _ = accept_control.send(Control::Kick);
        });

        Self {
            addr,
            control,
            shutdown_tx: Some(shutdown_tx),
            accept_task: Some(accept_task),
            message_rx,
            accepted,
        }
    }

    /// WebSocket URL for this peer
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Bound socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Next text frame the client wrote, or None after five seconds
    pub async fn next_message(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next frame the client wrote, parsed as JSON
    pub async fn next_json(&mut self) -> Value {
        let text = self.next_message().await.expect("no message from client");
        serde_json::from_str(&text).unwrap()
    }

    /// Send a frame to every live connection
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.control.send(Control::Push(text.into()));
    }

    /// Close every live connection; the listener keeps accepting
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::Kick);
    }

    /// Stop listening and close every live connection
    pub async fn shutdown(mut self) {
        self.drop_connections();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
    }
}

async fn connection(
    stream: TcpStream,
    handler: Handler,
    mut control: broadcast::Receiver<Control>,
    seen: mpsc::UnboundedSender<String>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = seen.send(text.clone());
                    if let Some(reply) = handler(text) {
                        if write.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            control = control.recv() => match control {
                Ok(Control::Push(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Control::Kick) | Err(_) => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }
}

/// Poll `condition` every 10 ms; panics after five seconds
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting until {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Method of a request or notification frame
pub fn method_of(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("method")?.as_str().map(str::to_string)
}

/// Numeric id of a frame
pub fn id_of(text: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("id")?.as_u64()
}

/// Params of a frame, or null
pub fn params_of(text: &str) -> Value {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("params").cloned())
        .unwrap_or(Value::Null)
}

/// A JSON-RPC success response
pub fn mock_response(id: u64, result: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id
    })
    .to_string()
}

/// A JSON-RPC error response
pub fn mock_error_response(id: u64, code: i64, message: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message
        },
        "id": id
    })
    .to_string()
}

/// A request initiated by the peer
pub fn mock_request(id: &str, method: &str, params: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": id
    })
    .to_string()
}

/// A notification initiated by the peer
pub fn mock_notification(method: &str, params: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 0
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_creation() {
        let server = MockWsServer::new().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        assert_eq!(server.connections(), 0);
        server.shutdown().await;
    }

    #[test]
    fn test_frame_helpers() {
        let request = mock_request("abc", "ping", json!([1]));
        assert_eq!(method_of(&request).as_deref(), Some("ping"));
        assert_eq!(id_of(&request), None);
        assert_eq!(params_of(&request), json!([1]));

        let response = mock_response(7, json!(null));
        assert_eq!(id_of(&response), Some(7));
        assert_eq!(method_of(&response), None);
    }

    #[test]
    fn test_mock_notification_uses_zero_id() {
        let notification = mock_notification("event", json!({"data": "test"}));
        assert_eq!(id_of(&notification), Some(0));
        assert!(notification.contains("\"method\":\"event\""));
    }
}
