//! Physical connection capability
//!
//! The buffered channel never touches sockets directly. It asks a
//! [`Connector`] for a fresh [`Link`] on every (re)connection attempt, writes
//! text payloads into the link's sink and reads text payloads from its
//! stream. When the stream ends or yields an error the link is considered
//! lost.
//!
//! [`WsConnector`] is the WebSocket implementation. Tests drive the channel
//! through in-memory connectors instead.

use futures::future::{ready, BoxFuture};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tether_core::{Error, Result};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

/// Outbound half of a link
pub type LinkSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half of a link
pub type LinkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One established physical connection
pub struct Link {
    /// Text payloads written to the peer
    pub sink: LinkSink,
    /// Text payloads received from the peer; ends when the peer closes
    pub stream: LinkStream,
}

impl Link {
    /// Box an arbitrary sink/stream pair
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<String, Error = Error> + Send + 'static,
        St: Stream<Item = Result<String>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens physical connections on demand
pub trait Connector: Send + Sync + 'static {
    /// Attempt one connection
    ///
    /// Failure is reported as `Err`; the channel decides whether to retry.
    fn connect(&self) -> BoxFuture<'static, Result<Link>>;
}

impl<C: Connector + ?Sized> Connector for Box<C> {
    fn connect(&self) -> BoxFuture<'static, Result<Link>> {
        (**self).connect()
    }
}

/// WebSocket connector over tokio-tungstenite
///
/// Text frames carry payloads. Binary, ping and pong frames are ignored and
/// a close frame ends the inbound stream.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for a `ws://` or `wss://` URL
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Link>> {
        let url = self.url.clone();
        Box::pin(async move {
            let (ws_stream, _) = connect_async(url.as_str())
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            tracing::debug!(url = %url, "WebSocket handshake complete");

            let (sink, stream) = ws_stream.split();

            let sink = sink
                .sink_map_err(|e| Error::Transport(e.to_string()))
                .with(|text: String| ready(Ok::<_, Error>(WsMessage::Text(text))));

            let stream = stream
                .take_while(|frame| ready(!matches!(frame, Ok(WsMessage::Close(_)))))
                .filter_map(|frame| {
                    ready(match frame {
                        Ok(WsMessage::Text(text)) => Some(Ok(text)),
                        Ok(_) => None,
                        Err(e) => Some(Err(Error::Transport(e.to_string()))),
                    })
                });

            Ok(Link::new(sink, stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_connector_keeps_url() {
        let connector = WsConnector::new("ws://127.0.0.1:9000");
        assert_eq!(connector.url(), "ws://127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_ws_connector_reports_refused_connection() {
        // port 1 is never listening
        let connector = WsConnector::new("ws://127.0.0.1:1");
        match connector.connect().await {
            Err(Error::Transport(msg)) => assert!(!msg.is_empty()),
            Err(other) => panic!("expected transport error, got {other:?}"),
            Ok(_) => panic!("connection to a closed port succeeded"),
        }
    }
}
