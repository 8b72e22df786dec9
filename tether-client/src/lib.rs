//! Resilient JSON-RPC 2.0 client
//!
//! A tether client turns one unreliable, message-oriented duplex connection
//! into a request/response API that survives disconnects:
//!
//! - **Requests** return futures settled by the matching response
//! - **Notifications** are fire-and-forget (`"id": 0`)
//! - **Inbound calls** from the peer are delivered to listeners
//! - **Buffering**: anything sent before the connection opens (or while it
//!   is reconnecting) is queued and flushed in order
//! - **Reconnection** with exponential backoff, reset after every success
//! - **Observability** through `tracing` and optional OpenTelemetry metrics
//!
//! # Architecture
//!
//! ```text
//! caller ─► TetherClient ─► Correlator ─► BufferedChannel ─► Connector ─► peer
//!                 ▲              │ ▲              │
//!                 └── events ◄───┘ └─── inbound ◄─┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether_client::ClientBuilder;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new("ws://localhost:8080").build()?;
//!
//!     // queued until the connection opens
//!     let greeting = client.request::<_, String>("hello", json!({"name": "tether"}));
//!     client.notify("log", json!(["starting"]))?;
//!
//!     let answerer = client.clone();
//!     client.on_request(move |req| {
//!         if req.method == "ping" && !req.is_notification() {
//!             let _ = answerer.respond(req.id.clone(), "pong");
//!         }
//!     });
//!
//!     println!("{}", greeting.await?);
//!     client.close();
//!     Ok(())
//! }
//! ```

mod backoff;
mod channel;
mod client;
mod client_builder;
mod connector;
mod correlator;
mod metrics;

pub use backoff::{
    ExponentialBackoff, NoReconnect, ReconnectionStrategy, DEFAULT_BASE_INTERVAL, DEFAULT_DECAY,
    DEFAULT_MAX_INTERVAL,
};
pub use channel::{BufferedChannel, ConnectionState};
pub use client::TetherClient;
pub use client_builder::{ClientBuilder, PendingPolicy};
pub use connector::{Connector, Link, LinkSink, LinkStream, WsConnector};
pub use correlator::{Correlator, OutboundSink, ResponseFuture};
pub use metrics::ClientMetrics;
