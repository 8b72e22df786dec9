//! Wire types, codec and shared capabilities for tether
//!
//! tether is a bidirectional JSON-RPC 2.0 client over a persistent,
//! self-healing connection. This crate holds the parts that do not depend on
//! any transport:
//!
//! - **Types**: requests, notifications, responses and the inbound envelope
//! - **Codec**: one JSON object per payload, in both directions
//! - **Errors**: the client-facing `Error` and the peer's `RpcError`
//! - **Events**: a small name-keyed emitter used for lifecycle notifications
//! - **Observability**: optional OpenTelemetry export for `tracing` output
//!
//! # Correlation ids
//!
//! Outbound request ids are [`RequestId`]s, which can never be zero. Outbound
//! notifications carry [`NoCorrelation`], which always serializes as `0`, so
//! the sentinel cannot be confused with a real id at the type level.
//!
//! ```rust
//! use tether_core::{codec, OutboundMessage, Request, RequestId};
//! use serde_json::json;
//!
//! let id = RequestId::new(1).unwrap();
//! let request = Request::new("add", Some(json!({"a": 5, "b": 3})), id);
//! let text = codec::encode(&OutboundMessage::from(request)).unwrap();
//!
//! let echoed = codec::decode(&text).unwrap();
//! assert_eq!(echoed.method.as_deref(), Some("add"));
//! ```

pub mod codec;
pub mod error;
pub mod events;
pub mod observability;
pub mod types;

pub use error::{Error, Result, RpcError};
pub use events::{Emitter, Event, ListenerId, TransportEvent};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{
    Id, InboundRequest, Message, NoCorrelation, Notification, OutboundMessage, Request, RequestId,
    Response,
};
