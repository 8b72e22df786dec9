//! Error types for tether
//!
//! Two layers of errors live here:
//!
//! - **Error**: everything a caller of the client can observe (thiserror)
//! - **RpcError**: the structured error object a peer puts in the `error`
//!   member of a JSON-RPC 2.0 response
//!
//! # Taxonomy
//!
//! - **RPC-level**: `Error::Rpc` rejects exactly one pending request with the
//!   peer's error object. It has no effect on the connection.
//! - **Transport-level**: `Transport`, `Disconnected`, `ConnectionClosed`,
//!   `ReconnectExhausted`. These are reported through lifecycle events and,
//!   depending on the pending policy, may reject outstanding requests.
//! - **Local**: `Serialization`, `Timeout`, `Internal`.
//!
//! # Reserved Error Codes
//!
//! - `-32700`: Parse error
//! - `-32600`: Invalid request
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error
//!
//! # Examples
//!
//! ```rust
//! use tether_core::{Error, RpcError};
//!
//! let error: Error = RpcError::method_not_found("frobnicate").into();
//! assert_eq!(error.rpc_code(), Some(-32601));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used throughout the tether crates
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the tether client
///
/// `Clone` so one failure can settle many pending requests at once (for
/// example when the channel closes with requests outstanding).
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The peer answered the request with an error object
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// A value could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The physical connection reported a failure
    ///
    /// Non-fatal: the channel keeps reconnecting according to its strategy.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request did not settle before its deadline
    #[error("Request timeout")]
    Timeout,

    /// The channel is closed and will not reconnect
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection dropped while the request was outstanding
    ///
    /// Only produced under `PendingPolicy::RejectOnDisconnect`.
    #[error("Disconnected before a response arrived")]
    Disconnected,

    /// The reconnection strategy gave up
    #[error("Reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempt counter at the moment the strategy gave up
        attempts: u32,
    },

    /// Invariant violation inside the client
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The peer-supplied error code, if this is an RPC-level failure
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Error::Rpc(err) => Some(err.code),
            _ => None,
        }
    }

    /// True for failures caused by the connection rather than the peer's answer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::ConnectionClosed
                | Error::Disconnected
                | Error::ReconnectExhausted { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// JSON-RPC 2.0 error object
///
/// Appears in the `error` member of a response. A request future rejected by
/// the peer carries this exact object inside `Error::Rpc`.
///
/// ```rust
/// use tether_core::RpcError;
/// use serde_json::json;
///
/// let err = RpcError::with_data(1001, "Insufficient funds", json!({"balance": 50}));
/// assert_eq!(err.code, 1001);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code
    pub code: i64,

    /// Short description of the error
    pub message: String,

    /// Optional structured detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Create an error object with a code and message
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error object carrying additional data
    pub fn with_data(code: i64, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Parse error (-32700)
    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    /// Invalid request (-32600)
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(-32600, msg)
    }

    /// Method not found (-32601)
    ///
    /// Handy when an inbound-request listener declines a call it does not
    /// implement.
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(-32601, format!("Method not found: {}", method.into()))
    }

    /// Invalid params (-32602)
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }

    /// Internal error (-32603)
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}
