//! Encoding and decoding of wire payloads
//!
//! One JSON object per payload. Batches are not part of this protocol, so an
//! inbound JSON array is rejected as an invalid request rather than unpacked.
//!
//! ```rust
//! use tether_core::{codec, Notification, OutboundMessage};
//!
//! let text = codec::encode(&OutboundMessage::from(Notification::new("ping", None))).unwrap();
//! let back = codec::decode(&text).unwrap();
//! assert_eq!(back.method.as_deref(), Some("ping"));
//! ```

use crate::error::{Error, Result, RpcError};
use crate::types::Message;
use serde::Serialize;

/// Serialize any outbound value to a JSON string
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode one inbound payload
///
/// # Errors
///
/// - `Error::Rpc(-32700)` if the payload is not JSON
/// - `Error::Rpc(-32600)` if it is JSON but not a single message object
pub fn decode(data: &str) -> Result<Message> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|_| Error::Rpc(RpcError::parse_error()))?;

    if value.is_array() {
        return Err(Error::Rpc(RpcError::invalid_request("Batches are not supported")));
    }
    if !value.is_object() {
        return Err(Error::Rpc(RpcError::invalid_request("Message must be a JSON object")));
    }

    serde_json::from_value(value).map_err(|e| Error::Rpc(RpcError::invalid_request(e.to_string())))
}
