//! JSON-RPC 2.0 wire types
//!
//! Outbound messages are strongly typed: a [`Request`] always carries a
//! [`RequestId`], a [`Notification`] never does. Inbound traffic arrives as a
//! permissive [`Message`] envelope and is classified by shape, because a peer
//! may send requests, notifications and responses over the same channel.
//!
//! # Identifiers
//!
//! Request identifiers are positive integers. On the wire a notification is
//! written with `"id": 0`; zero is the "no correlation" sentinel, and since
//! [`RequestId`] wraps a `NonZeroU64` a real request can never be given it.
//!
//! ```rust
//! use tether_core::{Notification, Request, RequestId};
//! use serde_json::json;
//!
//! let id = RequestId::new(1).unwrap();
//! let req = Request::new("foo", Some(json!({"a": 1})), id);
//! assert_eq!(
//!     serde_json::to_string(&req).unwrap(),
//!     r#"{"jsonrpc":"2.0","method":"foo","id":1,"params":{"a":1}}"#
//! );
//!
//! let notif = Notification::new("ping", None);
//! assert_eq!(
//!     serde_json::to_string(&notif).unwrap(),
//!     r#"{"jsonrpc":"2.0","method":"ping","id":0}"#
//! );
//! ```

use crate::error::RpcError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::num::NonZeroU64;

/// Protocol version tag written on every outbound message
pub const JSONRPC_VERSION: &str = "2.0";

/// Identifier of an outgoing request
///
/// Process-local, assigned in strictly increasing order by the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(NonZeroU64);

impl RequestId {
    /// Wrap a raw identifier; `None` for the zero sentinel
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// The raw integer value
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.get())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u64::deserialize(deserializer)?;
        RequestId::new(raw)
            .ok_or_else(|| serde::de::Error::custom("request id 0 is reserved for notifications"))
    }
}

/// Identifier as written by the peer on an inbound message
///
/// The peer is free to use its own id scheme for the calls it initiates, so
/// strings and `null` are accepted. Only a positive integer can correlate
/// with one of our requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Integer identifier
    Number(i64),
    /// String identifier
    String(String),
    /// Missing or explicit `null`
    #[default]
    Null,
    /// Any other JSON value (fractions, integers beyond `i64`), echoed back
    /// unchanged in replies
    Other(serde_json::Value),
}

impl Id {
    /// The correlatable request id, if this is a positive integer
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Id::Number(n) if *n > 0 => RequestId::new(*n as u64),
            _ => None,
        }
    }

    /// True for the notification sentinel (`0`) and for a missing id
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Id::Number(0) | Id::Null)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "\"{}\"", s),
            Id::Null => write!(f, "null"),
            Id::Other(v) => write!(f, "{}", v),
        }
    }
}

impl From<RequestId> for Id {
    fn from(id: RequestId) -> Self {
        Id::Number(id.get() as i64)
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

/// The `"id": 0` member of an outbound notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoCorrelation;

impl Serialize for NoCorrelation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(0)
    }
}

impl<'de> Deserialize<'de> for NoCorrelation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<u64>::deserialize(deserializer)? {
            None | Some(0) => Ok(NoCorrelation),
            Some(other) => Err(serde::de::Error::custom(format!(
                "notification id must be 0, got {}",
                other
            ))),
        }
    }
}

/// Outbound request expecting a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Remote method name
    pub method: String,
    /// Correlation identifier
    pub id: RequestId,
    /// Optional parameters, omitted from the wire when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    /// Build a request with the protocol version tag filled in
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            id,
            params,
        }
    }
}

/// Outbound fire-and-forget call
///
/// Never registered for correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Remote method name
    pub method: String,
    /// Written as `0`
    #[serde(default)]
    pub id: NoCorrelation,
    /// Optional parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    /// Build a notification with the protocol version tag filled in
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            id: NoCorrelation,
            params,
        }
    }
}

/// Outbound reply to a request the peer initiated
///
/// Exactly one of `result` and `error` is set when built through
/// [`Response::success`] or [`Response::error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Always "2.0"
    pub jsonrpc: String,
    /// The peer's id for the call being answered
    pub id: Id,
    /// Success payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Successful reply
    pub fn success(id: Id, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error reply
    pub fn error(id: Id, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Anything the client writes to the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// Correlated call
    Request(Request),
    /// Uncorrelated call
    Notification(Notification),
    /// Reply to a peer-initiated call
    Response(Response),
}

impl OutboundMessage {
    /// Method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            OutboundMessage::Request(r) => Some(&r.method),
            OutboundMessage::Notification(n) => Some(&n.method),
            OutboundMessage::Response(_) => None,
        }
    }
}

impl From<Request> for OutboundMessage {
    fn from(r: Request) -> Self {
        OutboundMessage::Request(r)
    }
}

impl From<Notification> for OutboundMessage {
    fn from(n: Notification) -> Self {
        OutboundMessage::Notification(n)
    }
}

impl From<Response> for OutboundMessage {
    fn from(r: Response) -> Self {
        OutboundMessage::Response(r)
    }
}

/// Inbound envelope before classification
///
/// Every member is optional so that nothing the peer sends fails to decode
/// merely for being unusual; the correlator decides what each shape means.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version tag, not enforced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Present on peer-initiated requests and notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Missing ids decode as `Id::Null`
    #[serde(default)]
    pub id: Id,
    /// Call parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Success payload of a response; `null` decodes as `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure payload of a response, kept raw until the correlator reads it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl Message {
    /// Carries a method name, so the peer is calling us
    pub fn is_request(&self) -> bool {
        self.method.is_some()
    }

    /// The request id this message could answer, if any
    ///
    /// Independent of `method`: a peer request reusing one of our ids is
    /// also a response candidate.
    pub fn response_id(&self) -> Option<RequestId> {
        self.id.request_id()
    }

    /// The `error` member as a structured error
    ///
    /// An object that is not a valid error object becomes an internal error
    /// (`-32603`) carrying the raw value as `data`.
    pub fn rpc_error(&self) -> Option<RpcError> {
        let raw = self.error.as_ref()?;
        Some(
            serde_json::from_value::<RpcError>(raw.clone()).unwrap_or_else(|_| RpcError {
                data: Some(raw.clone()),
                ..RpcError::internal_error("Malformed error object")
            }),
        )
    }
}

/// A call initiated by the peer, as handed to inbound-request listeners
///
/// The client does not answer these; a listener that wants to reply uses the
/// `id` with the client's `respond` methods.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    /// Method the peer wants invoked
    pub method: String,
    /// The peer's identifier; sentinel for notifications
    pub id: Id,
    /// Call parameters
    pub params: Option<serde_json::Value>,
}

impl InboundRequest {
    /// True when the peer expects no reply
    pub fn is_notification(&self) -> bool {
        self.id.is_sentinel()
    }
}

impl TryFrom<Message> for InboundRequest {
    type Error = Message;

    fn try_from(message: Message) -> Result<Self, Message> {
        match message.method {
            Some(method) => Ok(InboundRequest {
                method,
                id: message.id,
                params: message.params,
            }),
            None => Err(message),
        }
    }
}
