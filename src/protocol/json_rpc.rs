//! JSON-RPC message types for the Model Context Protocol
//!
//! Parsing never panics or returns early with `?` on untrusted input: every
//! frame yields either a typed [`JSONRPCMessage`] or a [`ParseFailure`] that
//! can be turned straight into an error response.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::RequestId;
use crate::error::Error;

/// JSON-RPC version used by the MCP protocol
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes
pub mod error_codes {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;

    /// MCP: the requested resource does not exist
    pub const RESOURCE_NOT_FOUND: i32 = -32002;
}

/// A JSON-RPC message that can be sent or received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JSONRPCMessage {
    /// A request that expects a response
    Request(JSONRPCRequest),
    /// A notification that does not expect a response
    Notification(JSONRPCNotification),
    /// A successful response to a request
    Response(JSONRPCResponse),
    /// An error response to a request
    Error(JSONRPCError),
}

/// The structural shape of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `id` and `method`
    Request,
    /// `method` without `id`
    Notification,
    /// `id` and `result`
    Response,
    /// `error`, with an id or null
    Error,
}

impl JSONRPCMessage {
    /// Classify this message
    pub fn kind(&self) -> MessageKind {
        match self {
            JSONRPCMessage::Request(_) => MessageKind::Request,
            JSONRPCMessage::Notification(_) => MessageKind::Notification,
            JSONRPCMessage::Response(_) => MessageKind::Response,
            JSONRPCMessage::Error(_) => MessageKind::Error,
        }
    }

    /// Whether this is a request
    pub fn is_request(&self) -> bool {
        self.kind() == MessageKind::Request
    }

    /// Whether this is a notification
    pub fn is_notification(&self) -> bool {
        self.kind() == MessageKind::Notification
    }

    /// Whether this is a reply (success or error), i.e. carries no method
    pub fn is_reply(&self) -> bool {
        matches!(self.kind(), MessageKind::Response | MessageKind::Error)
    }

    /// The correlation id, if the message carries one
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JSONRPCMessage::Request(r) => Some(&r.id),
            JSONRPCMessage::Notification(_) => None,
            JSONRPCMessage::Response(r) => Some(&r.id),
            JSONRPCMessage::Error(e) => e.id.as_ref(),
        }
    }

    /// The method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            JSONRPCMessage::Request(r) => Some(&r.method),
            JSONRPCMessage::Notification(n) => Some(&n.method),
            _ => None,
        }
    }
}

/// Classify a raw JSON object by which members are present.
///
/// Returns `None` when the object has none of the recognised shapes, or
/// carries more than one of `method`, `result` and `error`.
pub fn classify(object: &Map<String, Value>) -> Option<MessageKind> {
    let has_id = object.get("id").map_or(false, |v| !v.is_null());
    let members = ["method", "result", "error"]
        .iter()
        .filter(|key| object.contains_key(**key))
        .count();
    if members != 1 {
        return None;
    }
    if object.contains_key("method") {
        return Some(if has_id {
            MessageKind::Request
        } else {
            MessageKind::Notification
        });
    }
    if object.contains_key("error") {
        return Some(MessageKind::Error);
    }
    if has_id && object.contains_key("result") {
        return Some(MessageKind::Response);
    }
    None
}

/// A JSON-RPC request that expects a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JSONRPCRequest {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Request ID
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Optional parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JSONRPCRequest {
    /// Create a new JSON-RPC request
    pub fn new<I: Into<RequestId>>(id: I, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC notification that does not expect a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JSONRPCNotification {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Optional parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JSONRPCNotification {
    /// Create a new JSON-RPC notification
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A successful JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JSONRPCResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Request ID that this is responding to
    pub id: RequestId,
    /// Result value
    pub result: Value,
}

impl JSONRPCResponse {
    /// Create a new JSON-RPC response
    pub fn new<I: Into<RequestId>>(id: I, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result,
        }
    }
}

/// A JSON-RPC error response.
///
/// `id` serializes as `null` when the originating request id is unknown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JSONRPCError {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Request ID that this is responding to
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Error information
    pub error: JSONRPCErrorInfo,
}

impl JSONRPCError {
    /// Create a new JSON-RPC error
    pub fn new(id: Option<RequestId>, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JSONRPCErrorInfo {
                code,
                message: message.into(),
                data,
            },
        }
    }

    /// Build an error response from an SDK error
    pub fn from_error(id: Option<RequestId>, error: &Error) -> Self {
        Self::new(id, error.code(), error.to_string(), error.data())
    }
}

/// JSON-RPC error information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JSONRPCErrorInfo {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Optional additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Why a frame could not be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailureKind {
    /// The text is not JSON
    InvalidJson,
    /// The JSON is not an object (arrays included: batches are unsupported)
    NotAnObject,
    /// `jsonrpc` is missing or not "2.0"
    InvalidVersion,
    /// The object matches none of the message shapes, or its members have the wrong types
    InvalidShape,
}

/// A frame that failed to parse
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    /// What went wrong
    pub kind: ParseFailureKind,
    /// Human readable reason
    pub message: String,
    /// The frame's id, when one could be read
    pub id: Option<RequestId>,
}

impl ParseFailure {
    fn new(kind: ParseFailureKind, message: impl Into<String>, id: Option<RequestId>) -> Self {
        Self {
            kind,
            message: message.into(),
            id,
        }
    }

    /// JSON-RPC code for this failure
    pub fn code(&self) -> i32 {
        match self.kind {
            ParseFailureKind::InvalidJson => error_codes::PARSE_ERROR,
            _ => error_codes::INVALID_REQUEST,
        }
    }

    /// The error response to send back for this frame
    pub fn to_error_response(&self) -> JSONRPCMessage {
        JSONRPCMessage::Error(JSONRPCError::new(self.id.clone(), self.code(), self.message.clone(), None))
    }
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Parse one raw frame into a typed message
pub fn parse_message(raw: &str) -> Result<JSONRPCMessage, ParseFailure> {
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        ParseFailure::new(ParseFailureKind::InvalidJson, format!("Invalid JSON: {}", e), None)
    })?;
    parse_value(value)
}

/// Parse an already-decoded JSON value into a typed message
pub fn parse_value(value: Value) -> Result<JSONRPCMessage, ParseFailure> {
    let object = match value {
        Value::Object(object) => object,
        _ => {
            return Err(ParseFailure::new(
                ParseFailureKind::NotAnObject,
                "Message must be a JSON object",
                None,
            ))
        }
    };

    let id = object
        .get("id")
        .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok());

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(ParseFailure::new(
            ParseFailureKind::InvalidVersion,
            format!("Invalid or missing jsonrpc version (expected \"{}\")", JSONRPC_VERSION),
            id,
        ));
    }

    let kind = classify(&object).ok_or_else(|| {
        ParseFailure::new(
            ParseFailureKind::InvalidShape,
            "Message is not a request, notification, response or error",
            id.clone(),
        )
    })?;

    let value = Value::Object(object);
    let parsed = match kind {
        MessageKind::Request => serde_json::from_value(value).map(JSONRPCMessage::Request),
        MessageKind::Notification => serde_json::from_value(value).map(JSONRPCMessage::Notification),
        MessageKind::Response => serde_json::from_value(value).map(JSONRPCMessage::Response),
        MessageKind::Error => serde_json::from_value(value).map(JSONRPCMessage::Error),
    };

    parsed.map_err(|e| ParseFailure::new(ParseFailureKind::InvalidShape, format!("Malformed message: {}", e), id))
}

/// Serialize a message to its single-line wire form
pub fn serialize_message(message: &JSONRPCMessage) -> Result<String, Error> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(message: JSONRPCMessage) {
        let wire = serialize_message(&message).unwrap();
        assert_eq!(parse_message(&wire).unwrap(), message);
    }

    #[test]
    fn test_parse_is_left_inverse_of_serialize() {
        roundtrip(JSONRPCMessage::Request(JSONRPCRequest::new(1, "ping", None)));
        roundtrip(JSONRPCMessage::Request(JSONRPCRequest::new(
            "abc",
            "tools/call",
            Some(json!({"name": "add", "arguments": {"a": 1}})),
        )));
        roundtrip(JSONRPCMessage::Notification(JSONRPCNotification::new("notifications/initialized", None)));
        roundtrip(JSONRPCMessage::Response(JSONRPCResponse::new(3, json!({}))));
        roundtrip(JSONRPCMessage::Error(JSONRPCError::new(None, -32700, "bad", None)));
        roundtrip(JSONRPCMessage::Error(JSONRPCError::new(
            Some(9.into()),
            -32603,
            "boom",
            Some(json!({"detail": true})),
        )));
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let wire = serialize_message(&JSONRPCMessage::Request(JSONRPCRequest::new(1, "ping", None))).unwrap();
        assert!(!wire.contains("params"));

        let wire = serialize_message(&JSONRPCMessage::Error(JSONRPCError::new(None, -32700, "bad", None))).unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert!(value["error"].get("data").is_none());
    }

    #[test]
    fn test_malformed_inputs_fail_without_panicking() {
        let failure = parse_message("not json").unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidJson);
        assert_eq!(failure.code(), error_codes::PARSE_ERROR);

        let failure = parse_message(r#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::NotAnObject);

        let failure = parse_message(r#"{"jsonrpc":"1.0","id":4,"method":"ping"}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidVersion);
        assert_eq!(failure.id, Some(RequestId::Integer(4)));

        let failure = parse_message(r#"{"id":4,"method":"ping"}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidVersion);

        let failure = parse_message(r#"{"jsonrpc":"2.0","id":4}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidShape);

        let failure = parse_message(r#"{"jsonrpc":"2.0","id":4,"method":12}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidShape);

        let failure = parse_message(r#"{"jsonrpc":"2.0","id":1,"method":"ping","result":{}}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidShape);
        assert_eq!(failure.code(), error_codes::INVALID_REQUEST);
        assert_eq!(failure.id, Some(RequestId::Integer(1)));

        let failure = parse_message(
            r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":-32603,"message":"x"}}"#,
        )
        .unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidShape);

        let failure = parse_message(r#"{"jsonrpc":"2.0","method":"n","error":{"code":1,"message":"x"}}"#).unwrap_err();
        assert_eq!(failure.kind, ParseFailureKind::InvalidShape);
    }

    #[test]
    fn test_distinct_failure_messages() {
        let a = parse_message("{").unwrap_err().message;
        let b = parse_message("3").unwrap_err().message;
        let c = parse_message(r#"{"method":"x"}"#).unwrap_err().message;
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_classification() {
        let reply = parse_message(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#).unwrap();
        assert!(reply.is_reply());
        assert_eq!(reply.kind(), MessageKind::Response);
        assert_eq!(reply.method(), None);

        let error = parse_message(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-1,"message":"x"}}"#).unwrap();
        assert_eq!(error.kind(), MessageKind::Error);
        assert_eq!(error.id(), None);

        let note = parse_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(note.is_notification());
        assert_eq!(note.id(), None);
    }

    #[test]
    fn test_failure_to_error_response() {
        let failure = parse_message("{{").unwrap_err();
        match failure.to_error_response() {
            JSONRPCMessage::Error(e) => {
                assert_eq!(e.id, None);
                assert_eq!(e.error.code, error_codes::PARSE_ERROR);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
