//! Protocol types and definitions for the Model Context Protocol (MCP)
//!
//! This module contains the wire envelopes, method names and typed
//! parameter/result payloads the server speaks. Nothing in here performs I/O.

pub mod json_rpc;
pub mod messages;
pub mod resources;
pub mod prompts;
pub mod tools;
pub mod sampling;
pub mod annotations;
pub mod logging;
pub mod completion;
pub mod roots;
pub mod elicitation;

use serde::{Deserialize, Serialize};

/// Latest protocol version supported by this library
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Every protocol version the server will agree to during initialization
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Pick the version to answer an initialize request with.
///
/// The client's requested version is echoed back when supported; otherwise the
/// server proposes its latest version and lets the client decide.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v).copied())
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// Describes the name and version of an MCP implementation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Implementation {
    /// Name of the implementation
    pub name: String,
    /// Version of the implementation
    pub version: String,
}

impl Implementation {
    /// Create a new Implementation
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// The sender or recipient of messages and data in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A user or human participant
    User,
    /// An AI assistant
    Assistant,
}

/// An opaque token used to represent a cursor for pagination.
pub type Cursor = String;

/// A progress token, used to associate progress notifications with the original request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ProgressToken {
    /// String token
    String(String),
    /// Integer token
    Integer(i64),
}

/// A unique request ID for JSON-RPC messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// String ID
    String(String),
    /// Integer ID
    Integer(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Integer(i) => write!(f, "{}", i),
        }
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<i64> for RequestId {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for RequestId {
    fn from(i: i32) -> Self {
        Self::Integer(i as i64)
    }
}

// Re-export common types for convenience
pub use self::annotations::Annotations;
pub use self::json_rpc::{
    parse_message, serialize_message, JSONRPCError, JSONRPCMessage, JSONRPCNotification,
    JSONRPCRequest, JSONRPCResponse, MessageKind, ParseFailure,
};
pub use self::prompts::{GetPromptResult, Prompt, PromptArgument, PromptMessage};
pub use self::resources::{ReadResourceResult, Resource, ResourceContent, ResourceTemplate};
pub use self::sampling::{AudioContent, ImageContent, TextContent};
pub use self::tools::{CallToolResult, Tool, ToolCallContent};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_protocol_version() {
        assert_eq!(negotiate_protocol_version(Some("2025-03-26")), "2025-03-26");
        assert_eq!(negotiate_protocol_version(Some("1999-01-01")), LATEST_PROTOCOL_VERSION);
        assert_eq!(negotiate_protocol_version(None), LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn test_request_id_untagged() {
        let id: RequestId = serde_json::from_str("7").unwrap();
        assert_eq!(id, RequestId::Integer(7));
        let id: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.to_string(), "abc");
    }
}
