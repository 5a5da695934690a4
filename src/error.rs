//! Error types for the MCP server SDK

use thiserror::Error;

use crate::protocol::json_rpc::error_codes;

/// Errors that can occur in the MCP server SDK
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The frame was JSON but not a valid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The method does not exist
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Missing or malformed request parameters
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// No static resource or template matched the URI
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// No prompt registered under the name
    #[error("Unknown prompt: {0}")]
    PromptNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The client answered a server-initiated request with an error
    #[error("Peer error {0}: {1}")]
    PeerError(i32, String, Option<serde_json::Value>),

    /// Request timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The request was cancelled by the client
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The requested feature is not supported
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// No session exists for the presented identifier
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The connection was closed
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A middleware broke the chain contract (e.g. called `next` twice)
    #[error("Middleware misuse: {0}")]
    MiddlewareMisuse(String),

    /// Any other failure raised by a tool, resource or prompt handler
    #[error("{0}")]
    Handler(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

impl Error {
    /// Shorthand for a handler failure with a plain message
    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }

    /// JSON-RPC error code used when this error becomes an error response
    pub fn code(&self) -> i32 {
        match self {
            Error::ParseError(_) | Error::JsonError(_) => error_codes::PARSE_ERROR,
            Error::InvalidRequest(_) | Error::SessionNotFound(_) => error_codes::INVALID_REQUEST,
            Error::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Error::InvalidParams(_) | Error::PromptNotFound(_) => error_codes::INVALID_PARAMS,
            Error::ResourceNotFound(_) => error_codes::RESOURCE_NOT_FOUND,
            Error::PeerError(code, _, _) => *code,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// Optional structured data attached to an error response
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            Error::ResourceNotFound(uri) => Some(serde_json::json!({ "uri": uri })),
            Error::PeerError(_, _, data) => data.clone(),
            _ => None,
        }
    }

    /// Whether the error signals a bug in middleware rather than a handler failure
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Error::MiddlewareMisuse(_))
    }
}

/// Result type using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}
