//! Utility functions and types for the MCP SDK
//!
//! This module contains utility functions and types used throughout the MCP SDK.

pub mod base64;
pub mod uri;

// Re-export commonly used utilities
pub use self::base64::{decode_base64, encode_base64};
pub use self::uri::UriTemplate;
