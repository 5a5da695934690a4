//! Base64 encoding and decoding utilities
//!
//! Blob contents use the standard alphabet. Pagination cursors use the URL-safe
//! alphabet without padding so they survive being pasted into query strings.

use ::base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use ::base64::Engine;

use crate::error::Error;

/// Encode data as base64
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode base64 data
pub fn decode_base64(data: &str) -> Result<Vec<u8>, Error> {
    STANDARD
        .decode(data)
        .map_err(|e| Error::ParseError(format!("Failed to decode base64: {}", e)))
}

/// Encode an opaque token with the URL-safe alphabet
pub fn encode_token(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode a token produced by [`encode_token`]
pub fn decode_token(token: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(token).ok()
}
