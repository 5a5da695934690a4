//! Roots: filesystem boundaries exposed by the client (`roots/list`)

use serde::{Deserialize, Serialize};

/// A directory or file the client lets the server operate on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Root {
    /// Must start with `file://`
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The client's reply to `roots/list`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ListRootsResult {
    pub roots: Vec<Root>,
}
