//! Elicitation: asking the user for structured input through the client

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters of `elicitation/create`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElicitParams {
    /// Shown to the user
    pub message: String,
    /// Flat JSON Schema object describing the expected answer
    pub requested_schema: Value,
}

impl ElicitParams {
    /// Build parameters from a message and a schema
    pub fn new(message: impl Into<String>, requested_schema: Value) -> Self {
        Self {
            message: message.into(),
            requested_schema,
        }
    }
}

/// What the user did with the elicitation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ElicitAction {
    Accept,
    Decline,
    Cancel,
}

/// The client's reply to `elicitation/create`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElicitResult {
    pub action: ElicitAction,
    /// Present when `action` is accept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Map<String, Value>>,
}
