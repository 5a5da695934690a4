//! Argument completion (`completion/complete`)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Most values a completion result may carry
pub const MAX_COMPLETION_VALUES: usize = 100;

/// What is being completed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CompletionReference {
    /// An argument of a prompt
    #[serde(rename = "ref/prompt")]
    Prompt {
        /// Prompt name
        name: String,
    },
    /// A variable of a resource template
    #[serde(rename = "ref/resource")]
    Resource {
        /// Template or URI
        uri: String,
    },
}

/// The argument being typed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionArgument {
    pub name: String,
    pub value: String,
}

/// Values of arguments already filled in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CompletionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, String>>,
}

/// Parameters of `completion/complete`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompleteParams {
    #[serde(rename = "ref")]
    pub reference: CompletionReference,
    pub argument: CompletionArgument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<CompletionContext>,
}

/// Suggested values
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

/// Result of `completion/complete`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CompleteResult {
    pub completion: Completion,
}

impl CompleteResult {
    /// Build a result, truncating to [`MAX_COMPLETION_VALUES`] and reporting the overflow
    pub fn from_values(values: Vec<String>) -> Self {
        let total = values.len();
        let mut values = values;
        values.truncate(MAX_COMPLETION_VALUES);
        Self {
            completion: Completion {
                has_more: Some(total > values.len()),
                total: Some(total),
                values,
            },
        }
    }
}
