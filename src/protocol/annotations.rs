//! Annotations types for the MCP protocol

use serde::{Deserialize, Serialize};
use super::Role;

/// Optional hints telling the client who a piece of content is for and how much it matters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    /// Intended audience; may list several roles
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<Vec<Role>>,

    /// Importance from 0 (optional) to 1 (effectively required)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,

    /// ISO 8601 timestamp of the last modification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl Annotations {
    /// Create new empty annotations
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an audience role
    pub fn with_audience(mut self, role: Role) -> Self {
        self.audience.get_or_insert_with(Vec::new).push(role);
        self
    }

    /// Set the priority, clamped to `0.0..=1.0`
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority.clamp(0.0, 1.0));
        self
    }
}
