//! Protocol types and definitions for MCP tools
//!
//! This module contains types for working with tools in the MCP protocol,
//! including tool definitions, arguments, and call results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::resources::EmbeddedResource;
use super::sampling::{AudioContent, ImageContent, TextContent};
use super::Cursor;

/// Definition for a tool the client can call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// The name of the tool.
    pub name: String,
    /// A human-readable description of the tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A JSON Schema object defining the expected parameters for the tool.
    pub input_schema: ToolInputSchema,
    /// Optional additional tool information.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
}

impl Tool {
    /// Create a tool that takes an empty object
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema: ToolInputSchema::default(),
            annotations: None,
        }
    }

    /// Declare a property of the input object
    pub fn with_property(mut self, name: impl Into<String>, schema: Value, required: bool) -> Self {
        let name = name.into();
        if required {
            self.input_schema.required.get_or_insert_with(Vec::new).push(name.clone());
        }
        self.input_schema
            .properties
            .get_or_insert_with(Map::new)
            .insert(name, schema);
        self
    }

    /// Add annotations to the tool
    pub fn with_annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }
}

/// Input schema for a tool. Validation is the registering application's concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInputSchema {
    /// Always "object"
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl Default for ToolInputSchema {
    fn default() -> Self {
        Self {
            r#type: "object".to_string(),
            properties: None,
            required: None,
        }
    }
}

/// Behavioural hints about a tool. Clients must not trust these from untrusted servers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// The tool does not modify its environment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    /// The tool may perform destructive updates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    /// Repeated calls with the same arguments have no further effect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
    /// The tool talks to an open world of external entities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
}

impl ToolAnnotations {
    /// Mark the tool as read-only
    pub fn read_only(mut self) -> Self {
        self.read_only_hint = Some(true);
        self
    }
}

/// The server's response to a tools/list request from the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Available tools
    pub tools: Vec<Tool>,
    /// Present when more pages follow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
}

/// Parameters for the call tool request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallToolParams {
    /// The name of the tool to call
    pub name: String,
    /// Arguments to pass to the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// The server's response to a tool call.
///
/// Failures inside the tool are reported here with `isError` set, not as a
/// protocol error, so the model can see them and self-correct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// The content returned from the tool call
    pub content: Vec<ToolCallContent>,
    /// Whether the tool call ended in an error. Absent means success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Machine readable result, if the tool declares one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// A successful result with one text block
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolCallContent::Text(TextContent::new(text))],
            is_error: None,
            structured_content: None,
        }
    }

    /// A failed result whose text explains the failure
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolCallContent::Text(TextContent::new(message))],
            is_error: Some(true),
            structured_content: None,
        }
    }

    /// Whether this result reports a failure
    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}

/// Content that can be returned from a tool call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolCallContent {
    /// Text content
    Text(TextContent),
    /// Image content
    Image(ImageContent),
    /// Audio content
    Audio(AudioContent),
    /// Embedded resource
    Resource(EmbeddedResource),
}
