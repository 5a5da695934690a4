//! Resource types for the MCP protocol

use serde::{Deserialize, Serialize};

use super::{Annotations, Cursor};

/// A known resource that the server is capable of reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// The URI of this resource.
    pub uri: String,

    /// A human-readable name for this resource.
    pub name: String,

    /// A description of what this resource represents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// The MIME type of this resource, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Optional annotations for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,

    /// The size of the raw resource content in bytes, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Resource {
    /// Create a new resource
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
            annotations: None,
            size: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// A parameterized URI (RFC 6570 level 1) describing a family of resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    /// URI template, e.g. `file:///{path}`
    pub uri_template: String,

    /// A human-readable name for the template.
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// MIME type shared by every matching resource, if uniform
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl ResourceTemplate {
    /// Create a new resource template
    pub fn new(uri_template: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri_template: uri_template.into(),
            name: name.into(),
            description: None,
            mime_type: None,
            annotations: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// The contents of a resource: either text or a base64 blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResourceContent {
    /// Text contents
    Text(TextResourceContents),
    /// Binary contents
    Blob(BlobResourceContents),
}

impl ResourceContent {
    /// Text contents for `uri`
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        ResourceContent::Text(TextResourceContents {
            uri: uri.into(),
            mime_type: None,
            text: text.into(),
        })
    }

    /// Base64 blob contents for `uri`
    pub fn blob(uri: impl Into<String>, blob: impl Into<String>, mime_type: impl Into<String>) -> Self {
        ResourceContent::Blob(BlobResourceContents {
            uri: uri.into(),
            mime_type: Some(mime_type.into()),
            blob: blob.into(),
        })
    }

    /// The URI these contents belong to
    pub fn uri(&self) -> &str {
        match self {
            ResourceContent::Text(t) => &t.uri,
            ResourceContent::Blob(b) => &b.uri,
        }
    }
}

/// Text contents of a resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextResourceContents {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

/// Binary contents of a resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlobResourceContents {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64 encoded bytes
    pub blob: String,
}

/// A resource embedded in a tool result or prompt message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedResource {
    /// Content type, always "resource"
    pub r#type: String,
    /// The embedded contents
    pub resource: ResourceContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl EmbeddedResource {
    /// Embed the given contents
    pub fn new(resource: ResourceContent) -> Self {
        Self {
            r#type: "resource".to_string(),
            resource,
            annotations: None,
        }
    }
}

/// Result of `resources/list`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
}

/// Result of `resources/templates/list`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListResourceTemplatesResult {
    pub resource_templates: Vec<ResourceTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
}

/// Parameters of `resources/read`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadResourceParams {
    /// URI to read
    pub uri: String,
}

/// Result of `resources/read`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadResourceResult {
    /// One or more content entries
    pub contents: Vec<ResourceContent>,
}

impl ReadResourceResult {
    /// A result holding a single text entry
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            contents: vec![ResourceContent::text(uri, text)],
        }
    }
}

/// Parameters of `resources/subscribe` and `resources/unsubscribe`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscribeParams {
    /// Resource to watch
    pub uri: String,
}

/// Parameters of `notifications/resources/updated`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceUpdatedParams {
    /// The resource that changed
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_wire_names() {
        let t = ResourceTemplate::new("users://{id}", "user").with_mime_type("application/json");
        assert_eq!(
            serde_json::to_value(&t).unwrap(),
            json!({"uriTemplate": "users://{id}", "name": "user", "mimeType": "application/json"})
        );
    }

    #[test]
    fn test_content_variants() {
        let text: ResourceContent = serde_json::from_value(json!({"uri": "a://b", "text": "hi"})).unwrap();
        assert!(matches!(text, ResourceContent::Text(_)));
        let blob: ResourceContent =
            serde_json::from_value(json!({"uri": "a://c", "blob": "AAE=", "mimeType": "x/y"})).unwrap();
        assert!(matches!(blob, ResourceContent::Blob(_)));
        assert_eq!(blob.uri(), "a://c");
    }

    #[test]
    fn test_list_result_omits_absent_cursor() {
        let result = ListResourcesResult {
            resources: vec![Resource::new("a://b", "b")],
            next_cursor: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("nextCursor").is_none());
    }
}
