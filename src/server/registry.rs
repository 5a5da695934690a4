//! Handler traits and the registries the dispatcher looks them up in

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::HandlerContext;
use crate::error::Result;
use crate::protocol::completion::{CompleteParams, CompleteResult};
use crate::protocol::{CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, ResourceTemplate, Tool};
use crate::utils::UriTemplate;

/// Executes a tool call. Arguments arrive exactly as the client sent them.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, ctx: HandlerContext) -> Result<CallToolResult>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
{
    async fn call(&self, arguments: Value, ctx: HandlerContext) -> Result<CallToolResult> {
        (self)(arguments, ctx).await
    }
}

/// Reads a static resource or a resource matched by a template.
///
/// `variables` is empty for static resources.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, uri: String, variables: HashMap<String, String>, ctx: HandlerContext) -> Result<ReadResourceResult>;
}

#[async_trait]
impl<F, Fut> ResourceHandler for F
where
    F: Fn(String, HashMap<String, String>, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ReadResourceResult>> + Send + 'static,
{
    async fn read(&self, uri: String, variables: HashMap<String, String>, ctx: HandlerContext) -> Result<ReadResourceResult> {
        (self)(uri, variables, ctx).await
    }
}

/// Renders a prompt from its arguments
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn get(&self, arguments: Value, ctx: HandlerContext) -> Result<GetPromptResult>;
}

#[async_trait]
impl<F, Fut> PromptHandler for F
where
    F: Fn(Value, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<GetPromptResult>> + Send + 'static,
{
    async fn get(&self, arguments: Value, ctx: HandlerContext) -> Result<GetPromptResult> {
        (self)(arguments, ctx).await
    }
}

/// Suggests argument values for prompts and resource templates
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn complete(&self, params: CompleteParams, ctx: HandlerContext) -> Result<CompleteResult>;
}

#[async_trait]
impl<F, Fut> CompletionHandler for F
where
    F: Fn(CompleteParams, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CompleteResult>> + Send + 'static,
{
    async fn complete(&self, params: CompleteParams, ctx: HandlerContext) -> Result<CompleteResult> {
        (self)(params, ctx).await
    }
}

pub(crate) struct RegisteredTool {
    pub tool: Tool,
    pub handler: Arc<dyn ToolHandler>,
}

pub(crate) struct RegisteredResource {
    pub resource: Resource,
    pub handler: Arc<dyn ResourceHandler>,
}

pub(crate) struct RegisteredTemplate {
    pub template: ResourceTemplate,
    pub pattern: UriTemplate,
    pub handler: Arc<dyn ResourceHandler>,
}

pub(crate) struct RegisteredPrompt {
    pub prompt: Prompt,
    pub handler: Arc<dyn PromptHandler>,
}

/// Everything registered on a server, in registration order. Immutable once built.
#[derive(Default)]
pub(crate) struct Registry {
    pub tools: IndexMap<String, RegisteredTool>,
    pub resources: IndexMap<String, RegisteredResource>,
    pub templates: Vec<RegisteredTemplate>,
    pub prompts: IndexMap<String, RegisteredPrompt>,
    pub completion: Option<Arc<dyn CompletionHandler>>,
}

impl Registry {
    /// Exact static match first, then templates in registration order
    pub fn resolve_resource(&self, uri: &str) -> Option<(Arc<dyn ResourceHandler>, HashMap<String, String>)> {
        if let Some(entry) = self.resources.get(uri) {
            return Some((entry.handler.clone(), HashMap::new()));
        }
        self.templates
            .iter()
            .find_map(|entry| entry.pattern.matches(uri).map(|vars| (entry.handler.clone(), vars)))
    }
}
