//! Builder for configuring and creating MCP servers

use std::sync::Arc;

use super::pagination::PageLimits;
use super::registry::{
    CompletionHandler, PromptHandler, RegisteredPrompt, RegisteredResource, RegisteredTemplate, RegisteredTool,
    Registry, ResourceHandler, ToolHandler,
};
use super::{Server, ServerOptions};
use crate::error::Error;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::protocol::{Prompt, Resource, ResourceTemplate, Tool};
use crate::subscriptions::SubscriptionManager;
use crate::utils::UriTemplate;

/// Builder for creating and configuring MCP servers.
///
/// Registration order is kept: listings return entries in the order they were
/// added and resource templates are tried in that order. Registering a name
/// twice replaces the earlier entry in place.
#[derive(Default)]
pub struct ServerBuilder {
    options: ServerOptions,
    registry: Registry,
    middleware: MiddlewareChain,
    subscriptions: Option<Arc<SubscriptionManager>>,
    errors: Vec<Error>,
}

impl ServerBuilder {
    /// Create a new server builder with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server implementation name and version
    pub fn with_implementation(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.options.implementation.name = name.into();
        self.options.implementation.version = version.into();
        self
    }

    /// Set server instructions for clients
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.options.instructions = Some(instructions.into());
        self
    }

    /// Set the default and maximum page sizes for list operations
    pub fn with_page_size(mut self, default_size: usize, max_size: usize) -> Self {
        self.options.page_limits = PageLimits { default_size, max_size };
        self
    }

    /// Enable logging capability
    pub fn with_logging(mut self, enable: bool) -> Self {
        self.options.capabilities.logging = enable;
        self
    }

    /// Advertise `listChanged` for tools, resources and prompts
    pub fn with_list_changed(mut self, enable: bool) -> Self {
        self.options.capabilities.tools_list_changed = enable;
        self.options.capabilities.resources_list_changed = enable;
        self.options.capabilities.prompts_list_changed = enable;
        self
    }

    /// Add an experimental capability
    pub fn with_experimental(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.capabilities.experimental.insert(name.into(), value);
        self
    }

    /// Register a tool
    pub fn with_tool<H>(mut self, tool: Tool, handler: H) -> Self
    where
        H: ToolHandler + 'static,
    {
        self.options.capabilities.tools = true;
        self.registry.tools.insert(
            tool.name.clone(),
            RegisteredTool {
                tool,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Register a resource served at one exact URI
    pub fn with_resource<H>(mut self, resource: Resource, handler: H) -> Self
    where
        H: ResourceHandler + 'static,
    {
        self.enable_resources();
        self.registry.resources.insert(
            resource.uri.clone(),
            RegisteredResource {
                resource,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Register a resource template. An invalid template fails [`build`](Self::build).
    pub fn with_resource_template<H>(mut self, template: ResourceTemplate, handler: H) -> Self
    where
        H: ResourceHandler + 'static,
    {
        self.enable_resources();
        match UriTemplate::parse(&template.uri_template) {
            Ok(pattern) => self.registry.templates.push(RegisteredTemplate {
                template,
                pattern,
                handler: Arc::new(handler),
            }),
            Err(e) => self.errors.push(e),
        }
        self
    }

    /// Register a prompt
    pub fn with_prompt<H>(mut self, prompt: Prompt, handler: H) -> Self
    where
        H: PromptHandler + 'static,
    {
        self.options.capabilities.prompts = true;
        self.registry.prompts.insert(
            prompt.name.clone(),
            RegisteredPrompt {
                prompt,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Answer `completion/complete` with `handler`
    pub fn with_completion<H>(mut self, handler: H) -> Self
    where
        H: CompletionHandler + 'static,
    {
        self.options.capabilities.completions = true;
        self.registry.completion = Some(Arc::new(handler));
        self
    }

    /// Add a middleware layer. The first one added is the outermost.
    pub fn with_middleware<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Use an existing subscription manager, e.g. one with an observer
    pub fn with_subscriptions(mut self, subscriptions: Arc<SubscriptionManager>) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    fn enable_resources(&mut self) {
        self.options.capabilities.resources = true;
        self.options.capabilities.resources_subscribe = true;
    }

    /// Build the server
    pub fn build(mut self) -> Result<Server, Error> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        if self.options.page_limits.default_size == 0 || self.options.page_limits.max_size == 0 {
            return Err(Error::ConfigError("Page sizes must be at least 1".to_string()));
        }
        let subscriptions = self.subscriptions.unwrap_or_default();
        Ok(Server::from_parts(self.options, self.registry, self.middleware, subscriptions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CallToolResult, ReadResourceResult};
    use crate::server::HandlerContext;
    use serde_json::Value;
    use std::collections::HashMap;

    #[test]
    fn test_registration_sets_capabilities() {
        let server = ServerBuilder::new()
            .with_implementation("demo", "1.2.3")
            .with_tool(Tool::new("echo", "Echo"), |args: Value, _ctx: HandlerContext| async move {
                Ok(CallToolResult::text(args.to_string()))
            })
            .with_resource_template(
                ResourceTemplate::new("notes://{id}", "note"),
                |uri: String, _vars: HashMap<String, String>, _ctx: HandlerContext| async move {
                    Ok(ReadResourceResult::text(uri, "note"))
                },
            )
            .build()
            .unwrap();

        let caps = &server.options().capabilities;
        assert!(caps.tools && caps.resources && caps.resources_subscribe);
        assert!(!caps.prompts && !caps.completions);
        assert_eq!(server.implementation().version, "1.2.3");
    }

    #[test]
    fn test_invalid_template_fails_build() {
        let result = ServerBuilder::new()
            .with_resource_template(
                ResourceTemplate::new("notes://{id", "broken"),
                |uri: String, _vars: HashMap<String, String>, _ctx: HandlerContext| async move {
                    Ok(ReadResourceResult::text(uri, ""))
                },
            )
            .build();
        assert!(matches!(result, Err(Error::ConfigError(_))));

        assert!(ServerBuilder::new().with_page_size(0, 10).build().is_err());
    }
}
