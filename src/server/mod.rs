//! MCP server implementation
//!
//! A [`Server`] owns the registries, the middleware chain and the
//! subscription index, plus a table of live connections. Transports open a
//! connection per client, feed parsed messages to
//! [`Server::handle_message`] and write back whatever it returns.

mod builder;
mod context;
mod handler;
pub mod pagination;
mod registry;
mod state;

pub use builder::ServerBuilder;
pub use context::{ConnectionHandle, DetachedPeer, HandlerContext, Peer};
pub use handler::DispatchOutcome;
pub use registry::{CompletionHandler, PromptHandler, ResourceHandler, ToolHandler};
pub use state::ConnectionInfo;

use dashmap::DashMap;
use log::{debug, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::middleware::MiddlewareChain;
use crate::protocol::messages::{methods, ListChangedCapability, ResourcesCapability, ServerCapabilitiesWire};
use crate::protocol::{Implementation, JSONRPCNotification, RequestId};
use crate::subscriptions::SubscriptionManager;

use self::pagination::PageLimits;
use self::registry::Registry;
use self::state::ConnectionState;

/// Server capability flags and settings
#[derive(Debug, Clone, Default)]
pub struct ServerCapabilities {
    /// Whether the server supports sending log messages
    pub logging: bool,
    /// Whether the server supports completions
    pub completions: bool,
    /// Whether the server supports prompts
    pub prompts: bool,
    /// Whether the server supports prompts list changed notifications
    pub prompts_list_changed: bool,
    /// Whether the server supports resources
    pub resources: bool,
    /// Whether the server supports resource list changed notifications
    pub resources_list_changed: bool,
    /// Whether the server supports resource subscriptions
    pub resources_subscribe: bool,
    /// Whether the server supports tools
    pub tools: bool,
    /// Whether the server supports tool list changed notifications
    pub tools_list_changed: bool,
    /// Experimental capabilities
    pub experimental: HashMap<String, serde_json::Value>,
}

impl ServerCapabilities {
    /// The capabilities object sent in the initialize result
    pub fn to_wire(&self) -> ServerCapabilitiesWire {
        let list_changed = |enabled: bool| ListChangedCapability {
            list_changed: enabled.then_some(true),
        };
        ServerCapabilitiesWire {
            tools: self.tools.then(|| list_changed(self.tools_list_changed)),
            resources: self.resources.then(|| ResourcesCapability {
                subscribe: self.resources_subscribe.then_some(true),
                list_changed: self.resources_list_changed.then_some(true),
            }),
            prompts: self.prompts.then(|| list_changed(self.prompts_list_changed)),
            logging: self.logging.then(|| json!({})),
            completions: self.completions.then(|| json!({})),
            experimental: (!self.experimental.is_empty()).then(|| self.experimental.clone()),
        }
    }
}

/// MCP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Server implementation info
    pub implementation: Implementation,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
    /// Server instructions
    pub instructions: Option<String>,
    /// Page sizes for list operations
    pub page_limits: PageLimits,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            implementation: Implementation::new("mcp-duplex-server", env!("CARGO_PKG_VERSION")),
            capabilities: ServerCapabilities {
                logging: true,
                ..Default::default()
            },
            instructions: None,
            page_limits: PageLimits::default(),
        }
    }
}

/// MCP server
pub struct Server {
    /// Server options
    options: ServerOptions,
    /// Registered tools, resources, templates and prompts
    registry: Registry,
    /// Wraps every tool, resource and prompt call
    middleware: MiddlewareChain,
    /// Resource subscriptions, keyed by connection id
    subscriptions: Arc<SubscriptionManager>,
    /// Connection tracking
    connections: DashMap<String, ConnectionState>,
    /// Cancellation tokens of requests currently executing
    in_flight: DashMap<(String, RequestId), CancellationToken>,
}

impl Server {
    /// Start configuring a server
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn from_parts(
        options: ServerOptions,
        registry: Registry,
        middleware: MiddlewareChain,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Self {
        Self {
            options,
            registry,
            middleware,
            subscriptions,
            connections: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Server options
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Server implementation info
    pub fn implementation(&self) -> &Implementation {
        &self.options.implementation
    }

    /// The subscription index
    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Register a live connection and get the handle transports pass to the dispatcher
    pub fn open_connection(&self, id: impl Into<String>, peer: Arc<dyn Peer>) -> ConnectionHandle {
        let id = id.into();
        let cancellation = CancellationToken::new();
        let state = ConnectionState::new(peer.clone(), cancellation.clone());
        if let Some(previous) = self.connections.insert(id.clone(), state) {
            warn!("Replacing existing connection {}", id);
            previous.cancellation.cancel();
        }
        debug!("Connection {} opened", id);
        ConnectionHandle::new(id, peer, cancellation)
    }

    /// Forget a connection: cancel its in-flight handlers and drop its subscriptions
    pub fn close_connection(&self, id: &str) {
        if let Some((_, state)) = self.connections.remove(id) {
            state.cancellation.cancel();
        }
        let dropped = self.subscriptions.unsubscribe_all(id);
        debug!("Connection {} closed ({} subscriptions dropped)", id, dropped.len());
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of one connection's state
    pub fn connection_info(&self, id: &str) -> Option<ConnectionInfo> {
        self.connections.get(id).map(|state| ConnectionInfo::from_state(id, &state))
    }

    /// Number of requests currently executing across all connections
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Send a notification to one connection
    pub fn notify(&self, connection_id: &str, notification: JSONRPCNotification) -> crate::error::Result<()> {
        let peer = self
            .connections
            .get(connection_id)
            .map(|state| state.peer.clone())
            .ok_or_else(|| crate::error::Error::ConnectionClosed(format!("Unknown connection: {}", connection_id)))?;
        peer.notify(notification)
    }

    /// Tell every subscriber of `uri` that it changed. Returns how many were notified.
    pub fn notify_resource_updated(&self, uri: &str) -> usize {
        let params = json!({ "uri": uri });
        let mut delivered = 0;
        self.subscriptions.notify_subscribers(uri, |subscriber| {
            let notification = JSONRPCNotification::new(methods::NOTIFICATION_RESOURCES_UPDATED, Some(params.clone()));
            match self.notify(subscriber, notification) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Skipping resource update for {}: {}", subscriber, e),
            }
        });
        delivered
    }

    /// Broadcast `notifications/tools/list_changed`
    pub fn notify_tools_list_changed(&self) -> usize {
        self.broadcast(methods::NOTIFICATION_TOOLS_LIST_CHANGED)
    }

    /// Broadcast `notifications/resources/list_changed`
    pub fn notify_resources_list_changed(&self) -> usize {
        self.broadcast(methods::NOTIFICATION_RESOURCES_LIST_CHANGED)
    }

    /// Broadcast `notifications/prompts/list_changed`
    pub fn notify_prompts_list_changed(&self) -> usize {
        self.broadcast(methods::NOTIFICATION_PROMPTS_LIST_CHANGED)
    }

    fn broadcast(&self, method: &str) -> usize {
        let peers: Vec<(String, Arc<dyn Peer>)> = self
            .connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().peer.clone()))
            .collect();
        peers
            .into_iter()
            .filter(|(id, peer)| match peer.notify(JSONRPCNotification::new(method, None)) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Failed to send {} to {}: {}", method, id, e);
                    false
                }
            })
            .count()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("implementation", &self.options.implementation)
            .field("tools", &self.registry.tools.len())
            .field("resources", &self.registry.resources.len())
            .field("templates", &self.registry.templates.len())
            .field("prompts", &self.registry.prompts.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::context::tests::RecordingPeer;
    use super::*;

    #[test]
    fn test_capabilities_wire() {
        let caps = ServerCapabilities {
            tools: true,
            resources: true,
            resources_subscribe: true,
            logging: true,
            ..Default::default()
        };
        let wire = serde_json::to_value(caps.to_wire()).unwrap();
        assert_eq!(wire, json!({"tools": {}, "resources": {"subscribe": true}, "logging": {}}));
    }

    #[test]
    fn test_resource_updated_reaches_only_live_subscribers() {
        let server = Server::builder().build().unwrap();
        let a = Arc::new(RecordingPeer::new());
        let b = Arc::new(RecordingPeer::new());
        server.open_connection("a", a.clone());
        server.open_connection("b", b.clone());

        server.subscriptions().subscribe("file:///x", "a");
        server.subscriptions().subscribe("file:///x", "ghost");

        assert_eq!(server.notify_resource_updated("file:///x"), 1);
        assert_eq!(a.methods(), vec![methods::NOTIFICATION_RESOURCES_UPDATED.to_string()]);
        assert!(b.methods().is_empty());

        assert_eq!(server.notify_tools_list_changed(), 2);
        assert_eq!(b.methods(), vec![methods::NOTIFICATION_TOOLS_LIST_CHANGED.to_string()]);
    }

    #[test]
    fn test_close_connection_cleans_up() {
        let server = Server::builder().build().unwrap();
        let handle = server.open_connection("c", Arc::new(DetachedPeer));
        server.subscriptions().subscribe("file:///x", "c");

        server.close_connection("c");
        assert!(handle.cancellation().is_cancelled());
        assert!(!server.subscriptions().has_subscribers("file:///x"));
        assert_eq!(server.connection_count(), 0);
        assert!(server.connection_info("c").is_none());
    }
}
