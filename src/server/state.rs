//! Per-connection state kept by the server

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::context::{LogLevelCell, Peer};
use crate::protocol::messages::ClientCapabilities;
use crate::protocol::Implementation;

/// Client connection state
pub(crate) struct ConnectionState {
    /// Where server-initiated traffic for this connection goes
    pub peer: Arc<dyn Peer>,
    /// Parent of every in-flight request token on this connection
    pub cancellation: CancellationToken,
    /// Set by `notifications/initialized`
    pub initialized: bool,
    /// Client implementation info (available after initialize)
    pub client_info: Option<Implementation>,
    /// Negotiated protocol version (available after initialize)
    pub protocol_version: Option<String>,
    /// Client capabilities (available after initialize)
    pub capabilities: ClientCapabilities,
    /// Minimum level for `notifications/message`
    pub log_level: LogLevelCell,
}

impl ConnectionState {
    pub fn new(peer: Arc<dyn Peer>, cancellation: CancellationToken) -> Self {
        Self {
            peer,
            cancellation,
            initialized: false,
            client_info: None,
            protocol_version: None,
            capabilities: ClientCapabilities::default(),
            log_level: LogLevelCell::default(),
        }
    }

    /// Record the outcome of `initialize`
    pub fn set_client(&mut self, client_info: Implementation, protocol_version: &str, capabilities: ClientCapabilities) {
        self.client_info = Some(client_info);
        self.protocol_version = Some(protocol_version.to_string());
        self.capabilities = capabilities;
    }
}

/// Read-only view of a connection, for embedders
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub initialized: bool,
    pub client_info: Option<Implementation>,
    pub protocol_version: Option<String>,
    pub capabilities: ClientCapabilities,
}

impl ConnectionInfo {
    pub(crate) fn from_state(id: &str, state: &ConnectionState) -> Self {
        Self {
            id: id.to_string(),
            initialized: state.initialized,
            client_info: state.client_info.clone(),
            protocol_version: state.protocol_version.clone(),
            capabilities: state.capabilities.clone(),
        }
    }
}
