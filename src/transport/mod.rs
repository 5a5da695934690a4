//! Transport layer implementations for MCP
//!
//! Both transports are bidirectional: besides answering client requests,
//! they carry notifications and server-initiated requests back to the client
//! and route the client's replies to the [`PendingRequests`] table of the
//! connection that sent them.

pub mod http;
mod line;
mod peer;
mod pending;

pub use http::{HttpConfig, HttpTransport};
pub use line::{LineTransport, DEFAULT_MAX_LINE_LENGTH};
pub use peer::ChannelPeer;
pub use pending::{CloseGuard, PendingRequests, TRANSPORT_CLOSED};

use std::sync::Arc;
use std::time::Duration;

use crate::server::Server;

/// How long a server-initiated request waits for the client's reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Closes a server connection when dropped
pub(crate) struct ConnectionGuard {
    server: Arc<Server>,
    id: String,
}

impl ConnectionGuard {
    pub(crate) fn new(server: Arc<Server>, id: String) -> Self {
        Self { server, id }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.server.close_connection(&self.id);
    }
}
