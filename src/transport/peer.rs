//! Peers that write into an outgoing message channel

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::pending::PendingRequests;
use crate::error::{Error, Result};
use crate::protocol::{JSONRPCMessage, JSONRPCNotification};
use crate::server::Peer;

/// A peer whose frames go to one writer through an unbounded channel.
///
/// Replies to its requests must be fed to the shared [`PendingRequests`]
/// by whoever reads the client's frames.
#[derive(Clone)]
pub struct ChannelPeer {
    outgoing: mpsc::UnboundedSender<JSONRPCMessage>,
    pending: Arc<PendingRequests>,
}

impl ChannelPeer {
    pub fn new(outgoing: mpsc::UnboundedSender<JSONRPCMessage>, pending: Arc<PendingRequests>) -> Self {
        Self { outgoing, pending }
    }
}

pub(crate) fn send_on(outgoing: &mpsc::UnboundedSender<JSONRPCMessage>, message: JSONRPCMessage) -> Result<()> {
    outgoing
        .send(message)
        .map_err(|_| Error::ConnectionClosed("outgoing stream is closed".to_string()))
}

#[async_trait]
impl Peer for ChannelPeer {
    fn notify(&self, notification: JSONRPCNotification) -> Result<()> {
        send_on(&self.outgoing, JSONRPCMessage::Notification(notification))
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.pending
            .request(method, params, |frame| send_on(&self.outgoing, frame))
            .await
    }
}

impl std::fmt::Debug for ChannelPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPeer")
            .field("closed", &self.outgoing.is_closed())
            .field("pending", &self.pending.len())
            .finish()
    }
}
