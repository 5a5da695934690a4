//! Per-request handler context and the peer abstraction
//!
//! A [`Peer`] is whatever can carry frames back to the client: a line stream,
//! an SSE stream, or nothing at all ([`DetachedPeer`]). Handlers never see the
//! peer directly; they go through [`HandlerContext`], which adds progress
//! tokens, log-level filtering and cancellation on top.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::elicitation::{ElicitParams, ElicitResult};
use crate::protocol::logging::{LoggingLevel, LoggingMessageParams};
use crate::protocol::messages::{methods, ProgressParams};
use crate::protocol::roots::ListRootsResult;
use crate::protocol::sampling::{CreateMessageParams, CreateMessageResult};
use crate::protocol::{JSONRPCNotification, ProgressToken, RequestId};

/// The client side of a connection, as seen from the server
#[async_trait]
pub trait Peer: Send + Sync {
    /// Queue a notification for delivery. Never waits on the client.
    fn notify(&self, notification: JSONRPCNotification) -> Result<()>;

    /// Send a request to the client and wait for the correlated reply
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value>;
}

/// A peer with no client behind it
///
/// Notifications are dropped and requests fail with `UnsupportedFeature`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedPeer;

#[async_trait]
impl Peer for DetachedPeer {
    fn notify(&self, notification: JSONRPCNotification) -> Result<()> {
        log::debug!("Dropping notification {} on detached peer", notification.method);
        Ok(())
    }

    async fn request(&self, method: &str, _params: Option<Value>) -> Result<Value> {
        Err(Error::UnsupportedFeature(format!(
            "Cannot send {} without a connected client",
            method
        )))
    }
}

/// Minimum log level a client asked for, shared by the connection and its contexts
pub(crate) type LogLevelCell = Arc<Mutex<Option<LoggingLevel>>>;

/// A transport's handle on one logical connection
#[derive(Clone)]
pub struct ConnectionHandle {
    id: String,
    peer: Arc<dyn Peer>,
    cancellation: CancellationToken,
}

impl ConnectionHandle {
    pub(crate) fn new(id: String, peer: Arc<dyn Peer>, cancellation: CancellationToken) -> Self {
        Self { id, peer, cancellation }
    }

    /// A handle with no transport, for driving the dispatcher directly
    pub fn detached(id: impl Into<String>) -> Self {
        Self::new(id.into(), Arc::new(DetachedPeer), CancellationToken::new())
    }

    /// Connection id, also used as the subscriber id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The peer handlers on this connection talk to
    pub fn peer(&self) -> &Arc<dyn Peer> {
        &self.peer
    }

    /// Cancelled when the connection closes
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Same connection, different delivery path (e.g. one SSE response stream)
    pub fn with_peer(&self, peer: Arc<dyn Peer>) -> Self {
        Self::new(self.id.clone(), peer, self.cancellation.clone())
    }

    /// Same connection, with handlers bound to `token` instead of the connection token
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self::new(self.id.clone(), self.peer.clone(), token)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle").field("id", &self.id).finish()
    }
}

/// Everything a tool, resource or prompt handler may use while it runs
#[derive(Clone)]
pub struct HandlerContext {
    request_id: Option<RequestId>,
    connection_id: String,
    progress_token: Option<ProgressToken>,
    peer: Arc<dyn Peer>,
    cancellation: CancellationToken,
    log_level: LogLevelCell,
}

impl HandlerContext {
    pub(crate) fn new(
        request_id: Option<RequestId>,
        connection: &ConnectionHandle,
        progress_token: Option<ProgressToken>,
        cancellation: CancellationToken,
        log_level: LogLevelCell,
    ) -> Self {
        Self {
            request_id,
            connection_id: connection.id.clone(),
            progress_token,
            peer: connection.peer.clone(),
            cancellation,
            log_level,
        }
    }

    /// A context bound to a [`DetachedPeer`], mainly for tests and direct calls
    pub fn detached() -> Self {
        let connection = ConnectionHandle::detached("detached");
        let token = connection.cancellation.child_token();
        Self::new(None, &connection, None, token, LogLevelCell::default())
    }

    /// Id of the request being handled
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Id of the connection the request arrived on
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Progress token supplied in the request's `_meta`, if any
    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.progress_token.as_ref()
    }

    /// Whether the client cancelled the request or the connection went away
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Token to select on in long-running handlers
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Send a notification to the client
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.peer.notify(JSONRPCNotification::new(method, params))
    }

    /// Send a request to the client and wait for its reply.
    ///
    /// Fails with `Cancelled` if this request is cancelled first.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        tokio::select! {
            biased;
            result = self.peer.request(method, params) => result,
            _ = self.cancellation.cancelled() => {
                Err(Error::Cancelled(format!("{} abandoned: request cancelled", method)))
            }
        }
    }

    /// Report progress. A no-op when the client supplied no progress token.
    pub fn progress(&self, progress: f64, total: Option<f64>, message: Option<String>) -> Result<()> {
        let Some(token) = self.progress_token.clone() else {
            return Ok(());
        };
        let params = ProgressParams {
            progress_token: token,
            progress,
            total,
            message,
        };
        self.notify(methods::NOTIFICATION_PROGRESS, Some(serde_json::to_value(params)?))
    }

    /// Send a log message, unless it is below the level the client asked for
    pub fn log(&self, level: LoggingLevel, logger: Option<&str>, data: Value) -> Result<()> {
        if let Some(minimum) = *self.log_level.lock() {
            if level < minimum {
                return Ok(());
            }
        }
        let params = LoggingMessageParams {
            level,
            logger: logger.map(str::to_string),
            data,
        };
        self.notify(methods::NOTIFICATION_MESSAGE, Some(serde_json::to_value(params)?))
    }

    /// Ask the client to sample its LLM
    pub async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult> {
        self.typed_request(methods::SAMPLING_CREATE_MESSAGE, serde_json::to_value(params)?)
            .await
    }

    /// Ask the user for structured input
    pub async fn elicit(&self, params: ElicitParams) -> Result<ElicitResult> {
        self.typed_request(methods::ELICITATION_CREATE, serde_json::to_value(params)?)
            .await
    }

    /// Ask the client for its roots
    pub async fn list_roots(&self) -> Result<ListRootsResult> {
        let value = self.request(methods::ROOTS_LIST, None).await?;
        decode_reply(methods::ROOTS_LIST, value)
    }

    async fn typed_request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.request(method, Some(params)).await?;
        decode_reply(method, value)
    }
}

fn decode_reply<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::ParseError(format!("Invalid {} reply from client: {}", method, e)))
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("request_id", &self.request_id)
            .field("connection_id", &self.connection_id)
            .field("progress_token", &self.progress_token)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
