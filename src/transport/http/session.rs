//! HTTP sessions
//!
//! A session is created by `initialize` and names one logical connection on
//! the server. It owns the pending table for server-initiated requests and
//! the optional standalone event stream opened with `GET`.

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{JSONRPCMessage, JSONRPCNotification};
use crate::server::{ConnectionHandle, Peer, Server};
use crate::transport::peer::send_on;
use crate::transport::pending::PendingRequests;

/// Request and response header carrying the session id
pub const SESSION_HEADER: &str = "mcp-session-id";

/// The standalone stream currently attached to a session, if any
#[derive(Default)]
struct StandaloneSlot {
    generation: u64,
    sender: Option<mpsc::UnboundedSender<JSONRPCMessage>>,
}

type SharedSlot = Arc<Mutex<StandaloneSlot>>;

/// Delivers traffic raised outside a streaming POST through the standalone stream
struct SessionPeer {
    session_id: String,
    pending: Arc<PendingRequests>,
    standalone: SharedSlot,
}

impl SessionPeer {
    fn sender(&self) -> Option<mpsc::UnboundedSender<JSONRPCMessage>> {
        self.standalone.lock().sender.clone()
    }
}

#[async_trait]
impl Peer for SessionPeer {
    fn notify(&self, notification: JSONRPCNotification) -> Result<()> {
        match self.sender() {
            Some(sender) => send_on(&sender, JSONRPCMessage::Notification(notification)),
            None => {
                debug!(
                    "No event stream open for session {}; dropping {}",
                    self.session_id, notification.method
                );
                Ok(())
            }
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let sender = self.sender().ok_or_else(|| {
            Error::UnsupportedFeature(format!(
                "Session {} has no open event stream to carry {}",
                self.session_id, method
            ))
        })?;
        self.pending.request(method, params, |frame| send_on(&sender, frame)).await
    }
}

/// One client session
pub struct Session {
    id: String,
    created_at: Instant,
    last_active: Mutex<Instant>,
    open_streams: AtomicUsize,
    pending: Arc<PendingRequests>,
    standalone: SharedSlot,
    connection: ConnectionHandle,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Mark the session as active
    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Time since the last request or stream close
    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    /// Number of event streams currently open on this session
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Server-initiated requests waiting for a reply POST
    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    /// The server connection this session drives
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Whether a standalone `GET` stream is attached
    pub fn has_standalone_stream(&self) -> bool {
        self.standalone.lock().sender.is_some()
    }

    /// Count a stream as open until the guard drops
    pub(crate) fn stream_guard(self: &Arc<Self>) -> StreamGuard {
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        StreamGuard {
            session: self.clone(),
            standalone_generation: None,
        }
    }

    /// Route session-level traffic to `sender`, replacing any earlier standalone stream
    pub(crate) fn attach_standalone(self: &Arc<Self>, sender: mpsc::UnboundedSender<JSONRPCMessage>) -> StreamGuard {
        let generation = {
            let mut slot = self.standalone.lock();
            slot.generation += 1;
            if slot.sender.replace(sender).is_some() {
                debug!("Replacing standalone stream of session {}", self.id);
            }
            slot.generation
        };
        let mut guard = self.stream_guard();
        guard.standalone_generation = Some(generation);
        guard
    }

    fn close(&self, reason: &str) {
        let rejected = self.pending.reject_all(reason);
        self.standalone.lock().sender = None;
        debug!("Session {} closed ({} pending requests rejected)", self.id, rejected);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("open_streams", &self.open_streams())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Keeps a session's stream count up while an event stream is alive
pub(crate) struct StreamGuard {
    session: Arc<Session>,
    standalone_generation: Option<u64>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(generation) = self.standalone_generation {
            let mut slot = self.session.standalone.lock();
            if slot.generation == generation {
                slot.sender = None;
            }
        }
        self.session.open_streams.fetch_sub(1, Ordering::SeqCst);
        self.session.touch();
    }
}

/// All live sessions of one HTTP transport
pub struct SessionStore {
    server: Arc<Server>,
    sessions: DashMap<String, Arc<Session>>,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(server: Arc<Server>, request_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            server,
            sessions: DashMap::new(),
            request_timeout,
            idle_timeout,
        }
    }

    /// Create a session and register its connection with the server
    pub fn create(&self) -> Arc<Session> {
        let id = Uuid::new_v4().to_string();
        let pending = Arc::new(PendingRequests::new(self.request_timeout));
        let standalone = SharedSlot::default();
        let peer = Arc::new(SessionPeer {
            session_id: id.clone(),
            pending: pending.clone(),
            standalone: standalone.clone(),
        });
        let connection = self.server.open_connection(id.clone(), peer);
        let now = Instant::now();
        let session = Arc::new(Session {
            id: id.clone(),
            created_at: now,
            last_active: Mutex::new(now),
            open_streams: AtomicUsize::new(0),
            pending,
            standalone,
            connection,
        });
        self.sessions.insert(id.clone(), session.clone());
        info!("Created session {}", id);
        session
    }

    /// Look up a session by id
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// End a session: reject its pending requests, close its streams and
    /// remove its connection. Returns false if no such session exists.
    pub fn remove(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.close("session closed");
                self.server.close_connection(id);
                info!("Removed session {}", id);
                true
            }
            None => false,
        }
    }

    /// Remove sessions idle past the timeout that have no open stream
    pub fn reap_idle(&self) -> usize {
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.open_streams() == 0 && entry.idle_for() >= self.idle_timeout)
            .map(|entry| entry.key().clone())
            .collect();
        idle.iter().filter(|id| self.remove(id)).count()
    }

    /// Remove every session
    pub fn close_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter(|id| self.remove(id)).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Periodically reap idle sessions until the returned task is aborted
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let reaped = store.reap_idle();
                if reaped > 0 {
                    info!("Reaped {} idle sessions", reaped);
                }
            }
        })
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}
