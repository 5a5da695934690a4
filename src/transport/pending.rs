//! Correlation table for server-initiated requests
//!
//! Every entry ends exactly once: answered by a reply frame, timed out, or
//! rejected when the transport closes. Late replies find nothing and are
//! dropped.

use dashmap::DashMap;
use log::debug;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::protocol::{JSONRPCError, JSONRPCMessage, JSONRPCRequest, RequestId};

/// Reason given to requests rejected by transport shutdown
pub const TRANSPORT_CLOSED: &str = "transport closed";

/// A request sent to the client, waiting for its reply
struct PendingRequest {
    /// Channel to send the outcome back to the requester
    sender: oneshot::Sender<Result<Value>>,
    /// Method name, for diagnostics
    method: String,
    /// Time when the request was sent
    started: Instant,
}

/// Outstanding server-to-client requests of one connection or session
pub struct PendingRequests {
    entries: DashMap<RequestId, PendingRequest>,
    next_id: AtomicI64,
    timeout: Duration,
    closed: AtomicBool,
}

impl PendingRequests {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicI64::new(1),
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// How long a request waits for its reply
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    /// Whether [`reject_all`](Self::reject_all) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Allocate an id, hand the request frame to `send` and wait for the reply.
    ///
    /// The entry is removed however this ends, including when the returned
    /// future is dropped.
    pub async fn request<F>(&self, method: &str, params: Option<Value>, send: F) -> Result<Value>
    where
        F: FnOnce(JSONRPCMessage) -> Result<()>,
    {
        if self.is_closed() {
            return Err(Error::ConnectionClosed(TRANSPORT_CLOSED.to_string()));
        }

        let id = RequestId::Integer(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = oneshot::channel();
        self.entries.insert(
            id.clone(),
            PendingRequest {
                sender,
                method: method.to_string(),
                started: Instant::now(),
            },
        );
        let _entry = EntryGuard { table: self, id: id.clone() };

        // reject_all may have drained the table between the check and the insert
        if self.is_closed() {
            return Err(Error::ConnectionClosed(TRANSPORT_CLOSED.to_string()));
        }

        send(JSONRPCMessage::Request(JSONRPCRequest::new(id.clone(), method, params)))?;

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ConnectionClosed(TRANSPORT_CLOSED.to_string())),
            Err(_) => Err(Error::Timeout(format!(
                "{} (id {}) got no reply within {} ms",
                method,
                id,
                self.timeout.as_millis()
            ))),
        }
    }

    /// Settle the entry a reply frame answers. Returns false when nothing was waiting for it.
    pub fn resolve(&self, message: JSONRPCMessage) -> bool {
        let (id, outcome) = match message {
            JSONRPCMessage::Response(response) => (response.id, Ok(response.result)),
            JSONRPCMessage::Error(JSONRPCError { id: Some(id), error, .. }) => {
                (id, Err(Error::PeerError(error.code, error.message, error.data)))
            }
            other => {
                debug!("Not a correlatable reply: {:?}", other.kind());
                return false;
            }
        };

        match self.entries.remove(&id) {
            Some((_, pending)) => {
                debug!(
                    "{} (id {}) answered after {:?}",
                    pending.method,
                    id,
                    pending.started.elapsed()
                );
                if pending.sender.send(outcome).is_err() {
                    debug!("Requester for {} went away before its reply", id);
                }
                true
            }
            None => {
                debug!("Dropping reply for unknown or expired request {}", id);
                false
            }
        }
    }

    /// Reject every outstanding request and refuse new ones. Returns how many were rejected.
    pub fn reject_all(&self, reason: &str) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<RequestId> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        let mut rejected = 0;
        for id in ids {
            if let Some((_, pending)) = self.entries.remove(&id) {
                debug!("Rejecting {} (id {}): {}", pending.method, id, reason);
                let _ = pending.sender.send(Err(Error::ConnectionClosed(reason.to_string())));
                rejected += 1;
            }
        }
        rejected
    }

    /// A guard that rejects everything outstanding when dropped
    pub fn close_on_drop(self: &Arc<Self>) -> CloseGuard {
        CloseGuard { table: self.clone() }
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("outstanding", &self.entries.len())
            .field("timeout", &self.timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct EntryGuard<'a> {
    table: &'a PendingRequests,
    id: RequestId,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.table.entries.remove(&self.id);
    }
}

/// Rejects all pending requests of a table on drop
pub struct CloseGuard {
    table: Arc<PendingRequests>,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let rejected = self.table.reject_all(TRANSPORT_CLOSED);
        if rejected > 0 {
            debug!("Rejected {} pending requests on close", rejected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JSONRPCResponse;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn spawn_request(
        table: &Arc<PendingRequests>,
    ) -> (tokio::task::JoinHandle<Result<Value>>, mpsc::UnboundedReceiver<JSONRPCMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let table = table.clone();
        let task = tokio::spawn(async move {
            table
                .request("roots/list", None, move |frame| {
                    tx.send(frame).map_err(|_| Error::ConnectionClosed("gone".into()))
                })
                .await
        });
        (task, rx)
    }

    #[tokio::test]
    async fn test_reply_resolves_request() {
        let table = Arc::new(PendingRequests::new(Duration::from_secs(30)));
        let (task, mut frames) = spawn_request(&table);

        let frame = frames.recv().await.unwrap();
        assert!(frame.is_request());
        let id = frame.id().unwrap().clone();
        assert!(table.contains(&id));

        assert!(table.resolve(JSONRPCMessage::Response(JSONRPCResponse::new(id.clone(), json!({"roots": []})))));
        assert_eq!(task.await.unwrap().unwrap(), json!({"roots": []}));
        assert!(table.is_empty());

        // a second reply for the same id is late
        assert!(!table.resolve(JSONRPCMessage::Response(JSONRPCResponse::new(id, json!({})))));
    }

    #[tokio::test]
    async fn test_error_reply_becomes_peer_error() {
        let table = Arc::new(PendingRequests::new(Duration::from_secs(30)));
        let (task, mut frames) = spawn_request(&table);
        let id = frames.recv().await.unwrap().id().unwrap().clone();

        let reply = JSONRPCError::new(Some(id), -1, "user declined", None);
        assert!(table.resolve(JSONRPCMessage::Error(reply)));
        match task.await.unwrap() {
            Err(Error::PeerError(code, message, _)) => {
                assert_eq!(code, -1);
                assert_eq!(message, "user declined");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let table = PendingRequests::new(Duration::from_millis(500));
        let result = table.request("sampling/createMessage", None, |_| Ok(())).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(table.is_empty());

        // the reply shows up after the deadline and is dropped
        let late = JSONRPCMessage::Response(JSONRPCResponse::new(1, json!({})));
        assert!(!table.resolve(late));
    }

    #[tokio::test]
    async fn test_failed_send_removes_entry() {
        let table = PendingRequests::new(Duration::from_secs(30));
        let result = table
            .request("roots/list", None, |_| Err(Error::ConnectionClosed("writer gone".into())))
            .await;
        assert!(matches!(result, Err(Error::ConnectionClosed(_))));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_close_guard_rejects_outstanding() {
        let table = Arc::new(PendingRequests::new(Duration::from_secs(30)));
        let (first, mut first_frames) = spawn_request(&table);
        let (second, mut second_frames) = spawn_request(&table);
        first_frames.recv().await.unwrap();
        second_frames.recv().await.unwrap();
        assert_eq!(table.len(), 2);

        drop(table.close_on_drop());

        for task in [first, second] {
            match task.await.unwrap() {
                Err(Error::ConnectionClosed(reason)) => assert_eq!(reason, TRANSPORT_CLOSED),
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        assert!(table.is_empty());

        let refused = table.request("roots/list", None, |_| Ok(())).await;
        assert!(matches!(refused, Err(Error::ConnectionClosed(_))));
    }
}
