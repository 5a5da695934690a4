//! Server-sent event streams
//!
//! A streaming POST runs its handler on a separate task that writes into a
//! channel; the response body drains that channel and ends right after the
//! handler's own reply. Dropping the body cancels the handler.

use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use log::{debug, error};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::DropGuard;

use super::session::{Session, StreamGuard};
use crate::protocol::{serialize_message, JSONRPCMessage, RequestId};
use crate::server::{DispatchOutcome, Server};
use crate::transport::peer::{send_on, ChannelPeer};

/// Name of the SSE event carrying a JSON-RPC message
pub const MESSAGE_EVENT: &str = "message";

fn to_event(message: &JSONRPCMessage) -> Event {
    match serialize_message(message) {
        Ok(data) => Event::default().event(MESSAGE_EVENT).data(data),
        Err(e) => {
            error!("Dropping event that failed to serialize: {}", e);
            Event::default().comment("unserializable message dropped")
        }
    }
}

struct RequestStream {
    events: mpsc::UnboundedReceiver<JSONRPCMessage>,
    request_id: Option<RequestId>,
    finished: bool,
    _open: StreamGuard,
    _cancel_on_drop: DropGuard,
}

/// Dispatch `request` on its own task and stream everything it emits,
/// ending with its reply
pub(crate) fn request_stream(
    server: Arc<Server>,
    session: Arc<Session>,
    request: JSONRPCMessage,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let (events, receiver) = mpsc::unbounded_channel();
    let token = session.connection().cancellation().child_token();
    let peer = Arc::new(ChannelPeer::new(events.clone(), session.pending().clone()));
    let connection = session
        .connection()
        .with_peer(peer)
        .with_cancellation(token.clone());
    let request_id = request.id().cloned();

    tokio::spawn(async move {
        if let DispatchOutcome::Response(reply) = server.handle_message(&connection, request).await {
            if send_on(&events, reply).is_err() {
                debug!("Event stream on {} closed before the reply", connection.id());
            }
        }
    });

    let state = RequestStream {
        events: receiver,
        request_id,
        finished: false,
        _open: session.stream_guard(),
        _cancel_on_drop: token.drop_guard(),
    };
    futures::stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        let message = state.events.recv().await?;
        if message.is_reply() && message.id() == state.request_id.as_ref() {
            state.finished = true;
        }
        Some((Ok(to_event(&message)), state))
    })
}

/// Attach a standalone stream to `session` for traffic raised outside any POST
pub(crate) fn standalone_stream(session: Arc<Session>) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let (sender, receiver) = mpsc::unbounded_channel();
    let guard = session.attach_standalone(sender);
    UnboundedReceiverStream::new(receiver).map(move |message| {
        // the slot stays attached for as long as the body is alive
        let _attached = &guard;
        Ok(to_event(&message))
    })
}
