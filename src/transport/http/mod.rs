//! HTTP transport
//!
//! `POST {base}` carries one JSON-RPC message per request. Requests are
//! answered with a JSON body, or with an SSE stream when the client accepts
//! `text/event-stream`; notifications and replies to server-initiated
//! requests get `202 Accepted`. `initialize` creates a session whose id is
//! returned in the `mcp-session-id` header and must accompany every later
//! call. It is always answered with JSON, so a failed handshake never
//! leaves a session behind. `GET {base}` opens a standalone event stream
//! for the session, `DELETE {base}` ends it, and `GET {base}/health`
//! reports liveness.

mod session;
mod sse;

pub use session::{Session, SessionStore, SESSION_HEADER};
pub use sse::MESSAGE_EVENT;

use axum::extract::State;
use axum::http::header::ACCEPT;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, info};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use super::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{Error, Result};
use crate::protocol::messages::methods;
use crate::protocol::{parse_message, JSONRPCError, JSONRPCMessage, RequestId};
use crate::server::{DispatchOutcome, Server};

/// HTTP transport settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Address `bind_and_serve` listens on
    pub bind_address: String,
    /// Path of the MCP endpoint
    pub base_path: String,
    /// How long server-initiated requests wait for a reply POST
    pub request_timeout: Duration,
    /// Sessions idle this long with no open stream are closed
    pub session_idle_timeout: Duration,
    /// How often idle sessions are looked for
    pub reaper_interval: Duration,
    /// Trace every HTTP request with `tower-http`
    pub trace_requests: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            base_path: "/mcp".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session_idle_timeout: Duration::from_secs(30 * 60),
            reaper_interval: Duration::from_secs(60),
            trace_requests: true,
        }
    }
}

impl HttpConfig {
    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = path.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn with_request_tracing(mut self, enable: bool) -> Self {
        self.trace_requests = enable;
        self
    }

    /// `base_path` with a leading slash and no trailing one
    fn endpoint(&self) -> String {
        let trimmed = self.base_path.trim_matches('/');
        format!("/{}", trimmed)
    }

    fn health_endpoint(&self) -> String {
        let endpoint = self.endpoint();
        if endpoint == "/" {
            "/health".to_string()
        } else {
            format!("{}/health", endpoint)
        }
    }
}

#[derive(Clone)]
struct AppState {
    server: Arc<Server>,
    sessions: Arc<SessionStore>,
}

/// Serves a [`Server`] over HTTP
pub struct HttpTransport {
    server: Arc<Server>,
    config: HttpConfig,
    sessions: Arc<SessionStore>,
}

impl HttpTransport {
    pub fn new(server: Arc<Server>, config: HttpConfig) -> Self {
        let sessions = Arc::new(SessionStore::new(
            server.clone(),
            config.request_timeout,
            config.session_idle_timeout,
        ));
        Self {
            server,
            config,
            sessions,
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Live sessions
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The axum router, for mounting into a larger application
    pub fn router(&self) -> Router {
        let state = AppState {
            server: self.server.clone(),
            sessions: self.sessions.clone(),
        };
        let router = Router::new()
            .route(
                &self.config.endpoint(),
                post(handle_post).get(handle_get).delete(handle_delete),
            )
            .route(&self.config.health_endpoint(), get(handle_health))
            .with_state(state);

        if self.config.trace_requests {
            router.layer(TraceLayer::new_for_http())
        } else {
            router
        }
    }

    /// Serve on the configured bind address until `shutdown` resolves
    pub async fn bind_and_serve<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// The idle-session reaper runs for as long as this does. However serving
    /// ends, every session is closed and its pending requests are rejected.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = listener.local_addr()?;
        info!("MCP HTTP transport listening on http://{}{}", address, self.config.endpoint());

        let _running = ServeGuard {
            sessions: self.sessions.clone(),
            reaper: self.sessions.spawn_reaper(self.config.reaper_interval),
        };

        // open event streams would hold graceful shutdown forever
        let sessions = self.sessions.clone();
        let shutdown = async move {
            shutdown.await;
            info!("Shutting down HTTP transport");
            sessions.close_all();
        };

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::TransportError(format!("HTTP server failed: {}", e)))
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

struct ServeGuard {
    sessions: Arc<SessionStore>,
    reaper: JoinHandle<()>,
}

impl Drop for ServeGuard {
    fn drop(&mut self) {
        self.reaper.abort();
        let closed = self.sessions.close_all();
        if closed > 0 {
            info!("Closed {} sessions on shutdown", closed);
        }
    }
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("text/event-stream"))
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

fn accepted(session_id: &str) -> Response {
    with_session_header(StatusCode::ACCEPTED.into_response(), session_id)
}

fn error_response(status: StatusCode, id: Option<&RequestId>, error: &Error) -> Response {
    let body = JSONRPCMessage::Error(JSONRPCError::from_error(id.cloned(), error));
    (status, Json(body)).into_response()
}

/// Find the session named by the request headers, or the response refusing the call
fn lookup_session(
    state: &AppState,
    headers: &HeaderMap,
    id: Option<&RequestId>,
) -> std::result::Result<Arc<Session>, Response> {
    let Some(session_id) = headers.get(SESSION_HEADER).and_then(|value| value.to_str().ok()) else {
        let error = Error::InvalidRequest(format!("Missing {} header", SESSION_HEADER));
        return Err(error_response(StatusCode::BAD_REQUEST, id, &error));
    };
    state.sessions.get(session_id).ok_or_else(|| {
        debug!("Unknown session {}", session_id);
        error_response(StatusCode::NOT_FOUND, id, &Error::SessionNotFound(session_id.to_string()))
    })
}

async fn handle_post(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(failure) => {
            debug!("Rejecting POST body: {}", failure);
            return (StatusCode::BAD_REQUEST, Json(failure.to_error_response())).into_response();
        }
    };

    let initializing = message.is_request() && message.method() == Some(methods::INITIALIZE);
    let session = if initializing {
        state.sessions.create()
    } else {
        match lookup_session(&state, &headers, message.id()) {
            Ok(session) => session,
            Err(response) => return response,
        }
    };
    session.touch();

    if message.is_reply() {
        session.pending().resolve(message);
        return accepted(session.id());
    }

    if message.is_notification() {
        state.server.handle_message(session.connection(), message).await;
        return accepted(session.id());
    }

    if !initializing && accepts_event_stream(&headers) {
        let stream = sse::request_stream(state.server.clone(), session.clone(), message);
        let response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
        return with_session_header(response, session.id());
    }

    match state.server.handle_message(session.connection(), message).await {
        DispatchOutcome::Response(reply) => {
            if initializing && matches!(reply, JSONRPCMessage::Error(_)) {
                state.sessions.remove(session.id());
                return (StatusCode::OK, Json(reply)).into_response();
            }
            with_session_header((StatusCode::OK, Json(reply)).into_response(), session.id())
        }
        DispatchOutcome::None => accepted(session.id()),
    }
}

async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !accepts_event_stream(&headers) {
        return (StatusCode::NOT_ACCEPTABLE, "GET requires Accept: text/event-stream").into_response();
    }
    let session = match lookup_session(&state, &headers, None) {
        Ok(session) => session,
        Err(response) => return response,
    };
    session.touch();
    debug!("Opening standalone event stream for session {}", session.id());

    let response = Sse::new(sse::standalone_stream(session.clone()))
        .keep_alive(KeepAlive::default())
        .into_response();
    with_session_header(response, session.id())
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match lookup_session(&state, &headers, None) {
        Ok(session) => session,
        Err(response) => return response,
    };
    state.sessions.remove(session.id());
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_health(State(state): State<AppState>) -> Response {
    let implementation = state.server.implementation();
    Json(json!({
        "status": "ok",
        "name": implementation.name,
        "version": implementation.version,
        "sessions": state.sessions.len(),
    }))
    .into_response()
}
