//! Line-delimited transport
//!
//! One JSON-RPC message per line over any byte stream, stdin/stdout by
//! default. Requests are dispatched on their own tasks so a slow tool never
//! blocks the read loop; replies to server-initiated requests are matched
//! against the pending table before anything is dispatched.

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::peer::{send_on, ChannelPeer};
use super::pending::PendingRequests;
use super::{ConnectionGuard, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{Error, Result};
use crate::protocol::json_rpc::error_codes;
use crate::protocol::{parse_message, serialize_message, JSONRPCError, JSONRPCMessage};
use crate::server::{ConnectionHandle, DispatchOutcome, Server};

/// Longest line accepted before the frame is rejected (16 MiB)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Serves one connection over a pair of byte streams
pub struct LineTransport {
    server: Arc<Server>,
    request_timeout: Duration,
    max_line_length: usize,
}

impl LineTransport {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// How long server-initiated requests wait for the client
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Serve the process's stdin and stdout until stdin closes
    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve until `reader` reaches end of input or either stream fails.
    ///
    /// On every exit path outstanding server-initiated requests are rejected,
    /// in-flight handlers are cancelled and joined, queued frames are written
    /// and the connection is removed from the server.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let id = Uuid::new_v4().to_string();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingRequests::new(self.request_timeout));
        let peer = Arc::new(ChannelPeer::new(outgoing.clone(), pending.clone()));
        let connection = self.server.open_connection(id.clone(), peer);
        let registered = ConnectionGuard::new(self.server.clone(), id.clone());
        let closing = pending.close_on_drop();
        info!("Line transport connection {} started", id);

        let stop_writer = CancellationToken::new();
        let writer_failed = CancellationToken::new();
        let writing = write_loop(writer, outgoing_rx, stop_writer.clone(), writer_failed.clone());

        let reading = async move {
            let mut handlers = JoinSet::new();
            let result = self
                .read_loop(reader, &connection, &pending, &outgoing, &mut handlers, &writer_failed)
                .await;

            drop(closing);
            drop(registered);
            while let Some(joined) = handlers.join_next().await {
                log_join(joined);
            }
            stop_writer.cancel();
            result
        };

        let (read_result, write_result) = tokio::join!(reading, writing);
        info!("Line transport connection {} closed", id);
        read_result.and(write_result)
    }

    async fn read_loop<R>(
        &self,
        reader: R,
        connection: &ConnectionHandle,
        pending: &PendingRequests,
        outgoing: &mpsc::UnboundedSender<JSONRPCMessage>,
        handlers: &mut JoinSet<()>,
        writer_failed: &CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(self.max_line_length));
        // FramedRead yields one None right after a decode error, then resumes reading
        let mut recovering = false;

        loop {
            tokio::select! {
                _ = writer_failed.cancelled() => {
                    return Err(Error::TransportError("output stream failed".to_string()));
                }
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => log_join(joined),
                next = lines.next() => match next {
                    Some(Ok(line)) => {
                        recovering = false;
                        self.handle_line(&line, connection, pending, outgoing, handlers).await;
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!("Rejecting line longer than {} bytes on {}", self.max_line_length, connection.id());
                        recovering = true;
                        let failure = JSONRPCError::new(
                            None,
                            error_codes::PARSE_ERROR,
                            format!("Parse error: line exceeds {} bytes", self.max_line_length),
                            None,
                        );
                        reply(outgoing, JSONRPCMessage::Error(failure));
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        error!("Read failed on {}: {}", connection.id(), e);
                        return Err(e.into());
                    }
                    None if recovering => recovering = false,
                    None => {
                        debug!("End of input on {}", connection.id());
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn handle_line(
        &self,
        line: &str,
        connection: &ConnectionHandle,
        pending: &PendingRequests,
        outgoing: &mpsc::UnboundedSender<JSONRPCMessage>,
        handlers: &mut JoinSet<()>,
    ) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let message = match parse_message(line) {
            Ok(message) => message,
            Err(failure) => {
                debug!("Malformed line on {}: {}", connection.id(), failure);
                reply(outgoing, failure.to_error_response());
                return;
            }
        };

        if message.is_reply() {
            pending.resolve(message);
            return;
        }

        if message.is_notification() {
            self.server.handle_message(connection, message).await;
            return;
        }

        let server = self.server.clone();
        let connection = connection.clone();
        let outgoing = outgoing.clone();
        handlers.spawn(async move {
            if let DispatchOutcome::Response(response) = server.handle_message(&connection, message).await {
                reply(&outgoing, response);
            }
        });
    }
}

fn reply(outgoing: &mpsc::UnboundedSender<JSONRPCMessage>, message: JSONRPCMessage) {
    if send_on(outgoing, message).is_err() {
        debug!("Dropping reply: output already closed");
    }
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("Request handler panicked: {}", e);
        }
    }
}

/// Write queued frames until told to stop, then drain what is left
async fn write_loop<W>(
    writer: W,
    mut outgoing: mpsc::UnboundedReceiver<JSONRPCMessage>,
    stop: CancellationToken,
    failed: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    let mut stopping = false;

    loop {
        let next = if stopping {
            outgoing.recv().await
        } else {
            tokio::select! {
                biased;
                message = outgoing.recv() => message,
                _ = stop.cancelled() => {
                    stopping = true;
                    outgoing.close();
                    continue;
                }
            }
        };
        let Some(message) = next else {
            break;
        };

        let line = match serialize_message(&message) {
            Ok(line) => line,
            Err(e) => {
                error!("Dropping frame that failed to serialize: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(line).await {
            failed.cancel();
            return Err(Error::TransportError(format!("Failed to write frame: {}", e)));
        }
    }
    Ok(())
}
