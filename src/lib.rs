//! # mcp-duplex: server-side Model Context Protocol SDK
//!
//! `mcp-duplex` lets a program expose tools, resources and prompts to MCP
//! clients over JSON-RPC 2.0. Handlers are registered on a
//! [`ServerBuilder`]; the resulting [`Server`] is driven by a transport:
//!
//! - [`LineTransport`] speaks newline-delimited JSON over stdio or any
//!   async byte stream
//! - [`HttpTransport`] serves a session-based HTTP endpoint with optional
//!   server-sent event streams
//!
//! Both are bidirectional. A running handler can report progress, send log
//! messages and make requests of its own to the client (sampling,
//! elicitation, roots) through its [`HandlerContext`].
//!
//! ```no_run
//! use mcp_duplex::protocol::{CallToolResult, Tool};
//! use mcp_duplex::{HandlerContext, LineTransport, Server};
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! # async fn run() -> mcp_duplex::Result<()> {
//! let server = Server::builder()
//!     .with_implementation("echo", "0.1.0")
//!     .with_tool(Tool::new("echo", "Echo the input"), |args: Value, _ctx: HandlerContext| async move {
//!         Ok(CallToolResult::text(args.to_string()))
//!     })
//!     .build()?;
//!
//! LineTransport::new(Arc::new(server)).serve_stdio().await
//! # }
//! ```

pub mod error;
pub mod logging;
pub mod middleware;
pub mod protocol;
pub mod server;
pub mod subscriptions;
pub mod transport;
pub mod utils;

// Re-export commonly used types for convenience
pub use error::{Error, Result};
pub use protocol::Implementation;
pub use server::{HandlerContext, Server, ServerBuilder};
pub use transport::{HttpConfig, HttpTransport, LineTransport};
