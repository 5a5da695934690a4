//! Onion-style middleware around tool, resource and prompt execution
//!
//! Layers run in registration order on the way in and in reverse on the way
//! out. Each layer receives a [`Next`] for the rest of the chain and may call
//! [`Next::run`] at most once; a second call fails with
//! [`Error::MiddlewareMisuse`] and does not reach the handler. Layers that
//! genuinely need to execute the remainder again (retry) use [`Next::rerun`].

mod cache;
mod logging;
mod retry;
mod timeout;

pub use cache::{CacheMiddleware, CacheStore, MemoryCacheStore};
pub use logging::LoggingMiddleware;
pub use retry::{Backoff, RetryMiddleware};
pub use timeout::TimeoutMiddleware;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::server::HandlerContext;

/// Which registry the request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Tool,
    Resource,
    Prompt,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RequestKind::Tool => "tool",
            RequestKind::Resource => "resource",
            RequestKind::Prompt => "prompt",
        })
    }
}

/// What is being executed, as seen by middleware
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Tool, resource or prompt
    pub kind: RequestKind,
    /// Tool or prompt name, or the resource URI
    pub name: String,
    /// Raw arguments (tools, prompts) or template variables (resources)
    pub input: Value,
    /// When the dispatcher started the call
    pub started_at: Instant,
}

impl RequestInfo {
    /// Describe a call starting now
    pub fn new(kind: RequestKind, name: impl Into<String>, input: Value) -> Self {
        Self {
            kind,
            name: name.into(),
            input,
            started_at: Instant::now(),
        }
    }
}

/// The innermost call: the registered handler, producing a JSON result
pub type Terminal = Arc<dyn Fn(HandlerContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// One layer of the chain
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle a call, usually by delegating to `next`
    async fn handle(&self, ctx: &HandlerContext, info: &RequestInfo, next: Next) -> Result<Value>;
}

/// The remainder of the chain after the current layer
#[derive(Clone)]
pub struct Next {
    layers: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    info: Arc<RequestInfo>,
    terminal: Terminal,
    called: Arc<AtomicBool>,
}

impl Next {
    fn new(layers: Arc<[Arc<dyn Middleware>]>, index: usize, info: Arc<RequestInfo>, terminal: Terminal) -> Self {
        Self {
            layers,
            index,
            info,
            terminal,
            called: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the rest of the chain. Only the first call per layer executes anything.
    pub async fn run(&self, ctx: &HandlerContext) -> Result<Value> {
        if self.called.swap(true, Ordering::SeqCst) {
            return Err(Error::MiddlewareMisuse(format!(
                "next() called multiple times while handling {} '{}'",
                self.info.kind, self.info.name
            )));
        }
        self.invoke(ctx.clone()).await
    }

    /// Run the rest of the chain again, on purpose.
    ///
    /// Counts as a call for [`Next::run`], so mixing the two still trips the guard.
    pub async fn rerun(&self, ctx: &HandlerContext) -> Result<Value> {
        self.called.store(true, Ordering::SeqCst);
        self.invoke(ctx.clone()).await
    }

    fn invoke(&self, ctx: HandlerContext) -> BoxFuture<'static, Result<Value>> {
        match self.layers.get(self.index).cloned() {
            Some(layer) => {
                let next = Next::new(self.layers.clone(), self.index + 1, self.info.clone(), self.terminal.clone());
                let info = self.info.clone();
                async move { layer.handle(&ctx, &info, next).await }.boxed()
            }
            None => (self.terminal)(ctx),
        }
    }
}

/// An ordered set of middleware; the first added is the outermost
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// An empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer inside the existing ones
    pub fn push(&mut self, layer: Arc<dyn Middleware>) {
        self.layers.push(layer);
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether no layer is configured
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run `terminal` through every layer
    pub async fn execute(&self, ctx: &HandlerContext, info: RequestInfo, terminal: Terminal) -> Result<Value> {
        if self.layers.is_empty() {
            return terminal(ctx.clone()).await;
        }
        let layers: Arc<[Arc<dyn Middleware>]> = self.layers.clone().into();
        Next::new(layers, 0, Arc::new(info), terminal).invoke(ctx.clone()).await
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain").field("layers", &self.layers.len()).finish()
    }
}
