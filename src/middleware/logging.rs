//! Structured logging around every handler call

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn, Level};

use super::{Middleware, Next, RequestInfo};
use crate::error::Result;
use crate::server::HandlerContext;

/// Logs start, success and failure of each call with `tracing` fields
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    level: Level,
    include_input: bool,
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_input: false,
        }
    }
}

impl LoggingMiddleware {
    /// Log at INFO without request input
    pub fn new() -> Self {
        Self::default()
    }

    /// Log start and success at `level` (DEBUG or INFO)
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Include raw arguments in the start event
    pub fn with_input(mut self, include: bool) -> Self {
        self.include_input = include;
        self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, ctx: &HandlerContext, info: &RequestInfo, next: Next) -> Result<Value> {
        let input = if self.include_input { info.input.to_string() } else { String::new() };
        if self.level == Level::DEBUG {
            debug!(kind = %info.kind, name = %info.name, connection = %ctx.connection_id(), input = %input, "handler started");
        } else {
            info!(kind = %info.kind, name = %info.name, connection = %ctx.connection_id(), input = %input, "handler started");
        }

        let result = next.run(ctx).await;
        let elapsed_ms = info.started_at.elapsed().as_millis() as u64;

        match &result {
            Ok(_) if self.level == Level::DEBUG => {
                debug!(kind = %info.kind, name = %info.name, elapsed_ms, "handler succeeded")
            }
            Ok(_) => info!(kind = %info.kind, name = %info.name, elapsed_ms, "handler succeeded"),
            Err(e) => warn!(kind = %info.kind, name = %info.name, elapsed_ms, error = %e, "handler failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::tests::{counting_terminal, info};
    use crate::middleware::MiddlewareChain;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_logging_is_transparent() {
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(LoggingMiddleware::new().with_input(true)));
        chain.push(Arc::new(LoggingMiddleware::new().with_level(Level::DEBUG)));

        let calls = Arc::new(AtomicUsize::new(0));
        let result = chain
            .execute(&HandlerContext::detached(), info(), counting_terminal(calls.clone(), json!("ok")))
            .await
            .unwrap();
        assert_eq!(result, json!("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
