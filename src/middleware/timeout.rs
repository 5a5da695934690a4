//! Deadline for handler execution

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{Middleware, Next, RequestInfo};
use crate::error::{Error, Result};
use crate::server::HandlerContext;

/// Fails the call with `Error::Timeout` if the rest of the chain takes longer than `duration`.
///
/// The losing handler future is dropped, which is as far as cancellation goes here.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMiddleware {
    duration: Duration,
}

impl TimeoutMiddleware {
    /// Create a timeout layer
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Middleware for TimeoutMiddleware {
    async fn handle(&self, ctx: &HandlerContext, info: &RequestInfo, next: Next) -> Result<Value> {
        match tokio::time::timeout(self.duration, next.run(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} '{}' timed out after {}ms",
                info.kind,
                info.name,
                self.duration.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::tests::info;
    use crate::middleware::{MiddlewareChain, Terminal};
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::Arc;

    fn sleeping(delay: Duration) -> Terminal {
        Arc::new(move |_ctx: HandlerContext| {
            async move {
                tokio::time::sleep(delay).await;
                Ok(json!("done"))
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(TimeoutMiddleware::new(Duration::from_millis(100))));

        let err = chain
            .execute(&HandlerContext::detached(), info(), sleeping(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(ref m) if m.contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_passes() {
        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(TimeoutMiddleware::new(Duration::from_secs(1))));

        let value = chain
            .execute(&HandlerContext::detached(), info(), sleeping(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(value, json!("done"));
    }
}
