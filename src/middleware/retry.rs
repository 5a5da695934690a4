//! Retry with fixed or exponential backoff

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Middleware, Next, RequestInfo};
use crate::error::{Error, Result};
use crate::server::HandlerContext;

/// Delay between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// The same delay every time
    Fixed(Duration),
    /// `initial * multiplier^n`, capped at `max`
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay before retry number `retry` (0 for the first retry)
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, multiplier, max } => {
                let secs = initial.as_secs_f64() * multiplier.powi(retry as i32);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_secs(5),
        }
    }
}

type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Re-executes the rest of the chain until it succeeds, the predicate refuses,
/// or `max_attempts` calls have been made.
#[derive(Clone)]
pub struct RetryMiddleware {
    max_attempts: u32,
    backoff: Backoff,
    retryable: RetryPredicate,
}

impl RetryMiddleware {
    /// Retry up to `max_attempts` total calls with the default backoff
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::default(),
            retryable: Arc::new(default_retryable),
        }
    }

    /// Set the backoff
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Decide which failures are worth another attempt
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }
}

/// Everything except cancellation, bad input and middleware bugs
fn default_retryable(error: &Error) -> bool {
    !matches!(
        error,
        Error::Cancelled(_)
            | Error::MiddlewareMisuse(_)
            | Error::InvalidParams(_)
            | Error::ResourceNotFound(_)
            | Error::PromptNotFound(_)
    )
}

impl fmt::Debug for RetryMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryMiddleware")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn handle(&self, ctx: &HandlerContext, info: &RequestInfo, next: Next) -> Result<Value> {
        let mut attempt = 1;
        loop {
            let error = match next.rerun(ctx).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= self.max_attempts || !(self.retryable)(&error) || ctx.is_cancelled() {
                if attempt > 1 {
                    warn!(kind = %info.kind, name = %info.name, attempt, error = %error, "giving up");
                }
                return Err(error);
            }

            let delay = self.backoff.delay(attempt - 1);
            debug!(kind = %info.kind, name = %info.name, attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancellation_token().cancelled() => return Err(error),
            }
            attempt += 1;
        }
    }
}
