//! Retry layer for outbound calls.
//!
//! Only idempotent (pure read) methods are retried, and only on transport
//! failures. A mutating call is attempted exactly once whatever the error:
//! a second `github.issues.create` could file a duplicate issue.

use std::future::Future;
use std::time::Duration;

use crate::envelope::split_method;
use crate::error::TransportError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Actions that only read state.
const READ_ACTIONS: &[&str] = &["list", "get", "info", "status", "ping", "discover", "scan"];

/// Namespaces whose every method is a read.
const READ_NAMESPACES: &[&str] = &["health"];

/// `true` when `method` may be retried safely.
pub fn is_idempotent(method: &str) -> bool {
    let (namespace, _) = split_method(method);
    if READ_NAMESPACES.contains(&namespace) {
        return true;
    }
    match method.rsplit_once('.') {
        Some((_, action)) => READ_ACTIONS.contains(&action),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// No retries at all.
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Run `op`, retrying on transport errors when `method` is idempotent.
    /// The attempt counter is local to this call. Exhausting the budget
    /// surfaces the last error unchanged.
    pub async fn run<T, F, Fut>(&self, method: &str, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let budget = if is_idempotent(method) { self.max_retries } else { 0 };
        let mut attempt = 0u32;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(method = %method, attempt = attempt + 1, "retry: call succeeded");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < budget => {
                    attempt += 1;
                    tracing::warn!(
                        method = %method,
                        attempt,
                        max_retries = budget,
                        "retry: transport failure, retrying in {}ms: {}",
                        self.delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
