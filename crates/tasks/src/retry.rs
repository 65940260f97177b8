//! Fixed-delay retry

use serde_json::json;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use omnigate_eventlog::EventLogger;

/// Extra attempts after the first, and the pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// No retries
    pub fn once() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1))
    }
}

/// Run `operation` up to `retries + 1` times.
///
/// Each failure is logged as `task_retry_error`; when the attempts are
/// exhausted a `task_failed` event is logged and the last error returned.
pub async fn with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    logger: &EventLogger,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let attempts = policy.retries + 1;
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                logger.log(
                    "task_retry_error",
                    json!({"attempt": attempt, "error": e.to_string()}),
                );
                if attempt >= attempts {
                    logger.log(
                        "task_failed",
                        json!({"error": e.to_string(), "retries": attempts}),
                    );
                    warn!("task failed after {} attempts: {}", attempts, e);
                    return Err(e);
                }
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
