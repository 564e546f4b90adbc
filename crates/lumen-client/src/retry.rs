//! Fixed-interval retry for auth-path requests.
//!
//! Network errors are retried after a constant delay; everything else
//! returns immediately. Only the wait between attempts observes
//! cancellation. An attempt already on the wire runs to completion and the
//! caller drops its result through the session epoch.

use backoff::backoff::{Backoff, Constant};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ClientError, ClientResult};

/// Retry budget for one operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, 0 for unlimited.
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            interval,
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }
}

/// Runs `op` until it succeeds, fails non-retryably, exhausts `policy`,
/// or `cancel` fires during a wait.
pub async fn retry_with_interval<T, F, Fut>(
    stage: &str,
    epoch: u64,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let mut schedule = Constant::new(policy.interval);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Superseded { epoch });
        }

        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => e,
            Err(e) => return Err(e),
        };

        if policy.exhausted(attempt) {
            return Err(ClientError::MaxRetriesExceeded {
                stage: stage.to_string(),
                attempts: attempt,
                last_error: err.to_string(),
            });
        }

        let delay = schedule.next_backoff().unwrap_or(policy.interval);
        warn!(
            stage,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Request failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Superseded { epoch }),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
