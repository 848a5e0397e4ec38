//! Exponential backoff with full jitter (§4.2, §4.6, §5): one policy type shared by the
//! task supervisor's restart loop and any collaborator call that retries locally before
//! falling back or DLQing.

use super::PipelineError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// `delay(n) = min(base_delay * 2^n, max_delay) * jitter`, where `jitter` is drawn
/// uniformly from `[1 - jitter_ratio, 1 + jitter_ratio]` (full jitter per §5).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    /// The provider-call policy from §4.6: three attempts at 1s/4s/15s with full jitter.
    pub fn provider_call() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(1), max_delay: Duration::from_secs(15), jitter_ratio: 1.0 }
    }

    /// The task supervisor's restart policy default (§4.2): unbounded backoff ceiling at
    /// `max_delay`, moderate jitter.
    pub fn supervisor_restart(base_delay: Duration, max_delay: Duration, jitter_ratio: f64) -> Self {
        Self { max_attempts: u32::MAX, base_delay, max_delay, jitter_ratio }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.jitter_ratio).max(0.0)..=(1.0 + self.jitter_ratio))
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }
}

/// Runs `f` up to `policy.max_attempts` times, sleeping the computed backoff between
/// attempts. Only errors where [`PipelineError::is_retryable`] returns true are retried;
/// anything else returns immediately.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> Result<T, PipelineError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0;
    loop {
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(attempt, ?delay, error = %error, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delay_is_capped_at_max_delay() {
        let policy = RetryPolicy { max_attempts: 10, base_delay: Duration::from_secs(1), max_delay: Duration::from_secs(15), jitter_ratio: 0.0 };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy { max_attempts: 5, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5), jitter_ratio: 0.0 };
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = retry_with_backoff(&policy, move |_attempt| {
            let calls = calls2.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::transient("not yet"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_return_immediately() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), PipelineError> = retry_with_backoff(&policy, move |_| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::permanent_input("bad"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
