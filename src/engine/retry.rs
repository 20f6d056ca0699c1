//! Retry with exponential backoff and jitter on throttling

use crate::error::{BulkError, Result};
use rand::Rng;
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for throttled calls
///
/// The delay before retry `n` (1-based) is `2^n * base + jitter`, or the
/// server-supplied `Retry-After` when that is longer.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub jitter: RangeInclusive<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            jitter: Duration::from_millis(200)..=Duration::from_millis(1000),
        }
    }
}

impl BackoffPolicy {
    pub fn immediate() -> Self {
        Self {
            base: Duration::ZERO,
            jitter: Duration::ZERO..=Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.jitter.start() > self.jitter.end() {
            return Err(BulkError::InvalidConfig(
                "backoff jitter minimum exceeds maximum".into(),
            ));
        }
        Ok(())
    }

    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exponential = self.base.saturating_mul(2u32.saturating_pow(retry));
        let backoff = exponential.saturating_add(random_between(&self.jitter));
        match retry_after {
            Some(server) => server.max(backoff),
            None => backoff,
        }
    }
}

/// Uniform random duration in `range`, millisecond resolution
pub(crate) fn random_between(range: &RangeInclusive<Duration>) -> Duration {
    let lo = range.start().as_millis() as u64;
    let hi = range.end().as_millis() as u64;
    if hi <= lo {
        return Duration::from_millis(lo);
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

/// One backoff step, handed to the optional observer
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    pub target: String,
    /// 1-based retry number
    pub attempt: u32,
    pub delay: Duration,
    pub retry_after: Option<Duration>,
}

type RetryObserver = Arc<dyn Fn(&RetryAttempt) + Send + Sync>;

/// Runs a remote call, absorbing throttling up to `max_retries` retries
///
/// Only [`BulkError::Throttled`] is retried. Every other error is returned
/// on the first occurrence.
#[derive(Clone)]
pub struct RetryingInvoker {
    max_retries: u32,
    policy: BackoffPolicy,
    observer: Option<RetryObserver>,
}

impl RetryingInvoker {
    pub fn new(max_retries: u32, policy: BackoffPolicy) -> Self {
        Self {
            max_retries,
            policy,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl Fn(&RetryAttempt) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn invoke<T, F, Fut>(&self, target: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry_count = 0u32;

        loop {
            match operation().await {
                Err(err) if err.is_throttled() => {
                    if retry_count >= self.max_retries {
                        warn!(
                            item = %target,
                            attempts = retry_count + 1,
                            "Throttle retries exhausted"
                        );
                        return Err(BulkError::ThrottleExhausted {
                            target: target.to_string(),
                            attempts: retry_count + 1,
                        });
                    }

                    retry_count += 1;
                    let retry_after = err.retry_after();
                    let delay = self.policy.delay_for(retry_count, retry_after);

                    warn!(
                        item = %target,
                        attempt = retry_count,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Throttled, backing off"
                    );

                    if let Some(observer) = &self.observer {
                        observer(&RetryAttempt {
                            target: target.to_string(),
                            attempt: retry_count,
                            delay,
                            retry_after,
                        });
                    }

                    tokio::time::sleep(delay).await;
                }
                other => {
                    if retry_count > 0 {
                        debug!(item = %target, retries = retry_count, "Call settled after retries");
                    }
                    return other;
                }
            }
        }
    }
}
