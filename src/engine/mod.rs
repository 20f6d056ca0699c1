//! Batched, rate-limited bulk-mutation engine
//!
//! Shared by every bulk command. A run is a sequence of batches processed
//! strictly one after another; within a batch at most `concurrency_limit`
//! operations are in flight. Each operation is wrapped in a retrying invoker
//! that absorbs throttling, and every item ends in exactly one
//! [`OperationResult`] recorded by the [`ResultAggregator`].

pub mod aggregator;
pub mod driver;
pub mod item;
pub mod operation;
pub mod pool;
pub mod retry;
pub mod scheduler;

pub use aggregator::{ResultAggregator, RunStatistics};
pub use driver::{
    BulkOperationDriver, DriverState, ReportSink, RunReport, SessionOwnership, SessionProvider,
};
pub use item::{BatchPlan, ItemStatus, OperationResult, RawRecord, WorkItem};
pub use operation::{DryRunOperation, ItemOperation, ItemOutcome};
pub use pool::WorkerPool;
pub use retry::{BackoffPolicy, RetryAttempt, RetryingInvoker};
pub use scheduler::{BatchScheduler, Progress, ProgressSink, ScheduleOutcome};

use crate::error::{BulkError, Result};
use std::ops::RangeInclusive;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_INTER_BATCH_DELAY_SECS: u64 = 2;

/// Range the CLI accepts for `--concurrency`
pub const CONCURRENCY_RANGE: RangeInclusive<usize> = 1..=20;

/// Tunables for one bulk run
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Items per batch; the last batch may be smaller
    pub batch_size: usize,
    /// Maximum operations in flight within a batch
    pub concurrency_limit: usize,
    /// Retries after the first attempt while throttled
    pub max_retries: u32,
    /// Cooldown between batches, skipped after the last one
    pub inter_batch_delay: Duration,
    /// Random delay before each item starts, to spread bursts
    pub start_jitter: RangeInclusive<Duration>,
    pub backoff: BackoffPolicy,
    /// Replace the real operation with a no-op that reports `Skipped`
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            max_retries: DEFAULT_MAX_RETRIES,
            inter_batch_delay: Duration::from_secs(DEFAULT_INTER_BATCH_DELAY_SECS),
            start_jitter: Duration::from_millis(100)..=Duration::from_millis(500),
            backoff: BackoffPolicy::default(),
            dry_run: false,
        }
    }
}

impl EngineConfig {
    /// Config with every delay removed, for tests and local stubs
    pub fn immediate() -> Self {
        Self {
            inter_batch_delay: Duration::ZERO,
            start_jitter: Duration::ZERO..=Duration::ZERO,
            backoff: BackoffPolicy::immediate(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BulkError::InvalidConfig(
                "batch size must be at least 1".into(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(BulkError::InvalidConfig(
                "concurrency limit must be at least 1".into(),
            ));
        }
        if self.start_jitter.start() > self.start_jitter.end() {
            return Err(BulkError::InvalidConfig(
                "start jitter minimum exceeds maximum".into(),
            ));
        }
        self.backoff.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 5);
        assert!(CONCURRENCY_RANGE.contains(&config.concurrency_limit));
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let config = EngineConfig {
            batch_size: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(BulkError::InvalidConfig(_))));

        let config = EngineConfig {
            concurrency_limit: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(BulkError::InvalidConfig(_))));
    }

    #[test]
    fn test_engine_accepts_concurrency_above_cli_range() {
        let config = EngineConfig {
            concurrency_limit: 64,
            ..EngineConfig::immediate()
        };
        assert!(config.validate().is_ok());
    }
}
