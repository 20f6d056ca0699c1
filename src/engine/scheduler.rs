//! Sequential batch driving with inter-batch pacing

use super::aggregator::{ResultAggregator, percent};
use super::item::{BatchPlan, OperationResult, WorkItem};
use super::operation::ItemOperation;
use super::pool::WorkerPool;
use super::retry::RetryingInvoker;
use super::EngineConfig;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Progress after a completed batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    /// Rounded to one decimal
    pub percent: f64,
    /// 1-based number of the batch just completed
    pub batch: usize,
    pub batch_count: usize,
}

pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn on_progress(&self, progress: &Progress) {
        self(progress)
    }
}

/// Discards progress updates
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _progress: &Progress) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub batches_total: usize,
    pub batches_completed: usize,
    /// Remaining batches were abandoned at a batch boundary
    pub cancelled: bool,
}

pub struct BatchScheduler {
    batch_size: usize,
    inter_batch_delay: Duration,
    pool: WorkerPool,
    cancel: CancellationToken,
}

impl BatchScheduler {
    pub fn new(config: &EngineConfig, cancel: CancellationToken) -> Self {
        let invoker = RetryingInvoker::new(config.max_retries, config.backoff.clone());
        Self::with_invoker(config, invoker, cancel)
    }

    pub fn with_invoker(
        config: &EngineConfig,
        invoker: RetryingInvoker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            inter_batch_delay: config.inter_batch_delay,
            pool: WorkerPool::from_config(config, invoker),
            cancel,
        }
    }

    /// Process `items` batch by batch
    ///
    /// Batches never overlap. `on_batch_complete` runs after each batch,
    /// before the cooldown; an error from it stops the run. Cancellation is
    /// honoured between batches only, in-flight items always finish.
    pub async fn run<F>(
        &self,
        items: &[Arc<WorkItem>],
        operation: Arc<dyn ItemOperation>,
        aggregator: Arc<ResultAggregator>,
        progress: &dyn ProgressSink,
        mut on_batch_complete: F,
    ) -> Result<ScheduleOutcome>
    where
        F: FnMut(&BatchPlan, &[OperationResult]) -> Result<()>,
    {
        let batches = BatchPlan::partition(items, self.batch_size);
        let batch_count = batches.len();
        let total = items.len();

        let mut outcome = ScheduleOutcome {
            batches_total: batch_count,
            batches_completed: 0,
            cancelled: false,
        };

        for batch in &batches {
            if self.cancel.is_cancelled() {
                warn!(
                    completed = outcome.batches_completed,
                    remaining = batch_count - outcome.batches_completed,
                    "Cancellation requested, abandoning remaining batches"
                );
                outcome.cancelled = true;
                break;
            }

            info!(
                batch = batch.index + 1,
                of = batch_count,
                size = batch.size(),
                "Processing batch"
            );

            let results = self
                .pool
                .run_batch(batch, operation.clone(), aggregator.clone())
                .await;
            on_batch_complete(batch, &results)?;
            outcome.batches_completed += 1;

            let stats = aggregator.snapshot();
            let update = Progress {
                processed: stats.processed_count,
                total,
                percent: percent(stats.processed_count, total),
                batch: batch.index + 1,
                batch_count,
            };
            info!(
                processed = update.processed,
                total,
                percent = update.percent,
                succeeded = stats.success_count,
                failed = stats.failure_count,
                skipped = stats.skipped_count,
                "Batch complete"
            );
            progress.on_progress(&update);

            let is_last = batch.index + 1 == batch_count;
            if !is_last && !self.inter_batch_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.inter_batch_delay) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        Ok(outcome)
    }
}
