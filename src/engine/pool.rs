//! Bounded-concurrency execution of one batch

use super::aggregator::ResultAggregator;
use super::item::{BatchPlan, OperationResult, WorkItem};
use super::operation::{ItemOperation, ItemOutcome};
use super::retry::{RetryingInvoker, random_between};
use super::EngineConfig;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

pub struct WorkerPool {
    concurrency_limit: usize,
    start_jitter: RangeInclusive<Duration>,
    invoker: RetryingInvoker,
}

impl WorkerPool {
    pub fn new(
        concurrency_limit: usize,
        start_jitter: RangeInclusive<Duration>,
        invoker: RetryingInvoker,
    ) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            start_jitter,
            invoker,
        }
    }

    pub fn from_config(config: &EngineConfig, invoker: RetryingInvoker) -> Self {
        Self::new(
            config.concurrency_limit,
            config.start_jitter.clone(),
            invoker,
        )
    }

    /// Run every item of `batch` and wait for all of them
    ///
    /// Each result is recorded into `aggregator` as soon as its item finishes,
    /// and the batch's results are returned in completion order. A panic or
    /// error in one item becomes a `Failed` result for that item only.
    pub async fn run_batch(
        &self,
        batch: &BatchPlan,
        operation: Arc<dyn ItemOperation>,
        aggregator: Arc<ResultAggregator>,
    ) -> Vec<OperationResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut join_set = JoinSet::new();

        for (i, item) in batch.items.iter().enumerate() {
            let position = batch.offset + i;
            let item = item.clone();
            let operation = operation.clone();
            let aggregator = aggregator.clone();
            let semaphore = semaphore.clone();
            let invoker = self.invoker.clone();
            let jitter = self.start_jitter.clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();

                let delay = random_between(&jitter);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                debug!(item = %item.identifier, position, "Starting item");
                let result = run_item(position, &item, operation.as_ref(), &invoker).await;
                debug!(item = %item.identifier, status = %result.status, "Finished item");

                aggregator.record(result.clone());
                result
            });
        }

        let mut results = Vec::with_capacity(batch.size());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(batch = batch.index, error = %e, "Worker task did not complete"),
            }
        }

        if results.len() < batch.size() {
            let seen: HashSet<usize> = results.iter().map(|r| r.position).collect();
            for (i, item) in batch.items.iter().enumerate() {
                let position = batch.offset + i;
                if !seen.contains(&position) {
                    let result = OperationResult::failed(
                        position,
                        item,
                        "worker task ended without producing a result",
                    );
                    aggregator.record(result.clone());
                    results.push(result);
                }
            }
        }

        results
    }
}

async fn run_item(
    position: usize,
    item: &WorkItem,
    operation: &dyn ItemOperation,
    invoker: &RetryingInvoker,
) -> OperationResult {
    let call = invoker.invoke(&item.identifier, || operation.execute(item));

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(ItemOutcome::Completed { detail })) => OperationResult::success(position, item, detail),
        Ok(Ok(ItemOutcome::Skipped { reason })) => OperationResult::skipped(position, item, reason),
        Ok(Err(err)) => OperationResult::failed(position, item, err.to_string()),
        Err(panic) => OperationResult::failed(
            position,
            item,
            format!("operation panicked: {}", panic_message(panic.as_ref())),
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::item::ItemStatus;
    use crate::engine::retry::BackoffPolicy;
    use crate::error::{BulkError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracker {
        active: AtomicUsize,
        peak: AtomicUsize,
        fail_on: Option<String>,
        panic_on: Option<String>,
    }

    impl Tracker {
        fn new() -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_on: None,
                panic_on: None,
            }
        }
    }

    #[async_trait]
    impl ItemOperation for Tracker {
        fn description(&self) -> String {
            "tracked".into()
        }

        async fn execute(&self, item: &WorkItem) -> Result<ItemOutcome> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.panic_on.as_deref() == Some(item.identifier.as_str()) {
                panic!("unexpected state for {}", item.identifier);
            }
            if self.fail_on.as_deref() == Some(item.identifier.as_str()) {
                return Err(BulkError::GraphApiError("HTTP 404".into()));
            }
            Ok(ItemOutcome::completed())
        }
    }

    fn batch(n: usize) -> BatchPlan {
        let items: Vec<Arc<WorkItem>> = (0..n)
            .map(|i| Arc::new(WorkItem::new(format!("user{i}"))))
            .collect();
        BatchPlan::partition(&items, n).remove(0)
    }

    fn pool(limit: usize) -> WorkerPool {
        WorkerPool::new(
            limit,
            Duration::ZERO..=Duration::ZERO,
            RetryingInvoker::new(5, BackoffPolicy::immediate()),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_limit() {
        for limit in [1, 3, 7] {
            let tracker = Arc::new(Tracker::new());
            let agg = Arc::new(ResultAggregator::new(25));
            let results = pool(limit).run_batch(&batch(25), tracker.clone(), agg.clone()).await;

            assert_eq!(results.len(), 25);
            assert!(tracker.peak.load(Ordering::SeqCst) <= limit);
            assert_eq!(agg.snapshot().success_count, 25);
        }
    }

    #[tokio::test]
    async fn test_panic_is_isolated_to_its_item() {
        let tracker = Arc::new(Tracker {
            panic_on: Some("user3".into()),
            ..Tracker::new()
        });
        let agg = Arc::new(ResultAggregator::new(10));
        let results = pool(4).run_batch(&batch(10), tracker, agg.clone()).await;

        assert_eq!(results.len(), 10);
        let positions: HashSet<usize> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions.len(), 10);

        for r in &results {
            if r.identifier == "user3" {
                assert_eq!(r.status, ItemStatus::Failed);
                assert!(r.error_message.as_deref().unwrap().contains("panicked"));
            } else {
                assert_eq!(r.status, ItemStatus::Success);
            }
        }
        assert_eq!(agg.snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_error_becomes_failed_result() {
        let tracker = Arc::new(Tracker {
            fail_on: Some("user1".into()),
            ..Tracker::new()
        });
        let agg = Arc::new(ResultAggregator::new(3));
        pool(2).run_batch(&batch(3), tracker, agg.clone()).await;

        let failed = agg.failed_items();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].identifier, "user1");
        assert!(failed[0].error_message.as_deref().unwrap().contains("404"));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
