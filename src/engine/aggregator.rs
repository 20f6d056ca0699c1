//! Thread-safe accumulation of per-item outcomes

use super::item::{ItemStatus, OperationResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Run-wide counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatistics {
    pub total_items: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl RunStatistics {
    fn new(total_items: usize) -> Self {
        Self {
            total_items,
            processed_count: 0,
            success_count: 0,
            failure_count: 0,
            skipped_count: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Percent of items processed, rounded to one decimal
    pub fn percent_complete(&self) -> f64 {
        percent(self.processed_count, self.total_items)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count > 0
    }
}

pub(crate) fn percent(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (processed as f64 / total as f64 * 1000.0).round() / 10.0
}

struct Inner {
    stats: RunStatistics,
    results: Vec<OperationResult>,
}

/// Collects every [`OperationResult`] of a run
///
/// Counters and the result list sit behind one lock, so a snapshot always
/// satisfies `success + failure + skipped == processed`.
pub struct ResultAggregator {
    inner: Mutex<Inner>,
}

impl ResultAggregator {
    pub fn new(total_items: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stats: RunStatistics::new(total_items),
                results: Vec::with_capacity(total_items),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking worker never holds this lock across user code
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, result: OperationResult) {
        let mut inner = self.lock();
        let stats = &mut inner.stats;
        stats.processed_count += 1;
        match result.status {
            ItemStatus::Success => stats.success_count += 1,
            ItemStatus::Failed => stats.failure_count += 1,
            ItemStatus::Skipped => stats.skipped_count += 1,
        }
        inner.results.push(result);
    }

    pub fn snapshot(&self) -> RunStatistics {
        self.lock().stats.clone()
    }

    /// Stamp the end time; later snapshots report a fixed duration
    pub fn finish(&self) -> RunStatistics {
        let mut inner = self.lock();
        inner.stats.end_time = Some(Utc::now());
        inner.stats.clone()
    }

    /// Failed results, in the order they were recorded
    pub fn failed_items(&self) -> Vec<OperationResult> {
        self.lock()
            .results
            .iter()
            .filter(|r| r.is_failed())
            .cloned()
            .collect()
    }

    pub fn all_items(&self) -> Vec<OperationResult> {
        self.lock().results.clone()
    }
}
