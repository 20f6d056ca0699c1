//! Run lifecycle: connect, validate, process, summarize, disconnect

use super::aggregator::{ResultAggregator, RunStatistics};
use super::item::{BatchPlan, OperationResult, WorkItem};
use super::operation::{DryRunOperation, ItemOperation};
use super::retry::RetryingInvoker;
use super::scheduler::{BatchScheduler, ProgressSink};
use super::EngineConfig;
use crate::error::{BulkError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Connecting,
    Validating,
    Processing,
    Summarizing,
    Disconnecting,
    Done,
    ValidationFailed,
    ConnectionFailed,
}

/// Whether this run opened the session it used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOwnership {
    /// Opened by the driver, closed by the driver
    Owned,
    /// Already open when the run started, left open
    External,
}

/// Source of the directory session a run works against
#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: Send + Sync;

    /// A live session that already exists under a compatible identity
    async fn existing(&self) -> Result<Option<Self::Session>>;

    async fn connect(&self) -> Result<Self::Session>;

    async fn disconnect(&self, session: Self::Session) -> Result<()>;
}

/// Destination for the full report and the failed-items artifact
pub trait ReportSink: Send {
    /// Called once per batch, in batch order
    fn batch_completed(&mut self, batch: &BatchPlan, results: &[OperationResult]) -> Result<()>;

    /// Called once at the end of a run with at least one failure. Returns the
    /// artifact location, if one was written.
    fn write_failed(&mut self, failed: &[&WorkItem]) -> Result<Option<PathBuf>>;

    fn finish(&mut self, _statistics: &RunStatistics) -> Result<()> {
        Ok(())
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub statistics: RunStatistics,
    /// All results in recorded order
    pub results: Vec<OperationResult>,
    pub failed: Vec<OperationResult>,
    pub failed_artifact: Option<PathBuf>,
    pub cancelled: bool,
    pub ownership: SessionOwnership,
}

pub struct BulkOperationDriver<P: SessionProvider> {
    provider: P,
    config: EngineConfig,
    cancel: CancellationToken,
    invoker: Option<RetryingInvoker>,
    state: DriverState,
}

impl<P: SessionProvider> BulkOperationDriver<P> {
    pub fn new(provider: P, config: EngineConfig) -> Self {
        Self {
            provider,
            config,
            cancel: CancellationToken::new(),
            invoker: None,
            state: DriverState::Idle,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the invoker built from the config (e.g. to attach an observer)
    pub fn with_invoker(mut self, invoker: RetryingInvoker) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn transition(&mut self, next: DriverState) {
        debug!(from = ?self.state, to = ?next, "Driver state change");
        self.state = next;
    }

    /// Run `items` through the operation built by `build_operation`
    ///
    /// `build_operation` is called once, after the session is available.
    /// A session opened here is always closed before returning, including on
    /// error; a pre-existing one is left untouched.
    pub async fn run<B>(
        &mut self,
        items: Vec<WorkItem>,
        build_operation: B,
        report: &mut dyn ReportSink,
        progress: &dyn ProgressSink,
    ) -> Result<RunReport>
    where
        B: FnOnce(&P::Session) -> Result<Arc<dyn ItemOperation>>,
    {
        self.config.validate()?;

        self.transition(DriverState::Connecting);
        let (session, ownership) = match self.acquire_session().await {
            Ok(acquired) => acquired,
            Err(e) => {
                self.transition(DriverState::ConnectionFailed);
                return Err(match e {
                    BulkError::ConnectionFailed(_) => e,
                    other => BulkError::ConnectionFailed(other.to_string()),
                });
            }
        };

        let outcome = self
            .process(&session, ownership, items, build_operation, report, progress)
            .await;

        match ownership {
            SessionOwnership::Owned => {
                if outcome.is_ok() {
                    self.transition(DriverState::Disconnecting);
                }
                if let Err(e) = self.provider.disconnect(session).await {
                    warn!(error = %e, "Failed to close the session opened for this run");
                }
            }
            SessionOwnership::External => {
                debug!("Leaving pre-existing session open");
            }
        }

        if outcome.is_ok() {
            self.transition(DriverState::Done);
        }
        outcome
    }

    async fn acquire_session(&self) -> Result<(P::Session, SessionOwnership)> {
        if let Some(session) = self.provider.existing().await? {
            info!("Reusing existing session");
            return Ok((session, SessionOwnership::External));
        }
        let session = self.provider.connect().await?;
        info!("Connected new session");
        Ok((session, SessionOwnership::Owned))
    }

    async fn process<B>(
        &mut self,
        session: &P::Session,
        ownership: SessionOwnership,
        items: Vec<WorkItem>,
        build_operation: B,
        report: &mut dyn ReportSink,
        progress: &dyn ProgressSink,
    ) -> Result<RunReport>
    where
        B: FnOnce(&P::Session) -> Result<Arc<dyn ItemOperation>>,
    {
        self.transition(DriverState::Validating);
        if items.is_empty() {
            self.transition(DriverState::ValidationFailed);
            return Err(BulkError::EmptyInput);
        }
        if !items.iter().any(WorkItem::has_key) {
            self.transition(DriverState::ValidationFailed);
            return Err(BulkError::InvalidInput(
                "no item carries a user principal name or object id".into(),
            ));
        }

        let operation = build_operation(session)?;
        let operation: Arc<dyn ItemOperation> = if self.config.dry_run {
            info!(operation = %operation.description(), "Dry run, no changes will be made");
            Arc::new(DryRunOperation::wrapping(operation.as_ref()))
        } else {
            operation
        };

        self.transition(DriverState::Processing);
        let items: Vec<Arc<WorkItem>> = items.into_iter().map(Arc::new).collect();
        let aggregator = Arc::new(ResultAggregator::new(items.len()));
        let invoker = self.invoker.clone().unwrap_or_else(|| {
            RetryingInvoker::new(self.config.max_retries, self.config.backoff.clone())
        });
        let scheduler = BatchScheduler::with_invoker(&self.config, invoker, self.cancel.clone());

        info!(
            items = items.len(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency_limit,
            operation = %operation.description(),
            "Starting bulk run"
        );

        let schedule = scheduler
            .run(&items, operation, aggregator.clone(), progress, |batch, results| {
                report.batch_completed(batch, results)
            })
            .await?;

        self.transition(DriverState::Summarizing);
        let statistics = aggregator.finish();
        let failed = aggregator.failed_items();

        let failed_artifact = if failed.is_empty() {
            None
        } else {
            let failed_items: Vec<&WorkItem> = failed
                .iter()
                .filter_map(|r| items.get(r.position).map(|i| i.as_ref()))
                .collect();
            // The run's outcome stands even when the retry file cannot be written
            match report.write_failed(&failed_items) {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, count = failed_items.len(), "Could not write failed items");
                    None
                }
            }
        };
        report.finish(&statistics)?;

        info!(
            processed = statistics.processed_count,
            succeeded = statistics.success_count,
            failed = statistics.failure_count,
            skipped = statistics.skipped_count,
            cancelled = schedule.cancelled,
            "Bulk run finished"
        );

        Ok(RunReport {
            statistics,
            results: aggregator.all_items(),
            failed,
            failed_artifact,
            cancelled: schedule.cancelled,
            ownership,
        })
    }
}
