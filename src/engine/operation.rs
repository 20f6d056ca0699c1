//! Per-item operation seam and the dry-run wrapper

use super::item::WorkItem;
use crate::error::Result;
use async_trait::async_trait;

/// What a successful call did to one item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// The change was applied (or the data read); `detail` lands in the report
    Completed { detail: Option<String> },
    /// Nothing to do for this item
    Skipped { reason: String },
}

impl ItemOutcome {
    pub fn completed() -> Self {
        ItemOutcome::Completed { detail: None }
    }

    pub fn completed_with(detail: impl Into<String>) -> Self {
        ItemOutcome::Completed {
            detail: Some(detail.into()),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        ItemOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// The per-item unit of work a bulk command plugs into the engine
///
/// Implementations perform the remote call(s) for one item. A throttling
/// response must surface as `BulkError::Throttled` so the engine can back
/// off and call `execute` again.
#[async_trait]
pub trait ItemOperation: Send + Sync {
    /// Short description used in logs and dry-run notes, e.g. "disable per-user MFA"
    fn description(&self) -> String;

    async fn execute(&self, item: &WorkItem) -> Result<ItemOutcome>;
}

/// Stand-in used for dry runs: never touches the service
pub struct DryRunOperation {
    description: String,
}

impl DryRunOperation {
    pub fn wrapping(operation: &dyn ItemOperation) -> Self {
        Self {
            description: operation.description(),
        }
    }
}

#[async_trait]
impl ItemOperation for DryRunOperation {
    fn description(&self) -> String {
        format!("dry run of {}", self.description)
    }

    async fn execute(&self, _item: &WorkItem) -> Result<ItemOutcome> {
        Ok(ItemOutcome::skipped(format!(
            "dry run: would {}",
            self.description
        )))
    }
}
