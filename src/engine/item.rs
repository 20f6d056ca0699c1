//! Units of input and output for a bulk run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The original input row an item was parsed from
///
/// Kept verbatim so the failed-items artifact can be written with the same
/// header and values, and fed back in as the next run's input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub headers: Arc<Vec<String>>,
    pub fields: Vec<String>,
}

impl RawRecord {
    pub fn new(headers: Arc<Vec<String>>, fields: Vec<String>) -> Self {
        Self { headers, fields }
    }

    /// Look up a column value by header name (case-insensitive)
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(column))
            .and_then(|idx| self.fields.get(idx))
            .map(|v| v.as_str())
    }
}

/// One user (or other directory object) to process
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// Human-readable identifier, usually the UPN
    pub identifier: String,
    /// Object id when already known, lets operations skip a lookup
    pub resolved_key: Option<String>,
    pub raw_record: RawRecord,
}

impl WorkItem {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            resolved_key: None,
            raw_record: RawRecord::default(),
        }
    }

    pub fn with_resolved_key(mut self, key: impl Into<String>) -> Self {
        self.resolved_key = Some(key.into());
        self
    }

    pub fn with_raw_record(mut self, record: RawRecord) -> Self {
        self.raw_record = record;
        self
    }

    /// The key an operation should address the item by: the resolved
    /// object id when present, otherwise the identifier
    pub fn lookup_key(&self) -> &str {
        self.resolved_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or(&self.identifier)
    }

    /// An item is addressable when it carries at least one non-empty key
    pub fn has_key(&self) -> bool {
        !self.identifier.trim().is_empty()
            || self
                .resolved_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Success => "Success",
            ItemStatus::Failed => "Failed",
            ItemStatus::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of one item, created exactly once per item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Index of the item in the run's input
    pub position: usize,
    pub identifier: String,
    pub resolved_key: Option<String>,
    pub status: ItemStatus,
    pub error_message: Option<String>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    fn new(position: usize, item: &WorkItem, status: ItemStatus) -> Self {
        Self {
            position,
            identifier: item.identifier.clone(),
            resolved_key: item.resolved_key.clone(),
            status,
            error_message: None,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn success(position: usize, item: &WorkItem, detail: Option<String>) -> Self {
        Self {
            detail,
            ..Self::new(position, item, ItemStatus::Success)
        }
    }

    pub fn skipped(position: usize, item: &WorkItem, reason: impl Into<String>) -> Self {
        Self {
            detail: Some(reason.into()),
            ..Self::new(position, item, ItemStatus::Skipped)
        }
    }

    pub fn failed(position: usize, item: &WorkItem, error: impl Into<String>) -> Self {
        Self {
            error_message: Some(error.into()),
            ..Self::new(position, item, ItemStatus::Failed)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == ItemStatus::Failed
    }
}

/// A positional slice of the input processed as one unit
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub index: usize,
    /// Input position of the first item in this batch
    pub offset: usize,
    pub items: Vec<Arc<WorkItem>>,
}

impl BatchPlan {
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Split `items` into consecutive batches of `batch_size`, preserving order
    pub fn partition(items: &[Arc<WorkItem>], batch_size: usize) -> Vec<BatchPlan> {
        let batch_size = batch_size.max(1);
        items
            .chunks(batch_size)
            .enumerate()
            .map(|(index, chunk)| BatchPlan {
                index,
                offset: index * batch_size,
                items: chunk.to_vec(),
            })
            .collect()
    }
}
