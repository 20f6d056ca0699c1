//! CSV report sink
//!
//! Writes two files per run:
//!
//! - the full report, one row per processed item, appended batch by batch so
//!   an interrupted run still leaves a record of what was done;
//! - `<report stem>_failed.csv`, the failed items in the input schema, ready
//!   to be passed back as `--input`.

use crate::engine::{BatchPlan, ItemStatus, OperationResult, ReportSink, RunStatistics, WorkItem};
use crate::error::Result;
use crate::input::DEFAULT_HEADERS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReportRow {
    position: usize,
    identifier: String,
    object_id: Option<String>,
    status: ItemStatus,
    error: Option<String>,
    detail: Option<String>,
    timestamp: DateTime<Utc>,
}

impl From<&OperationResult> for ReportRow {
    fn from(result: &OperationResult) -> Self {
        Self {
            position: result.position,
            identifier: result.identifier.clone(),
            object_id: result.resolved_key.clone(),
            status: result.status,
            error: result.error_message.clone(),
            detail: result.detail.clone(),
            timestamp: result.timestamp,
        }
    }
}

/// Failed-items path derived from a report path: `out/mfa.csv` -> `out/mfa_failed.csv`
pub fn failed_artifact_path(report_path: &Path) -> PathBuf {
    let stem = report_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    report_path.with_file_name(format!("{}_failed.csv", stem))
}

/// Default report name for a command, e.g. `mfa-disable_20250101_120000.csv`
pub fn default_report_path(command: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}_{}.csv",
        command,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

pub struct CsvReportSink {
    report_path: PathBuf,
    failed_path: PathBuf,
    append: bool,
    writer: Option<csv::Writer<File>>,
    rows_written: usize,
}

impl CsvReportSink {
    pub fn new(report_path: impl Into<PathBuf>) -> Self {
        let report_path = report_path.into();
        let failed_path = failed_artifact_path(&report_path);
        Self {
            report_path,
            failed_path,
            append: false,
            writer: None,
            rows_written: 0,
        }
    }

    /// Append to an existing report instead of replacing it
    pub fn appending(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn failed_path(&self) -> &Path {
        &self.failed_path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    fn open(&self) -> Result<csv::Writer<File>> {
        let existing =
            self.append && std::fs::metadata(&self.report_path).is_ok_and(|m| m.len() > 0);

        let file = if existing {
            OpenOptions::new().append(true).open(&self.report_path)?
        } else {
            File::create(&self.report_path)?
        };
        debug!(path = %self.report_path.display(), append = existing, "Opened report");

        Ok(csv::WriterBuilder::new()
            .has_headers(!existing)
            .from_writer(file))
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.open()?,
        };
        Ok(self.writer.insert(writer))
    }
}

impl ReportSink for CsvReportSink {
    fn batch_completed(&mut self, _batch: &BatchPlan, results: &[OperationResult]) -> Result<()> {
        let writer = self.writer()?;
        for result in results {
            writer.serialize(ReportRow::from(result))?;
        }
        writer.flush()?;
        self.rows_written += results.len();
        Ok(())
    }

    fn write_failed(&mut self, failed: &[&WorkItem]) -> Result<Option<PathBuf>> {
        if failed.is_empty() {
            return Ok(None);
        }

        let headers = failed
            .iter()
            .find(|item| !item.raw_record.headers.is_empty())
            .map(|item| item.raw_record.headers.as_ref().clone())
            .unwrap_or_else(|| DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect());

        let mut writer = csv::Writer::from_path(&self.failed_path)?;
        writer.write_record(&headers)?;

        for item in failed {
            if item.raw_record.fields.is_empty() {
                writer.write_record([
                    item.identifier.as_str(),
                    item.resolved_key.as_deref().unwrap_or(""),
                ])?;
            } else {
                writer.write_record(fit_to_width(&item.raw_record.fields, headers.len()))?;
            }
        }
        writer.flush()?;

        info!(path = %self.failed_path.display(), count = failed.len(), "Wrote failed items");
        Ok(Some(self.failed_path.clone()))
    }

    fn finish(&mut self, statistics: &RunStatistics) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        debug!(
            path = %self.report_path.display(),
            rows = self.rows_written,
            processed = statistics.processed_count,
            "Report complete"
        );
        Ok(())
    }
}

/// Ragged input rows are padded with empty fields or truncated so every
/// artifact row matches the header width
fn fit_to_width(fields: &[String], width: usize) -> impl Iterator<Item = &str> {
    fields
        .iter()
        .map(String::as_str)
        .chain(std::iter::repeat(""))
        .take(width)
}

/// Identifiers a previous run finished (succeeded or skipped) according to
/// its report; a missing report means nothing was finished
pub fn read_completed_identifiers(report_path: &Path) -> Result<HashSet<String>> {
    if !report_path.exists() {
        return Ok(HashSet::new());
    }

    let mut reader = csv::Reader::from_path(report_path)?;
    let mut completed = HashSet::new();
    for row in reader.deserialize::<ReportRow>() {
        let row = row?;
        if row.status != ItemStatus::Failed {
            completed.insert(row.identifier.to_lowercase());
        } else {
            completed.remove(&row.identifier.to_lowercase());
        }
    }
    Ok(completed)
}

/// Drop items a previous run already finished
pub fn filter_completed(items: Vec<WorkItem>, completed: &HashSet<String>) -> Vec<WorkItem> {
    items
        .into_iter()
        .filter(|item| !completed.contains(&item.identifier.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RawRecord;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn csv_item(upn: &str, id: &str, dept: &str, headers: &Arc<Vec<String>>) -> WorkItem {
        WorkItem::new(upn).with_resolved_key(id).with_raw_record(RawRecord::new(
            headers.clone(),
            vec![upn.to_string(), id.to_string(), dept.to_string()],
        ))
    }

    fn batch(items: &[WorkItem]) -> BatchPlan {
        BatchPlan {
            index: 0,
            offset: 0,
            items: items.iter().cloned().map(Arc::new).collect(),
        }
    }

    #[test]
    fn test_failed_artifact_path() {
        assert_eq!(
            failed_artifact_path(Path::new("out/mfa.csv")),
            PathBuf::from("out/mfa_failed.csv")
        );
    }

    #[test]
    fn test_report_is_written_per_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let mut sink = CsvReportSink::new(&path);

        let a = WorkItem::new("a@contoso.com");
        let b = WorkItem::new("b@contoso.com");
        sink.batch_completed(&batch(&[a.clone()]), &[OperationResult::success(0, &a, None)])
            .unwrap();
        sink.batch_completed(&batch(&[b.clone()]), &[OperationResult::failed(1, &b, "HTTP 403")])
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Position,Identifier,ObjectId,Status"));
        assert!(lines[2].contains("HTTP 403"));
        assert_eq!(sink.rows_written(), 2);
    }

    #[test]
    fn test_failed_artifact_keeps_input_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let headers = Arc::new(vec![
            "UserPrincipalName".to_string(),
            "ObjectId".to_string(),
            "Department".to_string(),
        ]);
        let a = csv_item("a@contoso.com", "1", "Sales", &headers);
        let b = csv_item("b@contoso.com", "2", "IT, Ops", &headers);

        let mut sink = CsvReportSink::new(&path);
        let written = sink.write_failed(&[&a, &b]).unwrap().unwrap();

        let content = std::fs::read_to_string(&written).unwrap();
        assert_eq!(
            content,
            "UserPrincipalName,ObjectId,Department\n\
             a@contoso.com,1,Sales\n\
             b@contoso.com,2,\"IT, Ops\"\n"
        );

        let reloaded = crate::input::load_work_items(&written).unwrap();
        assert_eq!(reloaded.items, vec![a, b]);
    }

    #[test]
    fn test_failed_artifact_evens_out_ragged_rows() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("users.csv");
        std::fs::write(
            &input,
            "UserPrincipalName,ObjectId,Department\n\
             a@contoso.com,1,Sales,Extra\n\
             b@contoso.com,2\n",
        )
        .unwrap();
        let loaded = crate::input::load_work_items(&input).unwrap();
        let failed: Vec<&WorkItem> = loaded.items.iter().collect();

        let mut sink = CsvReportSink::new(dir.path().join("run.csv"));
        let written = sink.write_failed(&failed).unwrap().unwrap();

        let content = std::fs::read_to_string(&written).unwrap();
        assert_eq!(
            content,
            "UserPrincipalName,ObjectId,Department\n\
             a@contoso.com,1,Sales\n\
             b@contoso.com,2,\n"
        );
        let reloaded = crate::input::load_work_items(&written).unwrap();
        assert_eq!(reloaded.items.len(), 2);
        assert_eq!(reloaded.items[1].identifier, "b@contoso.com");
    }

    #[test]
    fn test_no_failures_no_artifact() {
        let dir = tempdir().unwrap();
        let mut sink = CsvReportSink::new(dir.path().join("run.csv"));
        assert!(sink.write_failed(&[]).unwrap().is_none());
        assert!(!sink.failed_path().exists());
    }

    #[test]
    fn test_items_without_record_use_default_schema() {
        let dir = tempdir().unwrap();
        let mut sink = CsvReportSink::new(dir.path().join("run.csv"));
        let item = WorkItem::new("a@contoso.com").with_resolved_key("1");
        let written = sink.write_failed(&[&item]).unwrap().unwrap();
        let content = std::fs::read_to_string(written).unwrap();
        assert_eq!(content, "UserPrincipalName,ObjectId\na@contoso.com,1\n");
    }

    #[test]
    fn test_resume_reads_completed_and_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let a = WorkItem::new("A@contoso.com");
        let b = WorkItem::new("b@contoso.com");
        let c = WorkItem::new("c@contoso.com");

        let mut first = CsvReportSink::new(&path);
        first
            .batch_completed(
                &batch(&[a.clone(), b.clone()]),
                &[
                    OperationResult::success(0, &a, None),
                    OperationResult::failed(1, &b, "boom"),
                ],
            )
            .unwrap();
        drop(first);

        let completed = read_completed_identifiers(&path).unwrap();
        assert!(completed.contains("a@contoso.com"));
        assert!(!completed.contains("b@contoso.com"));

        let remaining = filter_completed(vec![a, b.clone(), c], &completed);
        assert_eq!(remaining.len(), 2);

        let mut second = CsvReportSink::new(&path).appending(true);
        second
            .batch_completed(&batch(&[b.clone()]), &[OperationResult::success(0, &b, None)])
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().filter(|l| l.starts_with("Position")).count(), 1);
        assert!(read_completed_identifiers(&path).unwrap().contains("b@contoso.com"));
    }

    #[test]
    fn test_missing_report_means_nothing_completed() {
        let dir = tempdir().unwrap();
        assert!(read_completed_identifiers(&dir.path().join("nope.csv")).unwrap().is_empty());
    }
}
