//! CSV input feed
//!
//! Accepts any CSV with a header row that names at least one key column:
//! an object id column (`ObjectId`, `Id`, `UserId`) or a user principal name
//! column (`UserPrincipalName`, `UPN`). Other columns are carried through
//! untouched so a failed-items file can be fed back in as-is.

use crate::engine::{RawRecord, WorkItem};
use crate::error::{BulkError, Result};
use crate::graph::users::DirectoryUser;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub const ID_COLUMNS: &[&str] = &["ObjectId", "Id", "UserId"];
pub const UPN_COLUMNS: &[&str] = &["UserPrincipalName", "UPN"];

/// Header used when items did not come from a CSV
pub const DEFAULT_HEADERS: &[&str] = &["UserPrincipalName", "ObjectId"];

#[derive(Debug)]
pub struct LoadedInput {
    pub items: Vec<WorkItem>,
    pub headers: Arc<Vec<String>>,
    /// (1-based file line, reason) for rows that were left out
    pub skipped_rows: Vec<(usize, String)>,
}

fn find_column(headers: &[String], candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|candidate| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(candidate))
    })
}

pub fn load_work_items(path: &Path) -> Result<LoadedInput> {
    let file = std::fs::File::open(path).map_err(|e| {
        BulkError::InvalidInput(format!("cannot open {}: {}", path.display(), e))
    })?;
    parse_work_items(file)
}

pub fn parse_work_items<R: Read>(reader: R) -> Result<LoadedInput> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let id_column = find_column(&headers, ID_COLUMNS);
    let upn_column = find_column(&headers, UPN_COLUMNS);
    if id_column.is_none() && upn_column.is_none() {
        return Err(BulkError::InvalidInput(format!(
            "input needs a {} or {} column (found: {})",
            UPN_COLUMNS.join("/"),
            ID_COLUMNS.join("/"),
            headers.join(", ")
        )));
    }

    let headers = Arc::new(headers);
    let mut items = Vec::new();
    let mut skipped_rows = Vec::new();

    for (row_idx, record) in rdr.records().enumerate() {
        let row_num = row_idx + 2; // +1 for 0-index, +1 for header row
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(row = row_num, error = %e, "Unreadable input row");
                skipped_rows.push((row_num, format!("Parse error: {}", e)));
                continue;
            }
        };

        let value = |column: Option<usize>| {
            column
                .and_then(|c| record.get(c))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let object_id = value(id_column);
        let upn = value(upn_column);

        let identifier = match (&upn, &object_id) {
            (Some(upn), _) => upn.clone(),
            (None, Some(id)) => id.clone(),
            (None, None) => {
                warn!(row = row_num, "Input row has no user principal name or object id");
                skipped_rows.push((row_num, "Missing user principal name and object id".into()));
                continue;
            }
        };

        let fields = record.iter().map(str::to_string).collect();
        let mut item = WorkItem::new(identifier)
            .with_raw_record(RawRecord::new(headers.clone(), fields));
        item.resolved_key = object_id;
        items.push(item);
    }

    if items.is_empty() {
        return Err(BulkError::EmptyInput);
    }

    Ok(LoadedInput {
        items,
        headers,
        skipped_rows,
    })
}

/// Work items for every user in the directory, in the default schema
pub fn items_from_users(users: Vec<DirectoryUser>) -> Vec<WorkItem> {
    let headers = Arc::new(DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect::<Vec<_>>());

    users
        .into_iter()
        .map(|user| {
            let upn = user.user_principal_name.unwrap_or_default();
            let identifier = if upn.is_empty() { user.id.clone() } else { upn.clone() };
            WorkItem::new(identifier)
                .with_resolved_key(user.id.clone())
                .with_raw_record(RawRecord::new(headers.clone(), vec![upn, user.id]))
        })
        .collect()
}
