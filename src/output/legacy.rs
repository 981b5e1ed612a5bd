//! Legacy download log import
//!
//! Older versions appended one JSON object per line to
//! `download_state.jsonl`:
//!
//! ```text
//! {"arnumber": "123", "title": "...", "status": "downloaded", "file": "...", "ts": 1700000000.5}
//! {"arnumber": "456", "title": "...", "status": "skipped", "error": "...", "ts": 1700000100.0}
//! ```
//!
//! Parsing and folding are pure; only [`import_legacy_log`] touches the
//! filesystem and the store. The log is never written.

use crate::output::{ImportSummary, OutputResult};
use crate::state::ItemStatus;
use crate::storage::{ItemRecord, Storage};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// One usable line of the legacy log
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyRecord {
    pub key: String,
    pub title: String,
    pub status: ItemStatus,
    /// Seconds since the Unix epoch
    pub timestamp: Option<f64>,
    pub error: Option<String>,
    pub file: Option<String>,
}

/// Result of parsing a whole log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyLog {
    /// One record per key, in first-seen order
    pub records: Vec<LegacyRecord>,
    /// Non-blank lines read
    pub lines: usize,
    /// Lines that were not a usable record
    pub malformed: usize,
}

/// Older logs spell `key` as `arnumber` and `timestamp` as `ts`; some lines
/// carry both spellings, so each is its own field
#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(default)]
    key: Option<Value>,
    #[serde(default)]
    arnumber: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    ts: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    file: Option<String>,
}

fn status_from_legacy(status: &str) -> Option<ItemStatus> {
    match status.trim().to_ascii_lowercase().as_str() {
        "downloaded" | "success" => Some(ItemStatus::Downloaded),
        "skipped" | "no_access" => Some(ItemStatus::Skipped),
        "failed" | "error" => Some(ItemStatus::Failed),
        "pending" => Some(ItemStatus::Pending),
        "in_progress" | "downloading" => Some(ItemStatus::InProgress),
        _ => None,
    }
}

fn value_to_key(value: &Value) -> Option<String> {
    let key = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!key.is_empty()).then_some(key)
}

/// Epoch seconds from a number, a numeric string or an RFC 3339 string
fn value_to_timestamp(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().or_else(|| {
            DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp_millis() as f64 / 1000.0)
        }),
        _ => None,
    }
}

fn parse_line(line: &str) -> Option<LegacyRecord> {
    let raw: RawLine = serde_json::from_str(line).ok()?;
    let key = raw
        .key
        .as_ref()
        .and_then(value_to_key)
        .or_else(|| raw.arnumber.as_ref().and_then(value_to_key))?;
    let status = status_from_legacy(raw.status.as_deref().unwrap_or("pending"))?;

    Some(LegacyRecord {
        key,
        title: raw.title.unwrap_or_default(),
        status,
        timestamp: raw
            .timestamp
            .as_ref()
            .and_then(value_to_timestamp)
            .or_else(|| raw.ts.as_ref().and_then(value_to_timestamp)),
        error: raw.error,
        file: raw.file,
    })
}

/// Parses a legacy log and folds it to one record per key
pub fn parse_legacy_log(text: &str) -> LegacyLog {
    let mut lines = 0;
    let mut malformed = 0;
    let mut records = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        lines += 1;
        match parse_line(line) {
            Some(record) => records.push(record),
            None => {
                debug!("Skipping malformed legacy line: {}", line);
                malformed += 1;
            }
        }
    }

    LegacyLog {
        records: fold_legacy_records(records),
        lines,
        malformed,
    }
}

/// Folds records per key, keeping the latest terminal status
///
/// A terminal record replaces the kept one unless it is older. A
/// non-terminal record only wins while no terminal record has been seen,
/// and a later title fills in an empty one.
pub fn fold_legacy_records<I>(records: I) -> Vec<LegacyRecord>
where
    I: IntoIterator<Item = LegacyRecord>,
{
    let mut order: Vec<String> = Vec::new();
    let mut folded: HashMap<String, LegacyRecord> = HashMap::new();

    for record in records {
        let Some(kept) = folded.get_mut(&record.key) else {
            order.push(record.key.clone());
            folded.insert(record.key.clone(), record);
            continue;
        };

        let newer = match (kept.timestamp, record.timestamp) {
            (Some(old), Some(new)) => new >= old,
            _ => true,
        };
        let replace = if record.status.is_terminal() {
            newer || !kept.status.is_terminal()
        } else {
            !kept.status.is_terminal() && newer
        };

        if replace {
            let title = if record.title.is_empty() {
                std::mem::take(&mut kept.title)
            } else {
                record.title.clone()
            };
            *kept = LegacyRecord { title, ..record };
        } else if kept.title.is_empty() && !record.title.is_empty() {
            kept.title = record.title;
        }
    }

    order
        .into_iter()
        .filter_map(|key| folded.remove(&key))
        .collect()
}

fn timestamp_to_rfc3339(timestamp: f64) -> Option<String> {
    let millis = (timestamp * 1000.0).round();
    if !millis.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .map(|dt| dt.to_rfc3339())
}

fn to_item_record(record: LegacyRecord) -> ItemRecord {
    let at = record.timestamp.and_then(timestamp_to_rfc3339);
    let file_size = record
        .file
        .as_deref()
        .and_then(|f| fs::metadata(f).ok())
        .map(|m| m.len());

    ItemRecord {
        key: record.key,
        title: record.title,
        authors: Vec::new(),
        source_url: None,
        year: None,
        file_path: record.file,
        file_size,
        status: record.status,
        attempts: 0,
        last_error: record.error,
        first_seen_at: at.clone().unwrap_or_default(),
        last_attempt_at: at.clone(),
        completed_at: if record.status.is_terminal() { at } else { None },
        last_run_id: None,
    }
}

/// Imports a legacy log file into `storage`
///
/// # Returns
///
/// What the import did, plus the parsed log counters
pub fn import_legacy_log(
    storage: &mut dyn Storage,
    path: &Path,
) -> OutputResult<(ImportSummary, LegacyLog)> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let log = parse_legacy_log(&text);
    if log.malformed > 0 {
        warn!(
            "{} of {} legacy lines were malformed and skipped",
            log.malformed, log.lines
        );
    }

    let mut summary = ImportSummary::default();
    for record in log.records.iter().cloned() {
        summary.record(storage.import_item(&to_item_record(record))?);
    }

    info!(
        "Migrated {} keys from {} ({} new, {} updated, {} kept)",
        summary.total(),
        path.display(),
        summary.inserted,
        summary.updated,
        summary.kept
    );
    Ok((summary, log))
}
