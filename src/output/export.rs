//! Item export and JSON import
//!
//! JSON is the interchange format: an array of item records exactly as they
//! are stored. CSV is a flat, write-only view for spreadsheets.

use crate::output::{OutputError, OutputResult};
use crate::storage::{ImportAction, ItemRecord, Storage};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use tracing::info;

/// Export format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(OutputError::Format(format!("unknown export format '{}'", other))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

/// What an import did, per record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub kept: usize,
}

impl ImportSummary {
    pub fn record(&mut self, action: ImportAction) {
        match action {
            ImportAction::Inserted => self.inserted += 1,
            ImportAction::Updated => self.updated += 1,
            ImportAction::Kept => self.kept += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.kept
    }
}

const CSV_HEADER: &str = "key,title,authors,year,status,attempts,file_path,file_size,last_error,first_seen_at,completed_at,source_url";

/// Writes every stored item to `writer`
///
/// # Returns
///
/// The number of items written
pub fn export_items<W: Write>(
    storage: &dyn Storage,
    format: ExportFormat,
    writer: &mut W,
) -> OutputResult<usize> {
    let items = storage.list_items(None)?;

    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut *writer, &items)?;
            writeln!(writer)?;
        }
        ExportFormat::Csv => {
            writeln!(writer, "{}", CSV_HEADER)?;
            for item in &items {
                writeln!(writer, "{}", csv_row(item))?;
            }
        }
    }

    writer.flush()?;
    info!("Exported {} items as {}", items.len(), format);
    Ok(items.len())
}

/// Reads a JSON export and merges it into `storage`
///
/// A stored `downloaded` item is never reverted by an import.
pub fn import_json<R: Read>(storage: &mut dyn Storage, reader: R) -> OutputResult<ImportSummary> {
    let records: Vec<ItemRecord> = serde_json::from_reader(reader)?;

    let mut summary = ImportSummary::default();
    for record in &records {
        summary.record(storage.import_item(record)?);
    }

    info!(
        "Imported {} records ({} new, {} updated, {} kept)",
        summary.total(),
        summary.inserted,
        summary.updated,
        summary.kept
    );
    Ok(summary)
}

fn csv_row(item: &ItemRecord) -> String {
    [
        escape_csv(&item.key),
        escape_csv(&item.title),
        escape_csv(&item.authors.join("; ")),
        item.year.map(|y| y.to_string()).unwrap_or_default(),
        item.status.to_string(),
        item.attempts.to_string(),
        escape_csv(item.file_path.as_deref().unwrap_or("")),
        item.file_size.map(|s| s.to_string()).unwrap_or_default(),
        escape_csv(item.last_error.as_deref().unwrap_or("")),
        item.first_seen_at.clone(),
        item.completed_at.clone().unwrap_or_default(),
        escape_csv(item.source_url.as_deref().unwrap_or("")),
    ]
    .join(",")
}

/// Escape a string for CSV output
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
