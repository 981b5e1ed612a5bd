//! Output module for reports and data interchange
//!
//! This module handles:
//! - Printing item statistics and recent runs
//! - Exporting items as JSON or CSV and importing the JSON form back
//! - One-time import of the legacy line-oriented download log

pub mod export;
pub mod legacy;
pub mod stats;

pub use export::{export_items, import_json, ExportFormat, ImportSummary};
pub use legacy::{fold_legacy_records, import_legacy_log, parse_legacy_log, LegacyLog, LegacyRecord};
pub use stats::{format_bytes, load_statistics, print_runs, print_statistics, HarvestStatistics};

use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to format output: {0}")]
    Format(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
