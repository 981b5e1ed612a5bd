//! Storage module for persisting harvest data
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Item status persistence with validated transitions
//! - Run tracking, live counters and the resume cursor
//! - The run-level exclusivity lock next to the database

mod lock;
mod schema;
mod sqlite;
mod traits;

pub use lock::RunLock;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{EndReason, ItemStatus};
use serde::{Deserialize, Serialize};

/// An item as extracted from a search results page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDescriptor {
    /// Document number; the dedup key
    pub key: String,
    pub title: String,
    pub authors: Vec<String>,
    pub source_url: Option<String>,
    pub year: Option<i32>,
}

impl ItemDescriptor {
    /// Creates a descriptor with only a key and title
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            authors: Vec::new(),
            source_url: None,
            year: None,
        }
    }
}

/// Represents an item in the database
///
/// This is also the JSON interchange shape used by export and import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    pub status: ItemStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub first_seen_at: String,
    #[serde(default)]
    pub last_attempt_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub last_run_id: Option<i64>,
}

/// Fields written together with a status change out of `in_progress`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Attempts made by the current attempt loop
    pub attempts: u32,
    pub last_error: Option<String>,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
}

/// What `import_item` did with an incoming record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportAction {
    Inserted,
    Updated,
    /// The stored record won (already downloaded, or incoming had no terminal status)
    Kept,
}

/// Parameters a run is created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParams {
    pub query: Option<String>,
    pub search_url: Option<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub max_results: u32,
    pub config_hash: String,
}

/// Per-terminal-status counters of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub downloaded: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl RunCounts {
    /// Counts one item that reached `status`; non-terminal statuses are ignored
    pub fn record(&mut self, status: ItemStatus) {
        match status {
            ItemStatus::Downloaded => self.downloaded += 1,
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::Failed => self.failed += 1,
            ItemStatus::Pending | ItemStatus::InProgress => {}
        }
    }

    pub fn total(&self) -> u32 {
        self.downloaded + self.skipped + self.failed
    }
}

/// Incremental progress committed after each item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub counts: RunCounts,
    pub items_seen: u32,
}

/// Resume position of a pagination walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// 1-based result page index
    pub page: u32,
    /// Last item on `page` whose outcome was committed
    pub last_key: Option<String>,
    /// Items yielded so far, counted against the result cap
    pub yielded: u32,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            page: 1,
            last_key: None,
            yielded: 0,
        }
    }
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub query: Option<String>,
    pub search_url: Option<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub max_results: u32,
    pub config_hash: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: RunStatus,
    pub end_reason: Option<EndReason>,
    pub counts: RunCounts,
    pub items_seen: u32,
    pub cursor: Cursor,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// The final status a run gets for the given end reason
    pub fn for_end_reason(reason: &EndReason) -> Self {
        match reason {
            EndReason::Completed => Self::Completed,
            EndReason::Cancelled => Self::Cancelled,
            EndReason::Fatal(_) => Self::Failed,
        }
    }
}
