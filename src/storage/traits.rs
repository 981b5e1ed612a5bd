//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::{EndReason, ItemStatus};
use crate::storage::{
    Cursor, ImportAction, ItemDescriptor, ItemRecord, ProgressDelta, RunParams, RunRecord,
    StatusUpdate,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Invalid status transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all persistence operations needed by the harvester.
/// Status changes are validated against the item lifecycle; only the
/// explicit reset and delete operations bypass it.
pub trait Storage {
    // ===== Item Management =====

    /// Inserts a new item or merges metadata into the existing one
    ///
    /// The stored status is never touched, so re-discovering a downloaded
    /// item leaves it downloaded.
    ///
    /// # Arguments
    ///
    /// * `item` - The descriptor extracted from a results page
    /// * `run_id` - The run that saw the item, if any
    ///
    /// # Returns
    ///
    /// The stored record after the merge
    fn upsert_item(&mut self, item: &ItemDescriptor, run_id: Option<i64>)
        -> StorageResult<ItemRecord>;

    /// Gets an item by key
    fn get_item(&self, key: &str) -> StorageResult<Option<ItemRecord>>;

    /// Moves an item from `pending` to `in_progress` and resets its attempt count
    fn begin_attempt(&mut self, key: &str, run_id: Option<i64>) -> StorageResult<()>;

    /// Records the outcome of an attempt loop
    ///
    /// Runs as a single transaction: reads the current status, validates the
    /// transition and writes the new status with its details.
    ///
    /// # Arguments
    ///
    /// * `key` - The item key
    /// * `status` - The new status
    /// * `update` - Attempt count, error detail and file location
    fn set_status(&mut self, key: &str, status: ItemStatus, update: &StatusUpdate)
        -> StorageResult<()>;

    /// Returns every `in_progress` item to `pending` (crash recovery)
    ///
    /// # Returns
    ///
    /// The number of items recovered
    fn recover_interrupted(&mut self) -> StorageResult<u64>;

    /// Explicitly resets a single item to `pending`, clearing its outcome
    fn reset_item(&mut self, key: &str) -> StorageResult<()>;

    /// Explicitly resets every item with the given status to `pending`
    fn reset_items(&mut self, status: ItemStatus) -> StorageResult<u64>;

    /// Deletes an item; returns false when the key was unknown
    fn delete_item(&mut self, key: &str) -> StorageResult<bool>;

    /// Lists items in discovery order, optionally filtered by status
    fn list_items(&self, status: Option<ItemStatus>) -> StorageResult<Vec<ItemRecord>>;

    /// Case-insensitive substring search over titles and authors
    fn search_items(&self, text: &str) -> StorageResult<Vec<ItemRecord>>;

    /// Imports a complete record from an external source
    ///
    /// A stored `downloaded` item is never reverted. Otherwise an incoming
    /// terminal status replaces the stored outcome, and a non-terminal one
    /// only merges metadata.
    fn import_item(&mut self, record: &ItemRecord) -> StorageResult<ImportAction>;

    // ===== Run Management =====

    /// Creates a new run in the `running` status
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, params: &RunParams) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Lists the most recent runs, newest first
    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    /// Adds delta counts to a run and moves its resume cursor
    fn record_run_progress(
        &mut self,
        run_id: i64,
        delta: &ProgressDelta,
        cursor: &Cursor,
    ) -> StorageResult<()>;

    /// Stamps the end time, final status and end reason of a run
    fn finalize_run(&mut self, run_id: i64, reason: &EndReason) -> StorageResult<()>;

    // ===== Statistics =====

    /// Counts items per status
    fn count_by_status(&self) -> StorageResult<HashMap<ItemStatus, u64>>;

    /// Gets total item count
    fn count_items(&self) -> StorageResult<u64>;

    /// Sums the size of every downloaded file
    fn total_bytes(&self) -> StorageResult<u64>;
}
