//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::{EndReason, ItemStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    Cursor, ImportAction, ItemDescriptor, ItemRecord, ProgressDelta, RunCounts, RunParams,
    RunRecord, RunStatus, StatusUpdate,
};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const ITEM_COLUMNS: &str = "key, title, authors, source_url, year, file_path, file_size, status,
     attempts, last_error, first_seen_at, last_attempt_at, completed_at, last_run_id";

const RUN_COLUMNS: &str = "id, query, search_url, year_from, year_to, max_results, config_hash,
     started_at, finished_at, status, end_reason, downloaded_count, skipped_count, failed_count,
     items_seen, cursor_page, cursor_key, cursor_yielded";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// Creates the parent directory of the database file when missing.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Concurrent readers, single writer
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn query_items(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<Vec<ItemRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let items = stmt
            .query_map(params, item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ItemRecord> {
    let authors_json: String = row.get(2)?;
    let authors: Vec<String> =
        serde_json::from_str(&authors_json).map_err(|e| conversion_error(2, e))?;
    let file_size: Option<i64> = row.get(6)?;

    Ok(ItemRecord {
        key: row.get(0)?,
        title: row.get(1)?,
        authors,
        source_url: row.get(3)?,
        year: row.get(4)?,
        file_path: row.get(5)?,
        file_size: file_size.map(|size| size.max(0) as u64),
        status: ItemStatus::from_db_string(&row.get::<_, String>(7)?)
            .unwrap_or(ItemStatus::Pending),
        attempts: row.get(8)?,
        last_error: row.get(9)?,
        first_seen_at: row.get(10)?,
        last_attempt_at: row.get(11)?,
        completed_at: row.get(12)?,
        last_run_id: row.get(13)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let end_reason: Option<String> = row.get(10)?;

    Ok(RunRecord {
        id: row.get(0)?,
        query: row.get(1)?,
        search_url: row.get(2)?,
        year_from: row.get(3)?,
        year_to: row.get(4)?,
        max_results: row.get(5)?,
        config_hash: row.get(6)?,
        started_at: row.get(7)?,
        finished_at: row.get(8)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(9)?)
            .unwrap_or(RunStatus::Running),
        end_reason: end_reason.as_deref().and_then(EndReason::from_db_string),
        counts: RunCounts {
            downloaded: row.get(11)?,
            skipped: row.get(12)?,
            failed: row.get(13)?,
        },
        items_seen: row.get(14)?,
        cursor: Cursor {
            page: row.get(15)?,
            last_key: row.get(16)?,
            yielded: row.get(17)?,
        },
    })
}

fn current_status(conn: &Connection, key: &str) -> StorageResult<Option<ItemStatus>> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM items WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(status.map(|s| ItemStatus::from_db_string(&s).unwrap_or(ItemStatus::Pending)))
}

/// Escapes LIKE wildcards so user text matches literally
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn size_to_db(size: Option<u64>) -> Option<i64> {
    size.map(|s| i64::try_from(s).unwrap_or(i64::MAX))
}

impl Storage for SqliteStorage {
    // ===== Item Management =====

    fn upsert_item(
        &mut self,
        item: &ItemDescriptor,
        run_id: Option<i64>,
    ) -> StorageResult<ItemRecord> {
        let authors = serde_json::to_string(&item.authors)?;

        self.conn.execute(
            "INSERT INTO items (key, title, authors, source_url, year, status, attempts,
             first_seen_at, last_run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)
             ON CONFLICT(key) DO UPDATE SET
                title = CASE WHEN excluded.title <> '' THEN excluded.title ELSE items.title END,
                authors = CASE WHEN excluded.authors <> '[]' THEN excluded.authors ELSE items.authors END,
                source_url = COALESCE(excluded.source_url, items.source_url),
                year = COALESCE(excluded.year, items.year),
                last_run_id = COALESCE(excluded.last_run_id, items.last_run_id)",
            params![
                item.key,
                item.title,
                authors,
                item.source_url,
                item.year,
                ItemStatus::Pending.to_db_string(),
                now(),
                run_id
            ],
        )?;

        self.get_item(&item.key)?
            .ok_or_else(|| StorageError::ItemNotFound(item.key.clone()))
    }

    fn get_item(&self, key: &str) -> StorageResult<Option<ItemRecord>> {
        let sql = format!("SELECT {} FROM items WHERE key = ?1", ITEM_COLUMNS);
        let item = self
            .conn
            .query_row(&sql, params![key], item_from_row)
            .optional()?;
        Ok(item)
    }

    fn begin_attempt(&mut self, key: &str, run_id: Option<i64>) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        let current =
            current_status(&tx, key)?.ok_or_else(|| StorageError::ItemNotFound(key.to_string()))?;
        if !current.can_transition_to(ItemStatus::InProgress) {
            return Err(StorageError::InvalidTransition {
                key: key.to_string(),
                from: current,
                to: ItemStatus::InProgress,
            });
        }

        tx.execute(
            "UPDATE items SET status = ?1, attempts = 0, last_attempt_at = ?2,
             last_run_id = COALESCE(?3, last_run_id)
             WHERE key = ?4",
            params![ItemStatus::InProgress.to_db_string(), now(), run_id, key],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn set_status(
        &mut self,
        key: &str,
        status: ItemStatus,
        update: &StatusUpdate,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        let current =
            current_status(&tx, key)?.ok_or_else(|| StorageError::ItemNotFound(key.to_string()))?;
        if !current.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                key: key.to_string(),
                from: current,
                to: status,
            });
        }

        let timestamp = now();
        let completed_at = status.is_terminal().then(|| timestamp.clone());

        tx.execute(
            "UPDATE items SET status = ?1, attempts = ?2, last_error = ?3,
             file_path = COALESCE(?4, file_path), file_size = COALESCE(?5, file_size),
             last_attempt_at = ?6, completed_at = ?7
             WHERE key = ?8",
            params![
                status.to_db_string(),
                update.attempts,
                update.last_error,
                update.file_path,
                size_to_db(update.file_size),
                timestamp,
                completed_at,
                key
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn recover_interrupted(&mut self) -> StorageResult<u64> {
        let changed = self.conn.execute(
            "UPDATE items SET status = ?1 WHERE status = ?2",
            params![
                ItemStatus::Pending.to_db_string(),
                ItemStatus::InProgress.to_db_string()
            ],
        )?;
        Ok(changed as u64)
    }

    fn reset_item(&mut self, key: &str) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE items SET status = ?1, attempts = 0, last_error = NULL, completed_at = NULL,
             file_path = NULL, file_size = NULL
             WHERE key = ?2",
            params![ItemStatus::Pending.to_db_string(), key],
        )?;

        if changed == 0 {
            return Err(StorageError::ItemNotFound(key.to_string()));
        }
        Ok(())
    }

    fn reset_items(&mut self, status: ItemStatus) -> StorageResult<u64> {
        let changed = self.conn.execute(
            "UPDATE items SET status = ?1, attempts = 0, last_error = NULL, completed_at = NULL,
             file_path = NULL, file_size = NULL
             WHERE status = ?2",
            params![ItemStatus::Pending.to_db_string(), status.to_db_string()],
        )?;
        Ok(changed as u64)
    }

    fn delete_item(&mut self, key: &str) -> StorageResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM items WHERE key = ?1", params![key])?;
        Ok(changed > 0)
    }

    fn list_items(&self, status: Option<ItemStatus>) -> StorageResult<Vec<ItemRecord>> {
        match status {
            Some(status) => self.query_items(
                &format!(
                    "SELECT {} FROM items WHERE status = ?1 ORDER BY rowid",
                    ITEM_COLUMNS
                ),
                params![status.to_db_string()],
            ),
            None => self.query_items(
                &format!("SELECT {} FROM items ORDER BY rowid", ITEM_COLUMNS),
                params![],
            ),
        }
    }

    fn search_items(&self, text: &str) -> StorageResult<Vec<ItemRecord>> {
        // SQLite LIKE is case-insensitive for ASCII
        let pattern = format!("%{}%", escape_like(text));
        self.query_items(
            &format!(
                "SELECT {} FROM items
                 WHERE title LIKE ?1 ESCAPE '\\' OR authors LIKE ?1 ESCAPE '\\'
                 ORDER BY rowid",
                ITEM_COLUMNS
            ),
            params![pattern],
        )
    }

    fn import_item(&mut self, record: &ItemRecord) -> StorageResult<ImportAction> {
        let authors = serde_json::to_string(&record.authors)?;
        // An interrupted attempt in the source is just pending work here
        let status = match record.status {
            ItemStatus::InProgress => ItemStatus::Pending,
            other => other,
        };
        let first_seen_at = if record.first_seen_at.is_empty() {
            now()
        } else {
            record.first_seen_at.clone()
        };

        let tx = self.conn.transaction()?;

        let action = match current_status(&tx, &record.key)? {
            None => {
                tx.execute(
                    &format!(
                        "INSERT INTO items ({}) VALUES
                         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                        ITEM_COLUMNS
                    ),
                    params![
                        record.key,
                        record.title,
                        authors,
                        record.source_url,
                        record.year,
                        record.file_path,
                        size_to_db(record.file_size),
                        status.to_db_string(),
                        record.attempts,
                        record.last_error,
                        first_seen_at,
                        record.last_attempt_at,
                        record.completed_at,
                        record.last_run_id
                    ],
                )?;
                ImportAction::Inserted
            }
            Some(ItemStatus::Downloaded) => ImportAction::Kept,
            Some(_) if status.is_terminal() => {
                tx.execute(
                    "UPDATE items SET
                        title = CASE WHEN ?1 <> '' THEN ?1 ELSE title END,
                        authors = CASE WHEN ?2 <> '[]' THEN ?2 ELSE authors END,
                        source_url = COALESCE(?3, source_url),
                        year = COALESCE(?4, year),
                        file_path = ?5, file_size = ?6, status = ?7, attempts = ?8,
                        last_error = ?9, last_attempt_at = ?10, completed_at = ?11
                     WHERE key = ?12",
                    params![
                        record.title,
                        authors,
                        record.source_url,
                        record.year,
                        record.file_path,
                        size_to_db(record.file_size),
                        status.to_db_string(),
                        record.attempts,
                        record.last_error,
                        record.last_attempt_at,
                        record.completed_at,
                        record.key
                    ],
                )?;
                ImportAction::Updated
            }
            Some(_) => {
                tx.execute(
                    "UPDATE items SET
                        title = CASE WHEN ?1 <> '' THEN ?1 ELSE title END,
                        authors = CASE WHEN ?2 <> '[]' THEN ?2 ELSE authors END,
                        source_url = COALESCE(?3, source_url),
                        year = COALESCE(?4, year)
                     WHERE key = ?5",
                    params![record.title, authors, record.source_url, record.year, record.key],
                )?;
                ImportAction::Kept
            }
        };

        tx.commit()?;
        Ok(action)
    }

    // ===== Run Management =====

    fn create_run(&mut self, params: &RunParams) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO runs (query, search_url, year_from, year_to, max_results, config_hash,
             started_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                params.query,
                params.search_url,
                params.year_from,
                params.year_to,
                params.max_results,
                params.config_hash,
                now(),
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS);
        let run = self.conn.query_row(&sql, [], run_from_row).optional()?;
        Ok(run)
    }

    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT ?1", RUN_COLUMNS);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map(params![limit], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    fn record_run_progress(
        &mut self,
        run_id: i64,
        delta: &ProgressDelta,
        cursor: &Cursor,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE runs SET
                downloaded_count = downloaded_count + ?1,
                skipped_count = skipped_count + ?2,
                failed_count = failed_count + ?3,
                items_seen = items_seen + ?4,
                cursor_page = ?5, cursor_key = ?6, cursor_yielded = ?7
             WHERE id = ?8",
            params![
                delta.counts.downloaded,
                delta.counts.skipped,
                delta.counts.failed,
                delta.items_seen,
                cursor.page,
                cursor.last_key,
                cursor.yielded,
                run_id
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn finalize_run(&mut self, run_id: i64, reason: &EndReason) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE runs SET finished_at = ?1, status = ?2, end_reason = ?3 WHERE id = ?4",
            params![
                now(),
                RunStatus::for_end_reason(reason).to_db_string(),
                reason.to_db_string(),
                run_id
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Statistics =====

    fn count_by_status(&self) -> StorageResult<HashMap<ItemStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM items GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = ItemStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }

        Ok(counts)
    }

    fn count_items(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn total_bytes(&self) -> StorageResult<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(file_size), 0) FROM items WHERE status = ?1",
            params![ItemStatus::Downloaded.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }
}
