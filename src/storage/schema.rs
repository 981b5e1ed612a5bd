//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Paper-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query TEXT,
    search_url TEXT,
    year_from INTEGER,
    year_to INTEGER,
    max_results INTEGER NOT NULL,
    config_hash TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL,
    end_reason TEXT,
    downloaded_count INTEGER NOT NULL DEFAULT 0,
    skipped_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    items_seen INTEGER NOT NULL DEFAULT 0,
    cursor_page INTEGER NOT NULL DEFAULT 1,
    cursor_key TEXT,
    cursor_yielded INTEGER NOT NULL DEFAULT 0
);

-- Track every library item ever seen, keyed by document number
CREATE TABLE IF NOT EXISTS items (
    key TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    authors TEXT NOT NULL DEFAULT '[]',
    source_url TEXT,
    year INTEGER,
    file_path TEXT,
    file_size INTEGER,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    first_seen_at TEXT NOT NULL,
    last_attempt_at TEXT,
    completed_at TEXT,
    last_run_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
