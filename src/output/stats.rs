//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! item and run statistics from the storage layer.

use crate::output::OutputResult;
use crate::state::ItemStatus;
use crate::storage::{RunRecord, Storage};
use std::collections::HashMap;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Total number of items ever seen
    pub total_items: u64,

    /// Count of items by status
    pub items_by_status: HashMap<ItemStatus, u64>,

    /// Size of all downloaded files
    pub total_bytes: u64,

    /// The most recent run, if any
    pub latest_run: Option<RunRecord>,
}

impl HarvestStatistics {
    pub fn count(&self, status: ItemStatus) -> u64 {
        self.items_by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(OutputError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> OutputResult<HarvestStatistics> {
    Ok(HarvestStatistics {
        total_items: storage.count_items()?,
        items_by_status: storage.count_by_status()?,
        total_bytes: storage.total_bytes()?,
        latest_run: storage.get_latest_run()?,
    })
}

/// Human-readable byte size
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Items by Status:");
    for status in ItemStatus::all() {
        let count = stats.count(status);
        let percentage = if stats.total_items > 0 {
            (count as f64 / stats.total_items as f64) * 100.0
        } else {
            0.0
        };
        println!("  {:<12} {:>6} ({:.1}%)", status.to_string(), count, percentage);
    }
    println!("  {:<12} {:>6}", "total", stats.total_items);
    println!();

    println!("Downloaded size: {}", format_bytes(stats.total_bytes));

    if let Some(run) = &stats.latest_run {
        println!();
        println!(
            "Latest run: #{} {} (started {})",
            run.id,
            run.status.to_db_string(),
            run.started_at
        );
        println!(
            "  {} downloaded, {} skipped, {} failed, {} seen",
            run.counts.downloaded, run.counts.skipped, run.counts.failed, run.items_seen
        );
    }
}

/// Prints a table of runs, newest first
pub fn print_runs(runs: &[RunRecord]) {
    if runs.is_empty() {
        println!("No runs recorded");
        return;
    }

    println!(
        "{:>5}  {:<10}  {:<25}  {:>5} {:>5} {:>5}  {:<8}  search",
        "id", "status", "started", "down", "skip", "fail", "cursor"
    );
    for run in runs {
        let search = run
            .query
            .as_deref()
            .or(run.search_url.as_deref())
            .unwrap_or("(retry)");
        let cursor = format!("p{}", run.cursor.page);
        println!(
            "{:>5}  {:<10}  {:<25}  {:>5} {:>5} {:>5}  {:<8}  {}",
            run.id,
            run.status.to_db_string(),
            run.started_at,
            run.counts.downloaded,
            run.counts.skipped,
            run.counts.failed,
            cursor,
            search
        );
        if let Some(reason) = &run.end_reason {
            if reason.is_fatal() {
                println!("       {}", reason);
            }
        }
    }
}
