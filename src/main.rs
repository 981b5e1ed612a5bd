//! Paper-Harvest main entry point
//!
//! This is the command-line interface for the Paper-Harvest bulk downloader.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use paper_harvest::config::{load_or_default, Config};
use paper_harvest::harvest::{Coordinator, RunReport, RunRequest, SearchSource};
use paper_harvest::output::{
    export_items, import_json, import_legacy_log, load_statistics, print_runs, print_statistics,
    ExportFormat,
};
use paper_harvest::storage::{RunLock, SqliteStorage, Storage};
use paper_harvest::url::require_document_key;
use paper_harvest::{EndReason, ItemStatus, WebDriverBrowser};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Paper-Harvest: resumable bulk downloads from a digital library
///
/// Paper-Harvest drives an already-authenticated browser through search
/// results, downloads every document it is entitled to, and records every
/// outcome so interrupted jobs resume where they stopped.
#[derive(Parser, Debug)]
#[command(name = "paper-harvest")]
#[command(version = "1.0.0")]
#[command(about = "Resumable bulk downloads from a digital library", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (built-in defaults when omitted)
    #[arg(short, long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new harvest run
    Run {
        /// Keyword query
        #[arg(long, conflicts_with = "search_url", required_unless_present = "search_url")]
        query: Option<String>,

        /// Existing search results URL (refinements are kept)
        #[arg(long)]
        search_url: Option<String>,

        /// First publication year
        #[arg(long, requires = "query")]
        year_from: Option<i32>,

        /// Last publication year
        #[arg(long, requires = "query")]
        year_to: Option<i32>,

        /// Maximum number of results to process
        #[arg(long, default_value_t = 25)]
        max_results: u32,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Continue the search of an earlier run from its last committed position
    Resume {
        /// Run to resume (latest run when omitted)
        run_id: Option<i64>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Reset failed items to pending and attempt every pending item again
    RetryFailed {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// List items
    List {
        /// Only items with this status
        #[arg(long, value_parser = parse_status)]
        status: Option<ItemStatus>,
    },

    /// Search items by title or author
    Search {
        text: String,
    },

    /// Export all items
    Export {
        #[arg(long, default_value = "json", value_parser = parse_format)]
        format: ExportFormat,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Import items from a JSON export
    Import {
        file: PathBuf,
    },

    /// Import the legacy download_state.jsonl log
    MigrateLog {
        file: PathBuf,
    },

    /// Show item statistics
    Stats,

    /// Show recent runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Reset items to pending
    Reset {
        /// Document number or document URL
        #[arg(conflicts_with = "status", required_unless_present = "status")]
        item: Option<String>,

        /// Reset every item with this status
        #[arg(long, value_parser = parse_status)]
        status: Option<ItemStatus>,
    },

    /// Forget an item entirely
    Delete {
        /// Document number or document URL
        item: String,
    },
}

/// Per-invocation overrides of the download settings
#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Pause between items in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Per-item download timeout in milliseconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_ms: Option<u64>,

    /// Attempts per item before it is marked failed
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: Option<u32>,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(delay) = self.delay_ms {
            config.download.inter_item_delay_ms = delay;
        }
        if let Some(timeout) = self.timeout_ms {
            config.download.item_timeout_ms = timeout;
        }
        if let Some(attempts) = self.max_attempts {
            config.download.max_attempts = attempts;
        }
    }
}

fn parse_status(s: &str) -> Result<ItemStatus, String> {
    ItemStatus::from_db_string(&s.to_ascii_lowercase().replace('-', "_"))
        .ok_or_else(|| format!("unknown status '{}'", s))
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    s.parse().map_err(|e: paper_harvest::output::OutputError| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let (mut config, config_hash) = load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    tracing::debug!("Configuration hash: {}", config_hash);

    match cli.command {
        Command::Run {
            query,
            search_url,
            year_from,
            year_to,
            max_results,
            overrides,
        } => {
            overrides.apply(&mut config);
            let source = match (query, search_url) {
                (Some(text), _) => SearchSource::Query {
                    text,
                    year_from,
                    year_to,
                },
                (None, Some(url)) => SearchSource::Url(url),
                (None, None) => bail!("either --query or --search-url is required"),
            };
            let request = RunRequest {
                source,
                max_results,
            };
            handle_harvest(config, config_hash, Harvest::Start(request)).await
        }
        Command::Resume { run_id, overrides } => {
            overrides.apply(&mut config);
            let run_id = match run_id {
                Some(id) => id,
                None => match open_storage(&config)?.get_latest_run()? {
                    Some(run) => run.id,
                    None => bail!("No runs recorded yet; nothing to resume"),
                },
            };
            handle_harvest(config, config_hash, Harvest::Resume(run_id)).await
        }
        Command::RetryFailed { overrides } => {
            overrides.apply(&mut config);
            handle_harvest(config, config_hash, Harvest::RetryFailed).await
        }
        Command::List { status } => handle_list(&config, status),
        Command::Search { text } => handle_search(&config, &text),
        Command::Export { format, output } => handle_export(&config, format, output.as_deref()),
        Command::Import { file } => handle_import(&config, &file),
        Command::MigrateLog { file } => handle_migrate(&config, &file),
        Command::Stats => handle_stats(&config),
        Command::Runs { limit } => handle_runs(&config, limit),
        Command::Reset { item, status } => handle_reset(&config, item.as_deref(), status),
        Command::Delete { item } => handle_delete(&config, &item),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("paper_harvest=info,warn"),
            1 => EnvFilter::new("paper_harvest=debug,info"),
            2 => EnvFilter::new("paper_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

enum Harvest {
    Start(RunRequest),
    Resume(i64),
    RetryFailed,
}

/// Handles every mode that drives the browser
async fn handle_harvest(config: Config, config_hash: String, mode: Harvest) -> anyhow::Result<()> {
    let mut coordinator = Coordinator::<WebDriverBrowser>::connect(config, config_hash)
        .await
        .context("Failed to start the harvest controller")?;

    let cancel = coordinator.cancel_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping after the current step");
            cancel.cancel();
        }
    });

    let result = match mode {
        Harvest::Start(request) => coordinator.start_run(request).await,
        Harvest::Resume(run_id) => coordinator.resume_run(run_id).await,
        Harvest::RetryFailed => coordinator.retry_failed().await,
    };

    let browser = coordinator.into_browser();
    if let Err(e) = browser.close().await {
        tracing::warn!("Failed to close browser session: {}", e);
    }

    let report = result?;
    print_report(&report);
    if let EndReason::Fatal(cause) = &report.end_reason {
        bail!(
            "Run {} aborted: {} (resume with `paper-harvest resume {}`)",
            report.run_id,
            cause,
            report.run_id
        );
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run {}: {}", report.run_id, report.end_reason);
    println!("  Downloaded:   {}", report.counts.downloaded);
    println!("  Skipped:      {}", report.counts.skipped);
    println!("  Failed:       {}", report.counts.failed);
    println!("  Already done: {}", report.already_done);
    match &report.cursor.last_key {
        Some(key) => println!("  Last committed: page {}, item {}", report.cursor.page, key),
        None => println!("  Last committed: page {}", report.cursor.page),
    }
}

fn open_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    SqliteStorage::new(&config.storage.database_path).with_context(|| {
        format!(
            "Failed to open database {}",
            config.storage.database_path.display()
        )
    })
}

/// Mutating management commands must not race a running harvest
fn lock_storage(config: &Config) -> anyhow::Result<RunLock> {
    Ok(RunLock::acquire(&config.storage.lock_path())?)
}

fn print_items(items: &[paper_harvest::storage::ItemRecord]) {
    for item in items {
        let detail = match (&item.file_path, &item.last_error) {
            (Some(path), _) => path.clone(),
            (None, Some(error)) => error.clone(),
            (None, None) => String::new(),
        };
        println!(
            "{:<12} {:<11} {:>2}  {}  {}",
            item.key, item.status.to_string(), item.attempts, item.title, detail
        );
    }
    println!("\n{} items", items.len());
}

fn handle_list(config: &Config, status: Option<ItemStatus>) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    print_items(&storage.list_items(status)?);
    Ok(())
}

fn handle_search(config: &Config, text: &str) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    print_items(&storage.search_items(text)?);
    Ok(())
}

fn handle_export(config: &Config, format: ExportFormat, output: Option<&Path>) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let count = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            export_items(&storage, format, &mut BufWriter::new(file))?
        }
        None => export_items(&storage, format, &mut io::stdout().lock())?,
    };
    if let Some(path) = output {
        println!("Exported {} items to {}", count, path.display());
    }
    Ok(())
}

fn handle_import(config: &Config, file: &Path) -> anyhow::Result<()> {
    let _lock = lock_storage(config)?;
    let mut storage = open_storage(config)?;
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );
    let summary = import_json(&mut storage, reader)?;
    println!(
        "Imported {} records: {} new, {} updated, {} kept",
        summary.total(),
        summary.inserted,
        summary.updated,
        summary.kept
    );
    Ok(())
}

fn handle_migrate(config: &Config, file: &Path) -> anyhow::Result<()> {
    let _lock = lock_storage(config)?;
    let mut storage = open_storage(config)?;
    let (summary, log) = import_legacy_log(&mut storage, file)?;
    println!(
        "Migrated {} keys from {} lines ({} malformed): {} new, {} updated, {} kept",
        summary.total(),
        log.lines,
        log.malformed,
        summary.inserted,
        summary.updated,
        summary.kept
    );
    Ok(())
}

/// Handles the stats command: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path.display());

    let storage = open_storage(config)?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

fn handle_runs(config: &Config, limit: usize) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    print_runs(&storage.list_runs(limit)?);
    Ok(())
}

fn handle_reset(config: &Config, item: Option<&str>, status: Option<ItemStatus>) -> anyhow::Result<()> {
    let _lock = lock_storage(config)?;
    let mut storage = open_storage(config)?;

    match (item, status) {
        (Some(item), _) => {
            let key = item_key(item)?;
            storage.reset_item(&key)?;
            println!("Reset {} to pending", key);
        }
        (None, Some(status)) => {
            let count = storage.reset_items(status)?;
            println!("Reset {} {} items to pending", count, status);
        }
        (None, None) => bail!("give an item or --status"),
    }
    Ok(())
}

fn handle_delete(config: &Config, item: &str) -> anyhow::Result<()> {
    let _lock = lock_storage(config)?;
    let mut storage = open_storage(config)?;

    let key = item_key(item)?;
    if !storage.delete_item(&key)? {
        bail!("No item {}", key);
    }
    println!("Deleted {}", key);
    Ok(())
}

/// Accepts a bare document number or any URL containing one
fn item_key(item: &str) -> anyhow::Result<String> {
    if item.chars().all(|c| c.is_ascii_digit()) {
        Ok(item.to_string())
    } else {
        Ok(require_document_key(item)?)
    }
}
