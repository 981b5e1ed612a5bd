//! Run controller - main harvest orchestration logic
//!
//! This module contains the top-level loop that coordinates a harvest run:
//! - Acquiring the run lock and recovering interrupted items
//! - Walking result pages and upserting every discovered item
//! - Driving the fetch/policy pair for each pending item
//! - Committing counters and the resume cursor after every item
//! - Finalizing the run on completion, cancellation or a fatal error

use crate::browser::{Browser, WebDriverBrowser};
use crate::config::Config;
use crate::harvest::cancel::CancelSignal;
use crate::harvest::fetcher::{FetchOutcome, ItemFetcher};
use crate::harvest::pager::{Pager, SearchSource};
use crate::harvest::policy::{Decision, RetryPolicy};
use crate::state::{EndReason, ItemStatus};
use crate::storage::{
    Cursor, ItemDescriptor, ItemRecord, ProgressDelta, RunCounts, RunLock, RunParams, RunRecord,
    SqliteStorage, StatusUpdate, Storage, StorageError,
};
use crate::{ConfigError, HarvestError};
use std::fs;
use tracing::{debug, error, info, warn};

/// What to harvest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub source: SearchSource,
    /// Cap on items yielded by the walk
    pub max_results: u32,
}

/// Summary returned when a run ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: i64,
    /// Items that reached a terminal status during this run
    pub counts: RunCounts,
    /// Items seen by this run that were already terminal
    pub already_done: u32,
    pub end_reason: EndReason,
    /// Last committed resume position
    pub cursor: Cursor,
}

/// What happened to one item
enum ItemResult {
    Finished(ItemStatus),
    AlreadyDone,
    Interrupted,
}

/// Mutable bookkeeping of the run in progress
struct RunState {
    run_id: i64,
    counts: RunCounts,
    already_done: u32,
    cursor: Cursor,
}

impl RunState {
    fn report(self, end_reason: EndReason) -> RunReport {
        RunReport {
            run_id: self.run_id,
            counts: self.counts,
            already_done: self.already_done,
            end_reason,
            cursor: self.cursor,
        }
    }
}

/// Controller state that can fail to open, prepared before any browser exists
struct Parts {
    storage: SqliteStorage,
    fetcher: ItemFetcher,
    policy: RetryPolicy,
}

impl Parts {
    fn open(config: &Config) -> crate::Result<Self> {
        fs::create_dir_all(&config.download.directory)?;

        let mut storage = SqliteStorage::new(&config.storage.database_path)?;
        let recovered = storage.recover_interrupted()?;
        if recovered > 0 {
            info!("Recovered {} interrupted items back to pending", recovered);
        }

        Ok(Self {
            storage,
            fetcher: ItemFetcher::new(config)?,
            policy: RetryPolicy::from_config(&config.download),
        })
    }
}

/// Main harvest controller
///
/// Owns the browser session, the store and the run lock for its lifetime.
pub struct Coordinator<B: Browser> {
    config: Config,
    config_hash: String,
    browser: B,
    storage: SqliteStorage,
    _lock: RunLock,
    cancel: CancelSignal,
    fetcher: ItemFetcher,
    policy: RetryPolicy,
}

impl Coordinator<WebDriverBrowser> {
    /// Takes the run lock and opens the store, then connects to the WebDriver
    /// server configured in `config.browser`
    ///
    /// A busy lock fails before any request reaches the driver, so a second
    /// process never touches the browser a live run is using.
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Lock held and browser session open
    /// * `Err(HarvestError::ResourceBusy)` - Another live process holds the lock
    /// * `Err(HarvestError::Browser)` - The driver could not be reached
    pub async fn connect(config: Config, config_hash: impl Into<String>) -> crate::Result<Self> {
        let lock = RunLock::acquire(&config.storage.lock_path())?;
        let parts = Parts::open(&config)?;
        let browser =
            WebDriverBrowser::connect(&config.browser, &config.download.directory).await?;
        Ok(Self::assemble(config, config_hash.into(), lock, parts, browser))
    }
}

impl<B: Browser> Coordinator<B> {
    /// Creates a new controller
    ///
    /// # Arguments
    ///
    /// * `config` - The harvest configuration
    /// * `config_hash` - Hash of the configuration, stored on every run
    /// * `browser` - An authenticated browser session
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Lock held, store open, interrupted items recovered
    /// * `Err(HarvestError::ResourceBusy)` - Another live process holds the lock
    pub fn new(config: Config, config_hash: impl Into<String>, browser: B) -> crate::Result<Self> {
        let lock = RunLock::acquire(&config.storage.lock_path())?;
        let parts = Parts::open(&config)?;
        Ok(Self::assemble(config, config_hash.into(), lock, parts, browser))
    }

    fn assemble(
        config: Config,
        config_hash: String,
        lock: RunLock,
        parts: Parts,
        browser: B,
    ) -> Self {
        Self {
            config,
            config_hash,
            browser,
            storage: parts.storage,
            _lock: lock,
            cancel: CancelSignal::new(),
            fetcher: parts.fetcher,
            policy: parts.policy,
        }
    }

    /// Signal that stops this controller; clone it into a Ctrl-C handler
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    /// Releases the lock and hands back the browser session
    pub fn into_browser(self) -> B {
        self.browser
    }

    /// Starts a new run from the first result page
    pub async fn start_run(&mut self, request: RunRequest) -> crate::Result<RunReport> {
        self.walk(request, Cursor::default()).await
    }

    /// Starts a new run with the search parameters of `run_id`, positioned at
    /// its last committed cursor
    pub async fn resume_run(&mut self, run_id: i64) -> crate::Result<RunReport> {
        let previous = self.storage.get_run(run_id).map_err(|e| match e {
            StorageError::RunNotFound(id) => HarvestError::RunNotFound(id),
            other => other.into(),
        })?;
        let source = source_of(&previous).ok_or_else(|| {
            ConfigError::Validation(format!("run {} has no search source to resume", run_id))
        })?;

        info!(
            "Resuming run {} from page {} after {:?}",
            run_id, previous.cursor.page, previous.cursor.last_key
        );
        let request = RunRequest {
            source,
            max_results: previous.max_results,
        };
        self.walk(request, previous.cursor.clone()).await
    }

    /// Resets every `failed` item to `pending` and attempts all pending items
    /// without walking result pages
    pub async fn retry_failed(&mut self) -> crate::Result<RunReport> {
        let reset = self.storage.reset_items(ItemStatus::Failed)?;
        let pending = self.storage.list_items(Some(ItemStatus::Pending))?;
        info!(
            "Retrying {} items ({} reset from failed)",
            pending.len(),
            reset
        );

        let run_id = self.storage.create_run(&RunParams {
            query: None,
            search_url: None,
            year_from: None,
            year_to: None,
            max_results: u32::try_from(pending.len()).unwrap_or(u32::MAX),
            config_hash: self.config_hash.clone(),
        })?;

        let mut state = RunState {
            run_id,
            counts: RunCounts::default(),
            already_done: 0,
            cursor: Cursor::default(),
        };

        let result = self.retry_loop(&mut state, pending).await;
        self.finish(state, result)
    }

    async fn retry_loop(
        &mut self,
        state: &mut RunState,
        pending: Vec<ItemRecord>,
    ) -> crate::Result<()> {
        for record in pending {
            if self.cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }
            let item = ItemDescriptor {
                key: record.key,
                title: record.title,
                authors: record.authors,
                source_url: record.source_url,
                year: record.year,
            };
            let cursor = state.cursor.clone();
            self.handle_item(state, &item, cursor).await?;
        }
        Ok(())
    }

    async fn walk(&mut self, request: RunRequest, cursor: Cursor) -> crate::Result<RunReport> {
        let params = run_params(&request, &self.config_hash);
        let run_id = self.storage.create_run(&params)?;
        info!(
            "Starting run {} ({:?}, max {} results)",
            run_id, request.source, request.max_results
        );

        let mut state = RunState {
            run_id,
            counts: RunCounts::default(),
            already_done: 0,
            cursor: cursor.clone(),
        };
        // Record the starting position so resuming this run works even if nothing commits
        self.storage
            .record_run_progress(run_id, &ProgressDelta::default(), &cursor)?;

        let result = self.run_pages(&mut state, request, &cursor).await;
        self.finish(state, result)
    }

    async fn run_pages(
        &mut self,
        state: &mut RunState,
        request: RunRequest,
        cursor: &Cursor,
    ) -> crate::Result<()> {
        let mut pager = Pager::new(request.source, &self.config, request.max_results, cursor)?;
        self.page_loop(state, &mut pager).await
    }

    async fn page_loop(&mut self, state: &mut RunState, pager: &mut Pager) -> crate::Result<()> {
        while let Some(page) = pager.next_page(&mut self.browser, &self.cancel).await? {
            for (index, item) in page.items.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return Err(HarvestError::Cancelled);
                }
                let position = u32::try_from(index).unwrap_or(u32::MAX);
                let cursor = Cursor {
                    page: page.number,
                    last_key: Some(item.key.clone()),
                    yielded: page.yielded_before.saturating_add(position + 1),
                };
                self.handle_item(state, item, cursor).await?;
            }
        }
        Ok(())
    }

    /// Processes one item and commits the result with `cursor`
    async fn handle_item(
        &mut self,
        state: &mut RunState,
        item: &ItemDescriptor,
        cursor: Cursor,
    ) -> crate::Result<()> {
        let result = self.process_item(state.run_id, item).await?;

        let mut delta = ProgressDelta {
            counts: RunCounts::default(),
            items_seen: 1,
        };
        match result {
            ItemResult::Interrupted => return Err(HarvestError::Cancelled),
            ItemResult::AlreadyDone => state.already_done += 1,
            ItemResult::Finished(status) => {
                delta.counts.record(status);
                state.counts.record(status);
            }
        }

        self.storage
            .record_run_progress(state.run_id, &delta, &cursor)?;
        state.cursor = cursor;

        if matches!(result, ItemResult::Finished(_))
            && !self.cancel.sleep(self.config.download.inter_item_delay()).await
        {
            return Err(HarvestError::Cancelled);
        }
        Ok(())
    }

    /// Runs the attempt loop for one item
    async fn process_item(&mut self, run_id: i64, item: &ItemDescriptor) -> crate::Result<ItemResult> {
        let record = self.storage.upsert_item(item, Some(run_id))?;
        if record.status != ItemStatus::Pending {
            debug!("Item {} already {}", item.key, record.status);
            return Ok(ItemResult::AlreadyDone);
        }

        self.storage.begin_attempt(&item.key, Some(run_id))?;
        info!("Item {}: {}", item.key, item.title);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self
                .fetcher
                .fetch(&mut self.browser, item, &self.cancel)
                .await;

            let decision = self.policy.decide(&outcome, attempt);
            let (status, update) = match (decision, outcome) {
                (Decision::Complete, FetchOutcome::Downloaded { path, bytes, .. }) => (
                    ItemStatus::Downloaded,
                    StatusUpdate {
                        attempts: attempt,
                        last_error: None,
                        file_path: Some(path.display().to_string()),
                        file_size: Some(bytes),
                    },
                ),
                (Decision::Stop, _) => {
                    warn!("Item {}: interrupted during attempt {}", item.key, attempt);
                    return Ok(ItemResult::Interrupted);
                }
                (Decision::RetryAfter(delay), outcome) => {
                    warn!(
                        "Item {}: attempt {}/{} failed ({}); retrying in {:?}",
                        item.key,
                        attempt,
                        self.policy.max_attempts(),
                        describe(&outcome),
                        delay
                    );
                    if !self.cancel.sleep(delay).await {
                        return Ok(ItemResult::Interrupted);
                    }
                    continue;
                }
                (Decision::Skip, outcome) => {
                    info!("Item {}: skipped ({})", item.key, describe(&outcome));
                    (ItemStatus::Skipped, error_update(attempt, &outcome))
                }
                (_, outcome) => {
                    warn!(
                        "Item {}: failed after {} attempts ({})",
                        item.key,
                        attempt,
                        describe(&outcome)
                    );
                    (ItemStatus::Failed, error_update(attempt, &outcome))
                }
            };

            self.storage.set_status(&item.key, status, &update)?;
            return Ok(ItemResult::Finished(status));
        }
    }

    /// Finalizes the run for the way it ended
    fn finish(&mut self, state: RunState, result: crate::Result<()>) -> crate::Result<RunReport> {
        let end_reason = match result {
            Ok(()) => EndReason::Completed,
            Err(HarvestError::Cancelled) => EndReason::Cancelled,
            Err(e) => {
                error!(
                    "Run {} aborted: {} (last cursor: page {}, key {:?})",
                    state.run_id, e, state.cursor.page, state.cursor.last_key
                );
                EndReason::Fatal(e.to_string())
            }
        };

        self.storage.finalize_run(state.run_id, &end_reason)?;
        info!(
            "Run {} {}: {} downloaded, {} skipped, {} failed, {} already done",
            state.run_id,
            end_reason,
            state.counts.downloaded,
            state.counts.skipped,
            state.counts.failed,
            state.already_done
        );
        Ok(state.report(end_reason))
    }
}

fn run_params(request: &RunRequest, config_hash: &str) -> RunParams {
    let (query, search_url, year_from, year_to) = match &request.source {
        SearchSource::Query {
            text,
            year_from,
            year_to,
        } => (Some(text.clone()), None, *year_from, *year_to),
        SearchSource::Url(url) => (None, Some(url.clone()), None, None),
    };
    RunParams {
        query,
        search_url,
        year_from,
        year_to,
        max_results: request.max_results,
        config_hash: config_hash.to_string(),
    }
}

fn source_of(run: &RunRecord) -> Option<SearchSource> {
    if let Some(text) = &run.query {
        return Some(SearchSource::Query {
            text: text.clone(),
            year_from: run.year_from,
            year_to: run.year_to,
        });
    }
    run.search_url.clone().map(SearchSource::Url)
}

fn describe(outcome: &FetchOutcome) -> String {
    match outcome {
        FetchOutcome::Skipped(e) | FetchOutcome::Retryable(e) => e.to_string(),
        FetchOutcome::Downloaded { path, .. } => format!("saved {}", path.display()),
        FetchOutcome::Cancelled => "cancelled".to_string(),
    }
}

fn error_update(attempt: u32, outcome: &FetchOutcome) -> StatusUpdate {
    StatusUpdate {
        attempts: attempt,
        last_error: Some(describe(outcome)),
        file_path: None,
        file_size: None,
    }
}
