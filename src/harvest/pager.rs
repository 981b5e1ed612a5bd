//! Pagination walker
//!
//! Loads search result pages one at a time through the browser and yields the
//! items not seen earlier in the walk. The walk ends when a page brings no new
//! items, when the result cap is reached, or after the configured page limit.

use crate::browser::Browser;
use crate::config::Config;
use crate::harvest::cancel::CancelSignal;
use crate::harvest::parser::parse_search_results;
use crate::storage::{Cursor, ItemDescriptor};
use crate::url::{LibraryUrls, YearRange};
use crate::{HarvestError, UrlResult};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Present once the result list (or a document link) has rendered
const READY_SELECTOR: &str = "xpl-results-item, xpl-document-card, a[href*='/document/']";

/// Where result pages come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchSource {
    /// Keyword query with an optional publication-year filter
    Query {
        text: String,
        year_from: Option<i32>,
        year_to: Option<i32>,
    },
    /// An existing search results URL, refinements included
    Url(String),
}

impl SearchSource {
    pub fn query(text: impl Into<String>) -> Self {
        SearchSource::Query {
            text: text.into(),
            year_from: None,
            year_to: None,
        }
    }

    /// URL of result page `page`
    pub fn page_url(&self, urls: &LibraryUrls, page: u32, rows: u32) -> UrlResult<String> {
        match self {
            SearchSource::Query {
                text,
                year_from,
                year_to,
            } => urls.search_page(text, YearRange::from_bounds(*year_from, *year_to), page, rows),
            SearchSource::Url(url) => LibraryUrls::from_existing(url, page, rows),
        }
    }
}

/// One page of new items
#[derive(Debug, Clone)]
pub struct ResultPage {
    /// 1-based page index
    pub number: u32,
    pub items: Vec<ItemDescriptor>,
    /// Items yielded by earlier pages of the walk
    pub yielded_before: u32,
}

enum PageError {
    Cancelled,
    Failed(String),
}

impl From<crate::harvest::cancel::Cancelled> for PageError {
    fn from(_: crate::harvest::cancel::Cancelled) -> Self {
        PageError::Cancelled
    }
}

impl From<crate::browser::BrowserError> for PageError {
    fn from(err: crate::browser::BrowserError) -> Self {
        PageError::Failed(err.to_string())
    }
}

/// Lazy walk over result pages
#[derive(Debug)]
pub struct Pager {
    source: SearchSource,
    urls: LibraryUrls,
    rows: u32,
    max_pages: u32,
    max_results: u32,
    page_timeout: Duration,
    page_retries: u32,
    retry_delay: Duration,
    next_page: u32,
    resume_after: Option<String>,
    yielded: u32,
    seen: HashSet<String>,
    exhausted: bool,
}

impl Pager {
    /// Creates a walker positioned at `cursor`
    ///
    /// Items on the cursor page up to and including `cursor.last_key` are
    /// not yielded again, and `cursor.yielded` counts against `max_results`.
    pub fn new(
        source: SearchSource,
        config: &Config,
        max_results: u32,
        cursor: &Cursor,
    ) -> crate::Result<Self> {
        Ok(Self {
            source,
            urls: LibraryUrls::new(&config.library.base_url)?,
            rows: config.library.rows_per_page,
            max_pages: config.library.max_pages,
            max_results,
            page_timeout: config.download.page_timeout(),
            page_retries: config.download.page_retries,
            retry_delay: config.download.retry_delay(),
            next_page: cursor.page.max(1),
            resume_after: cursor.last_key.clone(),
            yielded: cursor.yielded,
            seen: HashSet::new(),
            exhausted: false,
        })
    }

    /// Loads the next page
    ///
    /// # Returns
    ///
    /// * `Ok(Some(page))` - The next page; its items may be empty only when
    ///   every item on it was committed before a resume
    /// * `Ok(None)` - The walk is over
    /// * `Err(HarvestError::PageLoad)` - The page failed after every retry
    /// * `Err(HarvestError::Cancelled)` - Cancellation was signaled
    pub async fn next_page<B: Browser + ?Sized>(
        &mut self,
        browser: &mut B,
        cancel: &CancelSignal,
    ) -> crate::Result<Option<ResultPage>> {
        if cancel.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }
        if self.exhausted {
            return Ok(None);
        }
        if self.yielded >= self.max_results {
            info!("Result cap of {} reached", self.max_results);
            self.exhausted = true;
            return Ok(None);
        }
        if self.next_page > self.max_pages {
            info!("Page limit of {} reached", self.max_pages);
            self.exhausted = true;
            return Ok(None);
        }

        let number = self.next_page;
        let url = self.source.page_url(&self.urls, number, self.rows)?;
        let parsed = self.load_with_retries(browser, cancel, number, &url).await?;
        self.next_page += 1;

        let yielded_before = self.yielded;
        let Some(items) = self.take_new(parsed) else {
            info!("Page {} brought no new items; walk finished", number);
            self.exhausted = true;
            return Ok(None);
        };

        info!(
            "Page {}: {} new items ({} yielded so far)",
            number,
            items.len(),
            self.yielded
        );
        Ok(Some(ResultPage {
            number,
            items,
            yielded_before,
        }))
    }

    /// Filters a parsed page down to the items this walk yields
    ///
    /// Returns `None` when the page had nothing new at all.
    fn take_new(&mut self, parsed: Vec<ItemDescriptor>) -> Option<Vec<ItemDescriptor>> {
        let resume_after = self.resume_after.take();
        let mut skipping = resume_after
            .as_ref()
            .is_some_and(|key| parsed.iter().any(|item| &item.key == key));
        if resume_after.is_some() && !skipping {
            warn!("Resume key not found on page; yielding the whole page");
        }

        let mut fresh = 0;
        let mut items = Vec::new();
        for item in parsed {
            if !self.seen.insert(item.key.clone()) {
                continue;
            }
            fresh += 1;
            if skipping {
                skipping = resume_after.as_deref() != Some(item.key.as_str());
                continue;
            }
            if self.yielded >= self.max_results {
                break;
            }
            self.yielded += 1;
            items.push(item);
        }

        if fresh == 0 {
            return None;
        }
        if self.yielded >= self.max_results {
            self.exhausted = true;
        }
        Some(items)
    }

    async fn load_with_retries<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        cancel: &CancelSignal,
        number: u32,
        url: &str,
    ) -> crate::Result<Vec<ItemDescriptor>> {
        let attempts = self.page_retries + 1;
        let mut cause = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                warn!(
                    "Retrying page {} (attempt {}/{}) after: {}",
                    number, attempt, attempts, cause
                );
                if !cancel.sleep(self.retry_delay).await {
                    return Err(HarvestError::Cancelled);
                }
            }

            match self.load_page(browser, cancel, url).await {
                Ok(items) => return Ok(items),
                Err(PageError::Cancelled) => return Err(HarvestError::Cancelled),
                Err(PageError::Failed(message)) => cause = message,
            }
        }

        Err(HarvestError::PageLoad {
            page: number,
            attempts,
            cause,
        })
    }

    async fn load_page<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        cancel: &CancelSignal,
        url: &str,
    ) -> Result<Vec<ItemDescriptor>, PageError> {
        debug!("Loading result page {}", url);
        cancel.guard(browser.navigate(url)).await??;

        let ready = cancel
            .guard(browser.find_element(READY_SELECTOR, self.page_timeout))
            .await??;
        if ready.is_none() {
            let text = cancel.guard(browser.page_text()).await??;
            if reports_no_results(&text) {
                debug!("Library reports no results for {}", url);
                return Ok(Vec::new());
            }
            return Err(PageError::Failed(format!(
                "results did not render within {:?}",
                self.page_timeout
            )));
        }

        let html = cancel.guard(browser.page_source()).await??;
        let current = cancel.guard(browser.current_url()).await??;
        let base = Url::parse(&current)
            .or_else(|_| Url::parse(url))
            .map_err(|e| PageError::Failed(e.to_string()))?;

        Ok(parse_search_results(&html, &base))
    }
}

/// True when the page text says the search matched nothing
fn reports_no_results(text: &str) -> bool {
    let text = text.to_lowercase();
    if text.contains("no results") {
        return true;
    }
    text.match_indices("0 results").any(|(index, _)| {
        text[..index]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_ascii_digit())
    })
}
