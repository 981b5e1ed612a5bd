//! Shared fixtures for the integration suite
//!
//! `FakeBrowser` plays the library: numbered result pages, per-item scripts
//! deciding which tactic delivers a file on which attempt, access and
//! rate-limit pages, and downloads written straight into the watched
//! directory. Its state sits behind an `Arc<Mutex<_>>` so a test can keep a
//! handle after the controller takes ownership of the browser.

use async_trait::async_trait;
use paper_harvest::browser::{Browser, BrowserError, BrowserResult, ElementHandle};
use paper_harvest::config::Config;
use paper_harvest::harvest::{CancelSignal, Tactic};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

pub const BASE_URL: &str = "https://library.test";

pub const PDF_BYTES: &[u8] = b"%PDF-1.5\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n%%EOF\n";

/// How the library treats one item
#[derive(Debug, Clone)]
pub struct ItemScript {
    /// Pages for this item show the access-restriction notice
    pub denied: bool,
    /// Pages for this item show the rate-limit notice
    pub rate_limited: bool,
    /// Tactic that delivers the file
    pub tactic: Tactic,
    /// First attempt (1-based) on which `tactic` delivers; `None` never delivers
    pub deliver_from_attempt: Option<u32>,
    /// Bytes of the delivered file
    pub body: Vec<u8>,
}

impl ItemScript {
    pub fn direct() -> Self {
        Self {
            denied: false,
            rate_limited: false,
            tactic: Tactic::DirectUrl,
            deliver_from_attempt: Some(1),
            body: PDF_BYTES.to_vec(),
        }
    }

    pub fn via(tactic: Tactic, attempt: u32) -> Self {
        Self {
            tactic,
            deliver_from_attempt: Some(attempt),
            ..Self::direct()
        }
    }

    pub fn denied() -> Self {
        Self {
            denied: true,
            deliver_from_attempt: None,
            ..Self::direct()
        }
    }

    pub fn never() -> Self {
        Self {
            deliver_from_attempt: None,
            ..Self::direct()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Blank,
    Search(u32),
    Direct(String),
    Landing(String),
    Viewer(String),
}

#[derive(Debug)]
pub struct FakeState {
    pub pages: HashMap<u32, String>,
    pub items: HashMap<String, ItemScript>,
    /// Attempts per key, counted by visits to the direct resource URL
    pub attempts: HashMap<String, u32>,
    /// Keys in delivery order
    pub delivered: Vec<String>,
    pub navigations: Vec<String>,
    /// Search page loads that fail before loads succeed again
    pub failing_search_loads: u32,
    /// Download waits run their full timeout when nothing arrives
    pub hang_waits: bool,
    /// Raise this signal once this many files were delivered
    pub cancel_after: Option<(usize, CancelSignal)>,
    location: Location,
    current_url: String,
    pending: Option<Vec<u8>>,
}

impl FakeState {
    fn script(&self, key: &str) -> ItemScript {
        self.items.get(key).cloned().unwrap_or_else(ItemScript::direct)
    }

    /// Arms a delivery when `tactic` is the scripted one and the attempt is due
    fn offer(&mut self, key: &str, tactic: Tactic) {
        let script = self.script(key);
        let attempt = self.attempts.get(key).copied().unwrap_or(0);
        let due = script
            .deliver_from_attempt
            .is_some_and(|from| attempt >= from);
        if !script.denied && !script.rate_limited && script.tactic == tactic && due {
            self.pending = Some(script.body.clone());
        }
    }

    fn current_key(&self) -> Option<&str> {
        match &self.location {
            Location::Direct(k) | Location::Landing(k) | Location::Viewer(k) => Some(k),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeBrowser {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                pages: HashMap::new(),
                items: HashMap::new(),
                attempts: HashMap::new(),
                delivered: Vec::new(),
                navigations: Vec::new(),
                failing_search_loads: 0,
                hang_waits: false,
                cancel_after: None,
                location: Location::Blank,
                current_url: "about:blank".to_string(),
                pending: None,
            })),
        }
    }

    /// Adds result page `number` holding items `keys`
    pub fn with_page(self, number: u32, keys: impl IntoIterator<Item = u32>) -> Self {
        let keys: Vec<String> = keys.into_iter().map(|k| k.to_string()).collect();
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(number, result_page(&keys));
        self
    }

    pub fn with_item(self, key: &str, script: ItemScript) -> Self {
        self.state
            .lock()
            .unwrap()
            .items
            .insert(key.to_string(), script);
        self
    }

    pub fn set_item(&self, key: &str, script: ItemScript) {
        self.state
            .lock()
            .unwrap()
            .items
            .insert(key.to_string(), script);
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn delivered(&self) -> Vec<String> {
        self.state.lock().unwrap().delivered.clone()
    }

    pub fn search_loads(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .navigations
            .iter()
            .filter(|url| url.contains("searchresult.jsp"))
            .count()
    }
}

fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url).ok()?.query_pairs().find_map(|(k, v)| {
        if k == name {
            Some(v.into_owned())
        } else {
            None
        }
    })
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        let mut state = self.state.lock().unwrap();
        state.navigations.push(url.to_string());
        state.pending = None;

        if url.contains("searchresult.jsp") && state.failing_search_loads > 0 {
            state.failing_search_loads -= 1;
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                message: "net::ERR_CONNECTION_RESET".to_string(),
            });
        }

        state.current_url = url.to_string();
        state.location = if url.contains("searchresult.jsp") {
            let page = query_param(url, "pageNumber")
                .and_then(|p| p.parse().ok())
                .unwrap_or(1);
            Location::Search(page)
        } else if url.contains("stampPDF/getPDF.jsp") {
            let key = query_param(url, "arnumber").unwrap_or_default();
            *state.attempts.entry(key.clone()).or_insert(0) += 1;
            state.offer(&key, Tactic::DirectUrl);
            Location::Direct(key)
        } else if url.contains("stamp/stamp.jsp") {
            Location::Landing(query_param(url, "arnumber").unwrap_or_default())
        } else if let Some(key) = url.split("/viewer/").nth(1) {
            let key = key.trim_end_matches('/').to_string();
            state.offer(&key, Tactic::EmbeddedViewer);
            Location::Viewer(key)
        } else {
            Location::Blank
        };
        Ok(())
    }

    async fn find_element(
        &mut self,
        selector: &str,
        _timeout: Duration,
    ) -> BrowserResult<Option<ElementHandle>> {
        let state = self.state.lock().unwrap();
        let found = match &state.location {
            Location::Search(page) => {
                state.pages.contains_key(page) && selector.contains("xpl-results-item")
            }
            Location::Landing(key) => {
                let script = state.script(key);
                !script.denied
                    && !script.rate_limited
                    && (selector == "iframe#pdf" || selector == "a.pdf-btn")
            }
            _ => false,
        };
        Ok(found.then(|| ElementHandle(selector.to_string())))
    }

    async fn click(&mut self, element: &ElementHandle) -> BrowserResult<()> {
        let mut state = self.state.lock().unwrap();
        if element.0 == "a.pdf-btn" {
            if let Some(key) = state.current_key().map(str::to_string) {
                state.offer(&key, Tactic::DownloadControl);
            }
        }
        Ok(())
    }

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> BrowserResult<Option<String>> {
        let state = self.state.lock().unwrap();
        match (element.0.as_str(), name, state.current_key()) {
            ("iframe#pdf", "src", Some(key)) => Ok(Some(format!("/viewer/{}", key))),
            _ => Ok(None),
        }
    }

    async fn page_text(&mut self) -> BrowserResult<String> {
        let state = self.state.lock().unwrap();
        let text = match &state.location {
            Location::Search(page) if !state.pages.contains_key(page) => {
                "No results found for your search".to_string()
            }
            Location::Direct(key) | Location::Landing(key) | Location::Viewer(key) => {
                let script = state.script(key);
                if script.denied {
                    "This document is available to subscribers. Purchase PDF".to_string()
                } else if script.rate_limited {
                    "Too Many Requests".to_string()
                } else {
                    "Abstract".to_string()
                }
            }
            _ => String::new(),
        };
        Ok(text)
    }

    async fn page_source(&mut self) -> BrowserResult<String> {
        let state = self.state.lock().unwrap();
        Ok(match &state.location {
            Location::Search(page) => state.pages.get(page).cloned().unwrap_or_default(),
            _ => "<html></html>".to_string(),
        })
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        Ok(self.state.lock().unwrap().current_url.clone())
    }

    async fn wait_for_download(
        &mut self,
        directory: &Path,
        timeout: Duration,
    ) -> BrowserResult<Option<PathBuf>> {
        let (body, hang) = {
            let mut state = self.state.lock().unwrap();
            (state.pending.take(), state.hang_waits)
        };

        let Some(body) = body else {
            if hang {
                tokio::time::sleep(timeout).await;
            }
            return Ok(None);
        };

        let mut state = self.state.lock().unwrap();
        let key = state.current_key().unwrap_or("unknown").to_string();
        let path = directory.join(format!("getPDF-{}.pdf", key));
        std::fs::write(&path, body)?;
        state.delivered.push(key);

        if let Some((after, signal)) = &state.cancel_after {
            if state.delivered.len() >= *after {
                signal.cancel();
            }
        }
        Ok(Some(path))
    }
}

/// Result page markup the way the library renders it
pub fn result_page(keys: &[String]) -> String {
    let entries: String = keys
        .iter()
        .map(|key| {
            format!(
                r#"<xpl-results-item>
                     <h3><a href="/document/{key}/">Paper number {key} on signal processing</a></h3>
                     <xpl-authors-name-list><a href="/author/{key}">Author {key}</a></xpl-authors-name-list>
                     <div>Year: 2023</div>
                   </xpl-results-item>"#
            )
        })
        .collect();
    format!(
        "<html><body><xpl-results-list>{}</xpl-results-list></body></html>",
        entries
    )
}

/// Configuration rooted in a temporary directory with no waits
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.library.base_url = BASE_URL.to_string();
    config.library.rows_per_page = 10;
    config.download.directory = dir.path().join("downloads");
    config.download.max_attempts = 3;
    config.download.retry_delay_ms = 0;
    config.download.rate_limit_backoff_ms = 0;
    config.download.inter_item_delay_ms = 0;
    config.download.item_timeout_ms = 50;
    config.download.direct_timeout_ms = 50;
    config.download.element_timeout_ms = 0;
    config.download.page_timeout_ms = 50;
    config.download.page_retries = 2;
    config.storage.database_path = dir.path().join("state").join("papers.db");
    config
}

/// PDF files currently in the download directory
pub fn pdf_files(config: &Config) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(&config.download.directory)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|x| x == "pdf"))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}
