//! Item fetch strategy
//!
//! One call to [`ItemFetcher::fetch`] is one attempt at one item. Tactics are
//! tried in order and the first that produces a verified file wins:
//!
//! 1. `DirectUrl` - navigate to the direct resource URL and wait briefly
//! 2. `EmbeddedViewer` - open the landing page and follow the inline viewer source
//! 3. `DownloadControl` - open the landing page and click the download control
//!
//! Every loaded page is checked for access-restriction and rate-limit
//! signals before the next step. An access restriction ends the attempt as
//! skipped; every other failure falls through to the next tactic.

use crate::browser::{Browser, BrowserError, ElementHandle};
use crate::config::Config;
use crate::harvest::cancel::{CancelSignal, Cancelled};
use crate::harvest::placement::{place_file, target_file_name, verify_pdf};
use crate::harvest::signals::{PageSignal, SignalMatcher};
use crate::storage::ItemDescriptor;
use crate::url::{resolve_href, LibraryUrls};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Inline viewers and PDF links on the landing page, most specific first
const VIEWER_SELECTORS: &[&str] = &[
    "iframe#pdf",
    "iframe[src*='pdf']",
    "iframe[src*='getPDF']",
    "iframe[name='pdf']",
    "iframe",
    "embed[src*='.pdf']",
    "embed[type='application/pdf']",
    "embed[src*='pdf']",
    "a[href*='.pdf']",
    "a[href*='getPDF']",
];

/// Download controls on the landing page
const CONTROL_SELECTORS: &[&str] = &[
    "a.pdf-btn",
    "button.pdf-btn",
    "[data-action='download-pdf']",
    "a[aria-label*='Download PDF']",
    "button[aria-label*='Download PDF']",
    "a[title*='Download PDF']",
];

/// Cookie consent banner that can cover the viewer
const CONSENT_BUTTON: &str = "#onetrust-accept-btn-handler";

/// Retrieval tactics in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tactic {
    DirectUrl,
    EmbeddedViewer,
    DownloadControl,
}

impl Tactic {
    pub const ALL: [Tactic; 3] = [
        Tactic::DirectUrl,
        Tactic::EmbeddedViewer,
        Tactic::DownloadControl,
    ];
}

impl fmt::Display for Tactic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tactic::DirectUrl => "direct-url",
            Tactic::EmbeddedViewer => "embedded-viewer",
            Tactic::DownloadControl => "download-control",
        };
        write!(f, "{}", name)
    }
}

/// Why an attempt did not produce a file
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Access restricted: {0}")]
    PermissionDenied(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Element not found: {0}")]
    MissingElement(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("File placement failed: {0}")]
    Io(String),
}

impl From<BrowserError> for FetchError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Timeout { what, after } => {
                FetchError::Timeout(format!("{} after {:?}", what, after))
            }
            other => FetchError::Navigation(other.to_string()),
        }
    }
}

/// Terminal outcome of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A verified file was placed at `path`
    Downloaded {
        path: PathBuf,
        bytes: u64,
        tactic: Tactic,
    },
    /// Permanent access restriction; never retried
    Skipped(FetchError),
    /// Every tactic failed; carries the last error
    Retryable(FetchError),
    /// Cancellation won a race against a browser call
    Cancelled,
}

/// How a tactic stopped short of producing a file
enum Stop {
    /// The attempt is over regardless of the remaining tactics
    Outcome(FetchOutcome),
    /// Try the next tactic
    Failed(FetchError),
}

impl From<Cancelled> for Stop {
    fn from(_: Cancelled) -> Self {
        Stop::Outcome(FetchOutcome::Cancelled)
    }
}

impl From<BrowserError> for Stop {
    fn from(err: BrowserError) -> Self {
        Stop::Failed(err.into())
    }
}

type TacticResult<T> = Result<T, Stop>;

/// Runs the tactic chain for single items
#[derive(Debug, Clone)]
pub struct ItemFetcher {
    urls: LibraryUrls,
    signals: SignalMatcher,
    download_dir: PathBuf,
    direct_timeout: Duration,
    item_timeout: Duration,
    element_timeout: Duration,
}

impl ItemFetcher {
    pub fn new(config: &Config) -> crate::Result<Self> {
        Ok(Self {
            urls: LibraryUrls::new(&config.library.base_url)?,
            signals: SignalMatcher::new(&config.signals),
            download_dir: config.download.directory.clone(),
            direct_timeout: config.download.direct_timeout(),
            item_timeout: config.download.item_timeout(),
            element_timeout: config.download.element_timeout(),
        })
    }

    /// Makes one attempt at `item`
    ///
    /// # Returns
    ///
    /// * `Downloaded` - The first tactic that produced a verified PDF
    /// * `Skipped` - A loaded page reported an access restriction
    /// * `Retryable` - Every tactic failed, or the page reported rate limiting
    /// * `Cancelled` - The cancel signal was raised during the attempt
    pub async fn fetch<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        item: &ItemDescriptor,
        cancel: &CancelSignal,
    ) -> FetchOutcome {
        let mut last_error = FetchError::MissingElement("no tactic ran".to_string());

        for tactic in Tactic::ALL {
            if cancel.is_cancelled() {
                return FetchOutcome::Cancelled;
            }
            debug!("Item {}: trying {}", item.key, tactic);

            let result = match tactic {
                Tactic::DirectUrl => self.direct_url(browser, item, cancel).await,
                Tactic::EmbeddedViewer => self.embedded_viewer(browser, item, cancel).await,
                Tactic::DownloadControl => self.download_control(browser, item, cancel).await,
            };

            match result {
                Ok(downloaded) => return self.finish(&downloaded, item, tactic, cancel).await,
                Err(Stop::Outcome(outcome)) => return outcome,
                Err(Stop::Failed(e)) => {
                    debug!("Item {}: {} failed: {}", item.key, tactic, e);
                    last_error = e;
                }
            }
        }

        FetchOutcome::Retryable(last_error)
    }

    /// Verifies and places a downloaded file
    async fn finish(
        &self,
        downloaded: &Path,
        item: &ItemDescriptor,
        tactic: Tactic,
        cancel: &CancelSignal,
    ) -> FetchOutcome {
        let bytes = match verify_pdf(downloaded) {
            Ok(bytes) => bytes,
            Err(reason) => {
                warn!("Item {}: rejecting download: {}", item.key, reason);
                if let Err(e) = tokio::fs::remove_file(downloaded).await {
                    warn!("Failed to remove {}: {}", downloaded.display(), e);
                }
                return FetchOutcome::Retryable(FetchError::VerificationFailed(reason));
            }
        };

        let target = self
            .download_dir
            .join(target_file_name(&item.key, &item.title));
        match place_file(downloaded, &target, cancel).await {
            Ok(path) => {
                info!(
                    "Item {}: saved {} ({} bytes) via {}",
                    item.key,
                    path.display(),
                    bytes,
                    tactic
                );
                FetchOutcome::Downloaded {
                    path,
                    bytes,
                    tactic,
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted && cancel.is_cancelled() => {
                FetchOutcome::Cancelled
            }
            Err(e) => FetchOutcome::Retryable(FetchError::Io(format!(
                "{} -> {}: {}",
                downloaded.display(),
                target.display(),
                e
            ))),
        }
    }

    async fn direct_url<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        item: &ItemDescriptor,
        cancel: &CancelSignal,
    ) -> TacticResult<PathBuf> {
        let url = self.urls.direct_resource(&item.key);
        self.start_download(browser, &url, cancel).await?;

        if let Some(path) = self.wait_download(browser, self.direct_timeout, cancel).await? {
            return Ok(path);
        }

        self.check_signals(browser, cancel).await?;
        Err(Stop::Failed(FetchError::Timeout(format!(
            "no download from direct URL within {:?}",
            self.direct_timeout
        ))))
    }

    async fn embedded_viewer<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        item: &ItemDescriptor,
        cancel: &CancelSignal,
    ) -> TacticResult<PathBuf> {
        self.open_landing_page(browser, item, cancel).await?;

        let mut source = None;
        for (index, selector) in VIEWER_SELECTORS.iter().enumerate() {
            let Some(element) = self.find(browser, selector, index, cancel).await? else {
                continue;
            };
            let src = match cancel.guard(browser.attribute(&element, "src")).await?? {
                Some(src) if !src.trim().is_empty() => Some(src),
                _ => cancel.guard(browser.attribute(&element, "href")).await??,
            };
            if let Some(src) = src.filter(|s| !s.trim().is_empty()) {
                debug!("Item {}: viewer source {} via {}", item.key, src, selector);
                source = Some(src);
                break;
            }
        }

        let src = source.ok_or_else(|| {
            Stop::Failed(FetchError::MissingElement("embedded viewer".to_string()))
        })?;
        let current = cancel.guard(browser.current_url()).await??;
        let target = resolve_href(&current, &src)
            .map_err(|e| Stop::Failed(FetchError::Navigation(e.to_string())))?;

        self.start_download(browser, &target, cancel).await?;
        match self.wait_download(browser, self.item_timeout, cancel).await? {
            Some(path) => Ok(path),
            None => {
                self.check_signals(browser, cancel).await?;
                Err(Stop::Failed(FetchError::Timeout(format!(
                    "no download from viewer within {:?}",
                    self.item_timeout
                ))))
            }
        }
    }

    async fn download_control<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        item: &ItemDescriptor,
        cancel: &CancelSignal,
    ) -> TacticResult<PathBuf> {
        self.open_landing_page(browser, item, cancel).await?;

        let mut control = None;
        for (index, selector) in CONTROL_SELECTORS.iter().enumerate() {
            if let Some(element) = self.find(browser, selector, index, cancel).await? {
                control = Some(element);
                break;
            }
        }
        let control = control.ok_or_else(|| {
            Stop::Failed(FetchError::MissingElement("download control".to_string()))
        })?;

        cancel.guard(browser.click(&control)).await??;
        match self.wait_download(browser, self.item_timeout, cancel).await? {
            Some(path) => Ok(path),
            None => {
                self.check_signals(browser, cancel).await?;
                Err(Stop::Failed(FetchError::Timeout(format!(
                    "no download after clicking control within {:?}",
                    self.item_timeout
                ))))
            }
        }
    }

    /// Loads the landing page, clears the consent banner and checks signals
    async fn open_landing_page<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        item: &ItemDescriptor,
        cancel: &CancelSignal,
    ) -> TacticResult<()> {
        let url = self.urls.landing_page(&item.key);
        cancel.guard(browser.navigate(&url)).await??;

        if let Ok(Some(button)) = cancel
            .guard(browser.find_element(CONSENT_BUTTON, Duration::ZERO))
            .await?
        {
            if let Err(e) = cancel.guard(browser.click(&button)).await? {
                debug!("Consent banner click failed: {}", e);
            }
        }

        self.check_signals(browser, cancel).await
    }

    /// Navigation that is expected to hand off to the download manager
    ///
    /// Some drivers report an error when a navigation ends in a download, so
    /// a failure here is logged and the download wait decides.
    async fn start_download<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        url: &str,
        cancel: &CancelSignal,
    ) -> TacticResult<()> {
        if let Err(e) = cancel.guard(browser.navigate(url)).await? {
            debug!("Navigation to {} reported: {}", url, e);
        }
        Ok(())
    }

    async fn wait_download<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> TacticResult<Option<PathBuf>> {
        Ok(cancel
            .guard(browser.wait_for_download(&self.download_dir, timeout))
            .await??)
    }

    /// First selector waits the element timeout; the rest are checked once
    async fn find<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        selector: &str,
        index: usize,
        cancel: &CancelSignal,
    ) -> TacticResult<Option<ElementHandle>> {
        let timeout = if index == 0 {
            self.element_timeout
        } else {
            Duration::ZERO
        };
        Ok(cancel.guard(browser.find_element(selector, timeout)).await??)
    }

    async fn check_signals<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        cancel: &CancelSignal,
    ) -> TacticResult<()> {
        let text = match cancel.guard(browser.page_text()).await? {
            Ok(text) => text,
            Err(e) => {
                debug!("Could not read page text: {}", e);
                String::new()
            }
        };
        let url = cancel
            .guard(browser.current_url())
            .await?
            .unwrap_or_default();

        match self.signals.classify(&text, &url) {
            Some(PageSignal::AccessDenied(phrase)) => Err(Stop::Outcome(FetchOutcome::Skipped(
                FetchError::PermissionDenied(phrase),
            ))),
            Some(PageSignal::RateLimited(phrase)) => {
                warn!("Rate limit signal on {}: {}", url, phrase);
                Err(Stop::Outcome(FetchOutcome::Retryable(
                    FetchError::RateLimited(phrase),
                )))
            }
            None => Ok(()),
        }
    }
}
