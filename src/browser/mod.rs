//! Browser capability
//!
//! The harvester never talks HTTP to the library itself. Every page load,
//! element lookup and file transfer goes through a [`Browser`], which keeps
//! the authenticated session in one place and lets tests substitute a fake.
//!
//! # Components
//!
//! - `Browser`: the capability trait the fetch strategy and the pager drive
//! - `WebDriverBrowser`: W3C WebDriver implementation (chromedriver / msedgedriver)
//! - `DownloadWatcher`: detects completed files in the download directory

mod download;
mod webdriver;

pub use download::{is_partial_download, DownloadWatcher};
pub use webdriver::WebDriverBrowser;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Opaque reference to an element on the current page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

/// Errors raised by a browser implementation
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("WebDriver error '{error}': {message}")]
    Protocol { error: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// An authenticated browser session
///
/// One interaction at a time: every method takes `&mut self`. Every wait is
/// bounded by the timeout passed in or by the implementation's command timeout.
#[async_trait]
pub trait Browser: Send {
    /// Loads `url` in the current tab
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;

    /// Waits up to `timeout` for an element matching the CSS `selector`
    ///
    /// Returns `Ok(None)` when nothing matched in time.
    async fn find_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> BrowserResult<Option<ElementHandle>>;

    /// Clicks an element found on the current page
    async fn click(&mut self, element: &ElementHandle) -> BrowserResult<()>;

    /// Reads an attribute (e.g. `src`, `href`) of an element
    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> BrowserResult<Option<String>>;

    /// Visible text of the current page
    async fn page_text(&mut self) -> BrowserResult<String>;

    /// Serialized DOM of the current page
    async fn page_source(&mut self) -> BrowserResult<String>;

    /// URL of the current page after redirects
    async fn current_url(&mut self) -> BrowserResult<String>;

    /// Waits up to `timeout` for a download started since the last
    /// navigation or click to complete in `directory`
    ///
    /// Returns `Ok(None)` when no file completed in time.
    async fn wait_for_download(
        &mut self,
        directory: &Path,
        timeout: Duration,
    ) -> BrowserResult<Option<PathBuf>>;
}
