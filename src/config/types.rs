use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Paper-Harvest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub signals: SignalConfig,
}

/// Remote library location and result paging
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    /// Scheme and host of the library, e.g. "https://ieeexplore.ieee.org"
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// Results requested per search page
    #[serde(rename = "rows-per-page", default = "default_rows_per_page")]
    pub rows_per_page: u32,

    /// Maximum number of result pages scanned by one run
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,
}

/// Download behavior: retry budget, delays and timeouts
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    /// Directory the browser saves files into; final files are placed here too
    #[serde(default = "default_download_dir")]
    pub directory: PathBuf,

    /// Fetch attempts per item before it is marked failed
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts of the same item (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Base pause after a rate-limit signal, multiplied by the attempt number (milliseconds)
    #[serde(rename = "rate-limit-backoff-ms", default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,

    /// Pause after each fetched item (milliseconds)
    #[serde(rename = "inter-item-delay-ms", default = "default_inter_item_delay_ms")]
    pub inter_item_delay_ms: u64,

    /// Maximum wait for a download started from the landing page (milliseconds)
    #[serde(rename = "item-timeout-ms", default = "default_item_timeout_ms")]
    pub item_timeout_ms: u64,

    /// Maximum wait for a download started from the direct resource URL (milliseconds)
    #[serde(rename = "direct-timeout-ms", default = "default_direct_timeout_ms")]
    pub direct_timeout_ms: u64,

    /// Bounded wait for a single element lookup (milliseconds)
    #[serde(rename = "element-timeout-ms", default = "default_element_timeout_ms")]
    pub element_timeout_ms: u64,

    /// Bounded wait for search results to render (milliseconds)
    #[serde(rename = "page-timeout-ms", default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,

    /// Additional loads of a result page before the run is aborted
    #[serde(rename = "page-retries", default = "default_page_retries")]
    pub page_retries: u32,
}

impl DownloadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay_ms)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }

    pub fn direct_timeout(&self) -> Duration {
        Duration::from_millis(self.direct_timeout_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }
}

/// Persistent store location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file; the run lock lives next to it
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: PathBuf,
}

impl StorageConfig {
    /// Path of the run exclusivity marker
    pub fn lock_path(&self) -> PathBuf {
        self.database_path.with_extension("lock")
    }
}

/// Browser family driven through WebDriver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    Edge,
}

/// WebDriver connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Address of the running chromedriver / msedgedriver
    #[serde(rename = "webdriver-url", default = "default_webdriver_url")]
    pub webdriver_url: String,

    #[serde(default = "default_browser_kind")]
    pub kind: BrowserKind,

    /// Attach to a browser started with --remote-debugging-port (host:port)
    #[serde(rename = "debugger-address", default)]
    pub debugger_address: Option<String>,

    /// Reuse an existing WebDriver session instead of creating one
    #[serde(rename = "session-id", default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub headless: bool,

    /// Timeout for a single WebDriver command (milliseconds)
    #[serde(rename = "command-timeout-ms", default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

/// Page-text phrases that classify a loaded page
///
/// Matching is case-insensitive substring search over the visible page text.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    /// Phrases meaning the session has no right to the document
    #[serde(rename = "access-denied", default = "default_access_denied")]
    pub access_denied: Vec<String>,

    /// Phrases meaning the library is throttling the session
    #[serde(rename = "rate-limited", default = "default_rate_limited")]
    pub rate_limited: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            rows_per_page: default_rows_per_page(),
            max_pages: default_max_pages(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            directory: default_download_dir(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            inter_item_delay_ms: default_inter_item_delay_ms(),
            item_timeout_ms: default_item_timeout_ms(),
            direct_timeout_ms: default_direct_timeout_ms(),
            element_timeout_ms: default_element_timeout_ms(),
            page_timeout_ms: default_page_timeout_ms(),
            page_retries: default_page_retries(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            kind: default_browser_kind(),
            debugger_address: None,
            session_id: None,
            headless: false,
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            access_denied: default_access_denied(),
            rate_limited: default_rate_limited(),
        }
    }
}

fn default_base_url() -> String {
    "https://ieeexplore.ieee.org".to_string()
}

fn default_rows_per_page() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    5
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_rate_limit_backoff_ms() -> u64 {
    30_000
}

fn default_inter_item_delay_ms() -> u64 {
    5_000
}

fn default_item_timeout_ms() -> u64 {
    300_000
}

fn default_direct_timeout_ms() -> u64 {
    15_000
}

fn default_element_timeout_ms() -> u64 {
    3_000
}

fn default_page_timeout_ms() -> u64 {
    20_000
}

fn default_page_retries() -> u32 {
    2
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./downloads/papers.db")
}

fn default_webdriver_url() -> String {
    "http://127.0.0.1:9515".to_string()
}

fn default_browser_kind() -> BrowserKind {
    BrowserKind::Chrome
}

fn default_command_timeout_ms() -> u64 {
    60_000
}

fn default_access_denied() -> Vec<String> {
    [
        "outside of your subscription",
        "this document is outside",
        "full text access may be available",
        "access to this document requires",
        "purchase pdf",
        "buy this article",
        "get access",
        "not authorized",
        "no access",
        "access denied",
        "purchase the document",
        "contact the ieee customer center",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_rate_limited() -> Vec<String> {
    [
        "too many requests",
        "rate limit",
        "please try again later",
        "temporarily blocked",
        "request has been blocked",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
