//! Paper-Harvest: resumable bulk retrieval from a paywalled digital library
//!
//! This crate drives an already-authenticated browser session through paginated
//! search results, downloads each document with a multi-tactic strategy, and
//! records every state transition in SQLite so long jobs can be interrupted and
//! resumed without re-downloading or re-attempting permanently denied items.

pub mod browser;
pub mod config;
pub mod harvest;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Paper-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Browser error: {0}")]
    Browser(#[from] browser::BrowserError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("Failed to load result page {page} after {attempts} attempts: {cause}")]
    PageLoad {
        page: u32,
        attempts: u32,
        cause: String,
    },

    #[error("Another run holds {path} (pid {pid})")]
    ResourceBusy { path: String, pid: u32 },

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(#[from] ::url::ParseError),

    #[error("Not a search results URL: {0}")]
    NotSearchResults(String),

    #[error("No document number in URL: {0}")]
    MissingDocumentNumber(String),
}

/// Result type alias for Paper-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use browser::{Browser, WebDriverBrowser};
pub use config::Config;
pub use harvest::{CancelSignal, Coordinator, RunReport, RunRequest, SearchSource};
pub use state::{EndReason, ItemStatus};
pub use storage::{SqliteStorage, Storage};
