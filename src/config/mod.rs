//! Configuration module for Paper-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section is optional; missing keys take the built-in defaults.
//!
//! # Example
//!
//! ```no_run
//! use paper_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Retry budget: {}", config.download.max_attempts);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BrowserConfig, BrowserKind, Config, DownloadConfig, LibraryConfig, SignalConfig,
    StorageConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, load_or_default, parse_config,
    DEFAULT_CONFIG_HASH,
};
