use crate::config::types::{
    BrowserConfig, Config, DownloadConfig, LibraryConfig, SignalConfig, StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_library_config(&config.library)?;
    validate_download_config(&config.download)?;
    validate_storage_config(&config.storage)?;
    validate_browser_config(&config.browser)?;
    validate_signal_config(&config.signals)?;
    Ok(())
}

/// Validates the library section
fn validate_library_config(config: &LibraryConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            config.base_url
        )));
    }

    if config.rows_per_page < 1 || config.rows_per_page > 100 {
        return Err(ConfigError::Validation(format!(
            "rows-per-page must be between 1 and 100, got {}",
            config.rows_per_page
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max-pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    Ok(())
}

/// Validates download behavior
fn validate_download_config(config: &DownloadConfig) -> Result<(), ConfigError> {
    if config.directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "download directory cannot be empty".to_string(),
        ));
    }

    if config.max_attempts < 1 || config.max_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be between 1 and 20, got {}",
            config.max_attempts
        )));
    }

    // Every browser wait must be bounded
    for (name, value) in [
        ("item-timeout-ms", config.item_timeout_ms),
        ("direct-timeout-ms", config.direct_timeout_ms),
        ("element-timeout-ms", config.element_timeout_ms),
        ("page-timeout-ms", config.page_timeout_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!(
                "{} must be greater than 0",
                name
            )));
        }
    }

    if config.page_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "page-retries must be <= 10, got {}",
            config.page_retries
        )));
    }

    Ok(())
}

/// Validates the storage section
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates the WebDriver connection settings
fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    Url::parse(&config.webdriver_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid webdriver-url: {}", e)))?;

    if let Some(address) = &config.debugger_address {
        validate_host_port(address)?;
    }

    if let Some(session) = &config.session_id {
        if session.trim().is_empty() {
            return Err(ConfigError::Validation(
                "session-id cannot be blank".to_string(),
            ));
        }
    }

    if config.command_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "command-timeout-ms must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates the signal phrase lists
fn validate_signal_config(config: &SignalConfig) -> Result<(), ConfigError> {
    if config.access_denied.is_empty() {
        return Err(ConfigError::Validation(
            "signals.access-denied must list at least one phrase".to_string(),
        ));
    }

    for phrase in config.access_denied.iter().chain(&config.rate_limited) {
        if phrase.trim().is_empty() {
            return Err(ConfigError::Validation(
                "signal phrases cannot be blank".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates a "host:port" debugger address
fn validate_host_port(address: &str) -> Result<(), ConfigError> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        ConfigError::Validation(format!(
            "debugger-address must be host:port, got '{}'",
            address
        ))
    })?;

    if host.is_empty() {
        return Err(ConfigError::Validation(format!(
            "debugger-address is missing a host: '{}'",
            address
        )));
    }

    port.parse::<u16>().map_err(|_| {
        ConfigError::Validation(format!("debugger-address has an invalid port: '{}'", address))
    })?;

    Ok(())
}
