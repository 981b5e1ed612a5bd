//! Retry/skip decisions for one item
//!
//! `pending -> in_progress -> {downloaded, skipped, failed}`. The policy only
//! decides; the controller owns the store writes and the waits.

use crate::config::DownloadConfig;
use crate::harvest::fetcher::{FetchError, FetchOutcome};
use std::time::Duration;

/// What the controller does after an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The file is in place; mark `downloaded`
    Complete,
    /// Permanent access restriction; mark `skipped`
    Skip,
    /// Wait, then attempt again
    RetryAfter(Duration),
    /// Budget exhausted; mark `failed`
    GiveUp,
    /// Leave the item as last recorded
    Stop,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    retry_delay: Duration,
    rate_limit_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration, rate_limit_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
            rate_limit_backoff,
        }
    }

    pub fn from_config(config: &DownloadConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.retry_delay(),
            config.rate_limit_backoff(),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides the next step after attempt number `attempt` (1-based)
    pub fn decide(&self, outcome: &FetchOutcome, attempt: u32) -> Decision {
        match outcome {
            FetchOutcome::Downloaded { .. } => Decision::Complete,
            FetchOutcome::Skipped(_) => Decision::Skip,
            FetchOutcome::Cancelled => Decision::Stop,
            FetchOutcome::Retryable(_) if attempt >= self.max_attempts => Decision::GiveUp,
            FetchOutcome::Retryable(FetchError::RateLimited(_)) => {
                Decision::RetryAfter(self.rate_limit_backoff.saturating_mul(attempt))
            }
            FetchOutcome::Retryable(_) => Decision::RetryAfter(self.retry_delay),
        }
    }
}
