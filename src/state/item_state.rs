/// Item status definitions for tracking download progress
///
/// This module defines every state a library item can be in and the
/// transitions the attempt loop is allowed to make between them.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of an item in the download process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    // ===== Active States =====
    /// Item has been discovered (or reset) and awaits an attempt loop
    Pending,

    /// An attempt loop owns the item
    InProgress,

    // ===== Terminal States =====
    /// A verified file was placed in the download directory
    Downloaded,

    /// The library refused access; never retried automatically
    Skipped,

    /// Every attempt in the retry budget failed
    Failed,
}

impl ItemStatus {
    /// Returns true if this is a terminal state (no further attempts without a reset)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Downloaded | Self::Skipped | Self::Failed)
    }

    /// Returns true if the lifecycle allows moving from `self` to `next`
    ///
    /// `InProgress -> Pending` is the crash-recovery edge. Terminal states only
    /// leave through an explicit reset, which does not go through this check.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Downloaded)
                | (Self::InProgress, Self::Skipped)
                | (Self::InProgress, Self::Failed)
                | (Self::InProgress, Self::Pending)
        )
    }

    /// Converts the status to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Downloaded => "downloaded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from a database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "downloaded" => Some(Self::Downloaded),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible item statuses
    pub fn all() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::InProgress,
            Self::Downloaded,
            Self::Skipped,
            Self::Failed,
        ]
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Why a run stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Source exhausted, cap reached or page limit reached
    Completed,
    /// The cancellation signal was raised
    Cancelled,
    /// A run-level error aborted the walk
    Fatal(String),
}

impl EndReason {
    pub fn to_db_string(&self) -> String {
        match self {
            Self::Completed => "completed".to_string(),
            Self::Cancelled => "cancelled".to_string(),
            Self::Fatal(cause) => format!("fatal:{}", cause),
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            other => other
                .strip_prefix("fatal:")
                .map(|cause| Self::Fatal(cause.to_string())),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
