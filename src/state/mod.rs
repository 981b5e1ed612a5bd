//! State module for tracking download progress
//!
//! # Components
//!
//! - `ItemStatus`: Lifecycle of a single library item (pending, in progress, downloaded, skipped, failed)
//! - `EndReason`: Why a run stopped (completed, cancelled, fatal)

mod item_state;

// Re-export main types
pub use item_state::{EndReason, ItemStatus};
