//! Harvest module for walking result pages and retrieving documents
//!
//! This module contains the core harvesting logic, including:
//! - Result page parsing and pagination with a resume cursor
//! - The multi-tactic fetch strategy for a single item
//! - Retry/skip decisions under the attempt budget
//! - Cooperative cancellation
//! - Overall run coordination

mod cancel;
mod coordinator;
mod fetcher;
mod pager;
mod parser;
mod placement;
mod policy;
mod signals;

pub use cancel::{CancelSignal, Cancelled};
pub use coordinator::{Coordinator, RunReport, RunRequest};
pub use fetcher::{FetchError, FetchOutcome, ItemFetcher, Tactic};
pub use pager::{Pager, ResultPage, SearchSource};
pub use parser::parse_search_results;
pub use placement::{place_file, sanitize_title, target_file_name, verify_pdf};
pub use policy::{Decision, RetryPolicy};
pub use signals::{PageSignal, SignalMatcher};
