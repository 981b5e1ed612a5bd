//! URL handling module for Paper-Harvest
//!
//! This module builds every library URL the harvester navigates to and
//! extracts the dedup key (document number) from item links.

mod key;
mod library;

// Re-export main types and functions
pub use key::{document_key, require_document_key, resolve_href};
pub use library::{LibraryUrls, YearRange};
