//! Integration tests for Paper-Harvest
//!
//! Harvest runs are driven end-to-end against a scripted fake browser; the
//! WebDriver adapter is exercised against a wiremock server.

mod run_tests;
mod store_tests;
mod support;
