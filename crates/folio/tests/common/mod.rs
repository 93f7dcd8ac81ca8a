//! Shared test utilities for folio integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against a temp database and output root
//! - Builders for pages, templates and config documents

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
