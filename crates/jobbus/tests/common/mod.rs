//! Shared test utilities for jobbus integration tests.
//!
//! This module provides:
//! - `TestHarness` with temporary deposit roots and outbox inspection
//! - Builders for configurations, archives and a scripted job executor

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
