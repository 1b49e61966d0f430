//! Test Helper Utilities
//!
//! Shared utilities for testing mmv-verify

#![allow(dead_code)]

pub mod mock_sources;

// Re-export commonly used items
pub use mock_sources::{adapters, fast_fetch_config, fast_retry, payload, observe_record, ScriptedSource};
