//! # MMV Common Library
//!
//! Shared code for the movie metadata verification crates:
//! - Common error type
//! - Configuration file discovery, loading and atomic writes
//! - Logging initialisation
//! - Batch event types and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
pub use events::{EventBus, VerifyEvent};
