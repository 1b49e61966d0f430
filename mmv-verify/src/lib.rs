//! # mmv-verify
//!
//! Multi-source movie metadata verification.
//!
//! **Stages:**
//! - [`fetch`]: concurrent, rate-limited, resumable fetching from every
//!   catalog ([`BatchFetcher`])
//! - [`resolve`]: normalization and per-field conflict resolution
//!   ([`ConflictResolver`])
//! - [`consensus`]: per-record consensus, discrepancy classification and
//!   confidence ([`ConsensusBuilder`])
//! - [`report`]: review queue, verified facts and quality scores
//!
//! [`VerificationPipeline`] wires the stages together for one batch.

pub mod config;
pub mod consensus;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod report;
pub mod resolve;
pub mod sources;
pub mod types;

pub use config::{FetchConfig, FieldKind, FieldSpec, MmvConfig, VerificationConfig};
pub use consensus::ConsensusBuilder;
pub use error::{FetchError, VerifyError, VerifyResult};
pub use fetch::{BatchFetcher, BatchSummary, FetchRun};
pub use pipeline::{generate_batch_id, BatchOutcome, VerificationPipeline};
pub use resolve::{ConflictResolver, Normalizer};
pub use sources::{SourceAdapter, SourcePayload};
pub use types::*;
