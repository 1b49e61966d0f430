//! Record-level consensus and discrepancy classification

pub mod builder;
pub mod classifier;

pub use builder::ConsensusBuilder;
