//! Normalization and field-level conflict resolution

pub mod conflict_resolver;
pub mod normalizer;

pub use conflict_resolver::{are_variants, ConflictResolver, FieldResolution, ValueBucket};
pub use normalizer::{Normalized, Normalizer};
