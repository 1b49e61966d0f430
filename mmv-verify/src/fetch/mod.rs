//! Batch fetching: rate limiting, retry, checkpointing and the worker pool

pub mod batch_fetcher;
pub mod checkpoint;
pub mod rate_limiter;
pub mod retry;

pub use batch_fetcher::{BatchFetcher, BatchSummary, FetchRun, RecordStream};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use rate_limiter::{RateLimiterSet, SourceRateLimiter};
pub use retry::{RetryOutcome, RetryPolicy};
