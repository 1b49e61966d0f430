//! Per-source request throttling
//!
//! Each source gets its own `governor` token bucket (burst 1, one token per
//! `1/rps`). The set is built explicitly for a batch and shared through
//! `Arc` by every record task; nothing here is global.

use crate::config::FetchConfig;
use crate::error::{VerifyError, VerifyResult};
use crate::types::SourceId;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Token bucket for one source
pub struct SourceRateLimiter {
    source: SourceId,
    rps: f64,
    limiter: DefaultDirectRateLimiter,
    granted: AtomicU64,
    waited: AtomicU64,
}

impl SourceRateLimiter {
    pub fn new(source: SourceId, rps: f64) -> VerifyResult<Self> {
        if !rps.is_finite() || rps <= 0.0 {
            return Err(VerifyError::Config(format!(
                "rate for source '{}' must be positive (got {})",
                source, rps
            )));
        }

        let period = Duration::try_from_secs_f64(1.0 / rps).map_err(|_| {
            VerifyError::Config(format!("rate for source '{}' is too low ({})", source, rps))
        })?;
        let quota = Quota::with_period(period).ok_or_else(|| {
            VerifyError::Config(format!("rate for source '{}' is too high ({})", source, rps))
        })?;

        Ok(Self {
            source,
            rps,
            limiter: RateLimiter::direct(quota),
            granted: AtomicU64::new(0),
            waited: AtomicU64::new(0),
        })
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn rps(&self) -> f64 {
        self.rps
    }

    /// Wait for a token
    pub async fn acquire(&self) {
        if self.limiter.check().is_err() {
            self.waited.fetch_add(1, Ordering::Relaxed);
            trace!(source = %self.source, "Rate limit reached, waiting for token");
            self.limiter.until_ready().await;
        }
        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    /// Tokens handed out so far
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    /// Acquisitions that had to wait for the bucket to refill
    pub fn waits(&self) -> u64 {
        self.waited.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SourceRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRateLimiter")
            .field("source", &self.source)
            .field("rps", &self.rps)
            .field("granted", &self.granted())
            .field("waited", &self.waits())
            .finish()
    }
}

/// One limiter per source of a batch
#[derive(Debug, Clone, Default)]
pub struct RateLimiterSet {
    limiters: BTreeMap<SourceId, Arc<SourceRateLimiter>>,
}

impl RateLimiterSet {
    /// Build limiters for `sources` using the configured rates
    pub fn from_config<'a>(
        config: &FetchConfig,
        sources: impl IntoIterator<Item = &'a SourceId>,
    ) -> VerifyResult<Self> {
        let mut limiters = BTreeMap::new();
        for source in sources {
            let limiter = SourceRateLimiter::new(source.clone(), config.rps_for(source))?;
            limiters.insert(source.clone(), Arc::new(limiter));
        }
        Ok(Self { limiters })
    }

    pub fn get(&self, source: &SourceId) -> Option<Arc<SourceRateLimiter>> {
        self.limiters.get(source).cloned()
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// `(source, tokens granted, waits)` per source, sorted by source
    pub fn stats(&self) -> Vec<(SourceId, u64, u64)> {
        self.limiters
            .iter()
            .map(|(id, l)| (id.clone(), l.granted(), l.waits()))
            .collect()
    }
}
