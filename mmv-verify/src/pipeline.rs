//! Verification pipeline
//!
//! Fetch → consensus → report for one batch.
//!
//! # Error Handling
//! - Per-source failures stay inside the fetcher (recorded as absent sources)
//! - Records with no usable data are collected as unverifiable, never dropped
//! - Only configuration and checkpoint-load errors fail the batch
//!
//! # Example
//! ```rust,ignore
//! let pipeline = VerificationPipeline::new(&config, adapters, checkpoints)?;
//! let outcome = pipeline.run("nightly-2024-05-01", ids, CancellationToken::new()).await?;
//! println!("{}", outcome.report.to_json()?);
//! ```

use crate::config::MmvConfig;
use crate::consensus::ConsensusBuilder;
use crate::error::{VerifyError, VerifyResult};
use crate::fetch::{BatchFetcher, BatchSummary, CheckpointStore, RetryPolicy};
use crate::report::{BatchReport, QualityScorer, ReportOptions};
use crate::resolve::Normalizer;
use crate::sources::SourceAdapter;
use crate::types::{ConsensusResult, RecordFetchResult, UnverifiableRecord};
use futures::StreamExt;
use mmv_common::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Fresh batch id for callers without a stable batch name.
///
/// Resuming a batch requires passing the same id again, so persist it.
pub fn generate_batch_id() -> String {
    format!("batch-{}", Uuid::new_v4())
}

/// Everything one batch produced
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One result per fetched record, in input order
    pub results: Vec<ConsensusResult>,
    /// Records where every source failed, in input order
    pub unverifiable: Vec<UnverifiableRecord>,
    pub summary: BatchSummary,
    pub report: BatchReport,
}

pub struct VerificationPipeline {
    fetcher: BatchFetcher,
    builder: ConsensusBuilder,
    scorer: QualityScorer,
    report_options: ReportOptions,
}

impl VerificationPipeline {
    /// Build the fetcher and consensus stages from one validated config
    pub fn new(
        config: &MmvConfig,
        sources: Vec<Arc<dyn SourceAdapter>>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> VerifyResult<Self> {
        config.validate()?;

        let verification = Arc::new(config.verification.clone());
        let normalizer = Arc::new(Normalizer::new(&verification));
        let fetcher = BatchFetcher::new(sources, normalizer, &config.fetch, checkpoints)?;

        Ok(Self {
            fetcher,
            builder: ConsensusBuilder::new(Arc::clone(&verification)),
            scorer: QualityScorer::from_config(&verification),
            report_options: ReportOptions::default(),
        })
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.fetcher = self.fetcher.with_event_bus(bus);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.fetcher = self.fetcher.with_retry_policy(retry);
        self
    }

    pub fn with_report_options(mut self, options: ReportOptions) -> Self {
        self.report_options = options;
        self
    }

    pub fn fetcher(&self) -> &BatchFetcher {
        &self.fetcher
    }

    pub fn builder(&self) -> &ConsensusBuilder {
        &self.builder
    }

    /// Run one batch to completion (or cancellation)
    pub async fn run(
        &self,
        batch_id: &str,
        record_ids: Vec<String>,
        cancel: CancellationToken,
    ) -> VerifyResult<BatchOutcome> {
        let position: HashMap<String, usize> = record_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .rev()
            .collect();

        let mut run = self.fetcher.fetch_all(batch_id, record_ids, cancel).await?;

        let mut results = Vec::new();
        let mut unverifiable = Vec::new();
        while let Some(fetched) = run.results.next().await {
            match fetched {
                RecordFetchResult::Fetched(data) => {
                    let result = self.builder.build_consensus(&data);
                    for d in result.discrepancies.iter().filter(|d| d.auto_resolved) {
                        debug!(
                            record_id = %result.record_id,
                            field = %d.field,
                            classification = ?d.classification,
                            "Auto-resolved discrepancy"
                        );
                    }
                    results.push(result);
                }
                RecordFetchResult::Unverifiable(record) => unverifiable.push(record),
            }
        }

        let summary = run
            .coordinator
            .await
            .map_err(|e| VerifyError::Task(format!("batch coordinator failed: {}", e)))??;

        let order = |id: &str| position.get(id).copied().unwrap_or(usize::MAX);
        results.sort_by_key(|r| order(&r.record_id));
        unverifiable.sort_by_key(|r| order(&r.record_id));

        let report = BatchReport::build(
            batch_id,
            &results,
            &unverifiable,
            &self.scorer,
            self.report_options,
        );

        info!(
            batch_id = %batch_id,
            verified = results.len(),
            unverifiable = unverifiable.len(),
            needs_review = report.discrepancies.records_needing_review.len(),
            batch_quality_score = report.batch_quality_score,
            cancelled = summary.cancelled,
            "Batch verification finished"
        );

        Ok(BatchOutcome {
            results,
            unverifiable,
            summary,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FileCheckpointStore;

    #[test]
    fn test_generated_batch_ids_are_unique_and_file_safe() {
        let a = generate_batch_id();
        let b = generate_batch_id();
        assert_ne!(a, b);
        assert!(a.starts_with("batch-"));
        assert!(FileCheckpointStore::new("/tmp").path_for(&a).is_ok());
    }
}
