//! Reports over consensus results
//!
//! Pure functions: they read `ConsensusResult`s and never mutate or
//! persist them. [`BatchReport`] bundles all three outputs for one batch.

pub mod discrepancy_report;
pub mod facts;
pub mod quality;

pub use discrepancy_report::{
    generate_discrepancy_report, generate_discrepancy_report_with, DiscrepancyGroup,
    DiscrepancyReport, ReportOptions, ReviewItem,
};
pub use facts::{generate_verified_facts_summary, VerifiedFact, VerifiedFactsSummary};
pub use quality::{compute_data_quality_score, QualityBreakdown, QualityScorer};

use crate::types::{ConsensusResult, UnverifiableRecord};
use serde::{Deserialize, Serialize};

/// Quality of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordQuality {
    pub record_id: String,
    #[serde(flatten)]
    pub quality: QualityBreakdown,
}

/// Everything a review UI or storage writer needs from one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub discrepancies: DiscrepancyReport,
    pub verified_facts: Vec<VerifiedFactsSummary>,
    pub quality: Vec<RecordQuality>,
    /// Mean of the per-record scores; 0 when no record was verifiable
    pub batch_quality_score: f64,
    /// Records with no usable source data, reported instead of dropped
    pub unverifiable: Vec<UnverifiableRecord>,
}

impl BatchReport {
    pub fn build(
        batch_id: &str,
        results: &[ConsensusResult],
        unverifiable: &[UnverifiableRecord],
        scorer: &QualityScorer,
        options: ReportOptions,
    ) -> Self {
        let quality: Vec<RecordQuality> = results
            .iter()
            .map(|r| RecordQuality {
                record_id: r.record_id.clone(),
                quality: scorer.breakdown(r),
            })
            .collect();

        let batch_quality_score = if quality.is_empty() {
            0.0
        } else {
            quality.iter().map(|q| q.quality.score).sum::<f64>() / quality.len() as f64
        };

        Self {
            batch_id: batch_id.to_string(),
            discrepancies: generate_discrepancy_report_with(results, options),
            verified_facts: results.iter().map(generate_verified_facts_summary).collect(),
            quality,
            batch_quality_score,
            unverifiable: unverifiable.to_vec(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
