//! Data-quality score
//!
//! # Algorithm: coverage + confidence
//! 1. coverage = fields with any source data / fields resolved
//! 2. mean confidence = average confidence over fields with data
//! 3. score = 100 × (w × coverage + (1 − w) × mean confidence),
//!    w = `coverage_weight`
//!
//! Score is a derived read; nothing here persists it.

use crate::config::VerificationConfig;
use crate::types::ConsensusResult;
use serde::{Deserialize, Serialize};

/// Score with the two inputs that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    /// 0–100
    pub score: f64,
    /// 0–1
    pub coverage: f64,
    /// 0–1
    pub mean_confidence: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct QualityScorer {
    coverage_weight: f64,
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(VerificationConfig::default().coverage_weight)
    }
}

impl QualityScorer {
    /// `coverage_weight` is clamped into [0, 1]
    pub fn new(coverage_weight: f64) -> Self {
        Self {
            coverage_weight: coverage_weight.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &VerificationConfig) -> Self {
        Self::new(config.coverage_weight)
    }

    pub fn breakdown(&self, result: &ConsensusResult) -> QualityBreakdown {
        let total = result.resolved_fields.len();
        let with_data: Vec<f64> = result
            .resolved_fields
            .iter()
            .filter(|f| f.has_data())
            .map(|f| f.confidence)
            .collect();

        let coverage = if total > 0 {
            with_data.len() as f64 / total as f64
        } else {
            0.0
        };
        let mean_confidence = if with_data.is_empty() {
            0.0
        } else {
            with_data.iter().sum::<f64>() / with_data.len() as f64
        };

        let score = 100.0
            * (self.coverage_weight * coverage + (1.0 - self.coverage_weight) * mean_confidence);

        QualityBreakdown {
            score: score.clamp(0.0, 100.0),
            coverage,
            mean_confidence,
        }
    }

    pub fn score(&self, result: &ConsensusResult) -> f64 {
        self.breakdown(result).score
    }
}

/// 0–100 quality score of one record with the default weighting
pub fn compute_data_quality_score(result: &ConsensusResult) -> f64 {
    QualityScorer::default().score(result)
}
