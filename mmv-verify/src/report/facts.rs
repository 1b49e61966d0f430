//! Verified-facts summary for one record

use crate::types::{ConsensusResult, ResolutionMethod, SourceId};
use serde::{Deserialize, Serialize};

/// One field value that can be published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedFact {
    pub field: String,
    pub value: String,
    pub confidence: f64,
    pub method: ResolutionMethod,
    pub sources: Vec<SourceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedFactsSummary {
    pub record_id: String,
    /// Resolved fields in catalogue order
    pub facts: Vec<VerifiedFact>,
    /// Fields held back for manual review
    pub withheld: Vec<String>,
    pub needs_review: bool,
}

impl VerifiedFactsSummary {
    pub fn fact(&self, field: &str) -> Option<&VerifiedFact> {
        self.facts.iter().find(|f| f.field == field)
    }
}

/// Facts for every resolved field, omitting manual-required and no-data fields
pub fn generate_verified_facts_summary(result: &ConsensusResult) -> VerifiedFactsSummary {
    let mut facts = Vec::new();
    let mut withheld = Vec::new();

    for resolved in &result.resolved_fields {
        if resolved.is_manual_required() {
            withheld.push(resolved.field.clone());
            continue;
        }
        if let Some(value) = &resolved.value {
            facts.push(VerifiedFact {
                field: resolved.field.clone(),
                value: value.clone(),
                confidence: resolved.confidence,
                method: resolved.method,
                sources: resolved.contributing_sources.clone(),
            });
        }
    }

    VerifiedFactsSummary {
        record_id: result.record_id.clone(),
        facts,
        withheld,
        needs_review: result.needs_review,
    }
}
