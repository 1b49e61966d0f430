//! Review-queue report across a batch
//!
//! Every discrepancy is counted. The queue itself holds what a reviewer
//! has to look at: factual and manual-required discrepancies always,
//! auto-resolved ones only on request.

use crate::types::{
    ConflictingValue, ConsensusResult, DiscrepancyClass, ResolutionMethod, Severity,
};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportOptions {
    /// Surface auto-resolved alias/format/unit discrepancies in the queue
    pub include_auto_resolved: bool,
}

/// One discrepancy in the review queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub record_id: String,
    pub field: String,
    pub classification: DiscrepancyClass,
    pub severity: Severity,
    pub auto_resolved: bool,
    pub resolution_method: ResolutionMethod,
    /// Value chosen by the resolver, if any
    pub resolved_value: Option<String>,
    pub conflicting_values: Vec<ConflictingValue>,
}

/// Queue items sharing a severity and classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscrepancyGroup {
    pub severity: Severity,
    pub classification: DiscrepancyClass,
    pub items: Vec<ReviewItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscrepancyReport {
    pub total_records: usize,
    /// Record ids flagged `needs_review`, in input order
    pub records_needing_review: Vec<String>,
    pub total_discrepancies: usize,
    pub auto_resolved: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_classification: BTreeMap<DiscrepancyClass, usize>,
    /// Surfaced discrepancies, most severe group first
    pub groups: Vec<DiscrepancyGroup>,
}

impl DiscrepancyReport {
    /// Surfaced items flattened: severity descending, then record, then field
    pub fn queue(&self) -> impl Iterator<Item = &ReviewItem> {
        let mut items: Vec<&ReviewItem> = self.groups.iter().flat_map(|g| g.items.iter()).collect();
        items.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.record_id.cmp(&b.record_id))
                .then_with(|| a.field.cmp(&b.field))
        });
        items.into_iter()
    }

    pub fn queue_len(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Report with default options (auto-resolved discrepancies hidden)
pub fn generate_discrepancy_report(results: &[ConsensusResult]) -> DiscrepancyReport {
    generate_discrepancy_report_with(results, ReportOptions::default())
}

pub fn generate_discrepancy_report_with(
    results: &[ConsensusResult],
    options: ReportOptions,
) -> DiscrepancyReport {
    let mut by_severity = BTreeMap::new();
    let mut by_classification = BTreeMap::new();
    let mut grouped: BTreeMap<(Reverse<Severity>, DiscrepancyClass), Vec<ReviewItem>> =
        BTreeMap::new();
    let mut total_discrepancies = 0;
    let mut auto_resolved = 0;

    for result in results {
        for d in &result.discrepancies {
            total_discrepancies += 1;
            *by_severity.entry(d.severity).or_insert(0) += 1;
            *by_classification.entry(d.classification).or_insert(0) += 1;
            if d.auto_resolved {
                auto_resolved += 1;
                if !options.include_auto_resolved {
                    continue;
                }
            }

            grouped
                .entry((Reverse(d.severity), d.classification))
                .or_default()
                .push(ReviewItem {
                    record_id: result.record_id.clone(),
                    field: d.field.clone(),
                    classification: d.classification,
                    severity: d.severity,
                    auto_resolved: d.auto_resolved,
                    resolution_method: d.resolution_method,
                    resolved_value: result.field(&d.field).and_then(|f| f.value.clone()),
                    conflicting_values: d.conflicting_values.clone(),
                });
        }
    }

    let groups = grouped
        .into_iter()
        .map(|((Reverse(severity), classification), mut items)| {
            items.sort_by(|a, b| a.record_id.cmp(&b.record_id).then_with(|| a.field.cmp(&b.field)));
            DiscrepancyGroup {
                severity,
                classification,
                items,
            }
        })
        .collect();

    DiscrepancyReport {
        total_records: results.len(),
        records_needing_review: results
            .iter()
            .filter(|r| r.needs_review)
            .map(|r| r.record_id.clone())
            .collect(),
        total_discrepancies,
        auto_resolved,
        by_severity,
        by_classification,
        groups,
    }
}
