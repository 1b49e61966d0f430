//! Record-level consensus
//!
//! Runs the conflict resolver over every known field of a record, turns
//! disagreements into classified discrepancies, and rolls field confidences
//! up into one importance-weighted score.
//!
//! Output is a pure function of the `SourceData` and the config: fields,
//! sources and conflicting values are all emitted in a fixed order.

use crate::config::VerificationConfig;
use crate::consensus::classifier::{
    classify_representation, classify_split, conflicting_values, needs_review, severity_for,
};
use crate::resolve::{ConflictResolver, FieldResolution};
use crate::types::{
    AgreementLevel, ConsensusResult, Discrepancy, DiscrepancyClass, ResolutionMethod, SourceData,
    SourceId,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Builds a [`ConsensusResult`] per record
#[derive(Debug, Clone)]
pub struct ConsensusBuilder {
    resolver: ConflictResolver,
}

impl ConsensusBuilder {
    pub fn new(config: Arc<VerificationConfig>) -> Self {
        Self {
            resolver: ConflictResolver::new(config),
        }
    }

    pub fn config(&self) -> &VerificationConfig {
        self.resolver.config()
    }

    /// Field names to resolve: the configured catalogue first, then any
    /// other observed field alphabetically.
    fn field_names(&self, data: &SourceData) -> Vec<String> {
        let config = self.config();
        let known: BTreeSet<&str> = config.fields.iter().map(|f| f.name.as_str()).collect();

        config
            .fields
            .iter()
            .map(|f| f.name.clone())
            .chain(
                data.observed_fields()
                    .into_iter()
                    .filter(|f| !known.contains(f))
                    .map(str::to_string),
            )
            .collect()
    }

    /// Resolve every field of one record
    pub fn build_consensus(&self, data: &SourceData) -> ConsensusResult {
        let config = self.config();
        let mut resolved_fields = Vec::new();
        let mut discrepancies = Vec::new();
        let mut needs_review_flag = false;

        for field in self.field_names(data) {
            let resolution = self.resolver.resolve_with_buckets(&field, &data.values);

            if let Some(discrepancy) = self.detect_discrepancy(&field, &resolution) {
                if needs_review(config, &discrepancy, resolution.resolved.confidence) {
                    needs_review_flag = true;
                }
                discrepancies.push(discrepancy);
            }
            resolved_fields.push(resolution.resolved);
        }

        let mut weighted = 0.0;
        let mut total_importance = 0.0;
        for resolved in resolved_fields.iter().filter(|f| f.has_data()) {
            let importance = config.field_spec(&resolved.field).importance;
            weighted += importance * resolved.confidence;
            total_importance += importance;
        }
        let overall_confidence = if total_importance > 0.0 {
            weighted / total_importance
        } else {
            0.0
        };

        let mut sources_used: Vec<SourceId> = data.responding_sources();
        sources_used.sort_by(|a, b| config.priority_key(a).cmp(&config.priority_key(b)));

        let mut absent_sources = data.absent_sources.clone();
        absent_sources.sort_by(|a, b| {
            config
                .priority_key(&a.source)
                .cmp(&config.priority_key(&b.source))
        });

        debug!(
            record_id = %data.record_id,
            fields = resolved_fields.len(),
            discrepancies = discrepancies.len(),
            overall_confidence = overall_confidence,
            needs_review = needs_review_flag,
            "Consensus built"
        );

        ConsensusResult {
            record_id: data.record_id.clone(),
            resolved_fields,
            discrepancies,
            overall_confidence,
            needs_review: needs_review_flag,
            sources_used,
            absent_sources,
        }
    }

    /// Discrepancy for one resolved field, if its sources disagreed.
    ///
    /// Split fields, manual-required fields and majorities with a
    /// dissenting source get a classified discrepancy. Agreeing fields get
    /// an auto-resolved one only when the agreement needed an alias, unit
    /// or format normalization beyond case and whitespace folding.
    fn detect_discrepancy(&self, field: &str, resolution: &FieldResolution) -> Option<Discrepancy> {
        let config = self.config();
        let method = resolution.resolved.method;

        match resolution.resolved.agreement_level {
            AgreementLevel::Split | AgreementLevel::Majority if resolution.buckets.len() > 1 => {
                let classification = classify_split(resolution);
                let auto_resolved = method != ResolutionMethod::ManualRequired
                    && matches!(
                        classification,
                        DiscrepancyClass::Alias | DiscrepancyClass::Format | DiscrepancyClass::Unit
                    );
                Some(Discrepancy {
                    field: field.to_string(),
                    conflicting_values: conflicting_values(
                        config,
                        resolution.buckets.iter().flat_map(|b| b.members.iter()),
                    ),
                    classification,
                    severity: severity_for(config, field, classification, method, auto_resolved),
                    auto_resolved,
                    resolution_method: method,
                })
            }
            AgreementLevel::Unanimous | AgreementLevel::Majority => {
                let winner = resolution.buckets.first()?;
                let classification = classify_representation(winner)?;
                Some(Discrepancy {
                    field: field.to_string(),
                    conflicting_values: conflicting_values(config, winner.members.iter()),
                    classification,
                    severity: severity_for(config, field, classification, method, true),
                    auto_resolved: true,
                    resolution_method: method,
                })
            }
            AgreementLevel::Split | AgreementLevel::SingleSource | AgreementLevel::NoData => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AliasGroup;
    use crate::resolve::Normalizer;
    use crate::types::{AbsentSource, Severity};
    use chrono::{TimeZone, Utc};

    fn record(config: &VerificationConfig, obs: &[(&str, &str, &str)]) -> SourceData {
        let normalizer = Normalizer::new(config);
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut data = SourceData::new("tt0133093");
        for (source, field, raw) in obs {
            data.values
                .push(normalizer.observe(&SourceId::from(*source), field, raw, at));
        }
        data
    }

    #[test]
    fn test_all_fields_present_in_catalogue_order() {
        let config = VerificationConfig::default();
        let data = record(
            &config,
            &[("tmdb", "title", "The Matrix"), ("tmdb", "tagline", "Free your mind")],
        );
        let result = ConsensusBuilder::new(Arc::new(config.clone())).build_consensus(&data);

        let names: Vec<&str> = result.resolved_fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names.len(), config.fields.len() + 1);
        assert_eq!(names[0], "title");
        assert_eq!(*names.last().unwrap(), "tagline");
        assert_eq!(
            result.field("director").unwrap().method,
            ResolutionMethod::NoData
        );
    }

    #[test]
    fn test_case_only_difference_creates_no_discrepancy() {
        let config = VerificationConfig::default();
        let data = record(
            &config,
            &[("tmdb", "title", "The Matrix"), ("omdb", "title", "THE MATRIX ")],
        );
        let result = ConsensusBuilder::new(Arc::new(config)).build_consensus(&data);

        assert!(result.discrepancies.is_empty());
        assert!(!result.needs_review);
    }

    #[test]
    fn test_alias_reconciled_title_is_auto_resolved() {
        let mut config = VerificationConfig::default();
        config.alias_tables.insert(
            "title".to_string(),
            vec![AliasGroup {
                canonical: "The Matrix".to_string(),
                variants: vec!["Matrix, The".to_string()],
            }],
        );
        let data = record(
            &config,
            &[("tmdb", "title", "Matrix, The"), ("omdb", "title", "The Matrix")],
        );
        let result = ConsensusBuilder::new(Arc::new(config)).build_consensus(&data);

        let d = result.discrepancy("title").unwrap();
        assert_eq!(d.classification, DiscrepancyClass::Alias);
        assert!(d.auto_resolved);
        assert_eq!(d.severity, Severity::Info);
        assert!(!result.needs_review);
        assert_eq!(result.field("title").unwrap().value.as_deref(), Some("The Matrix"));
    }

    #[test]
    fn test_critical_factual_needs_review() {
        let config = VerificationConfig::default();
        let data = record(
            &config,
            &[("wikidata", "release_year", "1998"), ("internal", "release_year", "2001")],
        );
        let result = ConsensusBuilder::new(Arc::new(config)).build_consensus(&data);

        let d = result.discrepancy("release_year").unwrap();
        assert_eq!(d.classification, DiscrepancyClass::Factual);
        assert_eq!(d.severity, Severity::Critical);
        assert!(!d.auto_resolved);
        assert!(result.needs_review);
        // Resolution still picks the heavier source
        assert_eq!(result.field("release_year").unwrap().value.as_deref(), Some("1998"));
    }

    #[test]
    fn test_overall_confidence_is_importance_weighted() {
        let config = VerificationConfig::default();
        // title unanimous (1.0, importance 3); rating single-source omdb (0.7, importance 0.5)
        let data = record(
            &config,
            &[
                ("tmdb", "title", "Heat"),
                ("omdb", "title", "Heat"),
                ("omdb", "rating", "8.3"),
            ],
        );
        let result = ConsensusBuilder::new(Arc::new(config)).build_consensus(&data);

        let expected = (3.0 * 1.0 + 0.5 * 0.7) / 3.5;
        assert!((result.overall_confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn test_empty_record_has_zero_confidence() {
        let config = VerificationConfig::default();
        let result = ConsensusBuilder::new(Arc::new(config)).build_consensus(&SourceData::new("x"));
        assert_eq!(result.overall_confidence, 0.0);
        assert!(result.discrepancies.is_empty());
    }

    #[test]
    fn test_sources_listed_in_priority_order() {
        let config = VerificationConfig::default();
        let mut data = record(
            &config,
            &[("internal", "title", "Heat"), ("wikidata", "title", "Heat")],
        );
        data.absent_sources = vec![
            AbsentSource {
                source: SourceId::from("omdb"),
                error_kind: "not_found".to_string(),
                message: "404".to_string(),
                attempts: 1,
            },
            AbsentSource {
                source: SourceId::from("tmdb"),
                error_kind: "timeout".to_string(),
                message: "timed out".to_string(),
                attempts: 4,
            },
        ];
        let result = ConsensusBuilder::new(Arc::new(config)).build_consensus(&data);

        assert_eq!(
            result.sources_used,
            vec![SourceId::from("wikidata"), SourceId::from("internal")]
        );
        assert_eq!(result.absent_sources[0].source, SourceId::from("tmdb"));
    }
}
