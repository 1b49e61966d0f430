//! Field-level conflict resolution
//!
//! Groups one field's normalized observations into buckets and picks the
//! resolution method in a fixed order:
//!
//! 1. one bucket, two or more sources → `unanimous`, confidence 1.0
//! 2. a unique largest bucket holding at least `consensus_threshold` of the
//!    sources → `majority`, confidence = bucket share
//! 3. otherwise `trust-weighted`: the bucket with the highest summed trust
//!    weight wins, confidence = winning weight / total weight
//! 4. if the top two weighted buckets are less than `tie_epsilon` of the
//!    total weight apart and are not variants of one another →
//!    `manual-required` (an epsilon of 0 turns exact ties into priority picks)
//!
//! Every ordering decision goes through the configured source-priority
//! list, so the result never depends on the order values arrived in.

use crate::config::{FieldKind, VerificationConfig};
use crate::resolve::normalizer::{alphanumeric_key, token_sorted};
use crate::types::{AgreementLevel, NormalizedValue, ResolutionMethod, ResolvedField, SourceId, SourceValue};
use std::sync::Arc;
use tracing::debug;

/// Observations that compared equal for one field
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBucket {
    /// Members in source-priority order; the first one represents the bucket
    pub members: Vec<SourceValue>,
    /// Summed trust weight of the members' sources
    pub weight: f64,
    /// Priority rank of the best-ranked member
    best_rank: usize,
}

impl ValueBucket {
    pub fn representative(&self) -> &SourceValue {
        &self.members[0]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.members.iter().map(|m| m.source.clone()).collect()
    }
}

/// Resolved field plus the grouping that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct FieldResolution {
    pub resolved: ResolvedField,
    /// Buckets ranked best first (winner first when a value was emitted)
    pub buckets: Vec<ValueBucket>,
    pub kind: FieldKind,
}

/// Stateless resolver over a shared verification config
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    config: Arc<VerificationConfig>,
}

impl ConflictResolver {
    pub fn new(config: Arc<VerificationConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Resolve one field from all its observations
    pub fn resolve_field(&self, field: &str, values: &[SourceValue]) -> ResolvedField {
        self.resolve_with_buckets(field, values).resolved
    }

    /// Like [`resolve_field`](Self::resolve_field), also returning the buckets
    pub fn resolve_with_buckets(&self, field: &str, values: &[SourceValue]) -> FieldResolution {
        let kind = self.config.field_spec(field).kind;
        let votes = self.one_vote_per_source(field, values);

        if votes.is_empty() {
            return FieldResolution {
                resolved: ResolvedField::no_data(field),
                buckets: Vec::new(),
                kind,
            };
        }

        let observed_sources: Vec<SourceId> = votes.iter().map(|v| v.source.clone()).collect();
        let mut buckets = self.bucket(&kind, votes);

        // Rank by head count, then weight, then priority
        buckets.sort_by(|a, b| {
            b.len()
                .cmp(&a.len())
                .then_with(|| b.weight.total_cmp(&a.weight))
                .then_with(|| a.best_rank.cmp(&b.best_rank))
        });

        let total_sources = observed_sources.len();

        if total_sources == 1 {
            let winner = &buckets[0];
            let confidence = self.config.trust_weight(&winner.representative().source);
            return FieldResolution {
                resolved: emit(
                    field,
                    winner,
                    ResolutionMethod::SingleSource,
                    AgreementLevel::SingleSource,
                    confidence,
                    observed_sources,
                ),
                buckets,
                kind,
            };
        }

        if buckets.len() == 1 {
            return FieldResolution {
                resolved: emit(
                    field,
                    &buckets[0],
                    ResolutionMethod::Unanimous,
                    AgreementLevel::Unanimous,
                    1.0,
                    observed_sources,
                ),
                buckets,
                kind,
            };
        }

        let share = buckets[0].len() as f64 / total_sources as f64;
        let unique_top = buckets[0].len() > buckets[1].len();
        if unique_top && share >= self.config.consensus_threshold {
            return FieldResolution {
                resolved: emit(
                    field,
                    &buckets[0],
                    ResolutionMethod::Majority,
                    AgreementLevel::Majority,
                    share,
                    observed_sources,
                ),
                buckets,
                kind,
            };
        }

        // Trust-weighted: rank by weight, exact ties by priority
        buckets.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.best_rank.cmp(&b.best_rank))
                .then_with(|| {
                    a.representative()
                        .source
                        .cmp(&b.representative().source)
                })
        });

        let total_weight: f64 = buckets.iter().map(|b| b.weight).sum();
        let (confidence, gap) = if total_weight > 0.0 {
            (
                buckets[0].weight / total_weight,
                (buckets[0].weight - buckets[1].weight) / total_weight,
            )
        } else {
            (0.0, 0.0)
        };

        let too_close = gap < self.config.tie_epsilon;
        let escalates = !matches!(kind, FieldKind::FreeText);
        if too_close
            && escalates
            && !are_variants(
                &kind,
                &buckets[0].representative().normalized_value,
                &buckets[1].representative().normalized_value,
            )
        {
            debug!(
                field = %field,
                top = %buckets[0].representative().display_value,
                runner_up = %buckets[1].representative().display_value,
                gap = gap,
                "Top candidates too close to call, manual review required"
            );
            return FieldResolution {
                resolved: ResolvedField {
                    field: field.to_string(),
                    value: None,
                    normalized_value: None,
                    method: ResolutionMethod::ManualRequired,
                    agreement_level: AgreementLevel::Split,
                    confidence: 0.0,
                    contributing_sources: observed_sources.clone(),
                    observed_sources,
                },
                buckets,
                kind,
            };
        }

        FieldResolution {
            resolved: emit(
                field,
                &buckets[0],
                ResolutionMethod::TrustWeighted,
                AgreementLevel::Split,
                confidence,
                observed_sources,
            ),
            buckets,
            kind,
        }
    }

    /// Keep one observation per source, ordered by source priority.
    ///
    /// Should a source report a field twice, its lexicographically first
    /// raw value counts.
    fn one_vote_per_source(&self, field: &str, values: &[SourceValue]) -> Vec<SourceValue> {
        let mut votes: Vec<&SourceValue> = values.iter().filter(|v| v.field == field).collect();
        votes.sort_by(|a, b| {
            self.config
                .priority_key(&a.source)
                .cmp(&self.config.priority_key(&b.source))
                .then_with(|| a.raw_value.cmp(&b.raw_value))
        });
        votes.dedup_by(|later, earlier| later.source == earlier.source);
        votes.into_iter().cloned().collect()
    }

    /// Group priority-ordered votes into buckets
    fn bucket(&self, kind: &FieldKind, votes: Vec<SourceValue>) -> Vec<ValueBucket> {
        let mut groups: Vec<Vec<(usize, SourceValue)>> = Vec::new();

        if kind.is_numeric() {
            let tolerance = kind.tolerance();
            let mut numeric: Vec<(usize, f64, SourceValue)> = Vec::new();
            for (rank, vote) in votes.into_iter().enumerate() {
                match vote.normalized_value {
                    NormalizedValue::Number(n) => numeric.push((rank, n, vote)),
                    _ => push_exact(&mut groups, rank, vote),
                }
            }
            numeric.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

            // Sweep: each bucket spans `tolerance` from its smallest member
            let mut anchor: Option<f64> = None;
            let mut current: Vec<(usize, SourceValue)> = Vec::new();
            for (rank, n, vote) in numeric {
                match anchor {
                    Some(a) if n - a <= tolerance + f64::EPSILON => current.push((rank, vote)),
                    _ => {
                        if !current.is_empty() {
                            groups.push(std::mem::take(&mut current));
                        }
                        anchor = Some(n);
                        current.push((rank, vote));
                    }
                }
            }
            if !current.is_empty() {
                groups.push(current);
            }
        } else {
            for (rank, vote) in votes.into_iter().enumerate() {
                push_exact(&mut groups, rank, vote);
            }
        }

        groups
            .into_iter()
            .map(|mut members| {
                members.sort_by_key(|(rank, _)| *rank);
                let best_rank = members[0].0;
                let members: Vec<SourceValue> = members.into_iter().map(|(_, v)| v).collect();
                let weight = members
                    .iter()
                    .map(|m| self.config.trust_weight(&m.source))
                    .sum();
                ValueBucket {
                    members,
                    weight,
                    best_rank,
                }
            })
            .collect()
    }
}

fn push_exact(groups: &mut Vec<Vec<(usize, SourceValue)>>, rank: usize, vote: SourceValue) {
    match groups
        .iter_mut()
        .find(|g| g[0].1.normalized_value == vote.normalized_value)
    {
        Some(group) => group.push((rank, vote)),
        None => groups.push(vec![(rank, vote)]),
    }
}

fn emit(
    field: &str,
    winner: &ValueBucket,
    method: ResolutionMethod,
    agreement_level: AgreementLevel,
    confidence: f64,
    observed_sources: Vec<SourceId>,
) -> ResolvedField {
    let representative = winner.representative();
    ResolvedField {
        field: field.to_string(),
        value: Some(representative.display_value.clone()),
        normalized_value: Some(representative.normalized_value.clone()),
        method,
        agreement_level,
        confidence,
        contributing_sources: winner.sources(),
        observed_sources,
    }
}

/// Whether two differing normalized values are word-order or format
/// variants of the same fact rather than a real disagreement.
///
/// Edit distance alone never makes a variant; a one-character change is
/// often a different film ("Toy Story 2" / "Toy Story 3").
pub fn are_variants(kind: &FieldKind, a: &NormalizedValue, b: &NormalizedValue) -> bool {
    match (a, b) {
        (NormalizedValue::Text(x), NormalizedValue::Text(y)) if kind.is_textual() => {
            token_sorted(x) == token_sorted(y) || alphanumeric_key(x) == alphanumeric_key(y)
        }
        (NormalizedValue::Number(x), NormalizedValue::Number(y)) => {
            (x - y).abs() <= 2.0 * kind.tolerance() + f64::EPSILON
        }
        (NormalizedValue::Date(x), NormalizedValue::Date(y)) => {
            (*x - *y).num_days().abs() <= 1
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::normalizer::Normalizer;
    use chrono::{TimeZone, Utc};

    fn fixed_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn values(config: &VerificationConfig, field: &str, obs: &[(&str, &str)]) -> Vec<SourceValue> {
        let normalizer = Normalizer::new(config);
        obs.iter()
            .map(|(source, raw)| normalizer.observe(&SourceId::from(*source), field, raw, fixed_time()))
            .collect()
    }

    fn resolver(config: VerificationConfig) -> ConflictResolver {
        ConflictResolver::new(Arc::new(config))
    }

    #[test]
    fn test_unanimous_after_case_folding() {
        let config = VerificationConfig::default();
        let obs = values(&config, "title", &[("tmdb", "The Matrix"), ("omdb", "the  matrix")]);
        let resolved = resolver(config).resolve_field("title", &obs);

        assert_eq!(resolved.method, ResolutionMethod::Unanimous);
        assert_eq!(resolved.agreement_level, AgreementLevel::Unanimous);
        assert_eq!(resolved.confidence, 1.0);
        // tmdb outranks omdb, so its spelling represents the bucket
        assert_eq!(resolved.value.as_deref(), Some("The Matrix"));
    }

    #[test]
    fn test_majority_two_of_three() {
        let config = VerificationConfig::default();
        let obs = values(
            &config,
            "release_year",
            &[("tmdb", "1999"), ("omdb", "1999"), ("wikipedia", "2000")],
        );
        let resolved = resolver(config).resolve_field("release_year", &obs);

        assert_eq!(resolved.method, ResolutionMethod::Majority);
        assert_eq!(resolved.value.as_deref(), Some("1999"));
        assert!((resolved.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            resolved.contributing_sources,
            vec![SourceId::from("tmdb"), SourceId::from("omdb")]
        );
    }

    #[test]
    fn test_trust_weighted_heavier_source_wins() {
        let mut config = VerificationConfig::default();
        config.trust_weights.insert("a".to_string(), 0.9);
        config.trust_weights.insert("b".to_string(), 0.3);
        let obs = values(&config, "director", &[("b", "Y"), ("a", "X")]);
        let resolved = resolver(config).resolve_field("director", &obs);

        assert_eq!(resolved.method, ResolutionMethod::TrustWeighted);
        assert_eq!(resolved.agreement_level, AgreementLevel::Split);
        assert_eq!(resolved.value.as_deref(), Some("X"));
        assert!((resolved.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_near_tie_requires_manual_review() {
        let config = VerificationConfig::default();
        // wikidata 0.85 vs tmdb 0.8: gap 0.05/1.65 is inside tie_epsilon
        let obs = values(&config, "director", &[("wikidata", "Ridley Scott"), ("tmdb", "Tony Scott")]);
        let resolved = resolver(config).resolve_field("director", &obs);

        assert_eq!(resolved.method, ResolutionMethod::ManualRequired);
        assert_eq!(resolved.value, None);
        assert_eq!(resolved.confidence, 0.0);
        assert_eq!(resolved.contributing_sources.len(), 2);
    }

    #[test]
    fn test_exact_tie_between_variants_uses_priority() {
        let mut config = VerificationConfig::default();
        config.trust_weights.insert("tmdb".to_string(), 0.7);
        config.trust_weights.insert("omdb".to_string(), 0.7);
        let obs = values(
            &config,
            "director",
            &[("omdb", "Villeneuve Denis"), ("tmdb", "Denis Villeneuve")],
        );
        let resolved = resolver(config).resolve_field("director", &obs);

        assert_eq!(resolved.method, ResolutionMethod::TrustWeighted);
        assert_eq!(resolved.value.as_deref(), Some("Denis Villeneuve"));
        assert_eq!(resolved.contributing_sources, vec![SourceId::from("tmdb")]);
    }

    #[test]
    fn test_near_tie_on_one_edit_titles_requires_manual_review() {
        let config = VerificationConfig::default();
        let obs = values(&config, "title", &[("wikidata", "Toy Story 2"), ("tmdb", "Toy Story 3")]);
        let resolved = resolver(config).resolve_field("title", &obs);

        assert_eq!(resolved.method, ResolutionMethod::ManualRequired);
        assert_eq!(resolved.value, None);
    }

    #[test]
    fn test_zero_epsilon_resolves_exact_tie_by_priority() {
        let mut config = VerificationConfig {
            tie_epsilon: 0.0,
            ..Default::default()
        };
        config.trust_weights.insert("tmdb".to_string(), 0.8);
        config.trust_weights.insert("omdb".to_string(), 0.8);
        let obs = values(
            &config,
            "director",
            &[("omdb", "Robert Zemeckis"), ("tmdb", "Steven Spielberg")],
        );
        let resolved = resolver(config).resolve_field("director", &obs);

        assert_eq!(resolved.method, ResolutionMethod::TrustWeighted);
        assert_eq!(resolved.value.as_deref(), Some("Steven Spielberg"));
        assert!((resolved.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_unlisted_sources_break_ties_by_id() {
        let config = VerificationConfig {
            source_priority: Vec::new(),
            ..Default::default()
        };
        let obs = values(&config, "synopsis", &[("zeta", "A heist."), ("alpha", "A robbery.")]);
        let resolved = resolver(config).resolve_field("synopsis", &obs);

        // Free text never escalates; equal default weights fall to source id
        assert_eq!(resolved.method, ResolutionMethod::TrustWeighted);
        assert_eq!(resolved.contributing_sources, vec![SourceId::from("alpha")]);
    }

    #[test]
    fn test_numeric_tolerance_buckets() {
        let config = VerificationConfig::default();
        let obs = values(
            &config,
            "runtime_minutes",
            &[("wikidata", "136"), ("tmdb", "2h 16m"), ("omdb", "137 min")],
        );
        let resolved = resolver(config).resolve_field("runtime_minutes", &obs);

        assert_eq!(resolved.method, ResolutionMethod::Unanimous);
        assert_eq!(resolved.value.as_deref(), Some("136"));
    }

    #[test]
    fn test_single_source_uses_trust_weight() {
        let config = VerificationConfig::default();
        let obs = values(&config, "title", &[("omdb", "Heat")]);
        let resolved = resolver(config).resolve_field("title", &obs);

        assert_eq!(resolved.method, ResolutionMethod::SingleSource);
        assert_eq!(resolved.agreement_level, AgreementLevel::SingleSource);
        assert!((resolved.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_no_data() {
        let resolved = resolver(VerificationConfig::default()).resolve_field("title", &[]);
        assert_eq!(resolved.method, ResolutionMethod::NoData);
        assert!(!resolved.has_data());
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let config = VerificationConfig::default();
        let forward = values(
            &config,
            "rating",
            &[("wikidata", "8.7"), ("tmdb", "8.2"), ("omdb", "87%"), ("internal", "6")],
        );
        let mut reversed = forward.clone();
        reversed.reverse();

        let r = resolver(config);
        assert_eq!(r.resolve_field("rating", &forward), r.resolve_field("rating", &reversed));
    }

    #[test]
    fn test_variant_rules() {
        let text = FieldKind::Text;
        let t = |s: &str| NormalizedValue::Text(s.to_string());
        let d = |s: &str| NormalizedValue::Date(s.parse().unwrap());
        assert!(are_variants(&text, &t("wachowski lana"), &t("lana wachowski")));
        assert!(are_variants(&text, &t("spider-man"), &t("spiderman")));
        assert!(!are_variants(&text, &t("ridley scott"), &t("tony scott")));
        assert!(!are_variants(&text, &t("toy story 2"), &t("toy story 3")));
        assert!(!are_variants(&text, &t("steven spielberg"), &t("steven spielburg")));
        assert!(!are_variants(&FieldKind::Year, &NormalizedValue::Year(1998), &NormalizedValue::Year(1999)));
        assert!(are_variants(&FieldKind::Date, &d("1999-03-31"), &d("1999-03-30")));
        assert!(!are_variants(&FieldKind::Date, &d("1999-03-31"), &d("1999-03-29")));
    }
}
