//! Consensus builder integration tests
//!
//! Record-level behavior through the public API: resolution methods,
//! discrepancy classification, review flags and determinism.

mod helpers;

use helpers::observe_record;
use mmv_verify::config::AliasGroup;
use mmv_verify::{
    AgreementLevel, ConsensusBuilder, DiscrepancyClass, ResolutionMethod, Severity, SourceId,
    VerificationConfig,
};
use std::sync::Arc;

fn build(config: &VerificationConfig, obs: &[(&str, &str, &str)]) -> mmv_verify::ConsensusResult {
    let data = observe_record(config, "tt0120815", obs);
    ConsensusBuilder::new(Arc::new(config.clone())).build_consensus(&data)
}

// ============================================================================
// Resolution methods
// ============================================================================

/// **Test Scenario:** Three sources report the same title.
///
/// **Expected Outcome:** Unanimous, confidence exactly 1.0, all three
/// sources contribute.
#[test]
fn test_identical_values_are_unanimous() {
    let config = VerificationConfig::default();
    let result = build(
        &config,
        &[
            ("wikidata", "title", "Saving Private Ryan"),
            ("tmdb", "title", "Saving Private Ryan"),
            ("omdb", "title", "Saving Private Ryan"),
        ],
    );

    let title = result.field("title").unwrap();
    assert_eq!(title.method, ResolutionMethod::Unanimous);
    assert_eq!(title.agreement_level, AgreementLevel::Unanimous);
    assert_eq!(title.confidence, 1.0);
    assert_eq!(title.contributing_sources.len(), 3);
    assert!(result.discrepancy("title").is_none());
}

/// **Test Scenario:** Sources A (0.9) and B (0.3) disagree.
///
/// **Expected Outcome:** A's value wins by trust weight.
#[test]
fn test_trust_weighted_prefers_heavier_source() {
    let mut config = VerificationConfig::default();
    config.trust_weights.insert("source-a".to_string(), 0.9);
    config.trust_weights.insert("source-b".to_string(), 0.3);
    let result = build(
        &config,
        &[("source-a", "title", "X"), ("source-b", "title", "Y")],
    );

    let title = result.field("title").unwrap();
    assert_eq!(title.value.as_deref(), Some("X"));
    assert_eq!(title.method, ResolutionMethod::TrustWeighted);
    assert_eq!(title.agreement_level, AgreementLevel::Split);
    assert_eq!(title.contributing_sources, vec![SourceId::from("source-a")]);
    assert!((title.confidence - 0.75).abs() < 1e-9);
}

/// **Test Scenario:** Threshold 0.6; two of three sources say 1999.
///
/// **Expected Outcome:** Majority resolves to 1999 with confidence 2/3.
#[test]
fn test_majority_over_threshold() {
    let config = VerificationConfig::default();
    let result = build(
        &config,
        &[
            ("tmdb", "release_year", "1999"),
            ("omdb", "release_year", "1999"),
            ("wikidata", "release_year", "2000"),
        ],
    );

    let year = result.field("release_year").unwrap();
    assert_eq!(year.value.as_deref(), Some("1999"));
    assert_eq!(year.method, ResolutionMethod::Majority);
    assert!((year.confidence - 2.0 / 3.0).abs() < 1e-9);

    // The outvoted year is still a factual conflict on a critical field
    let d = result.discrepancy("release_year").unwrap();
    assert_eq!(d.classification, DiscrepancyClass::Factual);
    assert_eq!(d.resolution_method, ResolutionMethod::Majority);
    assert!(result.needs_review);
}

/// **Test Scenario:** Two of three sources agree and the third misspells
/// the director by one letter.
///
/// **Expected Outcome:** Majority keeps the agreed spelling, but the
/// dissent is factual and the record goes to review.
#[test]
fn test_majority_with_one_letter_dissent_needs_review() {
    let config = VerificationConfig::default();
    let result = build(
        &config,
        &[
            ("wikidata", "director", "Steven Spielberg"),
            ("tmdb", "director", "Steven Spielberg"),
            ("internal", "director", "Steven Spielburg"),
        ],
    );

    let director = result.field("director").unwrap();
    assert_eq!(director.method, ResolutionMethod::Majority);
    assert_eq!(director.value.as_deref(), Some("Steven Spielberg"));

    let d = result.discrepancy("director").unwrap();
    assert_eq!(d.classification, DiscrepancyClass::Factual);
    assert!(!d.auto_resolved);
    assert_eq!(d.severity, Severity::High);
    assert!(result.needs_review);
}

/// **Test Scenario:** Two catalogs give sequel titles one character apart
/// ("Toy Story 2" vs "Toy Story 3").
///
/// **Expected Outcome:** Not a variant: the critical title is factual,
/// too close to call and queued for review with no value.
#[test]
fn test_sequel_titles_are_not_auto_resolved() {
    let config = VerificationConfig::default();
    let result = build(
        &config,
        &[("wikidata", "title", "Toy Story 2"), ("tmdb", "title", "Toy Story 3")],
    );

    let title = result.field("title").unwrap();
    assert_eq!(title.method, ResolutionMethod::ManualRequired);
    assert!(title.value.is_none());

    let d = result.discrepancy("title").unwrap();
    assert_eq!(d.classification, DiscrepancyClass::Factual);
    assert!(!d.auto_resolved);
    assert_eq!(d.severity, Severity::Critical);
    assert!(result.needs_review);
}

/// **Test Scenario:** Equal trust weights and distinct values.
///
/// **Expected Outcome:** Too close to call: manual review, no value.
#[test]
fn test_near_tie_requires_manual_review() {
    let mut config = VerificationConfig::default();
    config.trust_weights.insert("tmdb".to_string(), 0.8);
    config.trust_weights.insert("omdb".to_string(), 0.8);
    let result = build(
        &config,
        &[("tmdb", "director", "Steven Spielberg"), ("omdb", "director", "Robert Zemeckis")],
    );

    let director = result.field("director").unwrap();
    assert_eq!(director.method, ResolutionMethod::ManualRequired);
    assert!(director.value.is_none());
    assert_eq!(director.confidence, 0.0);

    let d = result.discrepancy("director").unwrap();
    assert_eq!(d.resolution_method, ResolutionMethod::ManualRequired);
    assert!(!d.auto_resolved);
    assert!(result.needs_review);
}

#[test]
fn test_single_source_uses_trust_weight() {
    let config = VerificationConfig::default();
    let result = build(&config, &[("omdb", "runtime_minutes", "169 min")]);

    let runtime = result.field("runtime_minutes").unwrap();
    assert_eq!(runtime.method, ResolutionMethod::SingleSource);
    assert_eq!(runtime.value.as_deref(), Some("169"));
    assert!((runtime.confidence - 0.7).abs() < 1e-9);
}

// ============================================================================
// Discrepancies
// ============================================================================

/// **Test Scenario:** Titles differ only in case and spacing.
///
/// **Expected Outcome:** One group, no discrepancy.
#[test]
fn test_case_and_whitespace_never_discrepant() {
    let config = VerificationConfig::default();
    let result = build(
        &config,
        &[
            ("tmdb", "title", "saving private ryan"),
            ("omdb", "title", "  Saving   Private Ryan"),
            ("wikidata", "title", "SAVING PRIVATE RYAN"),
        ],
    );

    assert!(result.discrepancy("title").is_none());
    assert_eq!(result.field("title").unwrap().method, ResolutionMethod::Unanimous);
}

/// **Test Scenario:** Titles differ only in word order and the alias table
/// lists the variant.
///
/// **Expected Outcome:** Alias, auto-resolved, record not flagged.
#[test]
fn test_word_order_alias_auto_resolved() {
    let mut config = VerificationConfig::default();
    config.alias_tables.insert(
        "title".to_string(),
        vec![AliasGroup {
            canonical: "Seven Samurai".to_string(),
            variants: vec!["Samurai Seven".to_string()],
        }],
    );
    let result = build(
        &config,
        &[("tmdb", "title", "Seven Samurai"), ("omdb", "title", "Samurai Seven")],
    );

    let d = result.discrepancy("title").unwrap();
    assert_eq!(d.classification, DiscrepancyClass::Alias);
    assert!(d.auto_resolved);
    assert!(!result.needs_review);
    assert_eq!(result.field("title").unwrap().value.as_deref(), Some("Seven Samurai"));
}

/// **Test Scenario:** Release year 1998 vs 2001, the lower-trust source
/// outvoted by weight.
///
/// **Expected Outcome:** Factual, critical, needs review regardless of
/// trust weights.
#[test]
fn test_critical_year_conflict_needs_review() {
    let mut config = VerificationConfig::default();
    config.trust_weights.insert("wikidata".to_string(), 0.99);
    config.trust_weights.insert("internal".to_string(), 0.01);
    let result = build(
        &config,
        &[("wikidata", "release_year", "1998"), ("internal", "release_year", "2001")],
    );

    let d = result.discrepancy("release_year").unwrap();
    assert_eq!(d.classification, DiscrepancyClass::Factual);
    assert_eq!(d.severity, Severity::Critical);
    assert!(!d.auto_resolved);
    assert!(result.needs_review);
    assert_eq!(d.conflicting_values.len(), 2);
}

/// **Test Scenario:** Runtime reported in minutes and in hours.
///
/// **Expected Outcome:** Same value after unit conversion; auto-resolved.
#[test]
fn test_runtime_units_reconciled() {
    let config = VerificationConfig::default();
    let result = build(
        &config,
        &[
            ("tmdb", "runtime_minutes", "169"),
            ("omdb", "runtime_minutes", "2h 49min"),
        ],
    );

    let runtime = result.field("runtime_minutes").unwrap();
    assert_eq!(runtime.method, ResolutionMethod::Unanimous);
    if let Some(d) = result.discrepancy("runtime_minutes") {
        assert!(d.auto_resolved);
        assert_eq!(d.severity, Severity::Info);
    }
    assert!(!result.needs_review);
}

/// **Test Scenario:** Release dates a day apart, as catalogs in different
/// timezones publish them; then three days apart.
///
/// **Expected Outcome:** One day is a format difference and auto-resolves;
/// three days is factual and goes to review.
#[test]
fn test_release_date_skew_tolerates_one_day_only() {
    let config = VerificationConfig::default();

    let skewed = build(
        &config,
        &[("wikidata", "release_date", "1999-03-31"), ("internal", "release_date", "1999-03-30")],
    );
    let d = skewed.discrepancy("release_date").unwrap();
    assert_eq!(d.classification, DiscrepancyClass::Format);
    assert!(d.auto_resolved);
    assert_eq!(d.severity, Severity::Info);
    assert!(!skewed.needs_review);

    let apart = build(
        &config,
        &[("wikidata", "release_date", "1999-03-31"), ("internal", "release_date", "1999-03-28")],
    );
    let d = apart.discrepancy("release_date").unwrap();
    assert_eq!(d.classification, DiscrepancyClass::Factual);
    assert!(!d.auto_resolved);
    assert!(apart.needs_review);
}

/// **Test Scenario:** Synopses from every catalog are worded differently.
///
/// **Expected Outcome:** Resolved by weight, low severity, no review.
#[test]
fn test_free_text_disagreement_does_not_flood_queue() {
    let config = VerificationConfig::default();
    let result = build(
        &config,
        &[
            ("tmdb", "synopsis", "Soldiers search for a paratrooper behind enemy lines."),
            ("omdb", "synopsis", "Following the Normandy landings, a squad goes looking for Private Ryan."),
        ],
    );

    let synopsis = result.field("synopsis").unwrap();
    assert_ne!(synopsis.method, ResolutionMethod::ManualRequired);
    assert!(synopsis.value.is_some());
    let d = result.discrepancy("synopsis").unwrap();
    assert!(d.severity <= Severity::Low);
    assert!(!result.needs_review);
}

// ============================================================================
// Determinism
// ============================================================================

/// **Test Scenario:** Same observations built twice, once in reverse fetch
/// order.
///
/// **Expected Outcome:** Byte-identical serialized results.
#[test]
fn test_build_is_deterministic_across_input_order() {
    let config = VerificationConfig::default();
    let obs = [
        ("wikidata", "title", "Saving Private Ryan"),
        ("tmdb", "title", "Saving Private Ryan"),
        ("omdb", "title", "Saving Pvt. Ryan"),
        ("tmdb", "release_year", "1998"),
        ("omdb", "release_year", "1998"),
        ("wikipedia", "director", "Steven Spielberg"),
        ("internal", "director", "S. Spielberg"),
        ("tmdb", "rating", "8.2"),
        ("omdb", "rating", "82%"),
    ];
    let mut reversed = obs;
    reversed.reverse();

    let first = serde_json::to_vec(&build(&config, &obs)).unwrap();
    let second = serde_json::to_vec(&build(&config, &obs)).unwrap();
    let third = serde_json::to_vec(&build(&config, &reversed)).unwrap();

    assert_eq!(first, second);
    assert_eq!(first, third);
}
