//! Discrepancy classification, severity and review rules

use crate::config::{FieldKind, VerificationConfig};
use crate::resolve::normalizer::{alphanumeric_key, collapse_whitespace, token_sorted};
use crate::resolve::{FieldResolution, ValueBucket};
use crate::types::{
    ConflictingValue, Discrepancy, DiscrepancyClass, NormalizedValue, ResolutionMethod, Severity,
    SourceValue,
};

/// Relative difference under which a rescaled number counts as a unit mismatch
const UNIT_RELATIVE_TOLERANCE: f64 = 0.05;

/// How serious a class is when a field mixes several kinds of disagreement
fn precedence(class: DiscrepancyClass) -> u8 {
    match class {
        DiscrepancyClass::Format => 0,
        DiscrepancyClass::Alias => 1,
        DiscrepancyClass::Unit => 2,
        DiscrepancyClass::Unknown => 3,
        DiscrepancyClass::Factual => 4,
    }
}

fn worst(a: DiscrepancyClass, b: DiscrepancyClass) -> DiscrepancyClass {
    if precedence(b) > precedence(a) {
        b
    } else {
        a
    }
}

/// Classify a disagreement between two observations in different buckets.
///
/// Only word order (`alias`) and punctuation or spacing (`format`) make two
/// texts the same fact. Near spellings stay `factual`: "Toy Story 2" and
/// "Toy Story 3" are one edit apart.
pub fn classify_pair(kind: &FieldKind, a: &SourceValue, b: &SourceValue) -> DiscrepancyClass {
    if a.notes.unparsed || b.notes.unparsed {
        return DiscrepancyClass::Unknown;
    }

    match (&a.normalized_value, &b.normalized_value) {
        (NormalizedValue::Text(x), NormalizedValue::Text(y)) => {
            if token_sorted(x) == token_sorted(y) {
                DiscrepancyClass::Alias
            } else if alphanumeric_key(x) == alphanumeric_key(y) {
                DiscrepancyClass::Format
            } else {
                DiscrepancyClass::Factual
            }
        }
        (NormalizedValue::Number(x), NormalizedValue::Number(y)) => {
            let diff = (x - y).abs();
            let magnitude = x.abs().max(y.abs());
            let relative = if magnitude > 0.0 { diff / magnitude } else { 0.0 };

            if (a.notes.unit || b.notes.unit) && relative <= UNIT_RELATIVE_TOLERANCE {
                DiscrepancyClass::Unit
            } else if diff <= 2.0 * kind.tolerance() + f64::EPSILON {
                DiscrepancyClass::Format
            } else {
                DiscrepancyClass::Factual
            }
        }
        // Catalogs keyed to different timezones land a day apart
        (NormalizedValue::Date(x), NormalizedValue::Date(y)) if (*x - *y).num_days().abs() <= 1 => {
            DiscrepancyClass::Format
        }
        _ => DiscrepancyClass::Factual,
    }
}

/// Classify a split field: the worst class between the leading bucket and
/// each other bucket.
pub fn classify_split(resolution: &FieldResolution) -> DiscrepancyClass {
    let Some((lead, rest)) = resolution.buckets.split_first() else {
        return DiscrepancyClass::Unknown;
    };

    rest.iter()
        .map(|other| classify_pair(&resolution.kind, lead.representative(), other.representative()))
        .fold(DiscrepancyClass::Format, worst)
}

/// Class of a representation-only difference inside one agreeing bucket,
/// or `None` when members differ by case and whitespace at most.
pub fn classify_representation(bucket: &ValueBucket) -> Option<DiscrepancyClass> {
    let folded = |v: &SourceValue| collapse_whitespace(&v.raw_value).to_lowercase();
    let first = folded(bucket.representative());
    if bucket.members.iter().all(|m| folded(m) == first) {
        return None;
    }

    let class = if bucket.members.iter().any(|m| m.notes.alias) {
        DiscrepancyClass::Alias
    } else if bucket.members.iter().any(|m| m.notes.unit) {
        DiscrepancyClass::Unit
    } else {
        DiscrepancyClass::Format
    };
    Some(class)
}

/// Severity of a discrepancy on `field`
pub fn severity_for(
    config: &VerificationConfig,
    field: &str,
    classification: DiscrepancyClass,
    method: ResolutionMethod,
    auto_resolved: bool,
) -> Severity {
    if auto_resolved {
        return Severity::Info;
    }
    if config.is_critical(field) {
        return Severity::Critical;
    }
    if method == ResolutionMethod::ManualRequired {
        return Severity::High;
    }

    let importance = config.field_spec(field).importance;
    match classification {
        DiscrepancyClass::Factual | DiscrepancyClass::Unknown if importance >= 2.0 => Severity::High,
        _ if importance >= 1.0 => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Whether a discrepancy keeps its record in the review queue.
///
/// Factual disagreements, manual-required fields and anything at or above
/// the review severity threshold need review unless the automatic
/// resolution cleared them: a confident (or low-stakes) pick on a field
/// below the threshold.
pub fn needs_review(config: &VerificationConfig, discrepancy: &Discrepancy, confidence: f64) -> bool {
    let threshold = config.review_severity_threshold;
    let manual = discrepancy.resolution_method == ResolutionMethod::ManualRequired;

    let flagged = discrepancy.classification == DiscrepancyClass::Factual
        || discrepancy.severity >= threshold
        || manual;

    let cleared = discrepancy.auto_resolved
        || (!manual
            && discrepancy.severity < threshold
            && (confidence >= config.auto_accept_confidence || discrepancy.severity <= Severity::Low));

    flagged && !cleared
}

/// Conflicting values in source-priority order
pub fn conflicting_values<'a>(
    config: &VerificationConfig,
    values: impl Iterator<Item = &'a SourceValue>,
) -> Vec<ConflictingValue> {
    let mut values: Vec<&SourceValue> = values.collect();
    values.sort_by(|a, b| config.priority_key(&a.source).cmp(&config.priority_key(&b.source)));
    values
        .into_iter()
        .map(|v| ConflictingValue {
            source: v.source.clone(),
            raw_value: v.raw_value.clone(),
            normalized_value: v.normalized_value.clone(),
        })
        .collect()
}
