//! Field-kind aware normalization
//!
//! Every raw value is turned into a [`NormalizedValue`] before any
//! comparison. Text is case/whitespace folded, stripped of punctuation and
//! passed through the field's alias table; dates and years are parsed to
//! calendar values; runtimes and ratings are coerced into the field's
//! canonical unit. Whatever the normalizer had to do is recorded in
//! [`NormalizationNotes`] so discrepancies can later be classified.
//!
//! Values that do not parse for their field kind are kept as folded text
//! with `unparsed` set; they never match a parsed value.

use crate::config::{FieldKind, VerificationConfig};
use crate::types::{NormalizationNotes, NormalizedValue, SourceId, SourceValue};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};

/// Date layouts tried in order after ISO 8601 / RFC 3339
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%d.%m.%Y",
    "%m/%d/%Y",
];

/// Result of normalizing one raw value
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub value: NormalizedValue,
    /// Human-facing form (alias canonical, ISO date, plain number)
    pub display: String,
    pub notes: NormalizationNotes,
}

/// Alias entry: folded canonical key plus display spelling
#[derive(Debug, Clone)]
struct AliasTarget {
    key: String,
    display: String,
}

/// Normalizer built once per batch from the verification config
#[derive(Debug, Clone)]
pub struct Normalizer {
    kinds: BTreeMap<String, FieldKind>,
    /// field → folded spelling → canonical
    aliases: HashMap<String, HashMap<String, AliasTarget>>,
}

impl Normalizer {
    pub fn new(config: &VerificationConfig) -> Self {
        let kinds = config
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.kind.clone()))
            .collect();

        let mut aliases: HashMap<String, HashMap<String, AliasTarget>> = HashMap::new();
        for (field, groups) in &config.alias_tables {
            let table = aliases.entry(field.clone()).or_default();
            for group in groups {
                let target = AliasTarget {
                    key: fold_text(&group.canonical).0,
                    display: collapse_whitespace(&group.canonical),
                };
                table.insert(target.key.clone(), target.clone());
                for variant in &group.variants {
                    table.insert(fold_text(variant).0, target.clone());
                }
            }
        }

        Self { kinds, aliases }
    }

    /// Kind of a field; fields outside the catalogue are text
    pub fn kind_of(&self, field: &str) -> FieldKind {
        self.kinds.get(field).cloned().unwrap_or(FieldKind::Text)
    }

    /// Normalize one raw value of `field`
    pub fn normalize(&self, field: &str, raw: &str) -> Normalized {
        let parsed = match self.kind_of(field) {
            FieldKind::Text | FieldKind::FreeText => Some(self.normalize_text(field, raw)),
            FieldKind::Date => normalize_date(raw),
            FieldKind::Year => normalize_year(raw),
            FieldKind::Runtime { .. } => normalize_runtime(raw),
            FieldKind::Rating { scale, .. } => normalize_rating(raw, scale),
            FieldKind::Number { .. } => normalize_number(raw),
        };

        parsed.unwrap_or_else(|| {
            let (folded, _, _) = fold_text(raw);
            Normalized {
                value: NormalizedValue::Text(folded),
                display: collapse_whitespace(raw),
                notes: NormalizationNotes {
                    unparsed: true,
                    ..Default::default()
                },
            }
        })
    }

    /// Build a tagged observation
    pub fn observe(
        &self,
        source: &SourceId,
        field: &str,
        raw: &str,
        fetched_at: DateTime<Utc>,
    ) -> SourceValue {
        let normalized = self.normalize(field, raw);
        SourceValue {
            source: source.clone(),
            field: field.to_string(),
            raw_value: raw.to_string(),
            normalized_value: normalized.value,
            display_value: normalized.display,
            notes: normalized.notes,
            fetched_at,
        }
    }

    fn normalize_text(&self, field: &str, raw: &str) -> Normalized {
        let (folded, case_or_space, format) = fold_text(raw);
        let mut notes = NormalizationNotes {
            case_or_space,
            format,
            ..Default::default()
        };

        let alias = self
            .aliases
            .get(field)
            .and_then(|table| table.get(&folded));

        match alias {
            Some(target) => {
                notes.alias = target.key != folded;
                Normalized {
                    value: NormalizedValue::Text(target.key.clone()),
                    display: target.display.clone(),
                    notes,
                }
            }
            None => Normalized {
                value: NormalizedValue::Text(folded),
                display: collapse_whitespace(raw),
                notes,
            },
        }
    }
}

// ============================================================================
// Text
// ============================================================================

/// Trim and collapse internal whitespace runs to one space
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fold text for comparison.
///
/// Returns `(folded, case_or_space_changed, punctuation_changed)`.
/// Apostrophes are dropped; other punctuation splits words.
pub fn fold_text(raw: &str) -> (String, bool, bool) {
    let spaced = collapse_whitespace(raw).to_lowercase();
    let case_or_space = spaced != raw;

    let stripped: String = spaced
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let folded = collapse_whitespace(&stripped);
    let format = folded != spaced;

    (folded, case_or_space, format)
}

/// Words of folded text in sorted order ("wachowski lana" → "lana wachowski")
pub fn token_sorted(folded: &str) -> String {
    let mut tokens: Vec<&str> = folded.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Folded text with every non-alphanumeric character removed
pub fn alphanumeric_key(folded: &str) -> String {
    folded.chars().filter(|c| c.is_alphanumeric()).collect()
}

// ============================================================================
// Dates
// ============================================================================

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);

    if let Ok(dt) = DateTime::parse_from_rfc3339(unsigned) {
        return Some(dt.date_naive());
    }
    // "1999-03-31T00:00:00" without offset
    if let Some((date_part, _)) = unsigned.split_once('T') {
        if let Ok(d) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
            return Some(d);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(unsigned, fmt).ok())
}

fn normalize_date(raw: &str) -> Option<Normalized> {
    let date = parse_date(raw)?;
    let display = date.format("%Y-%m-%d").to_string();
    Some(Normalized {
        value: NormalizedValue::Date(date),
        notes: NormalizationNotes {
            format: raw.trim() != display,
            ..Default::default()
        },
        display,
    })
}

fn normalize_year(raw: &str) -> Option<Normalized> {
    let trimmed = raw.trim().trim_matches(|c| c == '(' || c == ')').trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let (year, reformatted) = match unsigned.parse::<i32>() {
        Ok(y) => (y, unsigned != raw),
        Err(_) => (parse_date(unsigned)?.year(), true),
    };

    Some(Normalized {
        value: NormalizedValue::Year(year),
        display: year.to_string(),
        notes: NormalizationNotes {
            format: reformatted,
            ..Default::default()
        },
    })
}

// ============================================================================
// Numbers
// ============================================================================

/// Round to 3 decimals so rescaled values display cleanly
fn tidy(n: f64) -> f64 {
    (n * 1000.0).round() / 1000.0
}

fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn number_result(n: f64, notes: NormalizationNotes) -> Normalized {
    let n = tidy(n);
    Normalized {
        value: NormalizedValue::Number(n),
        display: n.to_string(),
        notes,
    }
}

fn normalize_number(raw: &str) -> Option<Normalized> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',' && *c != '_').collect();
    let n = parse_finite(&cleaned)?;
    Some(number_result(
        n,
        NormalizationNotes {
            format: cleaned != raw,
            ..Default::default()
        },
    ))
}

/// Minutes per unit word of a duration
fn minutes_per(unit: &str) -> Option<f64> {
    match unit {
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(60.0),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(1.0),
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1.0 / 60.0),
        _ => None,
    }
}

/// Split "2h 16min" / "2h16m" into `[(2, "h"), (16, "min")]`
fn quantity_pairs(s: &str) -> Option<Vec<(f64, String)>> {
    let mut pairs = Vec::new();
    let mut chars = s.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut number = String::new();
        while let Some(c) = chars.peek().copied().filter(|c| c.is_ascii_digit() || *c == '.') {
            number.push(c);
            chars.next();
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let mut unit = String::new();
        while let Some(c) = chars.peek().copied().filter(|c| c.is_alphabetic()) {
            unit.push(c);
            chars.next();
        }
        while chars.peek().is_some_and(|c| *c == '.' || *c == ',') {
            chars.next();
        }

        if number.is_empty() || unit.is_empty() {
            return None;
        }
        pairs.push((parse_finite(&number)?, unit));
    }

    (!pairs.is_empty()).then_some(pairs)
}

fn normalize_runtime(raw: &str) -> Option<Normalized> {
    let lowered = raw.trim().to_lowercase();

    if let Some(n) = parse_finite(&lowered) {
        return Some(number_result(
            n,
            NormalizationNotes {
                format: lowered != raw,
                ..Default::default()
            },
        ));
    }

    // "2:16"
    if let Some((h, m)) = lowered.split_once(':') {
        let hours = h.trim().parse::<u32>().ok()?;
        let minutes = m.trim().parse::<u32>().ok().filter(|m| *m < 60)?;
        let total = hours.checked_mul(60)?.checked_add(minutes)?;
        return Some(number_result(
            f64::from(total),
            NormalizationNotes {
                format: true,
                ..Default::default()
            },
        ));
    }

    // ISO 8601 "PT2H16M" reads the same as "2h16m"
    let body = lowered.strip_prefix("pt").unwrap_or(&lowered);
    let pairs = quantity_pairs(body)?;
    let mut total = 0.0;
    for (amount, unit) in &pairs {
        total += amount * minutes_per(unit)?;
    }

    let single_foreign_unit = pairs.len() == 1 && minutes_per(&pairs[0].1) != Some(1.0);
    Some(number_result(
        total,
        NormalizationNotes {
            format: !single_foreign_unit,
            unit: single_foreign_unit,
            ..Default::default()
        },
    ))
}

fn normalize_rating(raw: &str, scale: f64) -> Option<Normalized> {
    let trimmed = raw.trim();

    if let Some(pct) = trimmed.strip_suffix('%') {
        let n = parse_finite(pct)?;
        return Some(number_result(
            n / 100.0 * scale,
            NormalizationNotes {
                unit: true,
                ..Default::default()
            },
        ));
    }

    if let Some((value, out_of)) = trimmed.split_once('/') {
        let n = parse_finite(value)?;
        let denominator = parse_finite(out_of).filter(|d| *d > 0.0)?;
        let rescaled = (denominator - scale).abs() > f64::EPSILON;
        return Some(number_result(
            n / denominator * scale,
            NormalizationNotes {
                unit: rescaled,
                format: !rescaled,
                ..Default::default()
            },
        ));
    }

    let n = parse_finite(trimmed)?;
    if n <= scale {
        Some(number_result(
            n,
            NormalizationNotes {
                format: trimmed != raw,
                ..Default::default()
            },
        ))
    } else if n <= 100.0 {
        // Bare percentage such as Metacritic-style "75"
        Some(number_result(
            n / 100.0 * scale,
            NormalizationNotes {
                unit: true,
                ..Default::default()
            },
        ))
    } else {
        None
    }
}
