//! Configuration for fetching and verification
//!
//! Resolution priority: explicit path → `MMV_CONFIG` → user config dir →
//! compiled defaults, then `MMV_*` environment overrides on top.
//!
//! ```toml
//! checkpoint_dir = "/var/lib/mmv/checkpoints"
//!
//! [fetch]
//! concurrency = 8
//! default_rps = 2.0
//! per_source_rps = { wikidata = 5.0, tmdb = 4.0 }
//!
//! [verification]
//! consensus_threshold = 0.6
//! source_priority = ["wikidata", "tmdb", "omdb", "wikipedia", "internal"]
//! critical_fields = ["title", "release_year"]
//!
//! [[verification.alias_tables.director]]
//! canonical = "Lana Wachowski"
//! variants = ["Wachowski, Lana", "Larry Wachowski"]
//! ```

use crate::error::{VerifyError, VerifyResult};
use crate::types::{CatalogKind, Severity, SourceId};
use mmv_common::config::{env_override, load_toml_or_default, resolve_config_path, CONFIG_ENV_VAR};
use mmv_common::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// ============================================================================
// Fetch configuration
// ============================================================================

/// Batch fetch tuning (`[fetch]` table)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Maximum records in flight at once
    pub concurrency: usize,
    /// Requests per second for sources without an explicit entry
    pub default_rps: f64,
    /// Requests per second per source id
    pub per_source_rps: BTreeMap<String, f64>,
    /// Retries after the first attempt for retryable errors
    pub max_retries: u32,
    /// Base of the exponential backoff
    pub backoff_base_ms: u64,
    /// Upper bound for a single backoff sleep
    pub backoff_max_ms: u64,
    /// Jitter as a fraction of the computed delay, in [0, 1]
    pub jitter_ratio: f64,
    /// Per-request timeout
    pub timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            default_rps: 1.0,
            per_source_rps: BTreeMap::new(),
            max_retries: 3,
            backoff_base_ms: 250,
            backoff_max_ms: 10_000,
            jitter_ratio: 0.2,
            timeout_ms: 15_000,
        }
    }
}

impl FetchConfig {
    /// Requests per second for a source
    pub fn rps_for(&self, source: &SourceId) -> f64 {
        self.per_source_rps
            .get(source.as_str())
            .copied()
            .unwrap_or(self.default_rps)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Fail fast on settings that would make the batch meaningless
    pub fn validate(&self) -> VerifyResult<()> {
        if self.concurrency < 1 {
            return Err(VerifyError::Config(format!(
                "concurrency must be >= 1 (got {})",
                self.concurrency
            )));
        }
        check_rps("default_rps", self.default_rps)?;
        for (source, rps) in &self.per_source_rps {
            check_rps(&format!("per_source_rps.{}", source), *rps)?;
        }
        if self.timeout_ms == 0 {
            return Err(VerifyError::Config("timeout_ms must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(VerifyError::Config(format!(
                "jitter_ratio must be within [0, 1] (got {})",
                self.jitter_ratio
            )));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(VerifyError::Config(format!(
                "backoff_max_ms ({}) is below backoff_base_ms ({})",
                self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        Ok(())
    }
}

fn check_rps(name: &str, rps: f64) -> VerifyResult<()> {
    if !rps.is_finite() || rps <= 0.0 {
        return Err(VerifyError::Config(format!(
            "{} must be a positive rate (got {})",
            name, rps
        )));
    }
    if std::time::Duration::try_from_secs_f64(1.0 / rps).is_err() {
        return Err(VerifyError::Config(format!(
            "{} is too low to pace requests (got {})",
            name, rps
        )));
    }
    Ok(())
}

// ============================================================================
// Field catalogue
// ============================================================================

/// How a field's values are parsed and compared
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Short text: case/whitespace/punctuation folding + alias table
    Text,
    /// Long prose (synopsis); compared like text but near-ties fall to
    /// source priority instead of manual review
    FreeText,
    /// Calendar date.
    ///
    /// Dates at most one day apart are the same release seen from catalogs
    /// in different timezones: they bucket as variants, classify `format`
    /// and auto-resolve. Two or more days apart is `factual`.
    Date,
    /// Calendar year (also accepts full dates)
    Year,
    /// Running time in minutes ("136", "136 min", "2h 16m", "PT2H16M")
    Runtime { tolerance_minutes: f64 },
    /// Rating rescaled to `scale` ("7.5", "7.5/10", "75/100", "75%")
    Rating { scale: f64, tolerance: f64 },
    /// Plain number
    Number { tolerance: f64 },
}

impl FieldKind {
    /// Equality tolerance for numeric kinds
    pub fn tolerance(&self) -> f64 {
        match self {
            FieldKind::Runtime { tolerance_minutes } => *tolerance_minutes,
            FieldKind::Rating { tolerance, .. } | FieldKind::Number { tolerance } => *tolerance,
            _ => 0.0,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldKind::Runtime { .. } | FieldKind::Rating { .. } | FieldKind::Number { .. }
        )
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, FieldKind::Text | FieldKind::FreeText)
    }
}

/// One known field of a movie record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Weight of this field in the record's overall confidence
    #[serde(default = "default_importance")]
    pub importance: f64,
}

fn default_importance() -> f64 {
    1.0
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind, importance: f64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            importance,
        }
    }
}

/// A canonical spelling and the variants that collapse onto it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AliasGroup {
    pub canonical: String,
    pub variants: Vec<String>,
}

// ============================================================================
// Verification configuration
// ============================================================================

/// Consensus and review tuning (`[verification]` table)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationConfig {
    /// Share of contributing sources a bucket needs for `majority`
    pub consensus_threshold: f64,
    /// Top two weighted buckets closer than this share of total weight
    /// are too close to call
    pub tie_epsilon: f64,
    /// Trust weight for sources missing from `trust_weights`
    pub default_trust_weight: f64,
    pub trust_weights: BTreeMap<String, f64>,
    /// Explicit tie-break order; first listed wins. Unlisted sources rank
    /// after listed ones, by id.
    pub source_priority: Vec<String>,
    /// Per-field alias tables
    pub alias_tables: BTreeMap<String, Vec<AliasGroup>>,
    pub critical_fields: Vec<String>,
    pub fields: Vec<FieldSpec>,
    /// Discrepancies at or above this severity always need review
    pub review_severity_threshold: Severity,
    /// Confidence at which an automatic resolution clears a non-critical
    /// factual discrepancy
    pub auto_accept_confidence: f64,
    /// Share of the quality score driven by field coverage (rest: mean confidence)
    pub coverage_weight: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        let trust_weights = CatalogKind::ALL
            .iter()
            .map(|c| (c.source_id().as_str().to_string(), c.default_trust_weight()))
            .collect();
        let source_priority = CatalogKind::ALL
            .iter()
            .map(|c| c.source_id().as_str().to_string())
            .collect();

        Self {
            consensus_threshold: 0.6,
            tie_epsilon: 0.05,
            default_trust_weight: 0.5,
            trust_weights,
            source_priority,
            alias_tables: BTreeMap::new(),
            critical_fields: vec!["title".to_string(), "release_year".to_string()],
            fields: default_movie_fields(),
            review_severity_threshold: Severity::Critical,
            auto_accept_confidence: 0.75,
            coverage_weight: 0.4,
        }
    }
}

/// Field catalogue of the default deployment
pub fn default_movie_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("title", FieldKind::Text, 3.0),
        FieldSpec::new("release_year", FieldKind::Year, 3.0),
        FieldSpec::new("release_date", FieldKind::Date, 1.5),
        FieldSpec::new("director", FieldKind::Text, 2.0),
        FieldSpec::new(
            "runtime_minutes",
            FieldKind::Runtime {
                tolerance_minutes: 1.0,
            },
            1.0,
        ),
        FieldSpec::new(
            "rating",
            FieldKind::Rating {
                scale: 10.0,
                tolerance: 0.3,
            },
            0.5,
        ),
        FieldSpec::new("synopsis", FieldKind::FreeText, 0.5),
    ]
}

impl VerificationConfig {
    /// Configured trust weight, or the default for unknown sources
    pub fn trust_weight(&self, source: &SourceId) -> f64 {
        self.trust_weights
            .get(source.as_str())
            .copied()
            .unwrap_or(self.default_trust_weight)
    }

    /// Sort key implementing the explicit source-priority order
    pub fn priority_key<'a>(&self, source: &'a SourceId) -> (usize, &'a str) {
        let rank = self
            .source_priority
            .iter()
            .position(|s| s == source.as_str())
            .unwrap_or(usize::MAX);
        (rank, source.as_str())
    }

    /// Catalogue entry for a field; unknown fields are treated as text of importance 1
    pub fn field_spec(&self, field: &str) -> FieldSpec {
        self.fields
            .iter()
            .find(|f| f.name == field)
            .cloned()
            .unwrap_or_else(|| FieldSpec::new(field, FieldKind::Text, 1.0))
    }

    pub fn is_critical(&self, field: &str) -> bool {
        self.critical_fields.iter().any(|f| f == field)
    }

    pub fn aliases_for(&self, field: &str) -> &[AliasGroup] {
        self.alias_tables
            .get(field)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn validate(&self) -> VerifyResult<()> {
        if !(self.consensus_threshold > 0.0 && self.consensus_threshold <= 1.0) {
            return Err(VerifyError::Config(format!(
                "consensus_threshold must be within (0, 1] (got {})",
                self.consensus_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.tie_epsilon) {
            return Err(VerifyError::Config(format!(
                "tie_epsilon must be within [0, 1) (got {})",
                self.tie_epsilon
            )));
        }
        check_unit("default_trust_weight", self.default_trust_weight)?;
        for (source, weight) in &self.trust_weights {
            check_unit(&format!("trust_weights.{}", source), *weight)?;
        }
        check_unit("auto_accept_confidence", self.auto_accept_confidence)?;
        check_unit("coverage_weight", self.coverage_weight)?;

        let mut seen = std::collections::BTreeSet::new();
        for source in &self.source_priority {
            if !seen.insert(source.as_str()) {
                return Err(VerifyError::Config(format!(
                    "source '{}' listed twice in source_priority",
                    source
                )));
            }
        }
        let mut names = std::collections::BTreeSet::new();
        for spec in &self.fields {
            if !names.insert(spec.name.as_str()) {
                return Err(VerifyError::Config(format!(
                    "field '{}' defined twice",
                    spec.name
                )));
            }
            if !spec.importance.is_finite() || spec.importance < 0.0 {
                return Err(VerifyError::Config(format!(
                    "field '{}' has invalid importance {}",
                    spec.name, spec.importance
                )));
            }
            match spec.kind {
                FieldKind::Rating { scale, .. } if !(scale.is_finite() && scale > 0.0) => {
                    return Err(VerifyError::Config(format!(
                        "field '{}' has invalid rating scale {}",
                        spec.name, scale
                    )));
                }
                _ if spec.kind.tolerance() < 0.0 || !spec.kind.tolerance().is_finite() => {
                    return Err(VerifyError::Config(format!(
                        "field '{}' has invalid tolerance",
                        spec.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> VerifyResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(VerifyError::Config(format!(
            "{} must be within [0, 1] (got {})",
            name, value
        )));
    }
    Ok(())
}

// ============================================================================
// Config file
// ============================================================================

/// Complete configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MmvConfig {
    pub fetch: FetchConfig,
    pub verification: VerificationConfig,
    pub logging: LoggingConfig,
    /// Directory for file-backed checkpoints
    pub checkpoint_dir: Option<PathBuf>,
}

impl MmvConfig {
    /// Load, apply environment overrides, and validate.
    pub fn load(path: Option<&Path>) -> VerifyResult<Self> {
        let resolved = resolve_config_path(path, CONFIG_ENV_VAR);
        let mut config: MmvConfig = load_toml_or_default(resolved.as_deref())?;
        config.apply_env_overrides()?;
        config.validate()?;
        info!(
            concurrency = config.fetch.concurrency,
            consensus_threshold = config.verification.consensus_threshold,
            fields = config.verification.fields.len(),
            "Verification configuration ready"
        );
        Ok(config)
    }

    /// `MMV_CONCURRENCY`, `MMV_CONSENSUS_THRESHOLD`, `MMV_LOG_LEVEL`,
    /// `MMV_CHECKPOINT_DIR`
    pub fn apply_env_overrides(&mut self) -> VerifyResult<()> {
        if let Some(concurrency) = env_override::<usize>("MMV_CONCURRENCY")? {
            self.fetch.concurrency = concurrency;
        }
        if let Some(threshold) = env_override::<f64>("MMV_CONSENSUS_THRESHOLD")? {
            self.verification.consensus_threshold = threshold;
        }
        if let Some(level) = env_override::<String>("MMV_LOG_LEVEL")? {
            self.logging.level = level;
        }
        if let Some(dir) = env_override::<PathBuf>("MMV_CHECKPOINT_DIR")? {
            self.checkpoint_dir = Some(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> VerifyResult<()> {
        self.fetch.validate()?;
        self.verification.validate()
    }
}
