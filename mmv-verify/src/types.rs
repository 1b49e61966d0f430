//! Core data contracts shared by the fetch, resolution, consensus and
//! report stages.
//!
//! Flow: `BatchFetcher` → [`SourceData`] per record → `ConsensusBuilder`
//! (using `ConflictResolver`) → [`ConsensusResult`] → report generator.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

// ============================================================================
// Sources
// ============================================================================

/// Identifier of one external catalog (e.g. "wikidata", "tmdb")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The catalogs of the default deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    /// Structured-knowledge graph
    KnowledgeGraph,
    /// Primary film database
    FilmDatabase,
    /// Alternate film database
    AltFilmDatabase,
    /// Encyclopedia infoboxes
    Encyclopedia,
    /// Internal store (user-editable, least trusted)
    InternalStore,
}

impl CatalogKind {
    /// Default priority order (first listed wins exact trust ties)
    pub const ALL: [CatalogKind; 5] = [
        CatalogKind::KnowledgeGraph,
        CatalogKind::FilmDatabase,
        CatalogKind::AltFilmDatabase,
        CatalogKind::Encyclopedia,
        CatalogKind::InternalStore,
    ];

    pub fn source_id(self) -> SourceId {
        SourceId::new(match self {
            CatalogKind::KnowledgeGraph => "wikidata",
            CatalogKind::FilmDatabase => "tmdb",
            CatalogKind::AltFilmDatabase => "omdb",
            CatalogKind::Encyclopedia => "wikipedia",
            CatalogKind::InternalStore => "internal",
        })
    }

    /// Default trust weight for this catalog
    pub fn default_trust_weight(self) -> f64 {
        match self {
            CatalogKind::KnowledgeGraph => 0.85,
            CatalogKind::FilmDatabase => 0.8,
            CatalogKind::AltFilmDatabase => 0.7,
            CatalogKind::Encyclopedia => 0.65,
            CatalogKind::InternalStore => 0.5,
        }
    }
}

// ============================================================================
// Observations
// ============================================================================

/// Canonical comparison form of one observed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NormalizedValue {
    /// Case/whitespace/punctuation-folded, alias-resolved text
    Text(String),
    /// Calendar date
    Date(NaiveDate),
    /// Calendar year
    Year(i32),
    /// Number in the field's canonical unit
    Number(f64),
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedValue::Text(s) => f.write_str(s),
            NormalizedValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            NormalizedValue::Year(y) => write!(f, "{}", y),
            NormalizedValue::Number(n) => write!(f, "{}", n),
        }
    }
}

/// What the normalizer had to do to reach the canonical form
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationNotes {
    /// Case or whitespace folding changed the value
    pub case_or_space: bool,
    /// Representation changed (punctuation, date layout, unit suffix)
    pub format: bool,
    /// Alias table mapped the value to a canonical form
    pub alias: bool,
    /// Value was rescaled into the canonical unit
    pub unit: bool,
    /// Value could not be parsed for the field's kind; kept as folded text
    pub unparsed: bool,
}

/// One observation of one field from one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceValue {
    pub source: SourceId,
    pub field: String,
    pub raw_value: String,
    pub normalized_value: NormalizedValue,
    /// Human-facing form of the value (alias canonical name, ISO date, ...)
    pub display_value: String,
    pub notes: NormalizationNotes,
    pub fetched_at: DateTime<Utc>,
}

/// A source that returned no usable data for a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsentSource {
    pub source: SourceId,
    /// `FetchError::kind()` of the final error, or "empty" for a payload without fields
    pub error_kind: String,
    pub message: String,
    pub attempts: u32,
}

/// Everything fetched for one record.
///
/// Owned by its fetch task until handed to the consensus builder, which
/// only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceData {
    pub record_id: String,
    pub values: Vec<SourceValue>,
    pub attempted_sources: Vec<SourceId>,
    pub absent_sources: Vec<AbsentSource>,
}

impl SourceData {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            values: Vec::new(),
            attempted_sources: Vec::new(),
            absent_sources: Vec::new(),
        }
    }

    /// Distinct field names observed across all sources (sorted)
    pub fn observed_fields(&self) -> BTreeSet<&str> {
        self.values.iter().map(|v| v.field.as_str()).collect()
    }

    /// All observations for one field, in stored order
    pub fn values_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a SourceValue> + 'a {
        self.values.iter().filter(move |v| v.field == field)
    }

    /// Distinct sources that contributed at least one value (sorted)
    pub fn responding_sources(&self) -> Vec<SourceId> {
        let set: BTreeSet<&SourceId> = self.values.iter().map(|v| &v.source).collect();
        set.into_iter().cloned().collect()
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// How the sources' normalized values cluster for one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgreementLevel {
    /// One bucket, two or more sources
    Unanimous,
    /// One bucket holds at least the consensus threshold share
    Majority,
    /// Exactly one source observed the field
    SingleSource,
    /// No bucket meets the threshold
    Split,
    /// No source observed the field
    NoData,
}

/// Rule that produced a field's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMethod {
    Unanimous,
    Majority,
    SingleSource,
    TrustWeighted,
    /// Top candidates too close to call; no value emitted
    ManualRequired,
    NoData,
}

/// The single resolved outcome for one field of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedField {
    pub field: String,
    /// Display form of the winning value; `None` for manual-required and no-data
    pub value: Option<String>,
    pub normalized_value: Option<NormalizedValue>,
    pub method: ResolutionMethod,
    pub agreement_level: AgreementLevel,
    pub confidence: f64,
    /// Sources whose values landed in the winning bucket (all observing
    /// sources when no value was emitted), in priority order
    pub contributing_sources: Vec<SourceId>,
    /// Every source that observed the field, in priority order
    pub observed_sources: Vec<SourceId>,
}

impl ResolvedField {
    pub fn no_data(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: None,
            normalized_value: None,
            method: ResolutionMethod::NoData,
            agreement_level: AgreementLevel::NoData,
            confidence: 0.0,
            contributing_sources: Vec::new(),
            observed_sources: Vec::new(),
        }
    }

    pub fn is_manual_required(&self) -> bool {
        self.method == ResolutionMethod::ManualRequired
    }

    pub fn has_data(&self) -> bool {
        self.agreement_level != AgreementLevel::NoData
    }
}

// ============================================================================
// Discrepancies
// ============================================================================

/// Why sources disagreed on a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyClass {
    /// Name variants reconciled by an alias entry or differing only in word order
    Alias,
    /// Representation only: punctuation, date layout, unit suffix
    Format,
    /// Same quantity on different scales
    Unit,
    /// Real disagreement about the fact
    Factual,
    /// Values could not be compared (unparseable for the field's kind)
    Unknown,
}

/// Review priority of a discrepancy, ordered low to high
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// One side of a disagreement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictingValue {
    pub source: SourceId,
    pub raw_value: String,
    pub normalized_value: NormalizedValue,
}

/// A detected, classified disagreement on one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub field: String,
    pub conflicting_values: Vec<ConflictingValue>,
    pub classification: DiscrepancyClass,
    pub severity: Severity,
    pub auto_resolved: bool,
    pub resolution_method: ResolutionMethod,
}

/// Consensus outcome for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub record_id: String,
    pub resolved_fields: Vec<ResolvedField>,
    pub discrepancies: Vec<Discrepancy>,
    pub overall_confidence: f64,
    pub needs_review: bool,
    pub sources_used: Vec<SourceId>,
    pub absent_sources: Vec<AbsentSource>,
}

impl ConsensusResult {
    pub fn field(&self, name: &str) -> Option<&ResolvedField> {
        self.resolved_fields.iter().find(|f| f.field == name)
    }

    pub fn discrepancy(&self, field: &str) -> Option<&Discrepancy> {
        self.discrepancies.iter().find(|d| d.field == field)
    }
}

// ============================================================================
// Batch bookkeeping
// ============================================================================

/// Durable record of which records a batch has finished.
///
/// Persisted as `{"batchId": .., "processedIds": [..], "timestamp": ..}`.
/// Ids keep their completion order; a set alongside answers membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "CheckpointFile")]
pub struct Checkpoint {
    pub batch_id: String,
    processed_ids: Vec<String>,
    /// Last update, serialized as ISO 8601
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    processed: HashSet<String>,
}

/// On-disk checkpoint shape; loading rebuilds the membership set
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointFile {
    batch_id: String,
    processed_ids: Vec<String>,
    timestamp: DateTime<Utc>,
}

impl From<CheckpointFile> for Checkpoint {
    fn from(file: CheckpointFile) -> Self {
        let mut checkpoint = Checkpoint {
            batch_id: file.batch_id,
            processed_ids: Vec::with_capacity(file.processed_ids.len()),
            timestamp: file.timestamp,
            processed: HashSet::with_capacity(file.processed_ids.len()),
        };
        for id in file.processed_ids {
            if checkpoint.processed.insert(id.clone()) {
                checkpoint.processed_ids.push(id);
            }
        }
        checkpoint
    }
}

impl PartialEq for Checkpoint {
    fn eq(&self, other: &Self) -> bool {
        self.batch_id == other.batch_id
            && self.processed_ids == other.processed_ids
            && self.timestamp == other.timestamp
    }
}

impl Eq for Checkpoint {}

impl Checkpoint {
    pub fn new(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            processed_ids: Vec::new(),
            timestamp: Utc::now(),
            processed: HashSet::new(),
        }
    }

    /// Processed ids in completion order
    pub fn processed_ids(&self) -> &[String] {
        &self.processed_ids
    }

    pub fn contains(&self, record_id: &str) -> bool {
        self.processed.contains(record_id)
    }

    /// Append a processed id (idempotent) and refresh the timestamp
    pub fn mark_processed(&mut self, record_id: &str) {
        if self.processed.insert(record_id.to_string()) {
            self.processed_ids.push(record_id.to_string());
        }
        self.timestamp = Utc::now();
    }
}

/// Batch progress, owned by the fetch coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: usize,
    /// Records whose fetch set finished this run (success or failure)
    pub completed: usize,
    /// Subset of `completed` with zero usable sources
    pub failed: usize,
    /// Records skipped because the loaded checkpoint listed them
    pub skipped: usize,
    pub checkpoint: Checkpoint,
}

impl BatchProgress {
    pub fn new(total: usize, checkpoint: Checkpoint) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
            skipped: 0,
            checkpoint,
        }
    }

    /// Records neither completed this run nor skipped
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed + self.skipped)
    }
}

/// Why a record produced no consensus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnverifiableReason {
    AllSourcesFailed,
}

impl fmt::Display for UnverifiableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnverifiableReason::AllSourcesFailed => f.write_str("AllSourcesFailed"),
        }
    }
}

/// A record reported separately because it cannot be verified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnverifiableRecord {
    pub record_id: String,
    pub reason: UnverifiableReason,
    pub source_failures: Vec<AbsentSource>,
}

/// Outcome of one record's fetch set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordFetchResult {
    Fetched(SourceData),
    Unverifiable(UnverifiableRecord),
}

impl RecordFetchResult {
    pub fn record_id(&self) -> &str {
        match self {
            RecordFetchResult::Fetched(data) => &data.record_id,
            RecordFetchResult::Unverifiable(record) => &record.record_id,
        }
    }

    pub fn is_unverifiable(&self) -> bool {
        matches!(self, RecordFetchResult::Unverifiable(_))
    }
}
