use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::DataProfile;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    Target,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// A single raw row, keyed by column header.
#[derive(Debug, Clone)]
pub struct RawRow {
    /// 1-based data line (header excluded).
    pub line: usize,
    pub values: HashMap<String, String>,
}

impl RawRow {
    /// Trimmed value for `column`, `None` when absent or blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Identifiers of the input snapshot a run was computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_digest: Option<String>,
}

/// Pre-loaded raw rows for both sides.
#[derive(Debug, Clone, Default)]
pub struct ReconInput {
    pub source: Vec<RawRow>,
    pub target: Vec<RawRow>,
    pub snapshot: SnapshotIds,
}

// ---------------------------------------------------------------------------
// Canonical records
// ---------------------------------------------------------------------------

/// Canonical typed value. Decimals are already at the configured scale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Date(NaiveDate),
    Null,
}

impl Value {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Integer(i) => Some(Decimal::from(*i)),
            Self::Text(_) | Self::Date(_) | Self::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Null => Ok(()),
        }
    }
}

/// Ordered comparison-key values in canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CompositeKey(pub Vec<String>);

impl std::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("|"))
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    pub side: Side,
    pub line: usize,
    pub record_id: String,
    pub key: CompositeKey,
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn value(&self, field: &str) -> &Value {
        self.fields.get(field).unwrap_or(&Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Validation findings (returned as data, never abort a run)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidField {
    pub field: String,
    pub value: String,
    pub expected: String,
}

/// A raw row rejected by the normalizer. The row is excluded from matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{side} line {line}{}: schema violation (missing: [{}], invalid: [{}])",
    id_suffix(.record_id), .missing_fields.join(", "), field_names(.invalid_fields))]
pub struct SchemaViolation {
    pub side: Side,
    pub line: usize,
    pub record_id: Option<String>,
    pub missing_fields: Vec<String>,
    pub invalid_fields: Vec<InvalidField>,
}

fn id_suffix(record_id: &Option<String>) -> String {
    record_id
        .as_deref()
        .map(|id| format!(" ('{id}')"))
        .unwrap_or_default()
}

fn field_names(fields: &[InvalidField]) -> String {
    fields
        .iter()
        .map(|f| f.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A comparison key held by more than one record on one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateKeyWarning {
    pub side: Side,
    pub key: CompositeKey,
    pub count: usize,
    pub record_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct MatchedPair<'a> {
    pub source: &'a Record,
    pub target: &'a Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    SourceOnly,
    TargetOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct UnmatchedRecord<'a> {
    pub record: &'a Record,
    pub origin: Origin,
}

#[derive(Debug, Default)]
pub struct MatchOutput<'a> {
    pub matched: Vec<MatchedPair<'a>>,
    pub source_only: Vec<UnmatchedRecord<'a>>,
    pub target_only: Vec<UnmatchedRecord<'a>>,
    pub duplicate_keys: Vec<DuplicateKeyWarning>,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    Ok,
    AmountMismatch,
    StatusMismatch,
    FieldMismatch,
    MissingInTarget,
    PhantomInTarget,
}

impl DiscrepancyKind {
    pub const ALL: [DiscrepancyKind; 6] = [
        Self::Ok,
        Self::AmountMismatch,
        Self::StatusMismatch,
        Self::FieldMismatch,
        Self::MissingInTarget,
        Self::PhantomInTarget,
    ];

    pub fn is_break(self) -> bool {
        !matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::AmountMismatch => write!(f, "AMOUNT_MISMATCH"),
            Self::StatusMismatch => write!(f, "STATUS_MISMATCH"),
            Self::FieldMismatch => write!(f, "FIELD_MISMATCH"),
            Self::MissingInTarget => write!(f, "MISSING_IN_TARGET"),
            Self::PhantomInTarget => write!(f, "PHANTOM_IN_TARGET"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldConflict {
    pub field: String,
    pub source: Value,
    pub target: Value,
}

/// The identifying slice of one side of a classified item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRef {
    pub record_id: String,
    pub line: usize,
    pub group: String,
    pub amount: Decimal,
}

/// Outcome for one matched pair or unmatched record. `kind == Ok` is the
/// explicit non-discrepancy marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub severity: Severity,
    pub comparison_key: CompositeKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<RecordRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<RecordRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields_in_conflict: Vec<FieldConflict>,
}

impl Discrepancy {
    /// Group a kind is attributed to: the source record's group when present.
    pub fn attributed_group(&self) -> &str {
        self.source
            .as_ref()
            .or(self.target.as_ref())
            .map(|r| r.group.as_str())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub ok: usize,
    pub amount_mismatch: usize,
    pub status_mismatch: usize,
    pub field_mismatch: usize,
    pub missing_in_target: usize,
    pub phantom_in_target: usize,
}

impl KindCounts {
    pub fn bump(&mut self, kind: DiscrepancyKind) {
        *self.slot(kind) += 1;
    }

    pub fn get(&self, kind: DiscrepancyKind) -> usize {
        match kind {
            DiscrepancyKind::Ok => self.ok,
            DiscrepancyKind::AmountMismatch => self.amount_mismatch,
            DiscrepancyKind::StatusMismatch => self.status_mismatch,
            DiscrepancyKind::FieldMismatch => self.field_mismatch,
            DiscrepancyKind::MissingInTarget => self.missing_in_target,
            DiscrepancyKind::PhantomInTarget => self.phantom_in_target,
        }
    }

    pub fn total(&self) -> usize {
        DiscrepancyKind::ALL.iter().map(|k| self.get(*k)).sum()
    }

    pub fn breaks(&self) -> usize {
        self.total() - self.ok
    }

    fn slot(&mut self, kind: DiscrepancyKind) -> &mut usize {
        match kind {
            DiscrepancyKind::Ok => &mut self.ok,
            DiscrepancyKind::AmountMismatch => &mut self.amount_mismatch,
            DiscrepancyKind::StatusMismatch => &mut self.status_mismatch,
            DiscrepancyKind::FieldMismatch => &mut self.field_mismatch,
            DiscrepancyKind::MissingInTarget => &mut self.missing_in_target,
            DiscrepancyKind::PhantomInTarget => &mut self.phantom_in_target,
        }
    }
}

/// Group-level verdict. Declaration order is the report sort precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    MissingInTarget,
    MissingInSource,
    Variance,
    Matched,
}

impl std::fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingInTarget => write!(f, "MISSING_IN_TARGET"),
            Self::MissingInSource => write!(f, "MISSING_IN_SOURCE"),
            Self::Variance => write!(f, "VARIANCE"),
            Self::Matched => write!(f, "MATCHED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group: String,
    pub source_count: usize,
    pub target_count: usize,
    pub source_total: Decimal,
    pub target_total: Decimal,
    /// `source_total - target_total`.
    pub variance: Decimal,
    pub kinds: KindCounts,
    pub status: ReconciliationStatus,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub recon_name: String,
    pub engine_version: String,
    pub run_timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,
    pub snapshot: SnapshotIds,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub source_rows: usize,
    pub target_rows: usize,
    pub source_records: usize,
    pub target_records: usize,
    pub rejected_source: usize,
    pub rejected_target: usize,
    pub matched_pairs: usize,
    pub source_only: usize,
    pub target_only: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputProfiles {
    pub source: DataProfile,
    pub target: DataProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconReport {
    pub meta: ReconMeta,
    pub stats: RunStats,
    pub kinds: KindCounts,
    pub groups: Vec<GroupSummary>,
    pub discrepancies: Vec<Discrepancy>,
    pub schema_violations: Vec<SchemaViolation>,
    pub duplicate_keys: Vec<DuplicateKeyWarning>,
    pub profiles: InputProfiles,
}

impl ReconReport {
    /// True when there are no breaks and every group is MATCHED.
    pub fn is_reconciled(&self) -> bool {
        self.kinds.breaks() == 0
            && self
                .groups
                .iter()
                .all(|g| g.status == ReconciliationStatus::Matched)
    }

    pub fn breaks(&self) -> impl Iterator<Item = &Discrepancy> {
        self.discrepancies.iter().filter(|d| d.kind.is_break())
    }
}
