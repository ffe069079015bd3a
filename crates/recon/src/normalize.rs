//! Record normalizer: raw string rows into typed, canonical records.
//!
//! Rows that miss a mandatory field or carry an unparseable value are
//! rejected with a [`SchemaViolation`] and excluded from matching. The run
//! itself keeps going.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;

use crate::config::{FieldSpec, FieldType, ReconConfig, SideConfig};
use crate::model::{CompositeKey, InvalidField, RawRow, Record, SchemaViolation, Side, Value};

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Round to `scale` places, midpoint away from zero, and pin the scale so
/// `50` and `50.00` render identically.
pub fn normalize_decimal(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}

/// Parse a financial number string:
/// - Strip currency symbols, commas, whitespace
/// - Handle `(123.45)` → `-123.45`
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    let (negative, body) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };
    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let value = Decimal::from_str(&cleaned).ok()?;
    Some(if negative { -value } else { value })
}

fn parse_integer(raw: &str) -> Option<i64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse().ok()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
}

/// Canonical string form of a value used inside comparison keys.
fn key_part(value: &Value) -> String {
    value.to_string()
}

/// Converts raw rows of one side into canonical [`Record`]s.
pub struct Normalizer<'c> {
    side: Side,
    config: &'c ReconConfig,
    side_config: &'c SideConfig,
}

impl<'c> Normalizer<'c> {
    pub fn new(config: &'c ReconConfig, side: Side) -> Self {
        let side_config = match side {
            Side::Source => &config.source,
            Side::Target => &config.target,
        };
        Self {
            side,
            config,
            side_config,
        }
    }

    /// Normalize one row. Every missing or invalid field is reported at once.
    pub fn normalize(&self, row: &RawRow) -> Result<Record, SchemaViolation> {
        let scale = self.config.normalize.decimal_scale;
        let mut fields = BTreeMap::new();
        let mut missing_fields = Vec::new();
        let mut invalid_fields = Vec::new();

        for (name, spec) in &self.config.schema.fields {
            let column = self.side_config.column_for(name);
            match row.get(column) {
                None => {
                    if spec.mandatory {
                        missing_fields.push(name.clone());
                    }
                    fields.insert(name.clone(), Value::Null);
                }
                Some(raw) => match parse_value(raw, spec, scale) {
                    Some(value) => {
                        fields.insert(name.clone(), value);
                    }
                    None => invalid_fields.push(InvalidField {
                        field: name.clone(),
                        value: raw.to_string(),
                        expected: expected_label(spec),
                    }),
                },
            }
        }

        let record_id = row
            .get(self.side_config.column_for(&self.side_config.record_id))
            .map(str::to_string);

        if !missing_fields.is_empty() || !invalid_fields.is_empty() {
            return Err(SchemaViolation {
                side: self.side,
                line: row.line,
                record_id,
                missing_fields,
                invalid_fields,
            });
        }

        let key = CompositeKey(
            self.config
                .matching
                .comparison_key
                .iter()
                .map(|f| fields.get(f).map(key_part).unwrap_or_default())
                .collect(),
        );

        Ok(Record {
            side: self.side,
            line: row.line,
            // record_id is a mandatory field, so it is present here.
            record_id: record_id.unwrap_or_default(),
            key,
            fields,
        })
    }

    /// Normalize every row, splitting accepted records from violations.
    pub fn normalize_all(&self, rows: &[RawRow]) -> (Vec<Record>, Vec<SchemaViolation>) {
        let mut records = Vec::with_capacity(rows.len());
        let mut violations = Vec::new();
        for row in rows {
            match self.normalize(row) {
                Ok(record) => records.push(record),
                Err(violation) => {
                    warn!(%violation, "row rejected");
                    violations.push(violation);
                }
            }
        }
        (records, violations)
    }
}

fn parse_value(raw: &str, spec: &FieldSpec, scale: u32) -> Option<Value> {
    match spec.field_type {
        FieldType::String => Some(Value::Text(raw.to_string())),
        FieldType::Enum => {
            let canonical = raw.to_uppercase();
            let allowed = spec.values.is_empty()
                || spec.values.iter().any(|v| v.trim().eq_ignore_ascii_case(&canonical));
            allowed.then_some(Value::Text(canonical))
        }
        FieldType::Integer => parse_integer(raw).map(Value::Integer),
        FieldType::Decimal => parse_decimal(raw).map(|d| Value::Decimal(normalize_decimal(d, scale))),
        FieldType::Date => parse_date(raw).map(Value::Date),
    }
}

fn expected_label(spec: &FieldSpec) -> String {
    if spec.field_type == FieldType::Enum && !spec.values.is_empty() {
        format!("one of {}", spec.values.join("|"))
    } else {
        spec.field_type.to_string()
    }
}
