use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ReconError;

/// Largest scale `rust_decimal` can represent.
const MAX_DECIMAL_SCALE: u32 = 28;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    pub name: String,
    /// Snapshot identifier of the inputs, recorded with every audit entry.
    #[serde(default)]
    pub load_date: Option<NaiveDate>,
    pub schema: SchemaConfig,
    pub source: SideConfig,
    pub target: SideConfig,
    pub matching: MatchingConfig,
    /// Classification rules in precedence order. First differing rule wins.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub severity: SeverityConfig,
    #[serde(default)]
    pub audit: Option<AuditConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    pub fields: BTreeMap<String, FieldSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mandatory: bool,
    /// Allowed values for `enum` fields. Empty means any value.
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Decimal,
    Date,
    Enum,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Decimal)
    }

    pub fn is_categorical(self) -> bool {
        matches!(self, Self::String | Self::Enum)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Decimal => write!(f, "decimal"),
            Self::Date => write!(f, "date"),
            Self::Enum => write!(f, "enum"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sides
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SideConfig {
    /// Human label for the dataset (e.g. "lake", "reporting").
    #[serde(default)]
    pub label: Option<String>,
    pub file: String,
    /// Schema field holding the unique record id.
    pub record_id: String,
    /// Canonical field name -> column header. Unlisted fields use their own name.
    #[serde(default)]
    pub columns: HashMap<String, String>,
}

impl SideConfig {
    /// Column header carrying `field` on this side.
    pub fn column_for<'a>(&'a self, field: &'a str) -> &'a str {
        self.columns.get(field).map(String::as_str).unwrap_or(field)
    }
}

// ---------------------------------------------------------------------------
// Matching + rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    pub comparison_key: Vec<String>,
    pub comparable_fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub kind: RuleKind,
    pub field: String,
    #[serde(default)]
    pub tolerance: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Amount,
    Status,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amount => write!(f, "amount"),
            Self::Status => write!(f, "status"),
        }
    }
}

// ---------------------------------------------------------------------------
// Grouping, normalization, severity, audit, output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GroupingConfig {
    pub key: String,
    pub amount_field: String,
    #[serde(default)]
    pub tolerance: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeConfig {
    #[serde(default = "default_decimal_scale")]
    pub decimal_scale: u32,
}

fn default_decimal_scale() -> u32 {
    2
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            decimal_scale: default_decimal_scale(),
        }
    }
}

/// Absolute-amount thresholds for `medium` and `high` severity.
#[derive(Debug, Clone, Deserialize)]
pub struct SeverityConfig {
    #[serde(default = "default_medium")]
    pub medium: Decimal,
    #[serde(default = "default_high")]
    pub high: Decimal,
}

fn default_medium() -> Decimal {
    Decimal::new(10000, 2)
}

fn default_high() -> Decimal {
    Decimal::new(100000, 2)
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            medium: default_medium(),
            high: default_high(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub json: Option<String>,
    /// Keep OK markers in the serialized discrepancy list.
    #[serde(default)]
    pub include_ok: bool,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Full validation: structure first, then tolerances and precedence.
    pub fn validate(&self) -> Result<(), ReconError> {
        self.validate_structure()?;
        self.validate_rules()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.schema.fields.get(name)
    }

    fn declared(&self, what: &str, name: &str) -> Result<&FieldSpec, ReconError> {
        self.field(name).ok_or_else(|| {
            ReconError::ConfigValidation(format!("{what} '{name}' is not declared in [schema.fields]"))
        })
    }

    fn require_mandatory(&self, what: &str, name: &str) -> Result<(), ReconError> {
        if !self.declared(what, name)?.mandatory {
            return Err(ReconError::ConfigValidation(format!(
                "{what} '{name}' must be declared mandatory"
            )));
        }
        Ok(())
    }

    fn validate_structure(&self) -> Result<(), ReconError> {
        if self.name.trim().is_empty() {
            return Err(ReconError::ConfigValidation("name must not be empty".into()));
        }
        if self.schema.fields.is_empty() {
            return Err(ReconError::ConfigValidation(
                "[schema.fields] must declare at least one field".into(),
            ));
        }
        for (name, spec) in &self.schema.fields {
            if !spec.values.is_empty() && spec.field_type != FieldType::Enum {
                return Err(ReconError::ConfigValidation(format!(
                    "field '{name}': allowed values only apply to enum fields, not {}",
                    spec.field_type
                )));
            }
        }

        if self.normalize.decimal_scale > MAX_DECIMAL_SCALE {
            return Err(ReconError::ConfigValidation(format!(
                "decimal_scale must be at most {MAX_DECIMAL_SCALE}, got {}",
                self.normalize.decimal_scale
            )));
        }

        self.require_mandatory("source record_id", &self.source.record_id)?;
        self.require_mandatory("target record_id", &self.target.record_id)?;

        if self.matching.comparison_key.is_empty() {
            return Err(ReconError::ConfigValidation(
                "matching.comparison_key must list at least one field".into(),
            ));
        }
        for key in &self.matching.comparison_key {
            self.require_mandatory("comparison key field", key)?;
        }

        if self.matching.comparable_fields.is_empty() {
            return Err(ReconError::ConfigValidation(
                "matching.comparable_fields must list at least one field".into(),
            ));
        }
        let mut seen = HashSet::new();
        for field in &self.matching.comparable_fields {
            self.declared("comparable field", field)?;
            if !seen.insert(field.as_str()) {
                return Err(ReconError::ConfigValidation(format!(
                    "comparable field '{field}' listed more than once"
                )));
            }
        }

        self.require_mandatory("grouping key", &self.grouping.key)?;
        let amount = self.declared("grouping amount_field", &self.grouping.amount_field)?;
        if !amount.field_type.is_numeric() {
            return Err(ReconError::ConfigValidation(format!(
                "grouping amount_field '{}' must be integer or decimal, not {}",
                self.grouping.amount_field, amount.field_type
            )));
        }

        Ok(())
    }

    fn validate_rules(&self) -> Result<(), ReconError> {
        let mut ruled = HashSet::new();
        let mut first_status = None;
        for (i, rule) in self.rules.iter().enumerate() {
            let pos = i + 1;
            if !self.matching.comparable_fields.contains(&rule.field) {
                return Err(ReconError::ToleranceConfig(format!(
                    "rule #{pos} ({}): field '{}' is not a comparable field",
                    rule.kind, rule.field
                )));
            }
            if !ruled.insert(rule.field.as_str()) {
                return Err(ReconError::ToleranceConfig(format!(
                    "rule #{pos} ({}): field '{}' already governed by an earlier rule",
                    rule.kind, rule.field
                )));
            }
            let spec = self.declared("rule field", &rule.field)?;
            match rule.kind {
                RuleKind::Amount => {
                    // Numeric mismatches outrank status ones.
                    if let Some(status_pos) = first_status {
                        return Err(ReconError::ToleranceConfig(format!(
                            "rule #{pos} (amount) must precede status rule #{status_pos}"
                        )));
                    }
                    if !spec.field_type.is_numeric() {
                        return Err(ReconError::ToleranceConfig(format!(
                            "rule #{pos} (amount): field '{}' is {}, expected integer or decimal",
                            rule.field, spec.field_type
                        )));
                    }
                    if let Some(tol) = rule.tolerance {
                        if tol < Decimal::ZERO {
                            return Err(ReconError::ToleranceConfig(format!(
                                "rule #{pos} (amount): tolerance must not be negative, got {tol}"
                            )));
                        }
                    }
                }
                RuleKind::Status => {
                    first_status.get_or_insert(pos);
                    if !spec.field_type.is_categorical() {
                        return Err(ReconError::ToleranceConfig(format!(
                            "rule #{pos} (status): field '{}' is {}, expected string or enum",
                            rule.field, spec.field_type
                        )));
                    }
                    if rule.tolerance.is_some() {
                        return Err(ReconError::ToleranceConfig(format!(
                            "rule #{pos} (status): tolerance is not allowed on categorical field '{}'",
                            rule.field
                        )));
                    }
                }
            }
        }

        if self.grouping.tolerance < Decimal::ZERO {
            return Err(ReconError::ToleranceConfig(format!(
                "grouping tolerance must not be negative, got {}",
                self.grouping.tolerance
            )));
        }
        if self.severity.medium < Decimal::ZERO || self.severity.high < Decimal::ZERO {
            return Err(ReconError::ToleranceConfig(
                "severity thresholds must not be negative".into(),
            ));
        }
        if self.severity.medium > self.severity.high {
            return Err(ReconError::ToleranceConfig(format!(
                "severity.medium ({}) must not exceed severity.high ({})",
                self.severity.medium, self.severity.high
            )));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const VALID: &str = r#"
name = "Incentive settlement"
load_date = "2026-01-31"

[schema.fields]
transaction_id   = { type = "string", mandatory = true }
program_code     = { type = "enum", mandatory = true }
incentive_amount = { type = "decimal", mandatory = true }
status           = { type = "enum", mandatory = true, values = ["SETTLED", "PENDING", "ERROR", "CANCELLED"] }
partner_id       = { type = "string" }

[source]
label = "lake"
file = "source.csv"
record_id = "transaction_id"

[source.columns]
incentive_amount = "amount"

[target]
file = "target.csv"
record_id = "transaction_id"

[matching]
comparison_key = ["transaction_id"]
comparable_fields = ["incentive_amount", "status", "partner_id"]

[[rules]]
kind = "amount"
field = "incentive_amount"
tolerance = "0.00"

[[rules]]
kind = "status"
field = "status"

[grouping]
key = "program_code"
amount_field = "incentive_amount"
"#;

    #[test]
    fn parse_valid() {
        let config = ReconConfig::from_toml(VALID).unwrap();
        assert_eq!(config.name, "Incentive settlement");
        assert_eq!(config.load_date, NaiveDate::from_ymd_opt(2026, 1, 31));
        assert_eq!(config.schema.fields.len(), 5);
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].kind, RuleKind::Amount);
        assert_eq!(config.rules[0].tolerance, Some(Decimal::ZERO));
        assert_eq!(config.normalize.decimal_scale, 2);
        assert_eq!(config.severity.medium, Decimal::new(100, 0));
        assert_eq!(config.grouping.tolerance, Decimal::ZERO);
        assert!(config.audit.is_none());
    }

    #[test]
    fn column_mapping_falls_back_to_field_name() {
        let config = ReconConfig::from_toml(VALID).unwrap();
        assert_eq!(config.source.column_for("incentive_amount"), "amount");
        assert_eq!(config.source.column_for("status"), "status");
        assert_eq!(config.target.column_for("incentive_amount"), "incentive_amount");
    }

    #[test]
    fn reject_unknown_field_type() {
        let input = VALID.replace(r#"partner_id       = { type = "string" }"#, r#"partner_id = { type = "uuid" }"#);
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }

    #[test]
    fn reject_undeclared_comparable_field() {
        let input = VALID.replace(
            r#"comparable_fields = ["incentive_amount", "status", "partner_id"]"#,
            r#"comparable_fields = ["incentive_amount", "status", "region"]"#,
        );
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
        assert!(err.to_string().contains("'region'"));
    }

    #[test]
    fn reject_optional_comparison_key() {
        let input = VALID.replace(
            r#"comparison_key = ["transaction_id"]"#,
            r#"comparison_key = ["transaction_id", "partner_id"]"#,
        );
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("must be declared mandatory"));
    }

    #[test]
    fn reject_negative_tolerance() {
        let input = VALID.replace(r#"tolerance = "0.00""#, r#"tolerance = "-0.01""#);
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ToleranceConfig(_)));
    }

    #[test]
    fn reject_amount_rule_on_categorical_field() {
        let input = VALID.replace(
            "kind = \"amount\"\nfield = \"incentive_amount\"",
            "kind = \"amount\"\nfield = \"partner_id\"",
        );
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ToleranceConfig(_)));
        assert!(err.to_string().contains("expected integer or decimal"));
    }

    #[test]
    fn reject_rule_on_non_comparable_field() {
        let input = VALID.replace(
            "kind = \"status\"\nfield = \"status\"",
            "kind = \"status\"\nfield = \"program_code\"",
        );
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ToleranceConfig(_)));
        assert!(err.to_string().contains("not a comparable field"));
    }

    #[test]
    fn reject_duplicate_rule_field() {
        let input = VALID.replace(
            "[grouping]",
            "[[rules]]\nkind = \"amount\"\nfield = \"incentive_amount\"\n\n[grouping]",
        );
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ToleranceConfig(_)));
        assert!(err.to_string().contains("already governed"));
    }

    #[test]
    fn reject_status_rule_ahead_of_amount_rule() {
        let input = VALID.replace(
            "[[rules]]\nkind = \"amount\"\nfield = \"incentive_amount\"\ntolerance = \"0.00\"\n\n[[rules]]\nkind = \"status\"\nfield = \"status\"\n",
            "[[rules]]\nkind = \"status\"\nfield = \"status\"\n\n[[rules]]\nkind = \"amount\"\nfield = \"incentive_amount\"\n",
        );
        assert_ne!(input, VALID);
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ToleranceConfig(_)));
        assert!(err.to_string().contains("rule #2 (amount) must precede status rule #1"));
    }

    #[test]
    fn reject_inverted_severity_thresholds() {
        let input = format!("{VALID}\n[severity]\nmedium = \"500.00\"\nhigh = \"10.00\"\n");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(matches!(err, ReconError::ToleranceConfig(_)));
    }

    #[test]
    fn reject_values_on_non_enum() {
        let input = VALID.replace(
            r#"partner_id       = { type = "string" }"#,
            r#"partner_id = { type = "string", values = ["A"] }"#,
        );
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("only apply to enum fields"));
    }

    #[test]
    fn reject_scale_overflow() {
        let input = format!("{VALID}\n[normalize]\ndecimal_scale = 40\n");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("decimal_scale"));
    }
}
