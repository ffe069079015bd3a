use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::config::{ReconConfig, RuleKind, SeverityConfig};
use crate::error::ReconError;
use crate::model::{
    Discrepancy, DiscrepancyKind, FieldConflict, MatchOutput, MatchedPair, Origin, Record,
    RecordRef, Severity, UnmatchedRecord,
};

#[derive(Debug, Clone)]
struct Rule {
    kind: RuleKind,
    field: String,
}

/// Assigns exactly one [`DiscrepancyKind`] to every matched pair and
/// unmatched record. Rules are evaluated in declared order; config
/// validation guarantees amount rules come before status rules.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
    comparable_fields: Vec<String>,
    /// Per-field numeric tolerance, from amount rules.
    tolerances: HashMap<String, Decimal>,
    grouping_key: String,
    amount_field: String,
    severity: SeverityConfig,
}

impl Classifier {
    /// Build from a config. Invalid tolerances or precedence are fatal here.
    pub fn from_config(config: &ReconConfig) -> Result<Self, ReconError> {
        config.validate()?;

        let rules = config
            .rules
            .iter()
            .map(|r| Rule {
                kind: r.kind,
                field: r.field.clone(),
            })
            .collect();

        let tolerances = config
            .rules
            .iter()
            .filter(|r| r.kind == RuleKind::Amount)
            .map(|r| (r.field.clone(), r.tolerance.unwrap_or(Decimal::ZERO)))
            .collect();

        Ok(Self {
            rules,
            comparable_fields: config.matching.comparable_fields.clone(),
            tolerances,
            grouping_key: config.grouping.key.clone(),
            amount_field: config.grouping.amount_field.clone(),
            severity: config.severity.clone(),
        })
    }

    /// Classify a matched pair by comparing every comparable field.
    pub fn classify_pair(&self, pair: &MatchedPair<'_>) -> Discrepancy {
        let conflicts: Vec<FieldConflict> = self
            .comparable_fields
            .iter()
            .filter(|f| self.differs(f, pair.source, pair.target))
            .map(|f| FieldConflict {
                field: f.clone(),
                source: pair.source.value(f).clone(),
                target: pair.target.value(f).clone(),
            })
            .collect();

        let (kind, severity) = if conflicts.is_empty() {
            (DiscrepancyKind::Ok, Severity::None)
        } else {
            let deciding = self
                .rules
                .iter()
                .find(|rule| conflicts.iter().any(|c| c.field == rule.field));
            match deciding {
                Some(rule) => match rule.kind {
                    RuleKind::Amount => {
                        let delta = numeric_delta(pair.source, pair.target, &rule.field);
                        (DiscrepancyKind::AmountMismatch, self.grade(delta))
                    }
                    RuleKind::Status => (DiscrepancyKind::StatusMismatch, Severity::Low),
                },
                None => (DiscrepancyKind::FieldMismatch, Severity::Low),
            }
        };

        Discrepancy {
            kind,
            severity,
            comparison_key: pair.source.key.clone(),
            source: Some(self.record_ref(pair.source)),
            target: Some(self.record_ref(pair.target)),
            fields_in_conflict: conflicts,
        }
    }

    /// Classify a one-sided record by presence alone; no field comparison.
    pub fn classify_unmatched(&self, unmatched: &UnmatchedRecord<'_>) -> Discrepancy {
        let record_ref = self.record_ref(unmatched.record);
        let severity = self.grade(record_ref.amount.abs());
        let (kind, source, target) = match unmatched.origin {
            Origin::SourceOnly => (DiscrepancyKind::MissingInTarget, Some(record_ref), None),
            Origin::TargetOnly => (DiscrepancyKind::PhantomInTarget, None, Some(record_ref)),
        };
        Discrepancy {
            kind,
            severity,
            comparison_key: unmatched.record.key.clone(),
            source,
            target,
            fields_in_conflict: Vec::new(),
        }
    }

    /// Lazily classify a match output: matched pairs, then source-only,
    /// then target-only. Single pass; re-run the matcher to iterate again.
    pub fn classify<'c, 'a>(&'c self, output: MatchOutput<'a>) -> Classifications<'c, 'a> {
        Classifications {
            classifier: self,
            matched: output.matched.into_iter(),
            unmatched: output
                .source_only
                .into_iter()
                .chain(output.target_only)
                .collect::<Vec<_>>()
                .into_iter(),
        }
    }

    fn differs(&self, field: &str, source: &Record, target: &Record) -> bool {
        let (s, t) = (source.value(field), target.value(field));
        match self.tolerances.get(field) {
            Some(tolerance) => match (s.as_decimal(), t.as_decimal()) {
                (Some(a), Some(b)) => (a - b).abs() > *tolerance,
                _ => s != t,
            },
            None => s != t,
        }
    }

    fn grade(&self, magnitude: Decimal) -> Severity {
        if magnitude >= self.severity.high {
            Severity::High
        } else if magnitude >= self.severity.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    fn record_ref(&self, record: &Record) -> RecordRef {
        RecordRef {
            record_id: record.record_id.clone(),
            line: record.line,
            group: record.value(&self.grouping_key).to_string(),
            amount: record
                .value(&self.amount_field)
                .as_decimal()
                .unwrap_or(Decimal::ZERO),
        }
    }
}

/// Absolute difference of a numeric field; zero when either side is not numeric.
fn numeric_delta(source: &Record, target: &Record, field: &str) -> Decimal {
    match (source.value(field).as_decimal(), target.value(field).as_decimal()) {
        (Some(a), Some(b)) => (a - b).abs(),
        _ => Decimal::ZERO,
    }
}

/// One-pass iterator over classified items. Not `Clone`: the underlying
/// match output is consumed.
pub struct Classifications<'c, 'a> {
    classifier: &'c Classifier,
    matched: std::vec::IntoIter<MatchedPair<'a>>,
    unmatched: std::vec::IntoIter<UnmatchedRecord<'a>>,
}

impl Iterator for Classifications<'_, '_> {
    type Item = Discrepancy;

    fn next(&mut self) -> Option<Discrepancy> {
        if let Some(pair) = self.matched.next() {
            return Some(self.classifier.classify_pair(&pair));
        }
        self.unmatched
            .next()
            .map(|u| self.classifier.classify_unmatched(&u))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.matched.len() + self.unmatched.len();
        (n, Some(n))
    }
}

impl ExactSizeIterator for Classifications<'_, '_> {}
