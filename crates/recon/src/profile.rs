//! Input profiling: null/blank counts, per-group volumes and duplicated ids
//! over one side's raw rows.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{ReconConfig, SideConfig};
use crate::model::RawRow;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldNulls {
    pub field: String,
    pub null_count: usize,
    /// Percentage of rows, rounded to two places.
    pub null_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataProfile {
    pub rows: usize,
    /// Only fields with at least one null/blank value.
    pub nulls: Vec<FieldNulls>,
    pub group_counts: Vec<ValueCount>,
    pub duplicate_record_ids: Vec<ValueCount>,
}

impl DataProfile {
    pub fn is_clean(&self) -> bool {
        self.nulls.is_empty() && self.duplicate_record_ids.is_empty()
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 10000.0 / whole as f64).round() / 100.0
}

/// Sorted by descending count, then value.
fn ranked(counts: BTreeMap<String, usize>) -> Vec<ValueCount> {
    let mut out: Vec<ValueCount> = counts
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    out
}

/// Profile one side's raw rows against the configured schema.
pub fn profile_rows(config: &ReconConfig, side: &SideConfig, rows: &[RawRow]) -> DataProfile {
    let nulls = config
        .schema
        .fields
        .keys()
        .filter_map(|field| {
            let column = side.column_for(field);
            let null_count = rows.iter().filter(|r| r.get(column).is_none()).count();
            (null_count > 0).then(|| FieldNulls {
                field: field.clone(),
                null_count,
                null_pct: percent(null_count, rows.len()),
            })
        })
        .collect();

    let group_column = side.column_for(&config.grouping.key);
    let mut groups: BTreeMap<String, usize> = BTreeMap::new();
    for row in rows {
        let value = row.get(group_column).unwrap_or_default().to_string();
        *groups.entry(value).or_insert(0) += 1;
    }

    let id_column = side.column_for(&side.record_id);
    let mut ids: BTreeMap<String, usize> = BTreeMap::new();
    for id in rows.iter().filter_map(|r| r.get(id_column)) {
        *ids.entry(id.to_string()).or_insert(0) += 1;
    }
    ids.retain(|_, count| *count > 1);

    DataProfile {
        rows: rows.len(),
        nulls,
        group_counts: ranked(groups),
        duplicate_record_ids: ranked(ids),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::VALID;
    use std::collections::HashMap;

    fn row(line: usize, id: &str, program: &str, partner: &str) -> RawRow {
        let values: HashMap<String, String> = [
            ("transaction_id", id),
            ("program_code", program),
            ("incentive_amount", "10.00"),
            ("status", "SETTLED"),
            ("partner_id", partner),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        RawRow { line, values }
    }

    #[test]
    fn profiles_nulls_groups_and_duplicates() {
        let config = ReconConfig::from_toml(VALID).unwrap();
        let rows = vec![
            row(1, "TXN1", "PROG_A", "P001"),
            row(2, "TXN2", "PROG_B", ""),
            row(3, "TXN2", "PROG_A", "P002"),
        ];
        let p = profile_rows(&config, &config.target, &rows);
        assert_eq!(p.rows, 3);
        assert_eq!(p.nulls.len(), 1);
        assert_eq!(p.nulls[0].field, "partner_id");
        assert_eq!(p.nulls[0].null_count, 1);
        assert_eq!(p.nulls[0].null_pct, 33.33);
        assert_eq!(
            p.group_counts,
            vec![
                ValueCount { value: "PROG_A".into(), count: 2 },
                ValueCount { value: "PROG_B".into(), count: 1 },
            ]
        );
        assert_eq!(p.duplicate_record_ids, vec![ValueCount { value: "TXN2".into(), count: 2 }]);
        assert!(!p.is_clean());
    }

    #[test]
    fn source_mapping_is_honoured() {
        let config = ReconConfig::from_toml(VALID).unwrap();
        // Source reads the amount from the "amount" column, which is absent here.
        let rows = vec![row(1, "TXN1", "PROG_A", "P001")];
        let p = profile_rows(&config, &config.source, &rows);
        assert_eq!(p.nulls.len(), 1);
        assert_eq!(p.nulls[0].field, "incentive_amount");
        assert_eq!(p.nulls[0].null_pct, 100.0);
    }

    #[test]
    fn empty_input() {
        let config = ReconConfig::from_toml(VALID).unwrap();
        let p = profile_rows(&config, &config.source, &[]);
        assert_eq!(p.rows, 0);
        assert!(p.is_clean());
        assert!(p.group_counts.is_empty());
    }
}
