// Property-based tests for matching, classification and aggregation.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use tallyline_recon::config::ReconConfig;
use tallyline_recon::engine::{run_with, RunOptions};
use tallyline_recon::model::{DiscrepancyKind, RawRow, ReconInput};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

const CONFIG: &str = r#"
name = "prop"

[schema.fields]
id     = { type = "string",  mandatory = true }
group  = { type = "enum",    mandatory = true }
amount = { type = "decimal", mandatory = true }
status = { type = "enum",    mandatory = true, values = ["SETTLED", "PENDING"] }

[source]
file = "s.csv"
record_id = "id"

[target]
file = "t.csv"
record_id = "id"

[matching]
comparison_key = ["id"]
comparable_fields = ["amount", "status"]

[[rules]]
kind = "amount"
field = "amount"

[[rules]]
kind = "status"
field = "status"

[grouping]
key = "group"
amount_field = "amount"
"#;

fn config() -> ReconConfig {
    ReconConfig::from_toml(CONFIG).unwrap()
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Row {
    id: u8,
    group: u8,
    cents: i64,
    status: bool,
}

fn arb_row() -> impl Strategy<Value = Row> {
    // Small id space so keys collide across sides and within a side.
    (0u8..12, 0u8..4, -50_000i64..50_000, any::<bool>()).prop_map(|(id, group, cents, status)| Row {
        id,
        group,
        cents,
        status,
    })
}

fn raw(rows: &[Row]) -> Vec<RawRow> {
    rows.iter()
        .enumerate()
        .map(|(i, r)| {
            let values: HashMap<String, String> = [
                ("id", format!("K{}", r.id)),
                ("group", format!("G{}", r.group)),
                ("amount", Decimal::new(r.cents, 2).to_string()),
                ("status", if r.status { "SETTLED" } else { "PENDING" }.to_string()),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
            RawRow { line: i + 1, values }
        })
        .collect()
}

fn options() -> RunOptions {
    RunOptions {
        run_timestamp: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
        cancel: None,
    }
}

fn input(source: &[Row], target: &[Row]) -> ReconInput {
    ReconInput {
        source: raw(source),
        target: raw(target),
        snapshot: Default::default(),
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn every_record_lands_in_exactly_one_partition(
        source in prop::collection::vec(arb_row(), 0..30),
        target in prop::collection::vec(arb_row(), 0..30),
    ) {
        let report = run_with(&config(), &input(&source, &target), &options()).unwrap();
        let s = &report.stats;
        prop_assert_eq!(s.source_records, source.len());
        prop_assert_eq!(s.target_records, target.len());
        prop_assert_eq!(
            s.matched_pairs * 2 + s.source_only + s.target_only,
            s.source_records + s.target_records
        );
    }

    #[test]
    fn one_outcome_per_pair_or_record(
        source in prop::collection::vec(arb_row(), 0..30),
        target in prop::collection::vec(arb_row(), 0..30),
    ) {
        let report = run_with(&config(), &input(&source, &target), &options()).unwrap();
        let s = &report.stats;
        prop_assert_eq!(report.discrepancies.len(), s.matched_pairs + s.source_only + s.target_only);
        prop_assert_eq!(report.kinds.total(), report.discrepancies.len());
        prop_assert_eq!(report.kinds.missing_in_target, s.source_only);
        prop_assert_eq!(report.kinds.phantom_in_target, s.target_only);

        let group_kinds: usize = report.groups.iter().map(|g| g.kinds.total()).sum();
        prop_assert_eq!(group_kinds, report.discrepancies.len());
    }

    #[test]
    fn identical_inputs_give_identical_output(
        source in prop::collection::vec(arb_row(), 0..30),
        target in prop::collection::vec(arb_row(), 0..30),
    ) {
        let config = config();
        let a = run_with(&config, &input(&source, &target), &options()).unwrap();
        let b = run_with(&config, &input(&source, &target), &options()).unwrap();
        prop_assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn row_order_does_not_change_groups(
        source in prop::collection::vec(arb_row(), 0..30),
        target in prop::collection::vec(arb_row(), 0..30),
    ) {
        let config = config();
        let a = run_with(&config, &input(&source, &target), &options()).unwrap();
        let mut reversed = source.clone();
        reversed.reverse();
        let b = run_with(&config, &input(&reversed, &target), &options()).unwrap();
        // Positional pairing inside duplicate keys may pick different
        // partners, so only pairing-independent figures are compared.
        let totals = |r: &tallyline_recon::ReconReport| {
            r.groups
                .iter()
                .map(|g| (g.group.clone(), g.source_count, g.target_count, g.variance, g.status))
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(totals(&a), totals(&b));
        prop_assert_eq!(a.kinds.ok, b.kinds.ok);
        prop_assert_eq!(a.kinds.breaks(), b.kinds.breaks());
    }

    #[test]
    fn amount_beats_status_when_both_differ(
        id in 0u8..12,
        group in 0u8..4,
        cents in -50_000i64..50_000,
        delta in 1i64..10_000,
        status in any::<bool>(),
    ) {
        let source = Row { id, group, cents, status };
        let target = Row { id, group, cents: cents + delta, status: !status };
        let report = run_with(&config(), &input(&[source], &[target]), &options()).unwrap();
        prop_assert_eq!(report.discrepancies.len(), 1);
        prop_assert_eq!(report.discrepancies[0].kind, DiscrepancyKind::AmountMismatch);
        prop_assert_eq!(report.discrepancies[0].fields_in_conflict.len(), 2);
    }
}
