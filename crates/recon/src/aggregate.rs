use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::model::{Discrepancy, GroupSummary, KindCounts, ReconciliationStatus};

#[derive(Default)]
struct GroupAcc {
    source_count: usize,
    target_count: usize,
    source_total: Decimal,
    target_total: Decimal,
    kinds: KindCounts,
}

/// Roll classified items up by grouping value.
///
/// Output order: status precedence (missing-in-target, missing-in-source,
/// variance, matched), then descending absolute variance, then group value.
pub fn summarize_groups(items: &[Discrepancy], tolerance: Decimal) -> Vec<GroupSummary> {
    let mut groups: BTreeMap<&str, GroupAcc> = BTreeMap::new();

    for item in items {
        if let Some(ref s) = item.source {
            let acc = groups.entry(s.group.as_str()).or_default();
            acc.source_count += 1;
            acc.source_total += s.amount;
        }
        if let Some(ref t) = item.target {
            let acc = groups.entry(t.group.as_str()).or_default();
            acc.target_count += 1;
            acc.target_total += t.amount;
        }
        groups
            .entry(item.attributed_group())
            .or_default()
            .kinds
            .bump(item.kind);
    }

    let mut summaries: Vec<GroupSummary> = groups
        .into_iter()
        .map(|(group, acc)| {
            let variance = acc.source_total - acc.target_total;
            let status = status_for(&acc, variance, tolerance);
            GroupSummary {
                group: group.to_string(),
                source_count: acc.source_count,
                target_count: acc.target_count,
                source_total: acc.source_total,
                target_total: acc.target_total,
                variance,
                kinds: acc.kinds,
                status,
            }
        })
        .collect();

    // BTreeMap iteration already orders by group; a stable sort keeps that
    // as the final tie-break.
    summaries.sort_by(|a, b| {
        a.status
            .cmp(&b.status)
            .then_with(|| b.variance.abs().cmp(&a.variance.abs()))
    });
    summaries
}

fn status_for(acc: &GroupAcc, variance: Decimal, tolerance: Decimal) -> ReconciliationStatus {
    match (acc.source_count, acc.target_count) {
        (_, 0) => ReconciliationStatus::MissingInTarget,
        (0, _) => ReconciliationStatus::MissingInSource,
        (s, t) if s == t && variance.abs() <= tolerance => ReconciliationStatus::Matched,
        _ => ReconciliationStatus::Variance,
    }
}

/// Run-wide counts per discrepancy kind.
pub fn count_kinds(items: &[Discrepancy]) -> KindCounts {
    let mut counts = KindCounts::default();
    for item in items {
        counts.bump(item.kind);
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompositeKey, DiscrepancyKind, RecordRef, Severity};

    fn side(id: &str, group: &str, cents: i64) -> Option<RecordRef> {
        Some(RecordRef {
            record_id: id.into(),
            line: 1,
            group: group.into(),
            amount: Decimal::new(cents, 2),
        })
    }

    fn item(kind: DiscrepancyKind, source: Option<RecordRef>, target: Option<RecordRef>) -> Discrepancy {
        Discrepancy {
            kind,
            severity: Severity::Low,
            comparison_key: CompositeKey(vec!["k".into()]),
            source,
            target,
            fields_in_conflict: vec![],
        }
    }

    #[test]
    fn matched_group_with_equal_counts_and_totals() {
        let items: Vec<_> = (0..10)
            .map(|i| {
                let id = format!("T{i}");
                item(DiscrepancyKind::Ok, side(&id, "P1", 10000), side(&id, "P1", 10000))
            })
            .collect();
        let groups = summarize_groups(&items, Decimal::ZERO);
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.group, "P1");
        assert_eq!(g.source_count, 10);
        assert_eq!(g.target_count, 10);
        assert_eq!(g.source_total, Decimal::new(100000, 2));
        assert_eq!(g.variance, Decimal::ZERO);
        assert_eq!(g.kinds.ok, 10);
        assert_eq!(g.status, ReconciliationStatus::Matched);
    }

    #[test]
    fn one_sided_groups() {
        let items = vec![
            item(DiscrepancyKind::MissingInTarget, side("a", "P1", 500), None),
            item(DiscrepancyKind::PhantomInTarget, None, side("b", "P2", 700)),
        ];
        let groups = summarize_groups(&items, Decimal::ZERO);
        assert_eq!(groups[0].group, "P1");
        assert_eq!(groups[0].status, ReconciliationStatus::MissingInTarget);
        assert_eq!(groups[0].kinds.missing_in_target, 1);
        assert_eq!(groups[1].group, "P2");
        assert_eq!(groups[1].status, ReconciliationStatus::MissingInSource);
        assert_eq!(groups[1].variance, Decimal::new(-700, 2));
        assert_eq!(groups[1].kinds.phantom_in_target, 1);
    }

    #[test]
    fn variance_within_tolerance_is_matched() {
        let items = vec![item(DiscrepancyKind::AmountMismatch, side("a", "P1", 5000), side("a", "P1", 5001))];
        assert_eq!(
            summarize_groups(&items, Decimal::ZERO)[0].status,
            ReconciliationStatus::Variance
        );
        assert_eq!(
            summarize_groups(&items, Decimal::new(1, 2))[0].status,
            ReconciliationStatus::Matched
        );
    }

    #[test]
    fn count_difference_is_variance_even_when_totals_agree() {
        let items = vec![
            item(DiscrepancyKind::Ok, side("a", "P1", 5000), side("a", "P1", 5000)),
            item(DiscrepancyKind::PhantomInTarget, None, side("b", "P1", 0)),
        ];
        let g = &summarize_groups(&items, Decimal::ZERO)[0];
        assert_eq!(g.target_count, 2);
        assert_eq!(g.variance, Decimal::ZERO);
        assert_eq!(g.status, ReconciliationStatus::Variance);
    }

    #[test]
    fn ordering_contract() {
        let items = vec![
            item(DiscrepancyKind::Ok, side("m", "MATCH", 100), side("m", "MATCH", 100)),
            item(DiscrepancyKind::AmountMismatch, side("s", "SMALL", 100), side("s", "SMALL", 90)),
            item(DiscrepancyKind::AmountMismatch, side("b", "BIG", 100), side("b", "BIG", 10)),
            item(DiscrepancyKind::PhantomInTarget, None, side("p", "PHANTOM", 100)),
            item(DiscrepancyKind::MissingInTarget, side("x", "GONE", 100), None),
        ];
        let order: Vec<_> = summarize_groups(&items, Decimal::ZERO)
            .into_iter()
            .map(|g| g.group)
            .collect();
        assert_eq!(order, vec!["GONE", "PHANTOM", "BIG", "SMALL", "MATCH"]);
    }

    #[test]
    fn cross_group_pair_counts_each_side_in_its_own_group() {
        let items = vec![item(DiscrepancyKind::FieldMismatch, side("a", "P1", 100), side("a", "P2", 100))];
        let groups = summarize_groups(&items, Decimal::ZERO);
        assert_eq!(groups.len(), 2);
        let p1 = groups.iter().find(|g| g.group == "P1").unwrap();
        let p2 = groups.iter().find(|g| g.group == "P2").unwrap();
        assert_eq!(p1.status, ReconciliationStatus::MissingInTarget);
        assert_eq!(p1.kinds.field_mismatch, 1);
        assert_eq!(p2.status, ReconciliationStatus::MissingInSource);
        assert_eq!(p2.kinds.total(), 0);
    }

    #[test]
    fn kind_totals() {
        let items = vec![
            item(DiscrepancyKind::Ok, side("a", "P1", 1), side("a", "P1", 1)),
            item(DiscrepancyKind::Ok, side("b", "P1", 1), side("b", "P1", 1)),
            item(DiscrepancyKind::StatusMismatch, side("c", "P1", 1), side("c", "P1", 1)),
        ];
        let counts = count_kinds(&items);
        assert_eq!(counts.ok, 2);
        assert_eq!(counts.status_mismatch, 1);
        assert_eq!(counts.breaks(), 1);
    }
}
