use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::model::{
    CompositeKey, DuplicateKeyWarning, MatchOutput, MatchedPair, Origin, Record, Side,
    UnmatchedRecord,
};

/// Full outer join of source and target records on their comparison key.
///
/// Every input record lands in exactly one partition. Keys held by several
/// records on one side produce a [`DuplicateKeyWarning`]; their candidates
/// are paired best-effort: identical comparable payloads first, then
/// positionally, both in `(record_id, line)` order.
pub fn match_records<'a>(
    source: &'a [Record],
    target: &'a [Record],
    comparable_fields: &[String],
) -> MatchOutput<'a> {
    let source_map = index_by_key(source);
    let target_map = index_by_key(target);

    let mut out = MatchOutput::default();
    out.duplicate_keys.extend(duplicates(Side::Source, &source_map));
    out.duplicate_keys.extend(duplicates(Side::Target, &target_map));
    for dup in &out.duplicate_keys {
        warn!(side = %dup.side, key = %dup.key, count = dup.count, "duplicate comparison key");
    }

    for (key, sources) in &source_map {
        match target_map.get(key) {
            Some(targets) => pair_candidates(sources, targets, comparable_fields, &mut out),
            None => out.source_only.extend(sources.iter().map(|r| UnmatchedRecord {
                record: *r,
                origin: Origin::SourceOnly,
            })),
        }
    }

    for (key, targets) in &target_map {
        if !source_map.contains_key(key) {
            out.target_only.extend(targets.iter().map(|r| UnmatchedRecord {
                record: *r,
                origin: Origin::TargetOnly,
            }));
        }
    }

    debug!(
        matched = out.matched.len(),
        source_only = out.source_only.len(),
        target_only = out.target_only.len(),
        "match complete"
    );
    out
}

fn index_by_key(records: &[Record]) -> BTreeMap<&CompositeKey, Vec<&Record>> {
    let mut map: BTreeMap<&CompositeKey, Vec<&Record>> = BTreeMap::new();
    for record in records {
        map.entry(&record.key).or_default().push(record);
    }
    for candidates in map.values_mut() {
        candidates.sort_by(|a, b| (&a.record_id, a.line).cmp(&(&b.record_id, b.line)));
    }
    map
}

fn duplicates(side: Side, map: &BTreeMap<&CompositeKey, Vec<&Record>>) -> Vec<DuplicateKeyWarning> {
    map.iter()
        .filter(|(_, records)| records.len() > 1)
        .map(|(key, records)| DuplicateKeyWarning {
            side,
            key: (*key).clone(),
            count: records.len(),
            record_ids: records.iter().map(|r| r.record_id.clone()).collect(),
        })
        .collect()
}

fn same_payload(a: &Record, b: &Record, fields: &[String]) -> bool {
    fields.iter().all(|f| a.value(f) == b.value(f))
}

fn pair_candidates<'a>(
    sources: &[&'a Record],
    targets: &[&'a Record],
    fields: &[String],
    out: &mut MatchOutput<'a>,
) {
    // Fast path: the common one-to-one case.
    if sources.len() == 1 && targets.len() == 1 {
        out.matched.push(MatchedPair {
            source: sources[0],
            target: targets[0],
        });
        return;
    }

    let mut source_used = vec![false; sources.len()];
    let mut target_used = vec![false; targets.len()];

    // Pass 1: identical payloads.
    for (si, s) in sources.iter().enumerate() {
        let hit = targets
            .iter()
            .enumerate()
            .find(|(ti, t)| !target_used[*ti] && same_payload(s, t, fields));
        if let Some((ti, t)) = hit {
            source_used[si] = true;
            target_used[ti] = true;
            out.matched.push(MatchedPair {
                source: *s,
                target: *t,
            });
        }
    }

    // Pass 2: positional pairing of whatever is left.
    let rest_sources = sources.iter().zip(&source_used).filter(|(_, used)| !**used);
    let mut rest_targets = targets
        .iter()
        .zip(&target_used)
        .filter(|(_, used)| !**used)
        .map(|(t, _)| *t);

    for (s, _) in rest_sources {
        match rest_targets.next() {
            Some(t) => out.matched.push(MatchedPair { source: *s, target: t }),
            None => out.source_only.push(UnmatchedRecord {
                record: *s,
                origin: Origin::SourceOnly,
            }),
        }
    }
    out.target_only.extend(rest_targets.map(|t| UnmatchedRecord {
        record: t,
        origin: Origin::TargetOnly,
    }));
}
