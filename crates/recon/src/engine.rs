use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::aggregate::{count_kinds, summarize_groups};
use crate::audit::audit_timestamp;
use crate::classify::Classifier;
use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::matcher::match_records;
use crate::model::{
    Discrepancy, InputProfiles, RawRow, ReconInput, ReconMeta, ReconReport, RunStats, Side,
};
use crate::normalize::Normalizer;
use crate::profile::profile_rows;

/// Cooperative cancellation flag shared between a running reconciliation and
/// whoever may abort it. Checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Fixed run timestamp; `Utc::now()` when absent.
    pub run_timestamp: Option<DateTime<Utc>>,
    pub cancel: Option<CancelToken>,
}

impl RunOptions {
    fn checkpoint(&self, stage: &'static str) -> Result<(), ReconError> {
        match self.cancel {
            Some(ref token) if token.is_cancelled() => {
                info!(stage, "run cancelled");
                Err(ReconError::Cancelled { stage })
            }
            _ => Ok(()),
        }
    }
}

/// Run reconciliation per config. Returns the full report; nothing is recorded.
pub fn run(config: &ReconConfig, input: &ReconInput) -> Result<ReconReport, ReconError> {
    run_with(config, input, &RunOptions::default())
}

pub fn run_with(
    config: &ReconConfig,
    input: &ReconInput,
    options: &RunOptions,
) -> Result<ReconReport, ReconError> {
    // Config errors are fatal before any work is done.
    let classifier = Classifier::from_config(config)?;
    let run_timestamp = audit_timestamp(options.run_timestamp.unwrap_or_else(Utc::now));

    info!(
        recon = %config.name,
        source_rows = input.source.len(),
        target_rows = input.target.len(),
        "reconciliation started"
    );

    options.checkpoint("normalize")?;
    let (source_records, mut schema_violations) =
        Normalizer::new(config, Side::Source).normalize_all(&input.source);
    let (target_records, target_violations) =
        Normalizer::new(config, Side::Target).normalize_all(&input.target);
    let rejected_source = schema_violations.len();
    let rejected_target = target_violations.len();
    schema_violations.extend(target_violations);
    debug!(
        source_records = source_records.len(),
        target_records = target_records.len(),
        rejected = schema_violations.len(),
        "normalized"
    );

    options.checkpoint("profile")?;
    let profiles = InputProfiles {
        source: profile_rows(config, &config.source, &input.source),
        target: profile_rows(config, &config.target, &input.target),
    };

    options.checkpoint("match")?;
    let mut matched = match_records(
        &source_records,
        &target_records,
        &config.matching.comparable_fields,
    );
    let duplicate_keys = std::mem::take(&mut matched.duplicate_keys);
    let stats = RunStats {
        source_rows: input.source.len(),
        target_rows: input.target.len(),
        source_records: source_records.len(),
        target_records: target_records.len(),
        rejected_source,
        rejected_target,
        matched_pairs: matched.matched.len(),
        source_only: matched.source_only.len(),
        target_only: matched.target_only.len(),
    };

    options.checkpoint("classify")?;
    let discrepancies: Vec<Discrepancy> = classifier.classify(matched).collect();
    debug!(items = discrepancies.len(), "classified");

    options.checkpoint("aggregate")?;
    let groups = summarize_groups(&discrepancies, config.grouping.tolerance);
    let kinds = count_kinds(&discrepancies);
    debug!(groups = groups.len(), "aggregated");

    let mut snapshot = input.snapshot.clone();
    if snapshot.load_date.is_none() {
        snapshot.load_date = config.load_date;
    }

    let report = ReconReport {
        meta: ReconMeta {
            recon_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_timestamp,
            source_label: config.source.label.clone(),
            target_label: config.target.label.clone(),
            snapshot,
        },
        stats,
        kinds,
        groups,
        discrepancies,
        schema_violations,
        duplicate_keys,
        profiles,
    };

    info!(
        recon = %config.name,
        matched_pairs = report.stats.matched_pairs,
        breaks = report.kinds.breaks(),
        groups = report.groups.len(),
        reconciled = report.is_reconciled(),
        "reconciliation finished"
    );
    Ok(report)
}

/// Load one side's CSV into raw rows keyed by header.
///
/// A header missing for a mandatory schema field makes the whole input
/// unusable and fails with [`ReconError::MissingColumn`]. Rows are read
/// flexibly: blank or missing cells are left for the normalizer to report
/// per row, and cells past the header width are dropped.
pub fn load_csv_rows(
    side: Side,
    csv_data: &str,
    config: &ReconConfig,
) -> Result<Vec<RawRow>, ReconError> {
    let side_config = match side {
        Side::Source => &config.source,
        Side::Target => &config.target,
    };
    let csv_err = |e: csv::Error| ReconError::Csv {
        side,
        message: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    for (name, spec) in &config.schema.fields {
        let column = side_config.column_for(name);
        if spec.mandatory && !headers.iter().any(|h| h == column) {
            return Err(ReconError::MissingColumn {
                side,
                column: column.to_string(),
            });
        }
    }

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err)?;
        let line = i + 1;
        if record.len() > headers.len() {
            warn!(
                %side,
                line,
                cells = record.len(),
                columns = headers.len(),
                "row wider than header; extra cells dropped"
            );
        }
        let values = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        rows.push(RawRow { line, values });
    }

    debug!(%side, rows = rows.len(), "loaded csv");
    Ok(rows)
}

/// SHA-256 of an input's bytes, as `sha256:<hex>`.
pub fn snapshot_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}
