//! `tally run|validate|profile`: config-driven reconciliation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tallyline_recon::audit::{self, SqliteAuditStore};
use tallyline_recon::model::ReconReport;
use tallyline_recon::profile::{profile_rows, DataProfile};
use tallyline_recon::{
    load_csv_rows, snapshot_digest, RawRow, ReconConfig, ReconError, ReconInput,
    ReconciliationStatus, RunOptions, Side, SnapshotIds,
};
use tracing::info;

use crate::exit_codes::{
    recon_exit_code, EXIT_RECON_BREAKS, EXIT_RECON_DUPLICATE_RUN, EXIT_RECON_RUNTIME,
};
use crate::CliError;

pub struct RunArgs {
    pub config: PathBuf,
    pub json: bool,
    pub output: Option<PathBuf>,
    pub audit_db: Option<PathBuf>,
    pub force: bool,
    pub no_audit: bool,
    pub include_ok: bool,
    pub run_timestamp: Option<DateTime<Utc>>,
}

pub fn parse_run_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 timestamp: {e}"))
}

fn recon_err(err: ReconError) -> CliError {
    CliError::new(recon_exit_code(&err), err.to_string())
}

fn runtime_err(msg: impl Into<String>) -> CliError {
    CliError::new(EXIT_RECON_RUNTIME, msg)
}

/// Parse + validate the config; file paths inside resolve against its directory.
fn load_config(config_path: &Path) -> Result<(ReconConfig, PathBuf), CliError> {
    let config_str = std::fs::read_to_string(config_path).map_err(|e| {
        runtime_err(format!("cannot read config {}: {e}", config_path.display()))
    })?;
    let config = ReconConfig::from_toml(&config_str).map_err(recon_err)?;
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((config, base_dir))
}

fn load_side(
    config: &ReconConfig,
    base_dir: &Path,
    side: Side,
) -> Result<(Vec<RawRow>, String), CliError> {
    let file = match side {
        Side::Source => &config.source.file,
        Side::Target => &config.target.file,
    };
    let csv_path = base_dir.join(file);
    let csv_data = std::fs::read_to_string(&csv_path)
        .map_err(|e| runtime_err(format!("cannot read {}: {e}", csv_path.display())))?;
    let rows = load_csv_rows(side, &csv_data, config).map_err(recon_err)?;
    info!(%side, path = %csv_path.display(), rows = rows.len(), "input loaded");
    Ok((rows, snapshot_digest(csv_data.as_bytes())))
}

fn load_input(config: &ReconConfig, base_dir: &Path) -> Result<ReconInput, CliError> {
    let (source, source_digest) = load_side(config, base_dir, Side::Source)?;
    let (target, target_digest) = load_side(config, base_dir, Side::Target)?;
    Ok(ReconInput {
        source,
        target,
        snapshot: SnapshotIds {
            load_date: config.load_date,
            source_digest: Some(source_digest),
            target_digest: Some(target_digest),
        },
    })
}

pub fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let (config, base_dir) = load_config(&args.config)?;
    let input = load_input(&config, &base_dir)?;

    let options = RunOptions {
        run_timestamp: args.run_timestamp,
        cancel: None,
    };
    let mut report = tallyline_recon::run_with(&config, &input, &options).map_err(recon_err)?;

    let audit_path = if args.no_audit {
        None
    } else {
        args.audit_db
            .clone()
            .or_else(|| config.audit.as_ref().map(|a| base_dir.join(&a.path)))
    };
    let audit_result = match audit_path {
        Some(ref path) => Some(record_run(path, &report, args.force)),
        None => None,
    };

    if !(args.include_ok || config.output.include_ok) {
        report.discrepancies.retain(|d| d.kind.is_break());
    }

    let output_file = args
        .output
        .clone()
        .or_else(|| config.output.json.as_ref().map(|p| base_dir.join(p)));
    if args.json || output_file.is_some() {
        let json_str = serde_json::to_string_pretty(&report)
            .map_err(|e| runtime_err(format!("JSON serialization error: {e}")))?;
        if let Some(ref path) = output_file {
            std::fs::write(path, &json_str)
                .map_err(|e| runtime_err(format!("cannot write output: {e}")))?;
            eprintln!("wrote {}", path.display());
        }
        if args.json {
            println!("{json_str}");
        }
    }

    print_summary(&report);

    if let Some(result) = audit_result {
        match result {
            Ok((path, n)) => eprintln!("audit: recorded {n} group(s) in {}", path.display()),
            Err(e) => return Err(e),
        }
    }

    if !report.is_reconciled() {
        return Err(CliError::new(
            EXIT_RECON_BREAKS,
            format!(
                "{} break(s), {} group(s) not matched",
                report.kinds.breaks(),
                report
                    .groups
                    .iter()
                    .filter(|g| g.status != ReconciliationStatus::Matched)
                    .count()
            ),
        ));
    }
    Ok(())
}

fn record_run(path: &Path, report: &ReconReport, force: bool) -> Result<(PathBuf, usize), CliError> {
    let store = SqliteAuditStore::open(path)
        .map_err(|e| runtime_err(format!("cannot open audit db {}: {e}", path.display())))?;
    let n = audit::record(&store, report, force).map_err(|e| {
        let cli_err = recon_err(ReconError::from(e));
        if cli_err.code == EXIT_RECON_DUPLICATE_RUN {
            cli_err.with_hint("pass --force to overwrite the recorded run")
        } else {
            cli_err
        }
    })?;
    Ok((path.to_path_buf(), n))
}

fn print_summary(report: &ReconReport) {
    let s = &report.stats;
    let k = &report.kinds;
    eprintln!(
        "{}: {} source / {} target records, {} matched pairs",
        report.meta.recon_name, s.source_records, s.target_records, s.matched_pairs
    );
    eprintln!(
        "  {} ok, {} amount, {} status, {} field, {} missing in target, {} phantom in target",
        k.ok,
        k.amount_mismatch,
        k.status_mismatch,
        k.field_mismatch,
        k.missing_in_target,
        k.phantom_in_target
    );
    if !report.schema_violations.is_empty() {
        eprintln!("  {} row(s) rejected by schema", report.schema_violations.len());
        for v in &report.schema_violations {
            eprintln!("    {v}");
        }
    }
    for d in &report.duplicate_keys {
        eprintln!("  warning: {} key '{}' held by {} records", d.side, d.key, d.count);
    }
    for g in &report.groups {
        eprintln!(
            "  {:<18} {:<17} src {:>5} {:>14}  tgt {:>5} {:>14}  var {:>12}",
            g.group,
            g.status.to_string(),
            g.source_count,
            g.source_total,
            g.target_count,
            g.target_total,
            g.variance
        );
    }
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let (config, _) = load_config(&config_path)?;
    eprintln!(
        "ok: \"{}\" ({} fields, key [{}], {} rule(s), grouped by {})",
        config.name,
        config.schema.fields.len(),
        config.matching.comparison_key.join(", "),
        config.rules.len(),
        config.grouping.key
    );
    Ok(())
}

#[derive(Serialize)]
struct ProfileOutput<'a> {
    recon_name: &'a str,
    source: DataProfile,
    target: DataProfile,
}

pub fn cmd_profile(config_path: PathBuf, json: bool) -> Result<(), CliError> {
    let (config, base_dir) = load_config(&config_path)?;
    let input = load_input(&config, &base_dir)?;
    let out = ProfileOutput {
        recon_name: &config.name,
        source: profile_rows(&config, &config.source, &input.source),
        target: profile_rows(&config, &config.target, &input.target),
    };

    if json {
        let json_str = serde_json::to_string_pretty(&out)
            .map_err(|e| runtime_err(format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
        return Ok(());
    }

    for (side, profile) in [(Side::Source, &out.source), (Side::Target, &out.target)] {
        println!("{side}: {} rows", profile.rows);
        for n in &profile.nulls {
            println!("  null  {:<24} {:>6} ({:.2}%)", n.field, n.null_count, n.null_pct);
        }
        for g in &profile.group_counts {
            println!("  group {:<24} {:>6}", g.value, g.count);
        }
        for d in &profile.duplicate_record_ids {
            println!("  dup   {:<24} {:>6}", d.value, d.count);
        }
    }
    Ok(())
}
