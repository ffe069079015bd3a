//! `tally history`: read back recorded runs.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tallyline_recon::{AuditQuery, AuditStore, SqliteAuditStore};

use crate::exit_codes::EXIT_RECON_RUNTIME;
use crate::CliError;

#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// RFC 3339, or a bare date meaning the start (or end) of that UTC day.
fn parse_bound(raw: &str, bound: Bound) -> Result<DateTime<Utc>, CliError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        CliError::args(format!("invalid timestamp '{raw}'"))
            .with_hint("use RFC 3339 (2026-01-31T06:00:00Z) or YYYY-MM-DD")
    })?;
    let time = match bound {
        Bound::Start => NaiveTime::MIN,
        Bound::End => NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN),
    };
    Ok(date.and_time(time).and_utc())
}

pub fn cmd_history(
    db: PathBuf,
    group: Option<String>,
    since: Option<String>,
    until: Option<String>,
    json: bool,
) -> Result<(), CliError> {
    let mut query = AuditQuery::new();
    if let Some(ref s) = since {
        query = query.after(parse_bound(s, Bound::Start)?);
    }
    if let Some(ref u) = until {
        query = query.before(parse_bound(u, Bound::End)?);
    }
    if let Some(g) = group {
        query = query.group(g);
    }

    if !db.exists() {
        return Err(CliError::new(
            EXIT_RECON_RUNTIME,
            format!("audit db not found: {}", db.display()),
        ));
    }
    let store = SqliteAuditStore::open(&db)
        .map_err(|e| CliError::new(EXIT_RECON_RUNTIME, format!("cannot open {}: {e}", db.display())))?;
    let entries = store
        .query(&query)
        .map_err(|e| CliError::new(EXIT_RECON_RUNTIME, e.to_string()))?;

    if json {
        let json_str = serde_json::to_string_pretty(&entries)
            .map_err(|e| CliError::general(format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
        return Ok(());
    }

    if entries.is_empty() {
        eprintln!("no audit entries");
        return Ok(());
    }
    for e in &entries {
        let s = &e.summary;
        println!(
            "{}  {:<18} {:<17} src {:>5} {:>14}  tgt {:>5} {:>14}  var {:>12}",
            e.run_timestamp.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            s.group,
            s.status.to_string(),
            s.source_count,
            s.source_total,
            s.target_count,
            s.target_total,
            s.variance
        );
    }
    Ok(())
}
