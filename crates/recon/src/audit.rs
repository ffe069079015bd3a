//! Append-only audit history of reconciliation runs.
//!
//! One [`AuditEntry`] per group per run. A run is appended atomically: either
//! every group of the run lands or none does. `(run_timestamp, grouping_key)`
//! is unique; re-appending fails with [`AuditError::DuplicateRun`] unless the
//! caller forces an overwrite.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AuditError;
use crate::model::{GroupSummary, ReconReport, SnapshotIds};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub run_timestamp: DateTime<Utc>,
    pub recon_name: String,
    pub snapshot: SnapshotIds,
    pub summary: GroupSummary,
}

impl AuditEntry {
    pub fn new(
        run_timestamp: DateTime<Utc>,
        recon_name: impl Into<String>,
        snapshot: SnapshotIds,
        summary: GroupSummary,
    ) -> Self {
        Self {
            run_timestamp: audit_timestamp(run_timestamp),
            recon_name: recon_name.into(),
            snapshot,
            summary,
        }
    }

    pub fn grouping_key(&self) -> &str {
        &self.summary.group
    }
}

/// Truncate to microseconds so every store round-trips timestamps exactly.
pub fn audit_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Fixed-width RFC 3339, so lexical order matches chronological order.
fn timestamp_key(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Filter for [`AuditStore::query`]. Bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub grouping_key: Option<String>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn after(mut self, ts: DateTime<Utc>) -> Self {
        self.after = Some(ts);
        self
    }

    pub fn before(mut self, ts: DateTime<Utc>) -> Self {
        self.before = Some(ts);
        self
    }

    pub fn group(mut self, key: impl Into<String>) -> Self {
        self.grouping_key = Some(key.into());
        self
    }

    fn accepts(&self, entry: &AuditEntry) -> bool {
        self.after.map_or(true, |a| entry.run_timestamp >= a)
            && self.before.map_or(true, |b| entry.run_timestamp <= b)
            && self
                .grouping_key
                .as_deref()
                .map_or(true, |g| entry.grouping_key() == g)
    }
}

/// Storage backend for audit history.
///
/// Implementations serialize concurrent appends so that the duplicate check
/// and the write happen as one step.
pub trait AuditStore: Send + Sync {
    /// Append one run's entries atomically. With `force`, entries colliding on
    /// `(run_timestamp, grouping_key)` are replaced in the same commit.
    fn append(&self, entries: &[AuditEntry], force: bool) -> Result<(), AuditError>;

    /// Entries ordered by run timestamp, then grouping key.
    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditError>;
}

/// Entries within one batch must not collide with each other either.
fn check_batch(entries: &[AuditEntry]) -> Result<(), AuditError> {
    let mut seen = std::collections::BTreeSet::new();
    for e in entries {
        if !seen.insert((e.run_timestamp, e.grouping_key())) {
            return Err(AuditError::DuplicateRun {
                run_timestamp: timestamp_key(&e.run_timestamp),
                grouping_keys: vec![e.grouping_key().to_string()],
            });
        }
    }
    Ok(())
}

fn duplicate_error(entries: &[&AuditEntry]) -> AuditError {
    AuditError::DuplicateRun {
        run_timestamp: entries
            .first()
            .map(|e| timestamp_key(&e.run_timestamp))
            .unwrap_or_default(),
        grouping_keys: entries.iter().map(|e| e.grouping_key().to_string()).collect(),
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: Mutex<BTreeMap<(DateTime<Utc>, String), AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, AuditError> {
        let store = self.entries.lock().map_err(|_| AuditError::LockPoisoned)?;
        Ok(store.len())
    }

    pub fn is_empty(&self) -> Result<bool, AuditError> {
        Ok(self.len()? == 0)
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, entries: &[AuditEntry], force: bool) -> Result<(), AuditError> {
        check_batch(entries)?;
        let mut store = self.entries.lock().map_err(|_| AuditError::LockPoisoned)?;

        if !force {
            let colliding: Vec<&AuditEntry> = entries
                .iter()
                .filter(|e| store.contains_key(&(e.run_timestamp, e.grouping_key().to_string())))
                .collect();
            if !colliding.is_empty() {
                return Err(duplicate_error(&colliding));
            }
        }

        for e in entries {
            store.insert((e.run_timestamp, e.grouping_key().to_string()), e.clone());
        }
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditError> {
        let store = self.entries.lock().map_err(|_| AuditError::LockPoisoned)?;
        Ok(store.values().filter(|e| query.accepts(e)).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_entries (
    run_timestamp TEXT NOT NULL,      -- RFC 3339, microseconds, UTC
    grouping_key TEXT NOT NULL,
    recon_name TEXT NOT NULL,
    load_date TEXT,
    status TEXT NOT NULL,
    variance TEXT NOT NULL,
    entry_json TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (run_timestamp, grouping_key)
);

CREATE TRIGGER IF NOT EXISTS audit_entries_append_only
BEFORE UPDATE ON audit_entries
BEGIN
    SELECT RAISE(ABORT, 'audit history is append-only');
END;
"#;

/// SQLite-backed history. Appends run in an immediate transaction, which
/// takes the database write lock up front and so serializes writers across
/// processes too.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl AuditStore for SqliteAuditStore {
    fn append(&self, entries: &[AuditEntry], force: bool) -> Result<(), AuditError> {
        check_batch(entries)?;
        let mut conn = self.conn.lock().map_err(|_| AuditError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut colliding = Vec::new();
        {
            let mut exists = tx.prepare(
                "SELECT 1 FROM audit_entries WHERE run_timestamp = ?1 AND grouping_key = ?2",
            )?;
            for e in entries {
                let hit: Option<i64> = exists
                    .query_row(params![timestamp_key(&e.run_timestamp), e.grouping_key()], |r| {
                        r.get(0)
                    })
                    .optional()?;
                if hit.is_some() {
                    colliding.push(e);
                }
            }
        }

        if !colliding.is_empty() {
            if !force {
                // Dropping the transaction rolls back; history is untouched.
                return Err(duplicate_error(&colliding));
            }
            let mut delete = tx.prepare(
                "DELETE FROM audit_entries WHERE run_timestamp = ?1 AND grouping_key = ?2",
            )?;
            for e in &colliding {
                delete.execute(params![timestamp_key(&e.run_timestamp), e.grouping_key()])?;
            }
        }

        {
            let recorded_at = timestamp_key(&Utc::now());
            let mut insert = tx.prepare(
                "INSERT INTO audit_entries (run_timestamp, grouping_key, recon_name, load_date, status, variance, entry_json, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for e in entries {
                insert.execute(params![
                    timestamp_key(&e.run_timestamp),
                    e.grouping_key(),
                    e.recon_name,
                    e.snapshot.load_date.map(|d| d.to_string()),
                    e.summary.status.to_string(),
                    e.summary.variance.to_string(),
                    serde_json::to_string(e)?,
                    recorded_at,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, AuditError> {
        let conn = self.conn.lock().map_err(|_| AuditError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT entry_json FROM audit_entries
             WHERE (?1 IS NULL OR run_timestamp >= ?1)
               AND (?2 IS NULL OR run_timestamp <= ?2)
               AND (?3 IS NULL OR grouping_key = ?3)
             ORDER BY run_timestamp, grouping_key",
        )?;
        let rows = stmt.query_map(
            params![
                query.after.as_ref().map(timestamp_key),
                query.before.as_ref().map(timestamp_key),
                query.grouping_key,
            ],
            |r| r.get::<_, String>(0),
        )?;

        let mut out = Vec::new();
        for json in rows {
            let json = json?;
            let entry: AuditEntry = serde_json::from_str(&json)
                .map_err(|e| AuditError::Corrupt(format!("{e}: {json}")))?;
            out.push(entry);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Build the audit entries of a finished run, one per group.
pub fn entries_for(report: &ReconReport) -> Vec<AuditEntry> {
    report
        .groups
        .iter()
        .map(|g| {
            AuditEntry::new(
                report.meta.run_timestamp,
                report.meta.recon_name.clone(),
                report.meta.snapshot.clone(),
                g.clone(),
            )
        })
        .collect()
}

/// Commit a finished run to the store. Returns the number of entries written.
pub fn record(store: &dyn AuditStore, report: &ReconReport, force: bool) -> Result<usize, AuditError> {
    let entries = entries_for(report);
    match store.append(&entries, force) {
        Ok(()) => {
            info!(
                recon = %report.meta.recon_name,
                run_timestamp = %timestamp_key(&report.meta.run_timestamp),
                entries = entries.len(),
                force,
                "audit entries recorded"
            );
            Ok(entries.len())
        }
        Err(e) => {
            warn!(recon = %report.meta.recon_name, error = %e, "audit append rejected");
            Err(e)
        }
    }
}
