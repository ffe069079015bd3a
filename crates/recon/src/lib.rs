//! `tallyline-recon`: source-target reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded rows, returns classified results,
//! group summaries and audit entries. No CLI dependencies.

pub mod aggregate;
pub mod audit;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod profile;

pub use audit::{AuditEntry, AuditQuery, AuditStore, MemoryAuditStore, SqliteAuditStore};
pub use config::ReconConfig;
pub use engine::{load_csv_rows, run, run_with, snapshot_digest, CancelToken, RunOptions};
pub use error::{AuditError, ReconError};
pub use model::{
    Discrepancy, DiscrepancyKind, GroupSummary, RawRow, ReconInput, ReconReport,
    ReconciliationStatus, Side, SnapshotIds,
};
