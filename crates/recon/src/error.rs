use thiserror::Error;

use crate::model::Side;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Structural config error (unknown field, non-mandatory key, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Invalid tolerance, rule precedence or severity thresholds.
    #[error("tolerance config error: {0}")]
    ToleranceConfig(String),
    /// A column required by the schema is absent from the input header.
    #[error("{side}: missing column '{column}'")]
    MissingColumn { side: Side, column: String },
    #[error("{side}: CSV error: {message}")]
    Csv { side: Side, message: String },
    /// Run aborted through its cancel token before completion.
    #[error("run cancelled during {stage}")]
    Cancelled { stage: &'static str },
    /// Recording the finished run in the audit history failed.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

#[derive(Debug, Error)]
pub enum AuditError {
    /// One or more (run_timestamp, grouping_key) pairs already recorded.
    #[error("run {run_timestamp} already recorded for group(s): {}", .grouping_keys.join(", "))]
    DuplicateRun {
        run_timestamp: String,
        grouping_keys: Vec<String>,
    },
    #[error("audit store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("audit entry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("audit store lock poisoned")]
    LockPoisoned,
    #[error("corrupt audit row: {0}")]
    Corrupt(String),
}
