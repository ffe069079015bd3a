//! CLI Exit Code Registry
//!
//! Single source of truth for every `tally` exit code. Exit codes are part
//! of the shell contract: schedulers and scripts branch on them.
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | Success; for `run`, fully reconciled                 |
//! | 1    | General error (unspecified)                          |
//! | 2    | Usage error (bad arguments, unparseable timestamps)  |
//! | 60   | Run completed with breaks or non-MATCHED groups      |
//! | 61   | Invalid configuration                                |
//! | 62   | Runtime or input error (IO, CSV, missing column)     |
//! | 63   | Audit history already holds this run                 |

use tallyline_recon::ReconError;

/// Success - command completed; for `run`, everything reconciled.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Breaks found: at least one non-OK discrepancy or non-MATCHED group.
pub const EXIT_RECON_BREAKS: u8 = 60;

/// Config failed to parse or validate (including tolerance rules).
pub const EXIT_RECON_INVALID_CONFIG: u8 = 61;

/// Input could not be read or loaded, or the run failed mid-way.
pub const EXIT_RECON_RUNTIME: u8 = 62;

/// Audit append rejected: `(run_timestamp, grouping_key)` already recorded.
/// Re-run with `--force` to overwrite.
pub const EXIT_RECON_DUPLICATE_RUN: u8 = 63;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_)
        | ReconError::ConfigValidation(_)
        | ReconError::ToleranceConfig(_) => EXIT_RECON_INVALID_CONFIG,
        ReconError::MissingColumn { .. }
        | ReconError::Csv { .. }
        | ReconError::Cancelled { .. } => EXIT_RECON_RUNTIME,
        ReconError::Audit(tallyline_recon::AuditError::DuplicateRun { .. }) => {
            EXIT_RECON_DUPLICATE_RUN
        }
        ReconError::Audit(_) => EXIT_RECON_RUNTIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tallyline_recon::{AuditError, Side};

    #[test]
    fn codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_RECON_BREAKS,
            EXIT_RECON_INVALID_CONFIG,
            EXIT_RECON_RUNTIME,
            EXIT_RECON_DUPLICATE_RUN,
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn engine_errors_map_to_registry() {
        assert_eq!(
            recon_exit_code(&ReconError::ToleranceConfig("x".into())),
            EXIT_RECON_INVALID_CONFIG
        );
        assert_eq!(
            recon_exit_code(&ReconError::MissingColumn {
                side: Side::Target,
                column: "status".into()
            }),
            EXIT_RECON_RUNTIME
        );
        assert_eq!(
            recon_exit_code(&ReconError::Audit(AuditError::DuplicateRun {
                run_timestamp: "t".into(),
                grouping_keys: vec![]
            })),
            EXIT_RECON_DUPLICATE_RUN
        );
        assert_eq!(
            recon_exit_code(&ReconError::Audit(AuditError::LockPoisoned)),
            EXIT_RECON_RUNTIME
        );
    }
}
