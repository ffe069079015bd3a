// Tallyline CLI - config-driven source/target reconciliation

mod exit_codes;
mod history;
mod recon;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

use exit_codes::{EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Reconcile a source dataset against a target and keep an audit trail")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a reconciliation from a TOML config file
    #[command(after_help = "\
Examples:
  tally run incentives.recon.toml
  tally run incentives.recon.toml --json
  tally run incentives.recon.toml --output report.json --audit-db history.db
  tally run incentives.recon.toml --no-audit
  tally run incentives.recon.toml --run-timestamp 2026-01-31T06:00:00Z --force")]
    Run {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// Print the JSON report to stdout
        #[arg(long)]
        json: bool,

        /// Write the JSON report to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Audit database (overrides [audit] path in the config)
        #[arg(long)]
        audit_db: Option<PathBuf>,

        /// Overwrite entries already recorded for this run
        #[arg(long)]
        force: bool,

        /// Do not record the run, even if the config names an audit database
        #[arg(long, conflicts_with_all = ["audit_db", "force"])]
        no_audit: bool,

        /// Keep OK markers in the JSON discrepancy list
        #[arg(long)]
        include_ok: bool,

        /// Fixed run timestamp (RFC 3339). Reruns with the same timestamp
        /// collide in the audit history instead of appending a new run.
        #[arg(long, value_parser = recon::parse_run_timestamp)]
        run_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// Validate a recon config without running
    #[command(after_help = "\
Examples:
  tally validate incentives.recon.toml")]
    Validate {
        /// Path to the .recon.toml config file
        config: PathBuf,
    },

    /// Profile both inputs: nulls per field, volume per group, duplicated ids
    #[command(after_help = "\
Examples:
  tally profile incentives.recon.toml
  tally profile incentives.recon.toml --json")]
    Profile {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// Print JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Query audit history
    #[command(after_help = "\
Examples:
  tally history history.db
  tally history history.db --group PROG_A --since 2026-01-01
  tally history history.db --until 2026-01-31T23:59:59Z --json")]
    History {
        /// Path to the audit database
        db: PathBuf,

        /// Only entries for this grouping value
        #[arg(long)]
        group: Option<String>,

        /// Earliest run timestamp (RFC 3339 or YYYY-MM-DD), inclusive
        #[arg(long)]
        since: Option<String>,

        /// Latest run timestamp (RFC 3339 or YYYY-MM-DD), inclusive
        #[arg(long)]
        until: Option<String>,

        /// Print JSON to stdout
        #[arg(long)]
        json: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("GIT_COMMIT_HASH"),
        ")",
        "\nengine:  tallyline-recon ",
        env!("CARGO_PKG_VERSION"),
        "\ntarget:  ",
        env!("TARGET"),
    )
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when embedded; ignore that case.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            json,
            output,
            audit_db,
            force,
            no_audit,
            include_ok,
            run_timestamp,
        } => recon::cmd_run(recon::RunArgs {
            config,
            json,
            output,
            audit_db,
            force,
            no_audit,
            include_ok,
            run_timestamp,
        }),
        Commands::Validate { config } => recon::cmd_validate(config),
        Commands::Profile { config, json } => recon::cmd_profile(config, json),
        Commands::History {
            db,
            group,
            since,
            until,
            json,
        } => history::cmd_history(db, group, since, until, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError {
            code,
            message,
            hint,
        }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            hint: None,
        }
    }

    pub fn args(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self::new(EXIT_ERROR, msg)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_audit_conflicts_with_force() {
        let parsed = Cli::try_parse_from(["tally", "run", "x.toml", "--no-audit", "--force"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["tally", "-vv", "validate", "x.toml"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
