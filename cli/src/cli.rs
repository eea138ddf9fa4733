//! # CLI Interface
//!
//! Defines the command-line argument structure for `folio` using `clap`
//! derive. Supports three subcommands: `simulate`, `check` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::{LogFormat, DEFAULT_FILTER};

/// Folio vault scenario runner.
///
/// Loads a TOML scenario describing a market, a vault and a script of
/// actions, runs it against the vault engine and prints what happened.
#[derive(Parser, Debug)]
#[command(
    name = "folio",
    about = "Folio vault scenario runner",
    version,
    propagate_version = true
)]
pub struct FolioCli {
    /// Log format on stderr.
    #[arg(long, global = true, env = "FOLIO_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Default log filter when `RUST_LOG` is not set.
    #[arg(long, global = true, env = "FOLIO_LOG_LEVEL", default_value = DEFAULT_FILTER)]
    pub log_level: String,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the `folio` binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every step of a scenario and print a report.
    Simulate(SimulateArgs),
    /// Parse and validate a scenario without running its steps.
    Check(CheckArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `simulate` subcommand.
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Path to the scenario file (TOML).
    #[arg(env = "FOLIO_SCENARIO")]
    pub scenario: PathBuf,

    /// Print the report as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// Stop at the first step that fails instead of recording it.
    #[arg(long)]
    pub fail_fast: bool,
}

/// Arguments for the `check` subcommand.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Path to the scenario file (TOML).
    #[arg(env = "FOLIO_SCENARIO")]
    pub scenario: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        FolioCli::command().debug_assert();
    }

    #[test]
    fn log_format_is_a_global_flag() {
        let cli = FolioCli::try_parse_from(["folio", "check", "demo.toml", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(FolioCli::try_parse_from(["folio", "check", "demo.toml", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn parses_simulate_flags() {
        let cli = FolioCli::try_parse_from(["folio", "simulate", "demo.toml", "--json"]).unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.scenario, PathBuf::from("demo.toml"));
                assert!(args.json);
                assert!(!args.fail_fast);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
