// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Folio Scenario Runner
//!
//! Entry point for the `folio` binary. Loads a TOML scenario, runs it
//! against the vault engine and prints a report.
//!
//! The binary supports three subcommands:
//!
//! - `simulate`: run a scenario and print what every step did
//! - `check`: parse and validate a scenario without running it
//! - `version`: print build version information

mod cli;
mod logging;
mod scenario;
mod simulate;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Commands, FolioCli};
use scenario::Scenario;
use simulate::Simulation;

fn main() -> Result<()> {
    let cli = FolioCli::parse();

    match cli.command {
        Commands::Simulate(args) => {
            logging::init_logging(&cli.log_level, cli.log_format)?;
            let _run = logging::command_span("simulate", &args.scenario).entered();
            run_simulation(args)
        }
        Commands::Check(args) => {
            logging::init_logging(&cli.log_level, cli.log_format)?;
            let _run = logging::command_span("check", &args.scenario).entered();
            check_scenario(args)
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Runs every step of the scenario and prints the report on stdout.
fn run_simulation(args: cli::SimulateArgs) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)?;
    tracing::info!(
        steps = scenario.steps.len(),
        fail_fast = args.fail_fast,
        "starting simulation"
    );

    let report = Simulation::new(scenario)
        .context("failed to set up simulation")?
        .run(args.fail_fast)?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    } else {
        print!("{report}");
    }
    Ok(())
}

/// Validates the scenario and builds its market without running any step.
fn check_scenario(args: cli::CheckArgs) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)?;
    let (tokens, holders, steps) = (scenario.tokens.len(), scenario.holders.len(), scenario.steps.len());
    Simulation::new(scenario).context("failed to set up simulation")?;
    println!(
        "{}: ok ({tokens} tokens, {holders} holders, {steps} steps)",
        args.scenario.display()
    );
    Ok(())
}

fn print_version() {
    println!("folio     {}", env!("CARGO_PKG_VERSION"));
    println!("rustc     {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}
