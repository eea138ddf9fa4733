//! # Logging
//!
//! `tracing` setup for the `folio` binary. All output goes to stderr so
//! stdout carries only the report (`folio simulate --json | jq`).
//!
//! A command runs inside a `run` span naming the command and the scenario
//! file; each scenario step runs inside a `step` span naming the vault, the
//! step's position in the script and its action. The JSON format copies the
//! current span's fields into every line, so a rejected step in a log
//! pipeline is found by `step.index` rather than by parsing messages.

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor `--log-level` is given.
pub const DEFAULT_FILTER: &str = "folio=info,folio_contracts=info,folio_protocol=warn";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line, with the current span's fields.
    Json,
}

/// Installs the global subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Fails on an unparseable filter or if a subscriber is already installed.
pub fn init_logging(default_filter: &str, format: LogFormat) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(rust_log.as_deref(), default_filter)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.context("failed to install log subscriber")
}

fn build_filter(rust_log: Option<&str>, default_filter: &str) -> Result<EnvFilter> {
    let directives = rust_log
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_filter);
    EnvFilter::try_new(directives).with_context(|| format!("invalid log filter {directives:?}"))
}

/// Span for one `folio` command over a scenario file.
pub fn command_span(command: &'static str, scenario: &Path) -> Span {
    tracing::info_span!("run", command, scenario = %scenario.display())
}

/// Span for one scenario step. `index` is 1-based.
pub fn step_span(vault: &str, index: usize, action: &'static str) -> Span {
    tracing::info_span!("step", vault, index, action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!(LogFormat::from_str("JSON", true).unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str("pretty", true).unwrap(), LogFormat::Pretty);
        assert!(LogFormat::from_str("yaml", true).is_err());
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn empty_rust_log_falls_back_to_default() {
        let filter = build_filter(Some("  "), DEFAULT_FILTER).unwrap();
        assert!(filter.to_string().contains("folio_protocol=warn"));
        let filter = build_filter(None, DEFAULT_FILTER).unwrap();
        assert!(filter.to_string().contains("folio=info"));
    }

    #[test]
    fn rust_log_overrides_default() {
        let filter = build_filter(Some("folio_contracts=trace"), DEFAULT_FILTER).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("folio_contracts=trace"));
        assert!(!rendered.contains("folio_protocol"));
    }

    #[test]
    fn bad_filter_is_an_error() {
        let err = build_filter(Some("folio=loudest"), DEFAULT_FILTER).unwrap_err();
        assert!(err.to_string().contains("folio=loudest"));
    }
}
