//! Logging setup and backtest run lifecycle events.

use std::env;
use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::BacktestConfig;
use crate::metrics::MetricReport;
use crate::pipeline::RunSummary;

pub const LOG_LEVEL_VAR: &str = "BACKTEST_LOG_LEVEL";
pub const LOG_FORMAT_VAR: &str = "BACKTEST_LOG_FORMAT";
pub const LOG_TARGET_VAR: &str = "BACKTEST_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    logging_config_from_lookup(|key| env::var(key).ok())
}

// Unset, blank and unparseable values keep the default.
pub fn logging_config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Some(level) = lookup(LOG_LEVEL_VAR) {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }
    if let Some(format) = lookup(LOG_FORMAT_VAR).as_deref().and_then(parse_log_format) {
        config.format = format;
    }
    if let Some(include_target) = lookup(LOG_TARGET_VAR).as_deref().and_then(parse_bool) {
        config.include_target = include_target;
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_run_start(config: &BacktestConfig) {
    info!(
        component = "pacing_backtest",
        event = "run.start",
        experiment = config.experiment.as_str(),
        root_folder = %config.root_folder.display(),
        total_steps = config.total_steps,
        test_steps = config.test_steps,
        version = config.version.as_str()
    );
}

pub fn log_tables_loaded(
    data_folder: &Path,
    truth_rows: usize,
    prediction_rows: usize,
    train_rows: usize,
) {
    info!(
        component = "pacing_backtest",
        event = "tables.loaded",
        data_folder = %data_folder.display(),
        truth_rows,
        prediction_rows,
        train_rows
    );
}

pub fn log_results_written(results_path: &Path, metrics_path: &Path, report: &MetricReport) {
    let scored_horizons = report
        .horizons
        .iter()
        .filter(|metrics| metrics.horizon >= 0 && metrics.count > 0)
        .count();
    info!(
        component = "pacing_backtest",
        event = "results.written",
        results_path = %results_path.display(),
        metrics_path = %metrics_path.display(),
        sample_size = report.sample_size,
        scored_horizons
    );
}

pub fn log_run_finish(summary: &RunSummary) {
    info!(
        component = "pacing_backtest",
        event = "run.finish",
        sample_size = summary.reconstructed,
        skipped = summary.skipped,
        empty = summary.empty,
        excluded = summary.excluded,
        result_rows = summary.result_rows
    );
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}
