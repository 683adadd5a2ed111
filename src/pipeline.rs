//! End-to-end backtest run: load, reconstruct, gate, score and persist.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{BacktestConfig, ConfigError};
use crate::enrichment::SeriesEnrichment;
use crate::gates::GateSet;
use crate::metrics::{aggregate_by_horizon, MetricError, MetricReport};
use crate::observability::{
    log_results_written, log_run_finish, log_run_start, log_tables_loaded,
};
use crate::output::{write_metrics_json, write_results, OutputError, METRICS_FILE, RESULTS_FILE};
use crate::reconstruct::{
    reconstruct_all, DataIntegrityError, ReconstructionConfig, SeriesOutcome, TruthIndex,
};
use crate::tables::{ExperimentTables, TableError};

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    DataIntegrity(#[from] DataIntegrityError),
    #[error(transparent)]
    Metric(#[from] MetricError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub reconstructed: usize,
    pub skipped: usize,
    pub empty: usize,
    pub excluded: usize,
    pub result_rows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRun {
    pub report: MetricReport,
    pub summary: RunSummary,
    pub results_path: PathBuf,
    pub metrics_path: PathBuf,
}

pub fn run_backtest(
    config: &BacktestConfig,
    enrichments: &[&dyn SeriesEnrichment],
) -> Result<BacktestRun, BacktestError> {
    config.validate()?;
    log_run_start(config);

    let tables = ExperimentTables::from_config(config).load()?;
    log_tables_loaded(
        &config.data_folder(),
        tables.truth.len(),
        tables.predictions.len(),
        tables.train_rows,
    );

    let truth = TruthIndex::build(&tables.truth)?;
    let outcomes = reconstruct_all(
        &tables.predictions,
        &truth,
        ReconstructionConfig {
            total_steps: config.total_steps,
            version: config.version,
        },
    )?;

    let gates = GateSet::from_config(config, &tables.train);
    let mut summary = RunSummary::default();
    let mut kept = Vec::new();
    for outcome in outcomes {
        match outcome {
            SeriesOutcome::Reconstructed(series) => {
                if gates.evaluate(&series).excluded {
                    summary.excluded += 1;
                } else {
                    kept.push(series);
                }
            }
            SeriesOutcome::Skipped { .. } => summary.skipped += 1,
            SeriesOutcome::Empty { .. } => summary.empty += 1,
        }
    }
    summary.reconstructed = kept.len();

    let expected_horizons: Vec<i64> = (0..config.test_steps as i64).collect();
    let report = aggregate_by_horizon(
        kept.iter().flat_map(|series| series.rows.iter()),
        kept.len(),
        &expected_horizons,
    )?;

    let results_folder = config.results_folder();
    let results_path = results_folder.join(RESULTS_FILE);
    let metrics_path = results_folder.join(METRICS_FILE);
    summary.result_rows = write_results(&results_path, config.version, &kept, enrichments)?;
    write_metrics_json(&metrics_path, &report)?;
    log_results_written(&results_path, &metrics_path, &report);

    log_run_finish(&summary);

    Ok(BacktestRun {
        report,
        summary,
        results_path,
        metrics_path,
    })
}
