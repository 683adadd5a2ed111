//! Backtest evaluation for campaign pacing forecasts.
//!
//! Reconstructs daily series from model predictions and ground truth, scores
//! them per forecast horizon against a carry-forward benchmark, and writes the
//! results table and metric report.

mod change_detector;
mod config;
mod enrichment;
mod gates;
mod identifier;
mod metrics;
mod observability;
mod output;
mod pipeline;
mod reconstruct;
mod tables;

pub use change_detector::{has_spend_changed, has_spend_changed_at, ChangeVerdict};
pub use config::{
    backtest_config_from_env, parse_experiment, BacktestConfig, ConfigError, ExperimentName,
    GateAction, GatePolicy, PipelineVersion, ALL_EXPERIMENTS, DEFAULT_CHANGE_ALPHA,
};
pub use enrichment::{KeyedTableEnrichment, SeriesEnrichment};
pub use gates::{
    DiagnosticGate, GateCheck, GateFlag, GateReport, GateSet, MinLengthGate, SpendChangeGate,
    TargetSumGate, TrainMembershipGate,
};
pub use identifier::{parse_identifier, CampaignKey, IdentifierError, IdentifierScheme};
pub use metrics::{aggregate_by_horizon, HorizonMetrics, MetricError, MetricReport};
pub use observability::{
    init_logging, log_results_written, log_run_finish, log_run_start, log_tables_loaded,
    logging_config_from_env, logging_config_from_lookup, LogFormat, LoggingConfig,
    LoggingInitError, LOG_FORMAT_VAR, LOG_LEVEL_VAR, LOG_TARGET_VAR,
};
pub use output::{
    format_row, render_report, result_columns, write_metrics_json, write_results, OutputError,
    METRICS_FILE, RESULTS_FILE,
};
pub use pipeline::{run_backtest, BacktestError, BacktestRun, RunSummary};
pub use reconstruct::{
    expm1_clamped, reconstruct_all, reconstruct_series, DataIntegrityError, PacingColumns,
    ReconstructedSeries, ReconstructionConfig, SeriesOutcome, SeriesRow, SkipReason, TruthIndex,
    HISTORICAL_HORIZON,
};
pub use tables::{
    load_predictions, load_train_membership, load_truth, ExperimentTables, LoadedTables,
    PredictionRow, TableError, TrainMembership, TrainMembershipRow, TruthRow, IDENTIFIER_ALIASES,
    IDENTIFIER_COLUMN, PREDICTIONS_FILE, TRAIN_CAMPAIGNS_FILE, TRUTH_FILE,
};
