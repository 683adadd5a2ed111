//! Experiment configuration: step counts, reconstruction version and gate policy.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::IdentifierScheme;

pub const DEFAULT_CHANGE_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentName {
    Cg,
    Volatility,
    Electricity,
    Traffic,
    Favorita,
}

pub const ALL_EXPERIMENTS: [ExperimentName; 5] = [
    ExperimentName::Cg,
    ExperimentName::Volatility,
    ExperimentName::Electricity,
    ExperimentName::Traffic,
    ExperimentName::Favorita,
];

impl ExperimentName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cg => "cg",
            Self::Volatility => "volatility",
            Self::Electricity => "electricity",
            Self::Traffic => "traffic",
            Self::Favorita => "favorita",
        }
    }

    pub fn model_steps(self) -> (usize, usize) {
        match self {
            Self::Cg => (14, 7),
            Self::Volatility => (257, 5),
            Self::Electricity => (192, 24),
            Self::Traffic => (192, 24),
            Self::Favorita => (120, 30),
        }
    }
}

pub fn parse_experiment(input: &str) -> Result<ExperimentName, ConfigError> {
    ALL_EXPERIMENTS
        .iter()
        .copied()
        .find(|name| name.as_str() == input.trim())
        .ok_or_else(|| ConfigError::UnknownExperiment(input.to_string()))
}

// Legacy: `{campaign_id}_{target_event}`, cumulative spend per conversion.
// Instantaneous: `{campaign_id}_{budget_group}_{target_event}`, daily conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVersion {
    LegacyPacingMetric,
    InstantaneousMetric,
}

impl PipelineVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LegacyPacingMetric => "legacy",
            Self::InstantaneousMetric => "instantaneous",
        }
    }

    pub fn identifier_scheme(self) -> IdentifierScheme {
        match self {
            Self::LegacyPacingMetric => IdentifierScheme::CampaignEvent,
            Self::InstantaneousMetric => IdentifierScheme::CampaignBudgetGroupEvent,
        }
    }
}

fn parse_version(raw: &str) -> Option<PipelineVersion> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "legacy" | "legacy_pacing" | "legacy_pacing_metric" => {
            Some(PipelineVersion::LegacyPacingMetric)
        }
        "instantaneous" | "instantaneous_metric" => Some(PipelineVersion::InstantaneousMetric),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    LogOnly,
    Exclude,
}

fn parse_gate_action(raw: &str) -> Option<GateAction> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "log" | "log_only" => Some(GateAction::LogOnly),
        "exclude" | "filter" => Some(GateAction::Exclude),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePolicy {
    pub min_length: GateAction,
    pub spend_change: GateAction,
    pub target_sum: GateAction,
    pub train_membership: GateAction,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            min_length: GateAction::LogOnly,
            spend_change: GateAction::LogOnly,
            target_sum: GateAction::LogOnly,
            train_membership: GateAction::LogOnly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub experiment: ExperimentName,
    pub root_folder: PathBuf,
    pub total_steps: usize,
    pub test_steps: usize,
    pub version: PipelineVersion,
    pub gates: GatePolicy,
    pub change_alpha: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown experiment: {0}")]
    UnknownExperiment(String),
    #[error("total_steps must be > 0")]
    ZeroTotalSteps,
    #[error("test_steps ({test_steps}) must not exceed total_steps ({total_steps})")]
    TestStepsExceedTotal { test_steps: usize, total_steps: usize },
    #[error("change detector alpha must be in (0, 0.5), got {0}")]
    InvalidAlpha(f64),
}

impl BacktestConfig {
    pub fn for_experiment(experiment: ExperimentName, root_folder: impl Into<PathBuf>) -> Self {
        let (total_steps, test_steps) = experiment.model_steps();
        Self {
            experiment,
            root_folder: root_folder.into(),
            total_steps,
            test_steps,
            version: PipelineVersion::InstantaneousMetric,
            gates: GatePolicy::default(),
            change_alpha: DEFAULT_CHANGE_ALPHA,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_steps == 0 {
            return Err(ConfigError::ZeroTotalSteps);
        }
        if self.test_steps > self.total_steps {
            return Err(ConfigError::TestStepsExceedTotal {
                test_steps: self.test_steps,
                total_steps: self.total_steps,
            });
        }
        if !(self.change_alpha > 0.0 && self.change_alpha < 0.5) {
            return Err(ConfigError::InvalidAlpha(self.change_alpha));
        }
        Ok(())
    }

    pub fn data_folder(&self) -> PathBuf {
        experiment_folder(&self.root_folder, "data", self.experiment)
    }

    pub fn results_folder(&self) -> PathBuf {
        experiment_folder(&self.root_folder, "results", self.experiment)
    }
}

fn experiment_folder(root: &Path, kind: &str, experiment: ExperimentName) -> PathBuf {
    root.join(kind).join(experiment.as_str())
}

pub fn backtest_config_from_env(
    experiment: ExperimentName,
    root_folder: impl Into<PathBuf>,
) -> BacktestConfig {
    let mut config = BacktestConfig::for_experiment(experiment, root_folder);

    if let Some(total_steps) = env_parsed::<usize>("BACKTEST_TOTAL_STEPS") {
        config.total_steps = total_steps;
    }
    if let Some(test_steps) = env_parsed::<usize>("BACKTEST_TEST_STEPS") {
        config.test_steps = test_steps;
    }
    if let Some(version) = env::var("BACKTEST_PIPELINE_VERSION")
        .ok()
        .and_then(|raw| parse_version(&raw))
    {
        config.version = version;
    }
    if let Some(alpha) = env_parsed::<f64>("BACKTEST_CHANGE_ALPHA") {
        config.change_alpha = alpha;
    }

    let gate_vars: [(&str, &mut GateAction); 4] = [
        ("BACKTEST_GATE_MIN_LENGTH", &mut config.gates.min_length),
        ("BACKTEST_GATE_SPEND_CHANGE", &mut config.gates.spend_change),
        ("BACKTEST_GATE_TARGET_SUM", &mut config.gates.target_sum),
        (
            "BACKTEST_GATE_TRAIN_MEMBERSHIP",
            &mut config.gates.train_membership,
        ),
    ];
    for (key, slot) in gate_vars {
        if let Some(action) = env::var(key).ok().and_then(|raw| parse_gate_action(&raw)) {
            *slot = action;
        }
    }

    config
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}
