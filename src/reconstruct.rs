//! Per-campaign, per-forecast-date series reconstruction.
//!
//! Each `(identifier, forecast_date)` group of predictions is reindexed onto a
//! complete daily calendar starting `total_steps` days before the forecast
//! date, joined with present ground truth, moved back out of log1p space and
//! scored against a carry-forward benchmark.

use std::collections::{BTreeMap, HashMap};

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PipelineVersion;
use crate::identifier::{parse_identifier, CampaignKey, IdentifierError};
use crate::tables::{PredictionRow, TruthRow};

// Known rows and calendar rows without a prediction.
pub const HISTORICAL_HORIZON: i64 = -1;

#[derive(Debug, Error, PartialEq)]
pub enum DataIntegrityError {
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    #[error("duplicate prediction for '{identifier}' forecast_date={forecast_date} date={date}")]
    DuplicatePredictionDate {
        identifier: String,
        forecast_date: NaiveDate,
        date: NaiveDate,
    },
    #[error("duplicate ground truth row for '{identifier}' date={date}")]
    DuplicateTruthRow { identifier: String, date: NaiveDate },
    #[error("calendar for '{identifier}' forecast_date={forecast_date} minus {total_steps} days is out of range")]
    CalendarOutOfRange {
        identifier: String,
        forecast_date: NaiveDate,
        total_steps: usize,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PacingColumns {
    pub spend_campaign_pred: Option<f64>,
    pub spend_real: Option<f64>,
    pub spend_pred: Option<f64>,
    pub conv_real: Option<f64>,
    pub conv_pred: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub identifier: String,
    pub campaign_id: i64,
    pub date: NaiveDate,
    pub horizon: i64,
    pub budget: Option<f64>,
    pub budget_type: Option<String>,
    pub spend: Option<f64>,
    pub target: Option<f64>,
    pub forecast: Option<f64>,
    pub pacing: Option<PacingColumns>,
    pub y_true: Option<f64>,
    pub y_pred: Option<f64>,
    pub y_pred_benchmark: Option<f64>,
}

impl SeriesRow {
    pub fn is_historical(&self) -> bool {
        self.horizon < 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructedSeries {
    pub key: CampaignKey,
    pub forecast_date: NaiveDate,
    pub rows: Vec<SeriesRow>,
}

impl ReconstructedSeries {
    pub fn historical_spend(&self) -> Vec<f64> {
        self.rows
            .iter()
            .filter(|row| row.is_historical())
            .filter_map(|row| row.spend)
            .collect()
    }

    pub fn forecast_spend(&self) -> Vec<f64> {
        self.rows
            .iter()
            .filter(|row| !row.is_historical())
            .filter_map(|row| row.spend)
            .collect()
    }

    pub fn target_sum(&self) -> f64 {
        self.rows.iter().filter_map(|row| row.target).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    MissingHistoricalAnchor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SeriesOutcome {
    Reconstructed(ReconstructedSeries),
    Empty {
        identifier: String,
        forecast_date: NaiveDate,
    },
    Skipped {
        identifier: String,
        forecast_date: NaiveDate,
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructionConfig {
    pub total_steps: usize,
    pub version: PipelineVersion,
}

#[derive(Debug, Clone, Default)]
pub struct TruthIndex<'a> {
    by_identifier: HashMap<&'a str, BTreeMap<NaiveDate, &'a TruthRow>>,
}

impl<'a> TruthIndex<'a> {
    pub fn build(rows: &'a [TruthRow]) -> Result<Self, DataIntegrityError> {
        let mut by_identifier: HashMap<&'a str, BTreeMap<NaiveDate, &'a TruthRow>> =
            HashMap::new();
        for row in rows {
            let days = by_identifier.entry(row.identifier.as_str()).or_default();
            if days.insert(row.date, row).is_some() {
                return Err(DataIntegrityError::DuplicateTruthRow {
                    identifier: row.identifier.clone(),
                    date: row.date,
                });
            }
        }
        Ok(Self { by_identifier })
    }

    fn get(&self, identifier: &str, date: NaiveDate) -> Option<&'a TruthRow> {
        self.by_identifier
            .get(identifier)
            .and_then(|days| days.get(&date).copied())
    }
}

pub fn reconstruct_all(
    predictions: &[PredictionRow],
    truth: &TruthIndex<'_>,
    cfg: ReconstructionConfig,
) -> Result<Vec<SeriesOutcome>, DataIntegrityError> {
    let mut groups: BTreeMap<&str, BTreeMap<NaiveDate, Vec<&PredictionRow>>> = BTreeMap::new();
    for row in predictions {
        groups
            .entry(row.identifier.as_str())
            .or_default()
            .entry(row.forecast_date)
            .or_default()
            .push(row);
    }

    info!(
        component = "reconstruct",
        event = "reconstruct.start",
        identifiers = groups.len(),
        prediction_rows = predictions.len(),
        total_steps = cfg.total_steps,
        version = cfg.version.as_str()
    );

    let mut outcomes = Vec::new();
    for (identifier, by_forecast_date) in groups {
        let key = parse_identifier(identifier, cfg.version.identifier_scheme())?;
        for (forecast_date, rows) in by_forecast_date {
            outcomes.push(reconstruct_series(&key, forecast_date, &rows, truth, cfg)?);
        }
    }

    Ok(outcomes)
}

pub fn reconstruct_series(
    key: &CampaignKey,
    forecast_date: NaiveDate,
    predictions: &[&PredictionRow],
    truth: &TruthIndex<'_>,
    cfg: ReconstructionConfig,
) -> Result<SeriesOutcome, DataIntegrityError> {
    let mut by_date: BTreeMap<NaiveDate, &PredictionRow> = BTreeMap::new();
    for row in predictions {
        if by_date.insert(row.date, *row).is_some() {
            return Err(DataIntegrityError::DuplicatePredictionDate {
                identifier: key.identifier.clone(),
                forecast_date,
                date: row.date,
            });
        }
    }

    let start = forecast_date
        .checked_sub_days(Days::new(cfg.total_steps as u64))
        .ok_or_else(|| DataIntegrityError::CalendarOutOfRange {
            identifier: key.identifier.clone(),
            forecast_date,
            total_steps: cfg.total_steps,
        })?;
    let Some(end) = by_date.keys().next_back().copied() else {
        return Ok(empty(key, forecast_date));
    };

    let mut rows = Vec::new();
    for date in start.iter_days().take_while(|date| *date <= end) {
        let Some(truth_row) = truth.get(&key.identifier, date) else {
            continue;
        };
        if !truth_row.is_present() {
            continue;
        }
        rows.push(base_row(key, date, by_date.get(&date).copied(), truth_row));
    }

    if rows.is_empty() {
        debug!(
            component = "reconstruct",
            event = "reconstruct.series.empty",
            identifier = %key.identifier,
            forecast_date = %forecast_date
        );
        return Ok(empty(key, forecast_date));
    }

    match cfg.version {
        PipelineVersion::InstantaneousMetric => apply_instantaneous_metric(&mut rows),
        PipelineVersion::LegacyPacingMetric => apply_pacing_metric(&mut rows),
    }

    let Some(anchor) = rows
        .iter()
        .rev()
        .find(|row| row.horizon == HISTORICAL_HORIZON)
        .map(|row| row.y_true)
    else {
        warn!(
            component = "reconstruct",
            event = "reconstruct.series.skipped",
            reason = "missing_historical_anchor",
            identifier = %key.identifier,
            forecast_date = %forecast_date,
            rows = rows.len()
        );
        return Ok(SeriesOutcome::Skipped {
            identifier: key.identifier.clone(),
            forecast_date,
            reason: SkipReason::MissingHistoricalAnchor,
        });
    };

    for row in &mut rows {
        row.y_pred_benchmark = if row.is_historical() {
            row.y_true
        } else {
            anchor
        };
    }

    Ok(SeriesOutcome::Reconstructed(ReconstructedSeries {
        key: key.clone(),
        forecast_date,
        rows,
    }))
}

fn empty(key: &CampaignKey, forecast_date: NaiveDate) -> SeriesOutcome {
    SeriesOutcome::Empty {
        identifier: key.identifier.clone(),
        forecast_date,
    }
}

fn base_row(
    key: &CampaignKey,
    date: NaiveDate,
    prediction: Option<&PredictionRow>,
    truth: &TruthRow,
) -> SeriesRow {
    let target = truth.target.map(expm1_clamped);
    let forecast = prediction
        .and_then(|row| row.forecast)
        .map(expm1_clamped)
        .or(target);
    let horizon = prediction
        .and_then(|row| row.horizon)
        .unwrap_or(HISTORICAL_HORIZON);

    SeriesRow {
        identifier: key.identifier.clone(),
        campaign_id: key.campaign_id,
        date,
        horizon,
        budget: truth.budget.map(f64::exp_m1).and_then(finite),
        budget_type: truth.budget_type.clone(),
        spend: truth.spend.map(f64::exp_m1).and_then(finite),
        target: target.and_then(finite),
        forecast: forecast.and_then(finite),
        pacing: None,
        y_true: None,
        y_pred: None,
        y_pred_benchmark: None,
    }
}

pub fn expm1_clamped(value: f64) -> f64 {
    value.exp_m1().max(0.0)
}

pub fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn apply_instantaneous_metric(rows: &mut [SeriesRow]) {
    for row in rows {
        row.y_true = row.target;
        row.y_pred = row.forecast;
    }
}

fn apply_pacing_metric(rows: &mut [SeriesRow]) {
    let known_spend: Vec<f64> = rows
        .iter()
        .filter(|row| row.is_historical())
        .filter_map(|row| row.spend)
        .collect();
    let mean_known_spend = if known_spend.is_empty() {
        None
    } else {
        finite(known_spend.iter().sum::<f64>() / known_spend.len() as f64)
    };

    let mut spend_real = RunningSum::default();
    let mut spend_pred = RunningSum::default();
    let mut conv_real = RunningSum::default();
    let mut conv_pred = RunningSum::default();

    for row in rows {
        let spend_campaign_pred = if row.is_historical() {
            row.spend
        } else {
            mean_known_spend
        };
        let pacing = PacingColumns {
            spend_campaign_pred,
            spend_real: spend_real.push(row.spend),
            spend_pred: spend_pred.push(spend_campaign_pred),
            conv_real: conv_real.push(row.target),
            conv_pred: conv_pred.push(row.forecast),
        };
        row.y_true = ratio(pacing.spend_real, pacing.conv_real);
        row.y_pred = ratio(pacing.spend_pred, pacing.conv_pred);
        row.pacing = Some(pacing);
    }
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    finite(numerator? / denominator?)
}

#[derive(Debug, Default)]
struct RunningSum {
    total: f64,
}

impl RunningSum {
    fn push(&mut self, value: Option<f64>) -> Option<f64> {
        let value = value?;
        self.total += value;
        Some(self.total)
    }
}
