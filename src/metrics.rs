//! Per-horizon forecast accuracy against the carry-forward benchmark.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reconstruct::SeriesRow;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonMetrics {
    pub horizon: i64,
    pub count: usize,
    pub rmsle: f64,
    pub rmsle_benchmark: f64,
    pub mean_err: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub sample_size: usize,
    pub horizons: Vec<HorizonMetrics>,
}

impl MetricReport {
    pub fn horizon(&self, horizon: i64) -> Option<&HorizonMetrics> {
        self.horizons.iter().find(|m| m.horizon == horizon)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MetricError {
    #[error("{column}={value} at horizon {horizon} is outside the log1p domain (must be > -1)")]
    LogDomain {
        horizon: i64,
        column: &'static str,
        value: f64,
    },
}

#[derive(Debug, Default)]
struct HorizonAccumulator {
    count: usize,
    sq_log_err: f64,
    sq_log_err_benchmark: f64,
    err_sum: f64,
    err_count: usize,
}

// Expected horizons are listed even when nothing scores (count 0, NaN).
pub fn aggregate_by_horizon<'a>(
    rows: impl IntoIterator<Item = &'a SeriesRow>,
    sample_size: usize,
    expected_horizons: &[i64],
) -> Result<MetricReport, MetricError> {
    let mut groups: BTreeMap<i64, HorizonAccumulator> = expected_horizons
        .iter()
        .map(|horizon| (*horizon, HorizonAccumulator::default()))
        .collect();

    for row in rows {
        let acc = groups.entry(row.horizon).or_default();

        if let (Some(y_true), Some(y_pred)) = (row.y_true, row.y_pred) {
            let err = (y_true - y_pred).abs() / y_true;
            if err.is_finite() {
                acc.err_sum += err;
                acc.err_count += 1;
            }
        }

        let (Some(y_true), Some(y_pred), Some(y_bench)) =
            (row.y_true, row.y_pred, row.y_pred_benchmark)
        else {
            continue;
        };
        let log_true = log1p_checked(row.horizon, "y_true", y_true)?;
        let log_pred = log1p_checked(row.horizon, "y_pred", y_pred)?;
        let log_bench = log1p_checked(row.horizon, "y_pred_benchmark", y_bench)?;

        acc.count += 1;
        acc.sq_log_err += (log_true - log_pred).powi(2);
        acc.sq_log_err_benchmark += (log_true - log_bench).powi(2);
    }

    let horizons = groups
        .into_iter()
        .map(|(horizon, acc)| HorizonMetrics {
            horizon,
            count: acc.count,
            rmsle: exp_rmsle(acc.sq_log_err, acc.count),
            rmsle_benchmark: exp_rmsle(acc.sq_log_err_benchmark, acc.count),
            mean_err: if acc.err_count == 0 {
                f64::NAN
            } else {
                acc.err_sum / acc.err_count as f64
            },
        })
        .collect();

    Ok(MetricReport {
        sample_size,
        horizons,
    })
}

fn exp_rmsle(sum_sq: f64, count: usize) -> f64 {
    if count == 0 {
        return f64::NAN;
    }
    (sum_sq / count as f64).sqrt().exp()
}

fn log1p_checked(horizon: i64, column: &'static str, value: f64) -> Result<f64, MetricError> {
    if value <= -1.0 {
        return Err(MetricError::LogDomain {
            horizon,
            column,
            value,
        });
    }
    Ok(value.ln_1p())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(horizon: i64, y_true: Option<f64>, y_pred: Option<f64>, bench: Option<f64>) -> SeriesRow {
        SeriesRow {
            identifier: "1_a_b".to_string(),
            campaign_id: 1,
            date: NaiveDate::from_ymd_opt(2021, 1, 1).expect("valid date"),
            horizon,
            budget: None,
            budget_type: None,
            spend: None,
            target: y_true,
            forecast: y_pred,
            pacing: None,
            y_true,
            y_pred,
            y_pred_benchmark: bench,
        }
    }

    #[test]
    fn perfect_forecast_scores_exactly_one() {
        let rows = vec![
            row(0, Some(3.0), Some(3.0), Some(5.0)),
            row(0, Some(0.0), Some(0.0), Some(2.0)),
            row(0, Some(12.5), Some(12.5), Some(12.5)),
        ];
        let report = aggregate_by_horizon(&rows, 1, &[]).expect("valid inputs");
        let h0 = report.horizon(0).expect("horizon 0 present");
        assert_eq!(h0.count, 3);
        assert_eq!(h0.rmsle, 1.0);
        assert!(h0.rmsle_benchmark > 1.0);
    }

    #[test]
    fn rmsle_matches_formula() {
        let rows = vec![row(2, Some(1.0), Some(3.0), Some(1.0)), row(2, Some(7.0), Some(3.0), Some(1.0))];
        let report = aggregate_by_horizon(&rows, 1, &[]).expect("valid inputs");
        let h2 = report.horizon(2).expect("horizon 2 present");

        let d1 = 2.0_f64.ln() - 4.0_f64.ln();
        let d2 = 8.0_f64.ln() - 4.0_f64.ln();
        let expected = ((d1 * d1 + d2 * d2) / 2.0).sqrt().exp();
        assert!((h2.rmsle - expected).abs() < 1e-12);

        let b2 = 8.0_f64.ln() - 2.0_f64.ln();
        let expected_bench = ((b2 * b2) / 2.0).sqrt().exp();
        assert!((h2.rmsle_benchmark - expected_bench).abs() < 1e-12);

        let expected_err = (2.0 / 1.0 + 4.0 / 7.0) / 2.0;
        assert!((h2.mean_err - expected_err).abs() < 1e-12);
    }

    #[test]
    fn rows_with_nulls_are_dropped_and_empty_horizons_are_reported() {
        let rows = vec![
            row(-1, Some(1.0), Some(1.0), Some(1.0)),
            row(1, None, Some(2.0), Some(2.0)),
            row(1, Some(2.0), Some(2.0), None),
        ];
        let report = aggregate_by_horizon(&rows, 2, &[0, 1]).expect("valid inputs");
        assert_eq!(report.sample_size, 2);
        let horizons: Vec<i64> = report.horizons.iter().map(|m| m.horizon).collect();
        assert_eq!(horizons, vec![-1, 0, 1]);

        let h0 = report.horizon(0).expect("expected horizon listed");
        assert_eq!(h0.count, 0);
        assert!(h0.rmsle.is_nan());
        assert!(h0.rmsle_benchmark.is_nan());

        let h1 = report.horizon(1).expect("horizon 1 present");
        assert_eq!(h1.count, 0);
        assert!(h1.rmsle.is_nan());
        assert_eq!(h1.mean_err, 0.0);
    }

    #[test]
    fn values_at_or_below_minus_one_are_rejected() {
        let rows = vec![row(0, Some(1.0), Some(-1.0), Some(1.0))];
        let err = aggregate_by_horizon(&rows, 1, &[]).expect_err("log domain violated");
        assert_eq!(
            err,
            MetricError::LogDomain {
                horizon: 0,
                column: "y_pred",
                value: -1.0
            }
        );
    }
}
