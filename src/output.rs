//! Results table layout, persistence and the console metric report.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::PipelineVersion;
use crate::enrichment::SeriesEnrichment;
use crate::metrics::MetricReport;
use crate::reconstruct::{ReconstructedSeries, SeriesRow};

pub const RESULTS_FILE: &str = "results.csv";
pub const METRICS_FILE: &str = "metrics.json";

const LEADING_COLUMNS: [&str; 7] = [
    "campaign_bg_event",
    "campaign_id",
    "date",
    "horizon",
    "budget",
    "budget_type",
    "spend",
];

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV write error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("JSON write error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub fn result_columns(
    version: PipelineVersion,
    enrichments: &[&dyn SeriesEnrichment],
) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    let mut push = |name: &str| columns.push(name.to_string());

    for name in LEADING_COLUMNS {
        push(name);
    }
    if version == PipelineVersion::LegacyPacingMetric {
        push("spend_campaign_pred");
    }
    push("target");
    push("forecast");
    if version == PipelineVersion::LegacyPacingMetric {
        for name in ["spend_real", "spend_pred", "conv_real", "conv_pred"] {
            push(name);
        }
    }
    for name in ["y_true", "y_pred", "y_pred_benchmark"] {
        push(name);
    }

    for enrichment in enrichments {
        columns.extend(enrichment.columns().iter().cloned());
    }
    columns
}

pub fn format_row(
    row: &SeriesRow,
    version: PipelineVersion,
    enrichments: &[&dyn SeriesEnrichment],
) -> Vec<String> {
    let pacing = row.pacing.unwrap_or_default();
    let legacy = version == PipelineVersion::LegacyPacingMetric;

    let mut out = vec![
        row.identifier.clone(),
        row.campaign_id.to_string(),
        row.date.format("%Y-%m-%d").to_string(),
        row.horizon.to_string(),
        cell(row.budget),
        row.budget_type.clone().unwrap_or_default(),
        cell(row.spend),
    ];
    if legacy {
        out.push(cell(pacing.spend_campaign_pred));
    }
    out.push(cell(row.target));
    out.push(cell(row.forecast));
    if legacy {
        out.push(cell(pacing.spend_real));
        out.push(cell(pacing.spend_pred));
        out.push(cell(pacing.conv_real));
        out.push(cell(pacing.conv_pred));
    }
    out.push(cell(row.y_true));
    out.push(cell(row.y_pred));
    out.push(cell(row.y_pred_benchmark));

    for enrichment in enrichments {
        match enrichment.lookup(row.campaign_id, row.date) {
            Some(values) => {
                out.extend(values.iter().map(|value| value.clone().unwrap_or_default()))
            }
            None => out.extend(enrichment.columns().iter().map(|_| String::new())),
        }
    }
    out
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn write_results(
    path: &Path,
    version: PipelineVersion,
    series: &[ReconstructedSeries],
    enrichments: &[&dyn SeriesEnrichment],
) -> Result<usize, OutputError> {
    ensure_parent(path)?;
    let csv_err = |source: csv::Error| OutputError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer
        .write_record(result_columns(version, enrichments))
        .map_err(csv_err)?;

    let mut written = 0usize;
    for row in series.iter().flat_map(|s| s.rows.iter()) {
        writer
            .write_record(format_row(row, version, enrichments))
            .map_err(csv_err)?;
        written += 1;
    }
    writer.flush().map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(written)
}

pub fn write_metrics_json(path: &Path, report: &MetricReport) -> Result<(), OutputError> {
    ensure_parent(path)?;
    let body = serde_json::to_vec_pretty(report).map_err(|source| OutputError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, body).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn ensure_parent(path: &Path) -> Result<(), OutputError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| OutputError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}

pub fn render_report(report: &MetricReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Sample size: {}", report.sample_size);
    let _ = writeln!(
        out,
        "{:>8} {:>8} {:>12} {:>16} {:>12}",
        "horizon", "count", "rmsle", "rmsle_benchmark", "mean_err"
    );
    for m in &report.horizons {
        let _ = writeln!(
            out,
            "{:>8} {:>8} {:>12.6} {:>16.6} {:>12.6}",
            m.horizon, m.count, m.rmsle, m.rmsle_benchmark, m.mean_err
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::KeyedTableEnrichment;
    use crate::metrics::HorizonMetrics;
    use chrono::NaiveDate;

    fn sample_row() -> SeriesRow {
        SeriesRow {
            identifier: "5_search_purchase".to_string(),
            campaign_id: 5,
            date: NaiveDate::from_ymd_opt(2021, 6, 1).expect("valid date"),
            horizon: 0,
            budget: Some(100.0),
            budget_type: Some("daily".to_string()),
            spend: Some(12.5),
            target: Some(3.0),
            forecast: None,
            pacing: None,
            y_true: Some(3.0),
            y_pred: Some(2.5),
            y_pred_benchmark: Some(4.0),
        }
    }

    #[test]
    fn instantaneous_layout_matches_contract() {
        let columns = result_columns(PipelineVersion::InstantaneousMetric, &[]);
        assert_eq!(
            columns,
            vec![
                "campaign_bg_event",
                "campaign_id",
                "date",
                "horizon",
                "budget",
                "budget_type",
                "spend",
                "target",
                "forecast",
                "y_true",
                "y_pred",
                "y_pred_benchmark",
            ]
        );
        let row = format_row(&sample_row(), PipelineVersion::InstantaneousMetric, &[]);
        assert_eq!(row.len(), columns.len());
        assert_eq!(row[2], "2021-06-01");
        assert_eq!(row[8], "");
        assert_eq!(row[11], "4");
    }

    #[test]
    fn legacy_layout_adds_cumulative_columns_in_order() {
        let columns = result_columns(PipelineVersion::LegacyPacingMetric, &[]);
        assert_eq!(columns.len(), 17);
        assert_eq!(columns[7], "spend_campaign_pred");
        assert_eq!(columns[8], "target");
        assert_eq!(&columns[10..14], ["spend_real", "spend_pred", "conv_real", "conv_pred"]);
        let row = format_row(&sample_row(), PipelineVersion::LegacyPacingMetric, &[]);
        assert_eq!(row.len(), 17);
    }

    #[test]
    fn enrichment_columns_are_appended_and_left_joined() {
        let mut table = KeyedTableEnrichment::new(
            "budgets",
            vec![
                "campaign_daily_budget".to_string(),
                "campaign_start_time".to_string(),
            ],
        );
        table.insert(
            5,
            NaiveDate::from_ymd_opt(2021, 6, 1).expect("valid date"),
            vec![Some("75".to_string()), Some("2021-05-20 08:30:00".to_string())],
        );
        let enrichments: [&dyn SeriesEnrichment; 1] = [&table];

        let columns = result_columns(PipelineVersion::InstantaneousMetric, &enrichments);
        assert_eq!(columns.len(), 14);
        assert_eq!(&columns[12..], ["campaign_daily_budget", "campaign_start_time"]);

        let row = format_row(&sample_row(), PipelineVersion::InstantaneousMetric, &enrichments);
        assert_eq!(&row[12..], ["75", "2021-05-20 08:30:00"]);

        let mut other_day = sample_row();
        other_day.date = NaiveDate::from_ymd_opt(2021, 6, 2).expect("valid date");
        let row = format_row(&other_day, PipelineVersion::InstantaneousMetric, &enrichments);
        assert_eq!(&row[12..], ["", ""]);
    }

    #[test]
    fn report_lists_sample_size_and_every_horizon() {
        let report = MetricReport {
            sample_size: 3,
            horizons: vec![
                HorizonMetrics {
                    horizon: 0,
                    count: 2,
                    rmsle: 1.0,
                    rmsle_benchmark: 1.5,
                    mean_err: 0.1,
                },
                HorizonMetrics {
                    horizon: 1,
                    count: 0,
                    rmsle: f64::NAN,
                    rmsle_benchmark: f64::NAN,
                    mean_err: f64::NAN,
                },
            ],
        };
        let text = render_report(&report);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Sample size: 3");
        assert_eq!(lines.len(), 4);
        assert!(lines[2].contains("1.000000"));
        assert!(lines[3].contains("NaN"));
    }
}
