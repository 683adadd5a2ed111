//! CSV-backed experiment tables: ground truth, model predictions and the
//! persisted training split.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BacktestConfig;

pub const IDENTIFIER_COLUMN: &str = "campaign_bg_event";
pub const IDENTIFIER_ALIASES: [&str; 3] = [IDENTIFIER_COLUMN, "campaign_event", "identifier"];
const LEGACY_PREDICTION_IDENTIFIER: &str = "campaign_id";

pub const TRUTH_FILE: &str = "test.csv";
pub const PREDICTIONS_FILE: &str = "predictions.csv";
pub const TRAIN_CAMPAIGNS_FILE: &str = "train_campaigns.csv";

// Model output, inverse-scaled but still in log1p space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    #[serde(rename = "campaign_bg_event")]
    pub identifier: String,
    #[serde(deserialize_with = "de_date")]
    pub date: NaiveDate,
    #[serde(deserialize_with = "de_date")]
    pub forecast_date: NaiveDate,
    #[serde(default, deserialize_with = "de_opt_integer")]
    pub horizon: Option<i64>,
    #[serde(default)]
    pub forecast: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthRow {
    #[serde(rename = "campaign_bg_event")]
    pub identifier: String,
    #[serde(deserialize_with = "de_date")]
    pub date: NaiveDate,
    #[serde(default)]
    pub spend: Option<f64>,
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub budget_type: Option<String>,
    #[serde(deserialize_with = "de_integer")]
    pub present: i64,
}

impl TruthRow {
    pub fn is_present(&self) -> bool {
        self.present != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainMembershipRow {
    #[serde(deserialize_with = "de_integer")]
    pub campaign_id: i64,
    #[serde(deserialize_with = "de_date")]
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainMembership {
    campaigns: HashSet<i64>,
}

impl TrainMembership {
    pub fn from_rows(rows: &[TrainMembershipRow]) -> Self {
        Self {
            campaigns: rows.iter().map(|row| row.campaign_id).collect(),
        }
    }

    pub fn contains_campaign(&self, campaign_id: i64) -> bool {
        self.campaigns.contains(&campaign_id)
    }

    pub fn campaign_count(&self) -> usize {
        self.campaigns.len()
    }
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path} has no identifier column (expected one of {expected:?})")]
    MissingIdentifierColumn {
        path: PathBuf,
        expected: Vec<&'static str>,
    },
    #[error("{path} is missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("invalid value '{value}' for column '{column}' in {path} at line {line}")]
    InvalidValue {
        path: PathBuf,
        column: String,
        value: String,
        line: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentTables {
    pub truth_path: PathBuf,
    pub predictions_path: PathBuf,
    pub train_campaigns_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTables {
    pub truth: Vec<TruthRow>,
    pub predictions: Vec<PredictionRow>,
    pub train_rows: usize,
    pub train: TrainMembership,
}

impl ExperimentTables {
    pub fn from_config(config: &BacktestConfig) -> Self {
        Self::in_folder(&config.data_folder())
    }

    pub fn in_folder(folder: &Path) -> Self {
        Self {
            truth_path: folder.join(TRUTH_FILE),
            predictions_path: folder.join(PREDICTIONS_FILE),
            train_campaigns_path: folder.join(TRAIN_CAMPAIGNS_FILE),
        }
    }

    pub fn load(&self) -> Result<LoadedTables, TableError> {
        let truth = load_truth(&self.truth_path)?;
        let predictions = load_predictions(&self.predictions_path)?;
        let train_rows = load_train_membership(&self.train_campaigns_path)?;
        let train = TrainMembership::from_rows(&train_rows);

        Ok(LoadedTables {
            truth,
            predictions,
            train_rows: train_rows.len(),
            train,
        })
    }
}

pub fn load_truth(path: &Path) -> Result<Vec<TruthRow>, TableError> {
    read_rows(path, IdentifierColumn::Required)
}

pub fn load_predictions(path: &Path) -> Result<Vec<PredictionRow>, TableError> {
    read_rows(path, IdentifierColumn::RequiredOrLegacy)
}

// A missing split file means membership is unknown.
pub fn load_train_membership(path: &Path) -> Result<Vec<TrainMembershipRow>, TableError> {
    if !path.exists() {
        warn!(
            component = "tables",
            event = "tables.train_membership.missing",
            path = %path.display()
        );
        return Ok(Vec::new());
    }
    read_rows(path, IdentifierColumn::NotUsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentifierColumn {
    Required,
    RequiredOrLegacy,
    NotUsed,
}

fn read_rows<T: DeserializeOwned>(
    path: &Path,
    identifier: IdentifierColumn,
) -> Result<Vec<T>, TableError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| csv_error(path, source))?;

    let raw_headers = reader
        .headers()
        .map_err(|source| csv_error(path, source))?
        .clone();
    let headers = normalize_headers(path, &raw_headers, identifier)?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|source| csv_error(path, source))?;
        let row: T = record
            .deserialize(Some(&headers))
            .map_err(|source| csv_error(path, source))?;
        rows.push(row);
    }

    debug!(
        component = "tables",
        event = "tables.read",
        path = %path.display(),
        rows = rows.len()
    );

    Ok(rows)
}

fn normalize_headers(
    path: &Path,
    headers: &StringRecord,
    identifier: IdentifierColumn,
) -> Result<StringRecord, TableError> {
    if identifier == IdentifierColumn::NotUsed {
        return Ok(headers.clone());
    }

    // Aliases are in priority order; only the first one present is renamed.
    let alias_idx = IDENTIFIER_ALIASES
        .iter()
        .find_map(|alias| headers.iter().position(|name| name == *alias));
    if let Some(alias_idx) = alias_idx {
        return Ok(headers
            .iter()
            .enumerate()
            .map(|(idx, name)| if idx == alias_idx { IDENTIFIER_COLUMN } else { name })
            .collect());
    }

    let has_legacy = headers.iter().any(|name| name == LEGACY_PREDICTION_IDENTIFIER);
    if identifier == IdentifierColumn::RequiredOrLegacy && has_legacy {
        debug!(
            component = "tables",
            event = "tables.legacy_identifier_column",
            path = %path.display()
        );
        return Ok(headers
            .iter()
            .map(|name| {
                if name == LEGACY_PREDICTION_IDENTIFIER {
                    IDENTIFIER_COLUMN
                } else {
                    name
                }
            })
            .collect());
    }

    Err(TableError::MissingIdentifierColumn {
        path: path.to_path_buf(),
        expected: IDENTIFIER_ALIASES.to_vec(),
    })
}

fn csv_error(path: &Path, source: csv::Error) -> TableError {
    TableError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ts| ts.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|ts| ts.date())
        })
}

pub(crate) fn parse_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }
    let as_float = trimmed.parse::<f64>().ok()?;
    if as_float.is_finite() && as_float.fract() == 0.0 {
        Some(as_float as i64)
    } else {
        None
    }
}

fn de_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw).ok_or_else(|| de::Error::custom(format!("invalid date '{raw}'")))
}

fn de_integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_integer(&raw).ok_or_else(|| de::Error::custom(format!("invalid integer '{raw}'")))
}

fn de_opt_integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => parse_integer(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid integer '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn dates_accept_plain_and_midnight_timestamp_spellings() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 4).expect("valid date");
        assert_eq!(parse_date("2021-03-04"), Some(expected));
        assert_eq!(parse_date("2021-03-04 00:00:00"), Some(expected));
        assert_eq!(parse_date("2021-03-04T00:00:00"), Some(expected));
        assert_eq!(parse_date("04/03/2021"), None);
    }

    #[test]
    fn integers_accept_float_spellings() {
        assert_eq!(parse_integer("3"), Some(3));
        assert_eq!(parse_integer("-1.0"), Some(-1));
        assert_eq!(parse_integer("2.5"), None);
        assert_eq!(parse_integer("x"), None);
    }

    #[test]
    fn legacy_prediction_header_is_mapped_to_identifier() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("predictions.csv");
        fs::write(
            &path,
            "campaign_id,forecast_date,horizon,date,target,forecast\n\
             5_purchase,2021-01-10,1.0,2021-01-11,0.5,0.7\n\
             5_purchase,2021-01-10,,2021-01-12,,\n",
        )
        .expect("write predictions");

        let rows = load_predictions(&path).expect("legacy layout loads");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].identifier, "5_purchase");
        assert_eq!(rows[0].horizon, Some(1));
        assert_eq!(rows[0].forecast, Some(0.7));
        assert_eq!(rows[1].horizon, None);
        assert_eq!(rows[1].forecast, None);
    }

    #[test]
    fn preferred_identifier_alias_wins_when_several_are_present() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("test.csv");
        fs::write(
            &path,
            "campaign_event,campaign_bg_event,campaign_id,date,spend,target,present\n\
             5_purchase,5_search_purchase,5,2021-01-10,1.0,0.5,1\n",
        )
        .expect("write truth");

        let rows = load_truth(&path).expect("both identifier columns load");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].identifier, "5_search_purchase");

        fs::write(
            &path,
            "identifier,campaign_event,date,present\n\
             x,7_purchase,2021-01-10,1\n",
        )
        .expect("write truth");
        let rows = load_truth(&path).expect("identifier and campaign_event load");
        assert_eq!(rows[0].identifier, "7_purchase");
    }

    #[test]
    fn truth_requires_identifier_column() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("test.csv");
        fs::write(&path, "campaign_id,date,present\n5,2021-01-10,1\n").expect("write truth");

        let err = load_truth(&path).expect_err("campaign_id alone is not an identifier for truth");
        assert!(matches!(err, TableError::MissingIdentifierColumn { .. }));
    }

    #[test]
    fn missing_train_membership_file_is_empty() {
        let dir = tempdir().expect("tempdir");
        let rows = load_train_membership(&dir.path().join("train_campaigns.csv"))
            .expect("missing file tolerated");
        assert!(rows.is_empty());
    }

    #[test]
    fn train_membership_indexes_campaigns() {
        let day = NaiveDate::from_ymd_opt(2021, 1, 1).expect("valid date");
        let membership = TrainMembership::from_rows(&[
            TrainMembershipRow {
                campaign_id: 1,
                date: day,
            },
            TrainMembershipRow {
                campaign_id: 1,
                date: day.succ_opt().expect("next day"),
            },
        ]);
        assert!(membership.contains_campaign(1));
        assert!(!membership.contains_campaign(2));
        assert_eq!(membership.campaign_count(), 1);
    }
}
