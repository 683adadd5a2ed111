//! Optional left joins keyed on `(campaign_id, date)` that widen the results
//! table with extra trailing columns (budget metadata, series statistics).

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::tables::{parse_date, parse_integer, TableError};

const CAMPAIGN_ID_COLUMN: &str = "campaign_id";
const DATE_COLUMN: &str = "date";

// Cells are kept as written so timestamps and labels survive the join.
pub trait SeriesEnrichment {
    fn columns(&self) -> &[String];
    fn lookup(&self, campaign_id: i64, date: NaiveDate) -> Option<&[Option<String>]>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyedTableEnrichment {
    name: String,
    columns: Vec<String>,
    rows: HashMap<(i64, NaiveDate), Vec<Option<String>>>,
}

impl KeyedTableEnrichment {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: HashMap::new(),
        }
    }

    // First row for a key wins.
    pub fn insert(
        &mut self,
        campaign_id: i64,
        date: NaiveDate,
        values: Vec<Option<String>>,
    ) -> bool {
        debug_assert_eq!(values.len(), self.columns.len());
        match self.rows.entry((campaign_id, date)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(values);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let csv_err = |source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;
        let headers = reader.headers().map_err(csv_err)?.clone();

        let find = |column: &'static str| {
            headers
                .iter()
                .position(|name| name == column)
                .ok_or_else(|| TableError::MissingColumn {
                    path: path.to_path_buf(),
                    column,
                })
        };
        let campaign_idx = find(CAMPAIGN_ID_COLUMN)?;
        let date_idx = find(DATE_COLUMN)?;
        let value_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != campaign_idx && *idx != date_idx)
            .map(|(idx, name)| (idx, name.to_string()))
            .collect();

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "enrichment".to_string());
        let mut table = Self::new(
            name,
            value_columns.iter().map(|(_, name)| name.clone()).collect(),
        );

        let mut duplicates = 0usize;
        for result in reader.records() {
            let record = result.map_err(csv_err)?;
            let line = record.position().map(|pos| pos.line()).unwrap_or(0);
            let invalid = |column: &str, value: &str| TableError::InvalidValue {
                path: path.to_path_buf(),
                column: column.to_string(),
                value: value.to_string(),
                line,
            };

            let raw_id = record.get(campaign_idx).unwrap_or("");
            let campaign_id =
                parse_integer(raw_id).ok_or_else(|| invalid(CAMPAIGN_ID_COLUMN, raw_id))?;
            let raw_date = record.get(date_idx).unwrap_or("");
            let date = parse_date(raw_date).ok_or_else(|| invalid(DATE_COLUMN, raw_date))?;

            let values = value_columns
                .iter()
                .map(|(idx, _)| {
                    record
                        .get(*idx)
                        .filter(|raw| !raw.is_empty())
                        .map(str::to_string)
                })
                .collect();

            if !table.insert(campaign_id, date, values) {
                duplicates += 1;
            }
        }

        if duplicates > 0 {
            warn!(
                component = "enrichment",
                event = "enrichment.duplicate_keys",
                path = %path.display(),
                duplicates
            );
        }
        info!(
            component = "enrichment",
            event = "enrichment.loaded",
            name = %table.name,
            path = %path.display(),
            columns = table.columns.len(),
            rows = table.rows.len()
        );

        Ok(table)
    }
}

impl SeriesEnrichment for KeyedTableEnrichment {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn lookup(&self, campaign_id: i64, date: NaiveDate) -> Option<&[Option<String>]> {
        self.rows.get(&(campaign_id, date)).map(Vec::as_slice)
    }
}
