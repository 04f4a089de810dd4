//! Raw source series handed over by the data-acquisition side.
//!
//! A series is immutable once built: observations are sorted by date and
//! duplicate dates keep the last value seen.

use crate::error::{ForecastError, Result};
use crate::features::{Feature, TARGET_COLUMN};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Native sampling frequency of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Monthly,
}

impl Frequency {
    /// Longest gap (in calendar days) between two regular releases.
    ///
    /// Daily market quotes skip weekends and holidays, monthly releases
    /// land anywhere in a 31-day month.
    pub fn expected_gap_days(&self) -> i64 {
        match self {
            Frequency::Daily => 4,
            Frequency::Monthly => 31,
        }
    }
}

/// Where a series comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Market,
    Macro,
    Risk,
}

/// One named scalar time series keyed by date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSeries {
    pub id: String,
    pub kind: SourceKind,
    pub frequency: Frequency,
    observations: Vec<(NaiveDate, f64)>,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date", alias = "DATE")]
    date: String,
    #[serde(alias = "Value", alias = "VALUE")]
    value: Option<f64>,
}

impl SourceSeries {
    /// Build a series from `(date, value)` pairs in any order.
    ///
    /// Non-finite values are treated as missing observations and dropped.
    pub fn new(
        id: impl Into<String>,
        kind: SourceKind,
        frequency: Frequency,
        observations: impl IntoIterator<Item = (NaiveDate, f64)>,
    ) -> Self {
        let ordered: BTreeMap<NaiveDate, f64> = observations
            .into_iter()
            .filter(|(_, v)| v.is_finite())
            .collect();

        Self {
            id: id.into(),
            kind,
            frequency,
            observations: ordered.into_iter().collect(),
        }
    }

    /// Load a two-column `date,value` CSV file.
    ///
    /// Dates are `YYYY-MM-DD`. Empty value cells are skipped.
    pub fn from_csv(
        path: &Path,
        id: impl Into<String>,
        kind: SourceKind,
        frequency: Frequency,
    ) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut observations = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            let row = row?;
            let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d").map_err(|e| {
                ForecastError::artifact(
                    path.display().to_string(),
                    format!("invalid date '{}': {}", row.date, e),
                )
            })?;
            if let Some(value) = row.value {
                observations.push((date, value));
            }
        }

        Ok(Self::new(id, kind, frequency, observations))
    }

    pub fn observations(&self) -> &[(NaiveDate, f64)] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.observations.first().map(|(d, _)| *d)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.observations.last().map(|(d, _)| *d)
    }
}

/// Load every `<name>.csv` in `dir` whose stem names a contract indicator
/// (or an alias) or the target.
///
/// Kind and frequency come from the feature contract. Other files are
/// skipped. Results are ordered by file name.
pub fn load_source_dir(dir: &Path) -> Result<Vec<SourceSeries>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv")))
        .collect();
    paths.sort();

    let mut sources = Vec::new();
    for path in paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let (kind, frequency) = if stem == TARGET_COLUMN {
            (SourceKind::Market, Frequency::Daily)
        } else if let Some(feature) = Feature::from_name(stem) {
            (feature.kind(), feature.native_frequency())
        } else {
            debug!(file = %path.display(), "Skipping file outside the feature contract");
            continue;
        };
        let series = SourceSeries::from_csv(&path, stem, kind, frequency)?;
        debug!(source = stem, observations = series.len(), "Loaded source series");
        sources.push(series);
    }
    Ok(sources)
}
