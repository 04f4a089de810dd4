//! "What if conditions hold" rolling forecasts.
//!
//! A scenario fixes the 13 indicators at caller-chosen levels and rolls the
//! window forward one day per step: step `k` sees the last `L - k` observed
//! rows followed by `k` copies of the scenario row. Univariate models have
//! no indicator input, so they roll on their own predictions instead.

use crate::aggregate::ForecastReport;
use crate::error::{ForecastError, Result};
use crate::features::{Feature, FeatureTable};
use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Indicator levels to hold constant, in raw units.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioRequest {
    indicators: [f64; Feature::COUNT],
    steps: usize,
}

impl ScenarioRequest {
    pub fn new(indicators: [f64; Feature::COUNT], steps: usize) -> Result<Self> {
        if steps == 0 {
            return Err(ForecastError::Config("scenario needs at least one step".into()));
        }
        if let Some(i) = indicators.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::contract(
                Feature::ALL[i].name(),
                "scenario value must be finite",
            ));
        }
        Ok(Self { indicators, steps })
    }

    /// Start from the table's latest row and override the named indicators.
    ///
    /// Names may be canonical or aliases; anything else is rejected.
    pub fn from_overrides(
        table: &FeatureTable,
        overrides: &BTreeMap<String, f64>,
        steps: usize,
    ) -> Result<Self> {
        let last = table
            .len()
            .checked_sub(1)
            .ok_or_else(|| ForecastError::contract("scenario", "feature table is empty"))?;

        let mut indicators = [0.0; Feature::COUNT];
        for (j, value) in indicators.iter_mut().enumerate() {
            *value = table.features()[[last, j]];
        }
        for (name, value) in overrides {
            let feature = Feature::from_name(name).ok_or_else(|| {
                ForecastError::contract(name.clone(), "not a contract indicator")
            })?;
            indicators[feature.index()] = *value;
        }
        Self::new(indicators, steps)
    }

    pub fn indicator(&self, feature: Feature) -> f64 {
        self.indicators[feature.index()]
    }

    pub fn indicators(&self) -> &[f64; Feature::COUNT] {
        &self.indicators
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn named(&self) -> BTreeMap<String, f64> {
        Feature::ALL
            .iter()
            .map(|f| (f.name().to_string(), self.indicator(*f)))
            .collect()
    }

    /// Raw (unscaled) multivariate block for `step` (1-based), ending one
    /// scenario day past row `end` per step.
    pub(crate) fn multivariate_block(
        &self,
        table: &FeatureTable,
        end: usize,
        lookback: usize,
        step: usize,
    ) -> Result<Array2<f64>> {
        let scenario_rows = step.min(lookback);
        let observed = lookback - scenario_rows;
        if end + 1 < observed {
            return Err(ForecastError::insufficient(
                table.dates().get(end).copied(),
                observed,
                end + 1,
            ));
        }
        let start = end + 1 - observed;
        let features = table.features();

        Ok(Array2::from_shape_fn((lookback, Feature::COUNT), |(i, j)| {
            if i < observed {
                features[[start + i, j]]
            } else {
                self.indicators[j]
            }
        }))
    }
}

/// Per-step reports of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioForecast {
    /// Last observed day the scenario rolls from
    pub as_of: NaiveDate,
    pub indicators: BTreeMap<String, f64>,
    pub steps: Vec<ForecastReport>,
}

impl ScenarioForecast {
    /// Recommended model's price path, one entry per step.
    pub fn recommended_path(&self) -> Vec<Option<f64>> {
        self.steps
            .iter()
            .map(|r| r.recommended().and_then(|e| e.prediction()).map(|p| p.price))
            .collect()
    }
}
