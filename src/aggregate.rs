//! Collects per-model runs into one ranked forecast report.

use crate::ensemble::ModelRun;
use crate::error::{DataQualityWarning, ForecastError, ModelError, Result};
use crate::model::{Architecture, OfflineMetrics};
use crate::window::InputLayout;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{info, warn};

/// A successful model's prediction in price units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePrediction {
    pub price: f64,
    /// `price - z * rmse`
    pub lower: f64,
    /// `price + z * rmse`
    pub upper: f64,
    /// Percent change against the last observed target
    pub change_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryOutcome {
    Predicted(PricePrediction),
    Failed { error: ModelError },
}

/// One row of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub model: String,
    pub architecture: Architecture,
    pub variant: InputLayout,
    pub metrics: OfflineMetrics,
    pub outcome: EntryOutcome,
}

impl ForecastEntry {
    pub fn prediction(&self) -> Option<&PricePrediction> {
        match &self.outcome {
            EntryOutcome::Predicted(p) => Some(p),
            EntryOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ModelError> {
        match &self.outcome {
            EntryOutcome::Predicted(_) => None,
            EntryOutcome::Failed { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Every model produced a prediction
    Complete,
    /// At least one model failed; the rest are reported
    Degraded,
}

/// Ranked forecast for one request, best offline R² first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastReport {
    /// Date the request asked about
    pub requested: NaiveDate,
    /// Last row of the input windows
    pub as_of: NaiveDate,
    /// Day the prediction is for
    pub predicted_for: NaiveDate,
    /// Observed target on `as_of`
    pub last_observed: f64,
    pub status: ReportStatus,
    pub entries: Vec<ForecastEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DataQualityWarning>,
}

impl ForecastReport {
    /// Highest-ranked model that produced a prediction.
    pub fn recommended(&self) -> Option<&ForecastEntry> {
        self.entries.iter().find(|e| e.prediction().is_some())
    }

    pub fn entry(&self, model: &str) -> Option<&ForecastEntry> {
        self.entries.iter().find(|e| e.model == model)
    }

    pub fn predictions(&self) -> impl Iterator<Item = (&str, &PricePrediction)> {
        self.entries
            .iter()
            .filter_map(|e| e.prediction().map(|p| (e.model.as_str(), p)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ModelError)> {
        self.entries
            .iter()
            .filter_map(|e| e.error().map(|err| (e.model.as_str(), err)))
    }
}

/// Dates a report covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportContext {
    pub requested: NaiveDate,
    pub as_of: NaiveDate,
    pub last_observed: f64,
}

/// Ranks runs and attaches confidence bands.
#[derive(Debug, Clone, Copy)]
pub struct ForecastAggregator {
    confidence_z: f64,
    require_complete: bool,
}

impl Default for ForecastAggregator {
    fn default() -> Self {
        Self::new(1.96, false)
    }
}

impl ForecastAggregator {
    pub fn new(confidence_z: f64, require_complete: bool) -> Self {
        Self {
            confidence_z,
            require_complete,
        }
    }

    /// Build the report.
    ///
    /// Fails when no model succeeded, or, with `require_complete`, when any
    /// model failed.
    pub fn aggregate(
        &self,
        context: ReportContext,
        runs: Vec<ModelRun>,
        warnings: Vec<DataQualityWarning>,
    ) -> Result<ForecastReport> {
        let total = runs.len();
        let failures: Vec<(String, ModelError)> = runs
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (r.name().to_string(), e.clone())))
            .collect();

        if failures.len() == total {
            return Err(ForecastError::EnsembleFailed { failures });
        }
        if self.require_complete && !failures.is_empty() {
            return Err(ForecastError::PartialEnsembleFailure {
                failed: failures.into_iter().map(|(name, _)| name).collect(),
                total,
            });
        }

        let mut entries: Vec<ForecastEntry> = runs
            .into_iter()
            .map(|run| {
                let outcome = match run.outcome {
                    Ok(raw) => EntryOutcome::Predicted(self.band(
                        raw.price,
                        run.descriptor.metrics.rmse,
                        context.last_observed,
                    )),
                    Err(error) => EntryOutcome::Failed { error },
                };
                ForecastEntry {
                    model: run.descriptor.name,
                    architecture: run.descriptor.architecture,
                    variant: run.descriptor.input.layout,
                    metrics: run.descriptor.metrics,
                    outcome,
                }
            })
            .collect();
        entries.sort_by(rank);

        let status = if failures.is_empty() {
            ReportStatus::Complete
        } else {
            warn!(failed = failures.len(), total, "Forecast degraded");
            ReportStatus::Degraded
        };

        let report = ForecastReport {
            requested: context.requested,
            as_of: context.as_of,
            predicted_for: context.as_of.succ_opt().unwrap_or(context.as_of),
            last_observed: context.last_observed,
            status,
            entries,
            warnings,
        };
        if let Some(best) = report.recommended() {
            info!(
                as_of = %report.as_of,
                model = %best.model,
                price = best.prediction().map(|p| p.price),
                "Forecast ready"
            );
        }
        Ok(report)
    }

    fn band(&self, price: f64, rmse: f64, last_observed: f64) -> PricePrediction {
        let half_width = if rmse.is_finite() { self.confidence_z * rmse } else { 0.0 };
        let change_pct = if last_observed != 0.0 {
            (price - last_observed) / last_observed * 100.0
        } else {
            0.0
        };
        PricePrediction {
            price,
            lower: price - half_width,
            upper: price + half_width,
            change_pct,
        }
    }
}

/// Descending R², NaN last, ties by name.
fn rank(a: &ForecastEntry, b: &ForecastEntry) -> Ordering {
    let key = |e: &ForecastEntry| {
        if e.metrics.r2.is_nan() {
            f64::NEG_INFINITY
        } else {
            e.metrics.r2
        }
    };
    key(b)
        .total_cmp(&key(a))
        .then_with(|| a.model.cmp(&b.model))
}
