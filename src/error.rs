//! Error taxonomy for the forecast pipeline.
//!
//! Stage failures (alignment, assembly, windowing) abort a request before any
//! model runs. Model failures are captured per model as [`ModelError`] and
//! only become a [`ForecastError`] once the whole ensemble is accounted for.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the pipeline stages.
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Missing source data: series '{source_id}' has no observations")]
    MissingSourceData { source_id: String },

    #[error("Feature contract violation: {feature} - {message}")]
    FeatureContractViolation { feature: String, message: String },

    #[error(
        "Insufficient history{}: need {required} rows, {available} available{}",
        dated(.target),
        model_list(.models)
    )]
    InsufficientHistory {
        /// Requested date; `None` when the table has no rows to date it
        target: Option<NaiveDate>,
        required: usize,
        available: usize,
        /// Models whose lookback set `required`
        models: Vec<String>,
    },

    #[error("Partial ensemble failure: {} of {total} models failed ({})", .failed.len(), .failed.join(", "))]
    PartialEnsembleFailure { failed: Vec<String>, total: usize },

    #[error("Forecast failed: no model produced a prediction ({} attempted)", .failures.len())]
    EnsembleFailed { failures: Vec<(String, ModelError)> },

    #[error("Request cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("Artifact error in {path}: {message}")]
    Artifact { path: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ForecastError {
    pub fn contract(feature: impl Into<String>, message: impl Into<String>) -> Self {
        ForecastError::FeatureContractViolation {
            feature: feature.into(),
            message: message.into(),
        }
    }

    pub fn insufficient(target: Option<NaiveDate>, required: usize, available: usize) -> Self {
        ForecastError::InsufficientHistory {
            target,
            required,
            available,
            models: Vec::new(),
        }
    }

    /// Name the models an `InsufficientHistory` applies to; other errors pass through.
    pub fn for_models<'a>(self, names: impl IntoIterator<Item = &'a str>) -> Self {
        match self {
            ForecastError::InsufficientHistory {
                target,
                required,
                available,
                ..
            } => ForecastError::InsufficientHistory {
                target,
                required,
                available,
                models: names.into_iter().map(str::to_string).collect(),
            },
            other => other,
        }
    }

    pub fn artifact(path: impl Into<String>, message: impl Into<String>) -> Self {
        ForecastError::Artifact {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the same request could succeed with a different target date.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ForecastError::InsufficientHistory { .. } | ForecastError::PartialEnsembleFailure { .. }
        )
    }
}

fn dated(target: &Option<NaiveDate>) -> String {
    target.map(|d| format!(" for {}", d)).unwrap_or_default()
}

fn model_list(models: &[String]) -> String {
    if models.is_empty() {
        String::new()
    } else {
        format!(" (models: {})", models.join(", "))
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Failure of a single ensemble member.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ModelError {
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("corrupt artifact: {0}")]
    CorruptArtifact(String),

    /// Offending value rendered as text; NaN has no JSON number form.
    #[error("non-finite output: {0}")]
    NonFinite(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("cancelled before completion")]
    Cancelled,
}

impl ModelError {
    pub fn non_finite(value: f64) -> Self {
        ModelError::NonFinite(value.to_string())
    }
}

/// Data-quality findings that are recovered locally and reported, not raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    /// Fitted `max == min`; the feature is scaled with the divisor floor.
    DegenerateFeatureRange { feature: String, min: f64, max: f64 },

    /// A source's last real observation is older than the panel's last row.
    StaleSource {
        source_id: String,
        last_observed: NaiveDate,
        carried_days: i64,
    },
}
