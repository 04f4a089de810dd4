//! Pipeline configuration.
//!
//! Loaded from TOML or JSON; every field has a default so a partial file is
//! enough.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default lookback window (daily rows) every catalogued model was fit on.
pub const DEFAULT_LOOKBACK: usize = 60;

/// Smallest divisor used when a fitted feature range collapses to zero.
pub const DEFAULT_MIN_DIVISOR: f64 = 1e-8;

/// What to do when a source is forward-filled past its staleness budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalenessAction {
    /// Carry the last value indefinitely, silently.
    Allow,
    /// Carry the last value and report a data-quality warning.
    Warn,
    /// Cut the panel's live edge back to the stalest source's budget.
    Truncate,
}

/// Trailing-edge staleness handling for the calendar aligner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessPolicy {
    /// Carried days tolerated past a source's last observation.
    ///
    /// `None` uses each source's native release gap.
    pub max_trailing_days: Option<i64>,
    pub action: StalenessAction,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            max_trailing_days: None,
            action: StalenessAction::Warn,
        }
    }
}

/// Configuration for the forecast pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Lookback used for models that don't declare their own
    pub lookback: usize,

    /// Divisor floor for degenerate feature ranges
    pub min_divisor: f64,

    /// z-score for the confidence band (price ± z * RMSE)
    pub confidence_z: f64,

    /// Trailing staleness handling
    pub staleness: StalenessPolicy,

    /// Run ensemble members one after another even with the `parallel` feature
    pub force_sequential: bool,

    /// On cancellation, return whatever models finished instead of nothing
    pub best_effort_partial: bool,

    /// Treat any failed model as a request failure
    pub require_complete_ensemble: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            lookback: DEFAULT_LOOKBACK,
            min_divisor: DEFAULT_MIN_DIVISOR,
            confidence_z: 1.96,
            staleness: StalenessPolicy::default(),
            force_sequential: false,
            best_effort_partial: false,
            require_complete_ensemble: false,
        }
    }
}

impl ForecastConfig {
    /// Load configuration from a TOML file
    pub fn from_toml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ForecastConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ForecastConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load by file extension, falling back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(p) if p.extension().is_some_and(|e| e == "json") => Self::from_json(p),
            Some(p) => Self::from_toml(p),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.lookback == 0 {
            return Err(ForecastError::Config("lookback must be > 0".into()));
        }
        if !(self.min_divisor > 0.0 && self.min_divisor.is_finite()) {
            return Err(ForecastError::Config("min_divisor must be a positive finite number".into()));
        }
        if !(self.confidence_z >= 0.0 && self.confidence_z.is_finite()) {
            return Err(ForecastError::Config("confidence_z must be >= 0".into()));
        }
        if let Some(days) = self.staleness.max_trailing_days {
            if days < 0 {
                return Err(ForecastError::Config("staleness.max_trailing_days must be >= 0".into()));
            }
        }
        Ok(())
    }
}
