//! Min-max scaling with parameters fixed at training time.
//!
//! Parameters are loaded from the scaler files written next to the model
//! artifacts and are never re-fit on serving data. Re-fitting on the
//! request's own rows would move the scale the models learned against.

use crate::error::{DataQualityWarning, ForecastError, Result};
use crate::features::{Feature, FeatureTable, TARGET_COLUMN};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Fitted `(min, max)` of one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureScaler {
    pub min: f64,
    pub max: f64,
    divisor: f64,
}

impl FeatureScaler {
    /// `min_divisor` replaces `max - min` when the fitted range collapses.
    pub fn new(min: f64, max: f64, min_divisor: f64) -> Self {
        let range = max - min;
        let divisor = if range.abs() < min_divisor { min_divisor } else { range };
        Self { min, max, divisor }
    }

    /// Constant during training; carries no information for the models.
    pub fn is_degenerate(&self) -> bool {
        self.divisor != self.max - self.min
    }

    /// `x' = (x - min) / (max - min)`
    #[inline]
    pub fn transform(&self, x: f64) -> f64 {
        (x - self.min) / self.divisor
    }

    /// `x = x' * (max - min) + min`
    #[inline]
    pub fn inverse(&self, scaled: f64) -> f64 {
        scaled * self.divisor + self.min
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScalerEntry {
    #[serde(default)]
    name: Option<String>,
    min: f64,
    max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScalerFile {
    #[serde(default)]
    features: Vec<ScalerEntry>,
    target: ScalerEntry,
    #[serde(default)]
    min_divisor: Option<f64>,
}

/// Per-feature scalers plus the target scaler used to denormalize outputs.
///
/// A set may carry only the target scaler; such a set serves univariate
/// models only.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationParameters {
    features: Vec<FeatureScaler>,
    target: FeatureScaler,
    min_divisor: f64,
}

impl NormalizationParameters {
    /// Build from explicit `(min, max)` pairs in feature-contract order.
    pub fn new(
        features: &[(f64, f64)],
        target: (f64, f64),
        min_divisor: f64,
    ) -> Result<Self> {
        if !features.is_empty() && features.len() != Feature::COUNT {
            return Err(ForecastError::contract(
                "scaler",
                format!("expected {} feature scalers, got {}", Feature::COUNT, features.len()),
            ));
        }
        for (i, &(min, max)) in features.iter().enumerate() {
            if !(min.is_finite() && max.is_finite()) || max < min {
                return Err(ForecastError::contract(
                    Feature::ALL[i].name(),
                    format!("invalid fitted range [{}, {}]", min, max),
                ));
            }
        }
        if !(target.0.is_finite() && target.1.is_finite()) || target.1 < target.0 {
            return Err(ForecastError::contract(
                TARGET_COLUMN,
                format!("invalid fitted range [{}, {}]", target.0, target.1),
            ));
        }

        let params = Self {
            features: features
                .iter()
                .map(|&(min, max)| FeatureScaler::new(min, max, min_divisor))
                .collect(),
            target: FeatureScaler::new(target.0, target.1, min_divisor),
            min_divisor,
        };
        for warning in params.degenerate_features() {
            warn!(?warning, "Degenerate feature range; scaling with divisor floor");
        }
        Ok(params)
    }

    /// Load a persisted scaler file.
    ///
    /// Named entries must follow the feature contract order exactly.
    pub fn from_json(path: &Path, default_min_divisor: f64) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: ScalerFile = serde_json::from_str(&content)
            .map_err(|e| ForecastError::artifact(path.display().to_string(), e.to_string()))?;

        for (i, entry) in file.features.iter().enumerate() {
            if let Some(name) = &entry.name {
                let expected = Feature::ALL.get(i);
                if expected.map(|f| Feature::from_name(name) != Some(*f)).unwrap_or(true) {
                    return Err(ForecastError::contract(
                        name.clone(),
                        format!(
                            "scaler column {} in {} does not match contract column {}",
                            i,
                            path.display(),
                            expected.map(|f| f.name()).unwrap_or("<none>")
                        ),
                    ));
                }
            }
        }

        if let Some(name) = &file.target.name {
            if name != TARGET_COLUMN {
                return Err(ForecastError::contract(
                    name.clone(),
                    format!(
                        "scaler target in {} does not match contract target {}",
                        path.display(),
                        TARGET_COLUMN
                    ),
                ));
            }
        }

        let features: Vec<(f64, f64)> = file.features.iter().map(|e| (e.min, e.max)).collect();
        Self::new(
            &features,
            (file.target.min, file.target.max),
            file.min_divisor.unwrap_or(default_min_divisor),
        )
    }

    /// Write the scaler file format read by [`NormalizationParameters::from_json`].
    pub fn to_json(&self) -> Result<String> {
        let file = ScalerFile {
            features: self
                .features
                .iter()
                .zip(Feature::ALL)
                .map(|(s, f)| ScalerEntry {
                    name: Some(f.name().to_string()),
                    min: s.min,
                    max: s.max,
                })
                .collect(),
            target: ScalerEntry {
                name: Some(TARGET_COLUMN.to_string()),
                min: self.target.min,
                max: self.target.max,
            },
            min_divisor: Some(self.min_divisor),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Compute parameters from a table.
    ///
    /// Training-side tooling only; the serving path loads persisted
    /// parameters instead.
    pub fn fit(table: &FeatureTable, min_divisor: f64) -> Result<Self> {
        if table.is_empty() {
            return Err(ForecastError::contract("scaler", "cannot fit on an empty table"));
        }
        let features: Vec<(f64, f64)> = Feature::ALL
            .iter()
            .map(|f| min_max(table.feature(*f).iter().copied()))
            .collect();
        let target = min_max(table.target().iter().copied());
        Self::new(&features, target, min_divisor)
    }

    pub fn has_features(&self) -> bool {
        !self.features.is_empty()
    }

    pub fn feature(&self, feature: Feature) -> Option<&FeatureScaler> {
        self.features.get(feature.index())
    }

    pub fn target(&self) -> &FeatureScaler {
        &self.target
    }

    /// Scale a rows × 13 block.
    pub fn normalize_features(&self, rows: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if !self.has_features() {
            return Err(ForecastError::contract(
                "scaler",
                "parameter set carries no feature scalers",
            ));
        }
        if rows.ncols() != self.features.len() {
            return Err(ForecastError::contract(
                "scaler",
                format!("expected {} columns, got {}", self.features.len(), rows.ncols()),
            ));
        }

        let mut out = rows.to_owned();
        for (mut column, scaler) in out.columns_mut().into_iter().zip(&self.features) {
            column.mapv_inplace(|x| scaler.transform(x));
        }
        Ok(out)
    }

    /// Scale target history into an L × 1 block.
    pub fn normalize_target(&self, values: &[f64]) -> Array2<f64> {
        Array2::from_shape_fn((values.len(), 1), |(i, _)| self.target.transform(values[i]))
    }

    pub fn denormalize_target(&self, scaled: f64) -> f64 {
        self.target.inverse(scaled)
    }

    /// One warning per feature whose fitted range collapsed.
    pub fn degenerate_features(&self) -> Vec<DataQualityWarning> {
        let mut warnings: Vec<DataQualityWarning> = self
            .features
            .iter()
            .zip(Feature::ALL)
            .filter(|(s, _)| s.is_degenerate())
            .map(|(s, f)| DataQualityWarning::DegenerateFeatureRange {
                feature: f.name().to_string(),
                min: s.min,
                max: s.max,
            })
            .collect();
        if self.target.is_degenerate() {
            warnings.push(DataQualityWarning::DegenerateFeatureRange {
                feature: TARGET_COLUMN.to_string(),
                min: self.target.min,
                max: self.target.max,
            });
        }
        warnings
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}
