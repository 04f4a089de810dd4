//! Feature contract and table assembly.
//!
//! Every pre-trained model was fit on the 13 indicators below, in exactly
//! this column order, with `Gold_Spot` as the target. The order is part of
//! the model contract: reordering or dropping a column invalidates every
//! catalogued model, so the schema is a closed enum rather than a list of
//! strings.

use crate::calendar::AlignedPanel;
use crate::error::{ForecastError, Result};
use crate::series::{Frequency, SourceKind};
use chrono::NaiveDate;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Target column every model predicts.
pub const TARGET_COLUMN: &str = "Gold_Spot";

/// One of the 13 input indicators, in training column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    Cpi,
    SilverFutures,
    Sp500,
    UsdIndex,
    RealInterestRate,
    Unemployment,
    Vix,
    CrudeOil,
    FedFundsRate,
    Treasury10Y,
    Gpr,
    Gpra,
    Gprt,
}

impl Feature {
    pub const COUNT: usize = 13;

    /// All features in column order.
    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::Cpi,
        Feature::SilverFutures,
        Feature::Sp500,
        Feature::UsdIndex,
        Feature::RealInterestRate,
        Feature::Unemployment,
        Feature::Vix,
        Feature::CrudeOil,
        Feature::FedFundsRate,
        Feature::Treasury10Y,
        Feature::Gpr,
        Feature::Gpra,
        Feature::Gprt,
    ];

    /// Canonical column name.
    pub fn name(&self) -> &'static str {
        match self {
            Feature::Cpi => "CPI",
            Feature::SilverFutures => "Silver_Futures",
            Feature::Sp500 => "SP_500",
            Feature::UsdIndex => "USD_Index",
            Feature::RealInterestRate => "Real_Interest_Rate",
            Feature::Unemployment => "Unemployment",
            Feature::Vix => "VIX",
            Feature::CrudeOil => "Crude_Oil",
            Feature::FedFundsRate => "Fed_Funds_Rate",
            Feature::Treasury10Y => "Treasury_Yield_10Y",
            Feature::Gpr => "GPR",
            Feature::Gpra => "GPRA",
            Feature::Gprt => "GPRT",
        }
    }

    /// Other spellings upstream files use for the same column.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Feature::Sp500 => &["S&P_500", "^GSPC"],
            Feature::Vix => &["^VIX"],
            Feature::Unemployment => &["Unemployment_Rate", "UNRATE"],
            Feature::Treasury10Y => &["10Y_Treasury", "GS10"],
            Feature::Cpi => &["CPIAUCSL"],
            Feature::FedFundsRate => &["FEDFUNDS"],
            Feature::RealInterestRate => &["DFII10"],
            Feature::UsdIndex => &["DTWEXBGS"],
            Feature::SilverFutures => &["SI=F"],
            Feature::CrudeOil => &["CL=F"],
            _ => &[],
        }
    }

    /// Resolve a column name (canonical or alias).
    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL
            .iter()
            .copied()
            .find(|f| f.name() == name || f.aliases().contains(&name))
    }

    /// Position in the model input.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Feature::SilverFutures | Feature::Sp500 | Feature::Vix | Feature::CrudeOil => {
                SourceKind::Market
            }
            Feature::Gpr | Feature::Gpra | Feature::Gprt => SourceKind::Risk,
            _ => SourceKind::Macro,
        }
    }

    pub fn native_frequency(&self) -> Frequency {
        match self {
            Feature::SilverFutures
            | Feature::Sp500
            | Feature::Vix
            | Feature::CrudeOil
            | Feature::UsdIndex
            | Feature::RealInterestRate => Frequency::Daily,
            _ => Frequency::Monthly,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Aligned panel projected onto the feature contract plus the target.
///
/// Rows are contiguous days with every cell populated.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    dates: Vec<NaiveDate>,
    features: Array2<f64>,
    target: Vec<f64>,
}

impl FeatureTable {
    /// Build a table from already-complete rows.
    ///
    /// Fails if lengths disagree or any value is non-finite.
    pub fn from_rows(
        dates: Vec<NaiveDate>,
        rows: &[[f64; Feature::COUNT]],
        target: Vec<f64>,
    ) -> Result<Self> {
        if dates.len() != rows.len() || dates.len() != target.len() {
            return Err(ForecastError::contract(
                TARGET_COLUMN,
                format!(
                    "row count mismatch: {} dates, {} feature rows, {} targets",
                    dates.len(),
                    rows.len(),
                    target.len()
                ),
            ));
        }

        let mut features = Array2::zeros((rows.len(), Feature::COUNT));
        for (i, row) in rows.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                if !value.is_finite() {
                    return Err(ForecastError::contract(
                        Feature::ALL[j].name(),
                        format!("non-finite value on {}", dates[i]),
                    ));
                }
                features[[i, j]] = value;
            }
        }
        if let Some(i) = target.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::contract(
                TARGET_COLUMN,
                format!("non-finite value on {}", dates[i]),
            ));
        }

        Ok(Self {
            dates,
            features,
            target,
        })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Feature matrix, rows × 13.
    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    pub fn feature(&self, feature: Feature) -> ArrayView1<'_, f64> {
        self.features.index_axis(Axis(1), feature.index())
    }

    pub fn target(&self) -> &[f64] {
        &self.target
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Index of the row on `date`, or the closest row before it.
    pub fn row_at_or_before(&self, date: NaiveDate) -> Option<usize> {
        match self.dates.binary_search(&date) {
            Ok(i) => Some(i),
            Err(0) => None,
            Err(i) => Some(i - 1),
        }
    }
}

/// Projects an aligned panel onto the feature contract.
#[derive(Debug, Clone, Default)]
pub struct FeatureAssembler;

impl FeatureAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Select the 13 features and the target, then trim the cold start.
    ///
    /// A required column missing from the panel is a
    /// `FeatureContractViolation`; nothing is substituted.
    pub fn assemble(&self, panel: &AlignedPanel) -> Result<FeatureTable> {
        let mut feature_columns = Vec::with_capacity(Feature::COUNT);
        for feature in Feature::ALL {
            let column = panel
                .columns()
                .iter()
                .find(|c| Feature::from_name(&c.id) == Some(feature))
                .ok_or_else(|| {
                    ForecastError::contract(feature.name(), "column absent from aligned panel")
                })?;
            feature_columns.push(column);
        }
        let target_column = panel
            .column(TARGET_COLUMN)
            .ok_or_else(|| ForecastError::contract(TARGET_COLUMN, "target column absent"))?;

        for ignored in panel
            .columns()
            .iter()
            .filter(|c| c.id != TARGET_COLUMN && Feature::from_name(&c.id).is_none())
        {
            debug!(column = %ignored.id, "Ignoring column outside the feature contract");
        }

        // Forward-fill guarantees no gaps after each column's first value, so
        // the latest first-valid index is where every column is populated.
        let mut start = 0;
        for column in feature_columns.iter().chain(std::iter::once(&target_column)) {
            match column.first_valid_index() {
                Some(i) => start = start.max(i),
                None => {
                    return Err(ForecastError::contract(
                        column.id.clone(),
                        "column has no observations",
                    ))
                }
            }
        }

        let n = panel.len() - start;
        let mut features = Array2::zeros((n, Feature::COUNT));
        for (j, column) in feature_columns.iter().enumerate() {
            for (i, value) in column.values()[start..].iter().enumerate() {
                features[[i, j]] = value.ok_or_else(|| {
                    ForecastError::contract(
                        column.id.clone(),
                        format!("gap on {} after cold start", panel.dates()[start + i]),
                    )
                })?;
            }
        }
        let target = target_column.values()[start..]
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| {
                    ForecastError::contract(
                        TARGET_COLUMN,
                        format!("gap on {} after cold start", panel.dates()[start + i]),
                    )
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        debug!(trimmed = start, rows = n, "Assembled feature table");

        Ok(FeatureTable {
            dates: panel.dates()[start..].to_vec(),
            features,
            target,
        })
    }
}
