//! Fixed-length lookback windows over the feature table.
//!
//! A window is the last `lookback` daily rows ending at (or just before) the
//! requested date, scaled with the model's persisted parameters. Short
//! history is an error, never padding.

use crate::error::{ForecastError, Result};
use crate::features::{Feature, FeatureTable};
use crate::normalize::NormalizationParameters;
use chrono::NaiveDate;
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Which columns a model consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    /// The 13 contract features
    Multivariate,
    /// Target history only
    Univariate,
}

impl InputLayout {
    pub fn width(&self) -> usize {
        match self {
            InputLayout::Multivariate => Feature::COUNT,
            InputLayout::Univariate => 1,
        }
    }
}

/// Expected `(lookback, features)` input of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputShape {
    pub lookback: usize,
    pub layout: InputLayout,
}

impl InputShape {
    pub fn new(lookback: usize, layout: InputLayout) -> Self {
        Self { lookback, layout }
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.lookback, self.layout.width())
    }
}

/// A normalized lookback slice, the unit of input to every model.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    shape: InputShape,
    values: Array2<f64>,
    end_date: NaiveDate,
    last_target: f64,
}

impl Window {
    /// Wrap an already-normalized block.
    pub fn new(
        layout: InputLayout,
        values: Array2<f64>,
        end_date: NaiveDate,
        last_target: f64,
    ) -> Result<Self> {
        if values.ncols() != layout.width() || values.nrows() == 0 {
            return Err(ForecastError::contract(
                "window",
                format!(
                    "{:?} window needs {} columns, got {:?}",
                    layout,
                    layout.width(),
                    values.dim()
                ),
            ));
        }
        Ok(Self {
            shape: InputShape::new(values.nrows(), layout),
            values,
            end_date,
            last_target,
        })
    }

    pub fn shape(&self) -> InputShape {
        self.shape
    }

    pub fn dims(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// Date of the window's last row.
    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    /// Observed target price on the window's last row.
    pub fn last_target(&self) -> f64 {
        self.last_target
    }
}

/// Slices a feature table into normalized windows of one shape.
#[derive(Debug, Clone, Copy)]
pub struct WindowBuilder {
    shape: InputShape,
}

impl WindowBuilder {
    pub fn new(shape: InputShape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> InputShape {
        self.shape
    }

    /// Window ending on `target`, or on the last row before it.
    pub fn window_at(
        &self,
        table: &FeatureTable,
        params: &NormalizationParameters,
        target: NaiveDate,
    ) -> Result<Window> {
        let end = table
            .row_at_or_before(target)
            .ok_or_else(|| ForecastError::insufficient(Some(target), self.shape.lookback, 0))?;
        if end + 1 < self.shape.lookback {
            return Err(ForecastError::insufficient(
                Some(target),
                self.shape.lookback,
                end + 1,
            ));
        }
        self.window_ending(table, params, end)
    }

    /// Window whose last row is `end` (a table row index).
    pub fn window_ending(
        &self,
        table: &FeatureTable,
        params: &NormalizationParameters,
        end: usize,
    ) -> Result<Window> {
        let lookback = self.shape.lookback;
        if end >= table.len() || end + 1 < lookback {
            let target = table.dates().get(end).copied().or_else(|| table.last_date());
            return Err(ForecastError::insufficient(
                target,
                lookback,
                (end + 1).min(table.len()),
            ));
        }
        let start = end + 1 - lookback;

        let values = match self.shape.layout {
            InputLayout::Multivariate => {
                params.normalize_features(table.features().slice(s![start..=end, ..]))?
            }
            InputLayout::Univariate => params.normalize_target(&table.target()[start..=end]),
        };

        Window::new(
            self.shape.layout,
            values,
            table.dates()[end],
            table.target()[end],
        )
    }

    /// Every overlapping window in the table, oldest first.
    pub fn windows<'a>(
        &'a self,
        table: &'a FeatureTable,
        params: &'a NormalizationParameters,
    ) -> impl Iterator<Item = Result<Window>> + 'a {
        let first = self.shape.lookback.saturating_sub(1);
        (first..table.len()).map(move |end| self.window_ending(table, params, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn d0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn table(n: usize) -> FeatureTable {
        let dates: Vec<NaiveDate> = (0..n).map(|i| d0() + Duration::days(i as i64)).collect();
        let rows: Vec<[f64; Feature::COUNT]> = (0..n)
            .map(|i| {
                let mut row = [0.0; Feature::COUNT];
                for (j, v) in row.iter_mut().enumerate() {
                    *v = (i + j) as f64;
                }
                row
            })
            .collect();
        let target = (0..n).map(|i| 1000.0 + i as f64).collect();
        FeatureTable::from_rows(dates, &rows, target).unwrap()
    }

    fn params() -> NormalizationParameters {
        let features: Vec<(f64, f64)> = (0..Feature::COUNT).map(|_| (0.0, 100.0)).collect();
        NormalizationParameters::new(&features, (1000.0, 1100.0), 1e-8).unwrap()
    }

    #[test]
    fn test_window_shape_exact() {
        let t = table(70);
        let b = WindowBuilder::new(InputShape::new(60, InputLayout::Multivariate));
        let w = b.window_at(&t, &params(), d0() + Duration::days(69)).unwrap();
        assert_eq!(w.dims(), (60, Feature::COUNT));
        assert_eq!(w.end_date(), d0() + Duration::days(69));
        assert_eq!(w.last_target(), 1069.0);
        // first row of the window is table row 10
        assert_eq!(w.values()[[0, 0]], 0.10);
    }

    #[test]
    fn test_insufficient_history() {
        let t = table(40);
        let b = WindowBuilder::new(InputShape::new(60, InputLayout::Multivariate));
        match b.window_at(&t, &params(), d0() + Duration::days(39)) {
            Err(ForecastError::InsufficientHistory {
                required,
                available,
                ..
            }) => {
                assert_eq!(required, 60);
                assert_eq!(available, 40);
            }
            other => panic!("expected InsufficientHistory, got {:?}", other),
        }
    }

    #[test]
    fn test_target_before_table_start() {
        let t = table(70);
        let b = WindowBuilder::new(InputShape::new(5, InputLayout::Multivariate));
        assert!(matches!(
            b.window_at(&t, &params(), d0() - Duration::days(1)),
            Err(ForecastError::InsufficientHistory { available: 0, .. })
        ));
    }

    #[test]
    fn test_row_past_end_reports_last_date() {
        let t = table(70);
        let b = WindowBuilder::new(InputShape::new(5, InputLayout::Multivariate));
        match b.window_ending(&t, &params(), 100) {
            Err(ForecastError::InsufficientHistory {
                target, available, ..
            }) => {
                assert_eq!(target, Some(d0() + Duration::days(69)));
                assert_eq!(available, 70);
            }
            other => panic!("expected InsufficientHistory, got {:?}", other),
        }
    }

    #[test]
    fn test_target_after_table_end_uses_last_row() {
        let t = table(70);
        let b = WindowBuilder::new(InputShape::new(60, InputLayout::Multivariate));
        let w = b.window_at(&t, &params(), d0() + Duration::days(400)).unwrap();
        assert_eq!(w.end_date(), d0() + Duration::days(69));
    }

    #[test]
    fn test_univariate_window() {
        let t = table(20);
        let b = WindowBuilder::new(InputShape::new(12, InputLayout::Univariate));
        let w = b.window_at(&t, &params(), d0() + Duration::days(19)).unwrap();
        assert_eq!(w.dims(), (12, 1));
        assert!((w.values()[[11, 0]] - 0.19).abs() < 1e-12);
    }

    #[test]
    fn test_overlapping_windows() {
        let t = table(65);
        let b = WindowBuilder::new(InputShape::new(60, InputLayout::Multivariate));
        let windows: Vec<Window> = b.windows(&t, &params()).collect::<Result<_>>().unwrap();
        assert_eq!(windows.len(), 6);
        assert!(windows.iter().all(|w| w.dims() == (60, Feature::COUNT)));
        assert_eq!(windows[1].values()[[0, 0]], windows[0].values()[[1, 0]]);
    }

    #[test]
    fn test_window_new_rejects_wrong_width() {
        let values = Array2::zeros((60, 3));
        assert!(Window::new(InputLayout::Multivariate, values, d0(), 0.0).is_err());
    }
}
