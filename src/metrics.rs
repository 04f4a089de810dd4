//! Regression metrics for backtest replay.
//!
//! All functions take observed values first. Empty inputs yield `NaN`.

use serde::{Deserialize, Serialize};

/// Mean squared error
pub fn mse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)))
}

/// Root mean squared error
pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mse(y_true, y_pred).sqrt()
}

/// Mean absolute error
pub fn mae(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()))
}

/// Mean absolute percentage error, in percent. Zero observations are skipped.
pub fn mape(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(
        y_true
            .iter()
            .zip(y_pred)
            .filter(|(t, _)| **t != 0.0)
            .map(|(t, p)| ((t - p) / t).abs()),
    ) * 100.0
}

/// Coefficient of determination.
///
/// A constant observed series has no variance to explain and scores 0.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return f64::NAN;
    }
    let mean_true = mean(y_true.iter().copied());

    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean_true).powi(2)).sum();

    if ss_tot == 0.0 {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Share of steps where the predicted move from the previous observation
/// has the same sign as the observed move.
pub fn directional_accuracy(previous: &[f64], y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean(
        previous
            .iter()
            .zip(y_true)
            .zip(y_pred)
            .map(|((prev, t), p)| {
                if (t - prev).signum() == (p - prev).signum() {
                    1.0
                } else {
                    0.0
                }
            }),
    )
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Metrics of one model over a replayed date range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RealizedMetrics {
    pub samples: usize,
    pub r2: f64,
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
    pub directional_accuracy: f64,
}

impl RealizedMetrics {
    pub fn compute(previous: &[f64], y_true: &[f64], y_pred: &[f64]) -> Self {
        Self {
            samples: y_true.len().min(y_pred.len()),
            r2: r2_score(y_true, y_pred),
            mae: mae(y_true, y_pred),
            rmse: rmse(y_true, y_pred),
            mape: mape(y_true, y_pred),
            directional_accuracy: directional_accuracy(previous, y_true, y_pred),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mse_and_rmse() {
        let y_true = [1.0, 2.0, 3.0];
        let y_pred = [1.1, 2.0, 2.9];
        assert_relative_eq!(mse(&y_true, &y_pred), 0.02 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(rmse(&y_true, &y_pred), (0.02f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_mae_and_mape() {
        let y_true = [100.0, 200.0];
        let y_pred = [110.0, 190.0];
        assert_relative_eq!(mae(&y_true, &y_pred), 10.0);
        // (10% + 5%) / 2
        assert_relative_eq!(mape(&y_true, &y_pred), 7.5, epsilon = 1e-12);
    }

    #[test]
    fn test_r2_score() {
        let y_true = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(r2_score(&y_true, &y_true), 1.0);

        let y_pred = [1.1, 2.1, 2.9, 4.0, 5.1];
        assert!(r2_score(&y_true, &y_pred) > 0.95);

        let flat = [3.0; 5];
        assert_eq!(r2_score(&y_true, &flat), 0.0);
        assert_eq!(r2_score(&flat, &y_true), 0.0);
    }

    #[test]
    fn test_empty_is_nan() {
        assert!(mae(&[], &[]).is_nan());
        assert!(r2_score(&[], &[]).is_nan());
    }

    #[test]
    fn test_directional_accuracy() {
        let previous = [10.0, 10.0, 10.0, 10.0];
        let y_true = [11.0, 9.0, 12.0, 8.0];
        let y_pred = [10.5, 9.5, 9.0, 9.0];
        assert_relative_eq!(directional_accuracy(&previous, &y_true, &y_pred), 0.75);
    }
}
