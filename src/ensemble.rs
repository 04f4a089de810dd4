//! Runs every model of a group against one shared window.
//!
//! Members are independent: each holds its own read-only weights, and one
//! member's failure is recorded on its own result without touching the
//! others. With the `parallel` feature, members run on the rayon pool
//! unless `force_sequential` is set.

use crate::cancel::CancellationToken;
use crate::error::ModelError;
use crate::model::{ModelDescriptor, RegisteredModel};
use crate::normalize::NormalizationParameters;
use crate::window::Window;
use std::time::Instant;
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// One member's next-step prediction in both spaces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPrediction {
    /// Model output in scaled target space
    pub normalized: f64,
    /// Output mapped back to price units
    pub price: f64,
}

/// Result of one member for one window.
#[derive(Debug, Clone)]
pub struct ModelRun {
    pub descriptor: ModelDescriptor,
    pub outcome: Result<RawPrediction, ModelError>,
}

impl ModelRun {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// Dispatches a window to a set of models.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsembleRunner {
    force_sequential: bool,
}

impl EnsembleRunner {
    pub fn new(force_sequential: bool) -> Self {
        Self { force_sequential }
    }

    /// Score `window` with every member and map outputs back to prices.
    ///
    /// Results come back in member order. Members not yet started when
    /// `token` fires are reported as [`ModelError::Cancelled`].
    pub fn run(
        &self,
        window: &Window,
        params: &NormalizationParameters,
        members: &[&RegisteredModel],
        token: &CancellationToken,
    ) -> Vec<ModelRun> {
        let started = Instant::now();
        let runs = map_members(
            members,
            |member| score(member, window, params, token),
            self.force_sequential,
        );
        debug!(
            members = members.len(),
            end_date = %window.end_date(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Ensemble group scored"
        );
        runs
    }

    /// Score members that each carry their own window, as in an
    /// autoregressive rollout. Same ordering and cancellation rules as
    /// [`EnsembleRunner::run`].
    pub fn run_each(
        &self,
        jobs: &[(&RegisteredModel, Window)],
        params: &NormalizationParameters,
        token: &CancellationToken,
    ) -> Vec<ModelRun> {
        let started = Instant::now();
        let runs = map_members(
            jobs,
            |(member, window)| score(member, window, params, token),
            self.force_sequential,
        );
        debug!(
            members = jobs.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Ensemble members scored on own windows"
        );
        runs
    }
}

fn score(
    member: &RegisteredModel,
    window: &Window,
    params: &NormalizationParameters,
    token: &CancellationToken,
) -> ModelRun {
    let outcome = if token.is_cancelled() {
        Err(ModelError::Cancelled)
    } else {
        match &member.model {
            Ok(model) => model.predict(window).and_then(|normalized| {
                let price = params.denormalize_target(normalized);
                if price.is_finite() {
                    Ok(RawPrediction { normalized, price })
                } else {
                    Err(ModelError::non_finite(price))
                }
            }),
            Err(e) => Err(e.clone()),
        }
    };

    if let Err(e) = &outcome {
        if *e != ModelError::Cancelled {
            warn!(model = %member.descriptor.name, error = %e, "Model run failed");
        }
    }

    ModelRun {
        descriptor: member.descriptor.clone(),
        outcome,
    }
}

#[inline]
fn map_members<T, F>(items: &[T], f: F, force_sequential: bool) -> Vec<ModelRun>
where
    T: Sync,
    F: Fn(&T) -> ModelRun + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        if force_sequential {
            items.iter().map(&f).collect()
        } else {
            items.par_iter().map(&f).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    {
        let _ = force_sequential;
        items.iter().map(&f).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Activation, Architecture, Dense, HeadLayer, InputReduction, Mlp, OfflineMetrics,
        ScorableModel,
    };
    use crate::window::{InputLayout, InputShape};
    use chrono::NaiveDate;
    use ndarray::{array, Array1, Array2};
    use std::sync::Arc;

    fn member(name: &str, weight: f64) -> RegisteredModel {
        let shape = InputShape::new(3, InputLayout::Univariate);
        let dense =
            Dense::new(Array2::from_elem((1, 1), weight), Array1::zeros(1), Activation::Linear)
                .unwrap();
        let model: Arc<dyn ScorableModel> = Arc::new(
            Mlp::new(shape, InputReduction::LastStep, vec![HeadLayer::Dense(dense)]).unwrap(),
        );
        RegisteredModel {
            descriptor: ModelDescriptor {
                name: name.into(),
                architecture: Architecture::Mlp,
                input: shape,
                metrics: OfflineMetrics {
                    r2: 0.9,
                    mae: 1.0,
                    rmse: 1.0,
                    mape: 1.0,
                },
                scaler: "gold".into(),
            },
            model: Ok(model),
        }
    }

    fn window() -> Window {
        Window::new(
            InputLayout::Univariate,
            array![[0.1], [0.2], [0.5]],
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            1500.0,
        )
        .unwrap()
    }

    fn params() -> NormalizationParameters {
        NormalizationParameters::new(&[], (1000.0, 2000.0), 1e-8).unwrap()
    }

    #[test]
    fn test_members_scored_and_denormalized() {
        let a = member("a", 1.0);
        let b = member("b", 0.5);
        let runs = EnsembleRunner::new(false).run(
            &window(),
            &params(),
            &[&a, &b],
            &CancellationToken::new(),
        );
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].name(), "a");
        let a_price = runs[0].outcome.as_ref().unwrap().price;
        let b_price = runs[1].outcome.as_ref().unwrap().price;
        assert!((a_price - 1500.0).abs() < 1e-9);
        assert!((b_price - 1250.0).abs() < 1e-9);
    }

    #[test]
    fn test_failure_is_isolated() {
        let good = member("good", 1.0);
        let mut broken = member("broken", 1.0);
        broken.model = Err(ModelError::CorruptArtifact("truncated".into()));

        let runs = EnsembleRunner::new(true).run(
            &window(),
            &params(),
            &[&broken, &good],
            &CancellationToken::new(),
        );
        assert!(matches!(runs[0].outcome, Err(ModelError::CorruptArtifact(_))));
        assert!(runs[1].outcome.is_ok());
    }

    #[test]
    fn test_cancelled_before_start() {
        let a = member("a", 1.0);
        let token = CancellationToken::new();
        token.cancel();
        let runs = EnsembleRunner::default().run(&window(), &params(), &[&a], &token);
        assert_eq!(runs[0].outcome, Err(ModelError::Cancelled));
    }

    #[test]
    fn test_run_each_scores_own_window() {
        let a = member("a", 1.0);
        let b = member("b", 1.0);
        let other = Window::new(
            InputLayout::Univariate,
            array![[0.1], [0.2], [0.0]],
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            1500.0,
        )
        .unwrap();
        let runs = EnsembleRunner::new(false).run_each(
            &[(&a, window()), (&b, other)],
            &params(),
            &CancellationToken::new(),
        );
        assert_eq!(runs[0].name(), "a");
        assert!((runs[0].outcome.as_ref().unwrap().price - 1500.0).abs() < 1e-9);
        assert!((runs[1].outcome.as_ref().unwrap().price - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_sequential_and_parallel_agree() {
        let members: Vec<RegisteredModel> =
            (0..8).map(|i| member(&format!("m{}", i), i as f64 / 8.0)).collect();
        let refs: Vec<&RegisteredModel> = members.iter().collect();
        let token = CancellationToken::new();

        let seq = EnsembleRunner::new(true).run(&window(), &params(), &refs, &token);
        let par = EnsembleRunner::new(false).run(&window(), &params(), &refs, &token);
        for (s, p) in seq.iter().zip(&par) {
            assert_eq!(s.name(), p.name());
            assert_eq!(
                s.outcome.as_ref().unwrap().price.to_bits(),
                p.outcome.as_ref().unwrap().price.to_bits()
            );
        }
    }
}
