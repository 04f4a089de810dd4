//! The forecast pipeline: align → assemble → window → score → aggregate.
//!
//! Every stage is a plain function of the previous stage's immutable output,
//! so a prepared dataset can serve any number of forecast, scenario and
//! backtest requests. The model registry is injected at construction and
//! only ever read.

use crate::aggregate::{ForecastAggregator, ForecastReport, ReportContext};
use crate::calendar::{AlignedPanel, CalendarAligner};
use crate::cancel::CancellationToken;
use crate::config::ForecastConfig;
use crate::ensemble::{EnsembleRunner, ModelRun};
use crate::error::{DataQualityWarning, ForecastError, ModelError, Result};
use crate::features::{FeatureAssembler, FeatureTable};
use crate::metrics::RealizedMetrics;
use crate::model::{Architecture, ModelGroup, ModelRegistry, OfflineMetrics, RegisteredModel};
use crate::normalize::NormalizationParameters;
use crate::scenario::{ScenarioForecast, ScenarioRequest};
use crate::series::SourceSeries;
use crate::window::{InputLayout, Window, WindowBuilder};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Output of the data stages, reusable across requests.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub panel: AlignedPanel,
    pub table: FeatureTable,
}

impl PreparedData {
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.table.last_date()
    }
}

/// Realized accuracy of one model over a replayed range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestEntry {
    pub model: String,
    pub architecture: Architecture,
    pub variant: InputLayout,
    pub offline: OfflineMetrics,
    pub realized: Option<RealizedMetrics>,
    pub failures: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ModelError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Best realized R² first
    pub entries: Vec<BacktestEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DataQualityWarning>,
}

#[derive(Default)]
struct BacktestSeries {
    previous: Vec<f64>,
    actual: Vec<f64>,
    predicted: Vec<f64>,
    failures: usize,
    last_error: Option<ModelError>,
}

/// Serves forecasts from one registry and configuration.
pub struct ForecastPipeline {
    config: ForecastConfig,
    registry: Arc<ModelRegistry>,
    aligner: CalendarAligner,
    assembler: FeatureAssembler,
    runner: EnsembleRunner,
    aggregator: ForecastAggregator,
}

impl ForecastPipeline {
    pub fn new(config: ForecastConfig, registry: Arc<ModelRegistry>) -> Self {
        Self {
            aligner: CalendarAligner::new(config.staleness),
            assembler: FeatureAssembler::new(),
            runner: EnsembleRunner::new(config.force_sequential),
            aggregator: ForecastAggregator::new(
                config.confidence_z,
                config.require_complete_ensemble,
            ),
            config,
            registry,
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Align the sources and project them onto the feature contract.
    pub fn prepare(&self, sources: &[SourceSeries], token: &CancellationToken) -> Result<PreparedData> {
        token.check("align")?;
        let started = Instant::now();
        let panel = self.aligner.align(sources)?;
        debug!(rows = panel.len(), sources = sources.len(), "Aligned panel");

        token.check("assemble")?;
        let table = self.assembler.assemble(&panel)?;
        info!(
            rows = table.len(),
            first = ?table.dates().first(),
            last = ?table.last_date(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Prepared feature table"
        );
        Ok(PreparedData { panel, table })
    }

    /// Next-step forecast from the window ending on `target` (or the last
    /// row before it).
    pub fn forecast(
        &self,
        prepared: &PreparedData,
        target: NaiveDate,
        token: &CancellationToken,
    ) -> Result<ForecastReport> {
        token.check("window")?;
        let table = &prepared.table;
        let groups = self.registry.groups();
        let warnings = self.data_warnings(prepared, &groups);
        let mut runs = Vec::with_capacity(self.registry.len());

        for group in &groups {
            if !self.config.best_effort_partial {
                token.check("ensemble")?;
            }
            let Some(params) = self.usable(group, &mut runs) else {
                continue;
            };
            let window = WindowBuilder::new(group.shape)
                .window_at(table, params, target)
                .map_err(|e| e.for_models(member_names(group)))?;
            runs.extend(self.runner.run(&window, params, &loaded(group), token));
        }
        self.finish_ensemble(token)?;

        // no group could window a date before the first row
        let end = table
            .row_at_or_before(target)
            .ok_or_else(|| history_error(&groups, Some(target), 0))?;

        self.aggregator.aggregate(
            ReportContext {
                requested: target,
                as_of: table.dates()[end],
                last_observed: table.target()[end],
            },
            runs,
            warnings,
        )
    }

    /// Forecast from the latest available row.
    pub fn forecast_latest(
        &self,
        prepared: &PreparedData,
        token: &CancellationToken,
    ) -> Result<ForecastReport> {
        let latest = prepared
            .last_date()
            .ok_or_else(|| history_error(&self.registry.groups(), None, 0))?;
        self.forecast(prepared, latest, token)
    }

    /// Convenience: prepare then forecast in one call.
    pub fn run(
        &self,
        sources: &[SourceSeries],
        target: NaiveDate,
        token: &CancellationToken,
    ) -> Result<ForecastReport> {
        let prepared = self.prepare(sources, token)?;
        self.forecast(&prepared, target, token)
    }

    /// Roll the latest window forward under constant indicator levels.
    pub fn scenario(
        &self,
        prepared: &PreparedData,
        request: &ScenarioRequest,
        token: &CancellationToken,
    ) -> Result<ScenarioForecast> {
        let table = &prepared.table;
        let groups = self.registry.groups();
        let end = table
            .len()
            .checked_sub(1)
            .ok_or_else(|| history_error(&groups, None, 0))?;
        let as_of = table.dates()[end];
        let last_observed = table.target()[end];
        let warnings = self.data_warnings(prepared, &groups);

        // per-model target history for univariate members
        let mut tracks: HashMap<&str, std::result::Result<Vec<f64>, ModelError>> = HashMap::new();
        let mut steps = Vec::with_capacity(request.steps());

        for step in 1..=request.steps() {
            token.check("scenario")?;
            let step_end = add_days(as_of, step as u64);
            let mut runs = Vec::with_capacity(self.registry.len());

            for group in &groups {
                let Some(params) = self.usable(group, &mut runs) else {
                    continue;
                };
                let lookback = group.shape.lookback;

                match group.shape.layout {
                    InputLayout::Multivariate => {
                        let raw = request
                            .multivariate_block(table, end, lookback, step)
                            .map_err(|e| e.for_models(member_names(group)))?;
                        let values = params.normalize_features(raw.view())?;
                        let window =
                            Window::new(InputLayout::Multivariate, values, step_end, last_observed)?;
                        runs.extend(self.runner.run(&window, params, &loaded(group), token));
                    }
                    InputLayout::Univariate => {
                        if end + 1 < lookback {
                            return Err(ForecastError::insufficient(Some(as_of), lookback, end + 1)
                                .for_models(member_names(group)));
                        }
                        let mut jobs = Vec::with_capacity(group.members.len());
                        for member in loaded(group) {
                            let track = tracks
                                .entry(member.descriptor.name.as_str())
                                .or_insert_with(|| Ok(table.target()[end + 1 - lookback..=end].to_vec()));
                            match track {
                                Ok(history) => {
                                    let tail = &history[history.len() - lookback..];
                                    let window = Window::new(
                                        InputLayout::Univariate,
                                        params.normalize_target(tail),
                                        step_end,
                                        tail[lookback - 1],
                                    )?;
                                    jobs.push((member, window));
                                }
                                Err(e) => runs.push(ModelRun {
                                    descriptor: member.descriptor.clone(),
                                    outcome: Err(e.clone()),
                                }),
                            }
                        }
                        for run in self.runner.run_each(&jobs, params, token) {
                            // each prediction extends that member's own history
                            if let Some(track) = tracks.get_mut(run.name()) {
                                match &run.outcome {
                                    Ok(raw) => {
                                        if let Ok(history) = track {
                                            history.push(raw.price);
                                        }
                                    }
                                    Err(e) => *track = Err(e.clone()),
                                }
                            }
                            runs.push(run);
                        }
                    }
                }
            }
            self.finish_ensemble(token)?;

            let report = self.aggregator.aggregate(
                ReportContext {
                    requested: as_of,
                    as_of: add_days(as_of, step as u64 - 1),
                    last_observed,
                },
                runs,
                warnings.clone(),
            )?;
            steps.push(report);
        }

        info!(%as_of, steps = steps.len(), "Scenario forecast ready");
        Ok(ScenarioForecast {
            as_of,
            indicators: request.named(),
            steps,
        })
    }

    /// Replay every window ending in `[from, to]` and score it against the
    /// next day's observed target.
    pub fn backtest(
        &self,
        prepared: &PreparedData,
        from: NaiveDate,
        to: NaiveDate,
        token: &CancellationToken,
    ) -> Result<BacktestReport> {
        if from > to {
            return Err(ForecastError::Config(format!("backtest range {} > {}", from, to)));
        }
        let table = &prepared.table;
        let target = table.target();

        let mut series: Vec<(&RegisteredModel, BacktestSeries)> = self
            .registry
            .models()
            .iter()
            .map(|m| (m, BacktestSeries::default()))
            .collect();
        let mut windows = 0usize;
        let groups = self.registry.groups();
        let warnings = self.data_warnings(prepared, &groups);

        for group in &groups {
            let members = loaded(group);
            let Some(params) = group.params.filter(|_| !members.is_empty()) else {
                continue;
            };
            let builder = WindowBuilder::new(group.shape);
            let first = group.shape.lookback.saturating_sub(1);

            for end in first..table.len().saturating_sub(1) {
                let date = table.dates()[end];
                if date < from || date > to {
                    continue;
                }
                token.check("backtest")?;
                let window = builder.window_ending(table, params, end)?;
                windows += 1;

                for run in self.runner.run(&window, params, &members, token) {
                    let Some((_, s)) = series
                        .iter_mut()
                        .find(|(m, _)| m.descriptor.name == run.descriptor.name)
                    else {
                        continue;
                    };
                    match run.outcome {
                        Ok(raw) => {
                            s.previous.push(target[end]);
                            s.actual.push(target[end + 1]);
                            s.predicted.push(raw.price);
                        }
                        Err(e) => {
                            s.failures += 1;
                            s.last_error = Some(e);
                        }
                    }
                }
            }
        }
        token.check("backtest")?;

        if windows == 0 {
            let available = table.row_at_or_before(to).map(|i| i + 1).unwrap_or(0);
            return Err(history_error(&groups, Some(from), available));
        }

        let mut entries: Vec<BacktestEntry> = series
            .into_iter()
            .map(|(model, s)| {
                let realized = (!s.actual.is_empty())
                    .then(|| RealizedMetrics::compute(&s.previous, &s.actual, &s.predicted));
                BacktestEntry {
                    model: model.descriptor.name.clone(),
                    architecture: model.descriptor.architecture,
                    variant: model.descriptor.input.layout,
                    offline: model.descriptor.metrics,
                    realized,
                    failures: s.failures,
                    last_error: s.last_error.or_else(|| model.model.as_ref().err().cloned()),
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            let key = |e: &BacktestEntry| {
                e.realized
                    .map(|r| r.r2)
                    .filter(|r2| !r2.is_nan())
                    .unwrap_or(f64::NEG_INFINITY)
            };
            key(b).total_cmp(&key(a)).then_with(|| a.model.cmp(&b.model))
        });

        info!(%from, %to, windows, models = entries.len(), "Backtest complete");
        Ok(BacktestReport {
            from,
            to,
            entries,
            warnings,
        })
    }

    /// Panel warnings plus degenerate ranges of every scaler set in use.
    fn data_warnings(
        &self,
        prepared: &PreparedData,
        groups: &[ModelGroup<'_>],
    ) -> Vec<DataQualityWarning> {
        let mut warnings = prepared.panel.warnings().to_vec();
        for params in groups.iter().filter_map(|g| g.params) {
            push_unique(&mut warnings, params.degenerate_features());
        }
        warnings
    }

    /// Params for a group, or `None` after recording every member as failed.
    fn usable<'a>(
        &self,
        group: &ModelGroup<'a>,
        runs: &mut Vec<ModelRun>,
    ) -> Option<&'a NormalizationParameters> {
        let params = group.params.map(|p| &**p);
        let has_loaded = group.members.iter().any(|m| m.is_loaded());

        if params.is_none() || !has_loaded {
            for member in &group.members {
                let error = match &member.model {
                    Err(e) => e.clone(),
                    Ok(_) => ModelError::CorruptArtifact(format!(
                        "unknown scaler set '{}'",
                        group.scaler
                    )),
                };
                runs.push(ModelRun {
                    descriptor: member.descriptor.clone(),
                    outcome: Err(error),
                });
            }
            return None;
        }

        for member in group.members.iter().filter(|m| !m.is_loaded()) {
            if let Err(e) = &member.model {
                runs.push(ModelRun {
                    descriptor: member.descriptor.clone(),
                    outcome: Err(e.clone()),
                });
            }
        }
        params
    }

    /// Discard partial ensemble output on cancellation unless the caller
    /// asked for best-effort results.
    fn finish_ensemble(&self, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            if self.config.best_effort_partial {
                warn!("Request cancelled; returning partial ensemble");
            } else {
                return token.check("ensemble");
            }
        }
        Ok(())
    }
}

fn loaded<'a>(group: &ModelGroup<'a>) -> Vec<&'a RegisteredModel> {
    group.members.iter().copied().filter(|m| m.is_loaded()).collect()
}

fn member_names<'a>(group: &ModelGroup<'a>) -> Vec<&'a str> {
    group.members.iter().map(|m| m.descriptor.name.as_str()).collect()
}

/// History error naming the group with the shortest lookback, the least any
/// request could have needed.
fn history_error(
    groups: &[ModelGroup<'_>],
    target: Option<NaiveDate>,
    available: usize,
) -> ForecastError {
    match groups.iter().min_by_key(|g| g.shape.lookback) {
        Some(group) => ForecastError::insufficient(target, group.shape.lookback, available)
            .for_models(member_names(group)),
        None => ForecastError::insufficient(target, 0, available),
    }
}

fn push_unique(warnings: &mut Vec<DataQualityWarning>, extra: Vec<DataQualityWarning>) {
    for w in extra {
        if !warnings.contains(&w) {
            warnings.push(w);
        }
    }
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Feature;
    use crate::model::{
        Activation, Dense, HeadLayer, InputReduction, Mlp, ModelDescriptor, ScorableModel,
    };
    use crate::window::InputShape;
    use chrono::Duration;
    use ndarray::{Array1, Array2};

    fn d0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    /// Every contract source plus the target, daily, `n` days.
    fn sources(n: usize) -> Vec<SourceSeries> {
        let mut all: Vec<SourceSeries> = Feature::ALL
            .iter()
            .map(|f| {
                SourceSeries::new(
                    f.name(),
                    f.kind(),
                    crate::series::Frequency::Daily,
                    (0..n).map(|i| (d0() + Duration::days(i as i64), 10.0 + i as f64)),
                )
            })
            .collect();
        all.push(SourceSeries::new(
            crate::features::TARGET_COLUMN,
            crate::series::SourceKind::Market,
            crate::series::Frequency::Daily,
            (0..n).map(|i| (d0() + Duration::days(i as i64), 1900.0 + i as f64)),
        ));
        all
    }

    /// Returns the last scaled target value unchanged.
    fn persistence(lookback: usize) -> Arc<dyn ScorableModel> {
        let dense =
            Dense::new(Array2::ones((1, 1)), Array1::zeros(1), Activation::Linear).unwrap();
        Arc::new(
            Mlp::new(
                InputShape::new(lookback, InputLayout::Univariate),
                InputReduction::LastStep,
                vec![HeadLayer::Dense(dense)],
            )
            .unwrap(),
        )
    }

    fn registry(lookback: usize) -> Arc<ModelRegistry> {
        registry_with(
            lookback,
            NormalizationParameters::new(&[], (1000.0, 3000.0), 1e-8).unwrap(),
        )
    }

    fn registry_with(lookback: usize, scaler: NormalizationParameters) -> Arc<ModelRegistry> {
        let descriptor = ModelDescriptor {
            name: "persistence".into(),
            architecture: Architecture::Mlp,
            input: InputShape::new(lookback, InputLayout::Univariate),
            metrics: OfflineMetrics {
                r2: 0.9,
                mae: 5.0,
                rmse: 10.0,
                mape: 0.5,
            },
            scaler: "gold".into(),
        };
        let mut scalers = HashMap::new();
        scalers.insert("gold".to_string(), scaler);
        Arc::new(
            ModelRegistry::from_entries(vec![(descriptor, Ok(persistence(lookback)))], scalers)
                .unwrap(),
        )
    }

    #[test]
    fn test_forecast_persistence() {
        let pipeline = ForecastPipeline::new(ForecastConfig::default(), registry(5));
        let token = CancellationToken::new();
        let prepared = pipeline.prepare(&sources(20), &token).unwrap();
        let report = pipeline
            .forecast(&prepared, d0() + Duration::days(10), &token)
            .unwrap();

        assert_eq!(report.as_of, d0() + Duration::days(10));
        let p = report.recommended().unwrap().prediction().unwrap();
        assert!((p.price - 1910.0).abs() < 1e-9);
        assert!(p.change_pct.abs() < 1e-9);
    }

    #[test]
    fn test_cancelled_before_start() {
        let pipeline = ForecastPipeline::new(ForecastConfig::default(), registry(5));
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            pipeline.prepare(&sources(20), &token),
            Err(ForecastError::Cancelled { stage: "align" })
        ));
    }

    #[test]
    fn test_univariate_scenario_is_autoregressive() {
        let pipeline = ForecastPipeline::new(ForecastConfig::default(), registry(5));
        let token = CancellationToken::new();
        let prepared = pipeline.prepare(&sources(20), &token).unwrap();
        let request = ScenarioRequest::new([1.0; Feature::COUNT], 3).unwrap();

        let forecast = pipeline.scenario(&prepared, &request, &token).unwrap();
        assert_eq!(forecast.steps.len(), 3);
        // persistence repeats its own last value
        for price in forecast.recommended_path() {
            assert!((price.unwrap() - 1919.0).abs() < 1e-9);
        }
        assert_eq!(forecast.steps[2].predicted_for, d0() + Duration::days(22));
    }

    #[test]
    fn test_backtest_persistence_error_is_one_dollar() {
        let pipeline = ForecastPipeline::new(ForecastConfig::default(), registry(5));
        let token = CancellationToken::new();
        let prepared = pipeline.prepare(&sources(30), &token).unwrap();
        let report = pipeline
            .backtest(&prepared, d0(), d0() + Duration::days(40), &token)
            .unwrap();

        let realized = report.entries[0].realized.unwrap();
        // windows end on days 4..=28, each scored against the next day
        assert_eq!(realized.samples, 25);
        assert!((realized.mae - 1.0).abs() < 1e-9);
        assert_eq!(report.entries[0].failures, 0);
    }

    #[test]
    fn test_backtest_rejects_inverted_range() {
        let pipeline = ForecastPipeline::new(ForecastConfig::default(), registry(5));
        let token = CancellationToken::new();
        let prepared = pipeline.prepare(&sources(30), &token).unwrap();
        assert!(pipeline
            .backtest(&prepared, d0() + Duration::days(5), d0(), &token)
            .is_err());
    }

    #[test]
    fn test_degenerate_scaler_reported_by_every_operation() {
        let mut features = vec![(0.0, 100.0); Feature::COUNT];
        features[Feature::Gprt.index()] = (7.0, 7.0);
        let scaler = NormalizationParameters::new(&features, (1000.0, 3000.0), 1e-8).unwrap();
        let pipeline = ForecastPipeline::new(ForecastConfig::default(), registry_with(5, scaler));
        let token = CancellationToken::new();
        let prepared = pipeline.prepare(&sources(30), &token).unwrap();

        let flagged = |warnings: &[DataQualityWarning]| {
            warnings.iter().any(|w| {
                matches!(w, DataQualityWarning::DegenerateFeatureRange { feature, .. } if feature == "GPRT")
            })
        };

        let report = pipeline.forecast_latest(&prepared, &token).unwrap();
        assert!(flagged(&report.warnings));

        let request = ScenarioRequest::new([1.0; Feature::COUNT], 2).unwrap();
        let forecast = pipeline.scenario(&prepared, &request, &token).unwrap();
        assert!(forecast.steps.iter().all(|step| flagged(&step.warnings)));

        let backtest = pipeline
            .backtest(&prepared, d0(), d0() + Duration::days(29), &token)
            .unwrap();
        assert!(flagged(&backtest.warnings));
    }

    #[test]
    fn test_history_error_names_group() {
        let pipeline = ForecastPipeline::new(ForecastConfig::default(), registry(5));
        let token = CancellationToken::new();
        let prepared = pipeline.prepare(&sources(20), &token).unwrap();

        let before = d0() - Duration::days(1);
        match pipeline.forecast(&prepared, before, &token) {
            Err(ForecastError::InsufficientHistory {
                target,
                required,
                available,
                models,
            }) => {
                assert_eq!(target, Some(before));
                assert_eq!(required, 5);
                assert_eq!(available, 0);
                assert_eq!(models, vec!["persistence".to_string()]);
            }
            other => panic!("expected InsufficientHistory, got {:?}", other),
        }

        let err = pipeline
            .forecast(&prepared, d0() + Duration::days(2), &token)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient history for 2024-01-03: need 5 rows, 3 available (models: persistence)"
        );
    }
}
