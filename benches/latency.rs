//! Latency benchmarks for the forecast path.
//!
//! # Benchmarks
//!
//! ## Data stages
//! - `align_panel`: calendar alignment of 13 daily/monthly sources + target
//! - `window_at`: one normalized 60×13 window
//!
//! ## Native inference
//! - `native_predict/{GRU,LSTM,RNN}`: single window through a 64-unit model
//! - `ensemble_run`: all three together, sequential vs parallel
//!
//! ## ONNX
//! - `onnx_predict`: requires a model at `benches/test_model.onnx`
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench
//! cargo bench -- native_predict
//! ```

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use goldsight_inference::model::{
    BiasSpec, HeadSpec, NativeArtifact, RecurrentWeights, RegisteredModel,
};
use goldsight_inference::{
    Architecture, CalendarAligner, CancellationToken, EnsembleRunner, Feature, FeatureAssembler,
    FeatureTable, Frequency, InputLayout, InputShape, ModelDescriptor, NormalizationParameters,
    OfflineMetrics, ScorableModel, SourceKind, SourceSeries, WindowBuilder, TARGET_COLUMN,
};

const DAYS: usize = 2000;

fn d0() -> NaiveDate {
    NaiveDate::from_ymd_opt(2015, 1, 1).unwrap()
}

fn sources() -> Vec<SourceSeries> {
    let mut all: Vec<SourceSeries> = Feature::ALL
        .iter()
        .map(|f| {
            let step = match f.native_frequency() {
                Frequency::Daily => 1,
                Frequency::Monthly => 30,
            };
            SourceSeries::new(
                f.name(),
                f.kind(),
                f.native_frequency(),
                (0..DAYS).step_by(step).map(|i| {
                    (
                        d0() + Duration::days(i as i64),
                        50.0 + (i as f64 * 0.01 + f.index() as f64).sin() * 10.0,
                    )
                }),
            )
        })
        .collect();
    all.push(SourceSeries::new(
        TARGET_COLUMN,
        SourceKind::Market,
        Frequency::Daily,
        (0..DAYS).map(|i| (d0() + Duration::days(i as i64), 1800.0 + (i as f64 * 0.02).sin() * 50.0)),
    ));
    all
}

fn table() -> FeatureTable {
    let panel = CalendarAligner::default().align(&sources()).unwrap();
    FeatureAssembler::new().assemble(&panel).unwrap()
}

/// Deterministic small weights.
fn weights(rows: usize, cols: usize, seed: usize) -> Vec<Vec<f64>> {
    (0..rows)
        .map(|i| {
            (0..cols)
                .map(|j| (((i * 31 + j * 17 + seed) % 97) as f64 / 97.0 - 0.5) * 0.2)
                .collect()
        })
        .collect()
}

fn artifact(architecture: Architecture, units: usize, lookback: usize) -> NativeArtifact {
    let gates = match architecture {
        Architecture::Lstm => 4,
        Architecture::Gru => 3,
        _ => 1,
    };
    let bias = if architecture == Architecture::Gru {
        BiasSpec::Split(vec![vec![0.0; gates * units]; 2])
    } else {
        BiasSpec::Vector(vec![0.0; gates * units])
    };
    NativeArtifact {
        architecture,
        lookback,
        layout: InputLayout::Multivariate,
        layers: vec![RecurrentWeights {
            kernel: weights(Feature::COUNT, gates * units, 1),
            recurrent: weights(units, gates * units, 2),
            bias,
        }],
        head: vec![HeadSpec::Dense {
            kernel: weights(units, 1, 3),
            bias: vec![0.0],
            activation: Default::default(),
        }],
        reduction: Default::default(),
    }
}

fn registered(architecture: Architecture, lookback: usize) -> RegisteredModel {
    RegisteredModel {
        descriptor: ModelDescriptor {
            name: architecture.to_string(),
            architecture,
            input: InputShape::new(lookback, InputLayout::Multivariate),
            metrics: OfflineMetrics {
                r2: 0.98,
                mae: 35.0,
                rmse: 46.0,
                mape: 1.7,
            },
            scaler: "main".into(),
        },
        model: artifact(architecture, 64, lookback).build(),
    }
}

fn benchmark_data_stages(c: &mut Criterion) {
    let sources = sources();
    c.bench_function("align_panel", |b| {
        let aligner = CalendarAligner::default();
        b.iter(|| {
            let _ = aligner.align(black_box(&sources));
        });
    });

    let table = table();
    let params = NormalizationParameters::fit(&table, 1e-8).unwrap();
    let target = table.last_date().unwrap();
    c.bench_function("window_at", |b| {
        let builder = WindowBuilder::new(InputShape::new(60, InputLayout::Multivariate));
        b.iter(|| {
            let _ = builder.window_at(black_box(&table), &params, black_box(target));
        });
    });
}

fn benchmark_native_predict(c: &mut Criterion) {
    let table = table();
    let params = NormalizationParameters::fit(&table, 1e-8).unwrap();
    let mut group = c.benchmark_group("native_predict");

    for architecture in [Architecture::Gru, Architecture::Lstm, Architecture::Rnn] {
        let model = artifact(architecture, 64, 60).build().unwrap();
        let window = WindowBuilder::new(model.input_shape())
            .window_at(&table, &params, table.last_date().unwrap())
            .unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(architecture),
            &window,
            |b, window| {
                b.iter(|| {
                    let _ = model.predict(black_box(window));
                });
            },
        );
    }
    group.finish();
}

fn benchmark_ensemble(c: &mut Criterion) {
    let table = table();
    let params = NormalizationParameters::fit(&table, 1e-8).unwrap();
    let members: Vec<RegisteredModel> = [Architecture::Gru, Architecture::Lstm, Architecture::Rnn]
        .into_iter()
        .map(|a| registered(a, 60))
        .collect();
    let refs: Vec<&RegisteredModel> = members.iter().collect();
    let window = WindowBuilder::new(InputShape::new(60, InputLayout::Multivariate))
        .window_at(&table, &params, table.last_date().unwrap())
        .unwrap();
    let token = CancellationToken::new();

    let mut group = c.benchmark_group("ensemble_run");
    for (label, sequential) in [("sequential", true), ("parallel", false)] {
        let runner = EnsembleRunner::new(sequential);
        group.bench_function(label, |b| {
            b.iter(|| {
                let _ = runner.run(black_box(&window), &params, &refs, &token);
            });
        });
    }
    group.finish();
}

//
// ONNX Benchmarks
//
// Place a (1, 60, 13) → (1, 1) model at benches/test_model.onnx to enable.
//

#[cfg(feature = "onnx")]
fn benchmark_onnx(c: &mut Criterion) {
    use goldsight_inference::model::OnnxModel;
    use std::path::PathBuf;

    let model_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("benches")
        .join("test_model.onnx");
    if !model_path.exists() {
        eprintln!(
            "Skipping ONNX benchmarks: model not found at {}",
            model_path.display()
        );
        return;
    }

    let shape = InputShape::new(60, InputLayout::Multivariate);
    let model = OnnxModel::load(&model_path, shape, true).unwrap();
    let table = table();
    let params = NormalizationParameters::fit(&table, 1e-8).unwrap();
    let window = WindowBuilder::new(shape)
        .window_at(&table, &params, table.last_date().unwrap())
        .unwrap();

    c.bench_function("onnx_predict", |b| {
        b.iter(|| {
            let _ = model.predict(black_box(&window));
        });
    });
}

#[cfg(not(feature = "onnx"))]
fn benchmark_onnx(_c: &mut Criterion) {}

criterion_group!(
    benches,
    benchmark_data_stages,
    benchmark_native_predict,
    benchmark_ensemble,
    benchmark_onnx,
);
criterion_main!(benches);
