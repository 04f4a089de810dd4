//! Shared fixtures: synthetic sources, small native models, on-disk catalogs.

#![allow(dead_code)]

use chrono::{Datelike, Duration, NaiveDate};
use goldsight_inference::model::{BiasSpec, HeadSpec, NativeArtifact, RecurrentWeights};
use goldsight_inference::{
    Architecture, Feature, Frequency, InputLayout, NormalizationParameters, SourceKind,
    SourceSeries, TARGET_COLUMN,
};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const LOOKBACK: usize = 60;

pub fn day(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap() + Duration::days(i as i64)
}

fn feature_value(feature: Feature, i: usize) -> f64 {
    50.0 + 20.0 * (i as f64 * 0.05 + feature.index() as f64).sin()
}

pub fn gold_value(i: usize) -> f64 {
    1900.0 + 40.0 * (i as f64 * 0.03).sin() + i as f64 * 0.5
}

/// All 13 indicators plus the target, one observation per day.
pub fn daily_sources(days: usize) -> Vec<SourceSeries> {
    let mut sources: Vec<SourceSeries> = Feature::ALL
        .iter()
        .map(|f| {
            SourceSeries::new(
                f.name(),
                f.kind(),
                Frequency::Daily,
                (0..days).map(|i| (day(i), feature_value(*f, i))),
            )
        })
        .collect();
    sources.push(target(days));
    sources
}

/// Indicators at their native frequency: monthly ones on the 1st only.
pub fn mixed_frequency_sources(days: usize) -> Vec<SourceSeries> {
    let mut sources: Vec<SourceSeries> = Feature::ALL
        .iter()
        .map(|f| {
            let frequency = f.native_frequency();
            SourceSeries::new(
                f.name(),
                f.kind(),
                frequency,
                (0..days)
                    .filter(|i| frequency == Frequency::Daily || day(*i).day() == 1)
                    .map(|i| (day(i), feature_value(*f, i))),
            )
        })
        .collect();
    sources.push(target(days));
    sources
}

fn target(days: usize) -> SourceSeries {
    SourceSeries::new(
        TARGET_COLUMN,
        SourceKind::Market,
        Frequency::Daily,
        (0..days).map(|i| (day(i), gold_value(i))),
    )
}

/// Write sources as `<id>.csv` files.
pub fn write_sources(dir: &Path, sources: &[SourceSeries]) {
    for source in sources {
        let mut csv = String::from("date,value\n");
        for (date, value) in source.observations() {
            writeln!(csv, "{},{}", date.format("%Y-%m-%d"), value).unwrap();
        }
        fs::write(dir.join(format!("{}.csv", source.id)), csv).unwrap();
    }
}

pub fn scaler() -> NormalizationParameters {
    NormalizationParameters::new(&[(25.0, 75.0); Feature::COUNT], (1500.0, 2500.0), 1e-8).unwrap()
}

fn weights(rows: usize, cols: usize, seed: usize) -> Vec<Vec<f64>> {
    (0..rows)
        .map(|i| {
            (0..cols)
                .map(|j| (((i * 13 + j * 7 + seed) % 23) as f64 / 23.0 - 0.5) * 0.3)
                .collect()
        })
        .collect()
}

/// A small single-layer recurrent model, or a last-step MLP.
pub fn artifact(architecture: Architecture, layout: InputLayout, lookback: usize) -> NativeArtifact {
    let width = match layout {
        InputLayout::Multivariate => Feature::COUNT,
        InputLayout::Univariate => 1,
    };
    let units = 8;
    let gates = match architecture {
        Architecture::Lstm => 4,
        Architecture::Gru => 3,
        Architecture::Rnn => 1,
        Architecture::Mlp => {
            return NativeArtifact {
                architecture,
                lookback,
                layout,
                layers: vec![],
                head: vec![
                    HeadSpec::Dense {
                        kernel: weights(width, units, 5),
                        bias: vec![0.1; units],
                        activation: goldsight_inference::model::Activation::Relu,
                    },
                    HeadSpec::BatchNorm {
                        gamma: vec![1.0; units],
                        beta: vec![0.0; units],
                        moving_mean: vec![0.05; units],
                        moving_variance: vec![1.0; units],
                        epsilon: 1e-3,
                    },
                    HeadSpec::Dense {
                        kernel: weights(units, 1, 6),
                        bias: vec![0.5],
                        activation: Default::default(),
                    },
                ],
                reduction: Default::default(),
            }
        }
    };
    let bias = if architecture == Architecture::Gru {
        BiasSpec::Split(vec![vec![0.01; gates * units], vec![0.0; gates * units]])
    } else {
        BiasSpec::Vector(vec![0.01; gates * units])
    };
    NativeArtifact {
        architecture,
        lookback,
        layout,
        layers: vec![RecurrentWeights {
            kernel: weights(width, gates * units, 1),
            recurrent: weights(units, gates * units, 2),
            bias,
        }],
        head: vec![HeadSpec::Dense {
            kernel: weights(units, 1, 3),
            bias: vec![0.5],
            activation: Default::default(),
        }],
        reduction: Default::default(),
    }
}

/// One catalog entry to write.
pub struct ModelSpec {
    pub name: &'static str,
    pub architecture: Architecture,
    pub layout: InputLayout,
    pub r2: f64,
    /// Replace the artifact with garbage
    pub corrupt: bool,
}

impl ModelSpec {
    pub fn new(name: &'static str, architecture: Architecture, r2: f64) -> Self {
        Self {
            name,
            architecture,
            layout: InputLayout::Multivariate,
            r2,
            corrupt: false,
        }
    }

    pub fn univariate(mut self) -> Self {
        self.layout = InputLayout::Univariate;
        self
    }

    pub fn corrupt(mut self) -> Self {
        self.corrupt = true;
        self
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub catalog: PathBuf,
}

/// Write scalers, artifacts and `catalog.toml` into a fresh temp dir.
pub fn write_catalog(models: &[ModelSpec]) -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::write(root.join("main.json"), scaler().to_json().unwrap()).unwrap();
    fs::write(
        root.join("gold_only.json"),
        r#"{"target": {"name": "Gold_Spot", "min": 1500.0, "max": 2500.0}}"#,
    )
    .unwrap();

    let mut toml = String::from("[scalers]\nmain = \"main.json\"\ngold = \"gold_only.json\"\n");
    for model in models {
        let file = format!("{}.json", model.name);
        if model.corrupt {
            fs::write(root.join(&file), "{\"architecture\": \"lstm\", \"lookback\": 60, \"lay").unwrap();
        } else {
            artifact(model.architecture, model.layout, LOOKBACK)
                .write(&root.join(&file))
                .unwrap();
        }
        let (variant, scaler) = match model.layout {
            InputLayout::Multivariate => ("multivariate", "main"),
            InputLayout::Univariate => ("univariate", "gold"),
        };
        write!(
            toml,
            "\n[[models]]\nname = \"{}\"\narchitecture = \"{}\"\nvariant = \"{}\"\nartifact = \"{}\"\nlookback = {}\nscaler = \"{}\"\nmetrics = {{ r2 = {}, mae = 35.0, rmse = 45.0, mape = 1.8 }}\n",
            model.name,
            model.architecture.to_string().to_lowercase(),
            variant,
            file,
            LOOKBACK,
            scaler,
            model.r2,
        )
        .unwrap();
    }
    let catalog = root.join("catalog.toml");
    fs::write(&catalog, toml).unwrap();
    Fixture { dir, catalog }
}

/// The three recurrent models with their published R².
pub fn standard_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new("rnn", Architecture::Rnn, 0.983),
        ModelSpec::new("gru", Architecture::Gru, 0.990),
        ModelSpec::new("lstm", Architecture::Lstm, 0.987),
    ]
}
