//! JSON weight artifacts for the native backends.
//!
//! The file mirrors what the training notebooks dump from Keras: one entry
//! per recurrent layer holding `kernel`, `recurrent` and `bias`, then the
//! dense head. Dropout layers are not stored; batch norm keeps its moving
//! statistics only.
//!
//! ```json
//! {
//!   "architecture": "gru",
//!   "lookback": 60,
//!   "layout": "multivariate",
//!   "layers": [{ "kernel": [[...]], "recurrent": [[...]], "bias": [[...], [...]] }],
//!   "head": [{ "type": "dense", "kernel": [[...]], "bias": [...], "activation": "linear" }]
//! }
//! ```

use super::layers::{Activation, BatchNorm, Dense, HeadLayer};
use super::mlp::{InputReduction, Mlp};
use super::recurrent::{CellKind, GruBias, RecurrentLayer, RecurrentModel};
use super::{Architecture, ScorableModel};
use crate::error::{ModelError, Result};
use crate::window::{InputLayout, InputShape};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Serialized weights of one native model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeArtifact {
    pub architecture: Architecture,
    pub lookback: usize,
    #[serde(default = "default_layout")]
    pub layout: InputLayout,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<RecurrentWeights>,
    pub head: Vec<HeadSpec>,
    #[serde(default)]
    pub reduction: InputReduction,
}

fn default_layout() -> InputLayout {
    InputLayout::Multivariate
}

fn default_epsilon() -> f64 {
    1e-3
}

/// Weights of one recurrent layer in Keras order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrentWeights {
    pub kernel: Vec<Vec<f64>>,
    pub recurrent: Vec<Vec<f64>>,
    pub bias: BiasSpec,
}

/// A flat bias, or the two-row `reset_after` GRU bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BiasSpec {
    Vector(Vec<f64>),
    Split(Vec<Vec<f64>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeadSpec {
    Dense {
        kernel: Vec<Vec<f64>>,
        bias: Vec<f64>,
        #[serde(default)]
        activation: Activation,
    },
    BatchNorm {
        gamma: Vec<f64>,
        beta: Vec<f64>,
        moving_mean: Vec<f64>,
        moving_variance: Vec<f64>,
        #[serde(default = "default_epsilon")]
        epsilon: f64,
    },
}

impl NativeArtifact {
    /// Read an artifact file. Any IO or parse failure is a corrupt artifact.
    pub fn read(path: &Path) -> std::result::Result<Self, ModelError> {
        let file = File::open(path)
            .map_err(|e| ModelError::CorruptArtifact(format!("{}: {}", path.display(), e)))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ModelError::CorruptArtifact(format!("{}: {}", path.display(), e)))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn input_shape(&self) -> InputShape {
        InputShape::new(self.lookback, self.layout)
    }

    /// Turn the weights into a runnable model, validating every shape.
    pub fn build(&self) -> std::result::Result<Arc<dyn ScorableModel>, ModelError> {
        if self.lookback == 0 {
            return Err(ModelError::CorruptArtifact("lookback must be positive".into()));
        }
        let shape = self.input_shape();
        let head = self
            .head
            .iter()
            .map(HeadSpec::build)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let kind = match self.architecture {
            Architecture::Mlp => {
                if !self.layers.is_empty() {
                    return Err(ModelError::CorruptArtifact(
                        "MLP artifact carries recurrent layers".into(),
                    ));
                }
                return Ok(Arc::new(Mlp::new(shape, self.reduction, head)?));
            }
            Architecture::Gru => CellKind::Gru,
            Architecture::Lstm => CellKind::Lstm,
            Architecture::Rnn => CellKind::SimpleRnn,
        };

        let mut input_size = shape.layout.width();
        let mut layers = Vec::with_capacity(self.layers.len());
        for weights in &self.layers {
            let layer = weights.build(kind, input_size)?;
            input_size = layer.units();
            layers.push(layer);
        }
        Ok(Arc::new(RecurrentModel::new(shape, layers, head)?))
    }
}

impl RecurrentWeights {
    fn build(&self, kind: CellKind, input_size: usize) -> std::result::Result<RecurrentLayer, ModelError> {
        let bias = match &self.bias {
            BiasSpec::Vector(b) => GruBias::Shared(vector(b, "bias")?),
            BiasSpec::Split(rows) if rows.len() == 2 => GruBias::ResetAfter {
                input: vector(&rows[0], "input bias")?,
                recurrent: vector(&rows[1], "recurrent bias")?,
            },
            BiasSpec::Split(rows) => {
                return Err(ModelError::CorruptArtifact(format!(
                    "split bias needs 2 rows, found {}",
                    rows.len()
                )))
            }
        };
        RecurrentLayer::new(
            kind,
            input_size,
            matrix(&self.kernel, "kernel")?,
            matrix(&self.recurrent, "recurrent kernel")?,
            bias,
        )
    }
}

impl HeadSpec {
    fn build(&self) -> std::result::Result<HeadLayer, ModelError> {
        match self {
            HeadSpec::Dense {
                kernel,
                bias,
                activation,
            } => Ok(HeadLayer::Dense(Dense::new(
                matrix(kernel, "dense kernel")?,
                vector(bias, "dense bias")?,
                *activation,
            )?)),
            HeadSpec::BatchNorm {
                gamma,
                beta,
                moving_mean,
                moving_variance,
                epsilon,
            } => {
                if moving_variance.iter().any(|v| *v + epsilon <= 0.0) {
                    return Err(ModelError::CorruptArtifact(
                        "batch norm variance must be positive".into(),
                    ));
                }
                Ok(HeadLayer::BatchNorm(BatchNorm::new(
                    vector(gamma, "gamma")?,
                    vector(beta, "beta")?,
                    vector(moving_mean, "moving_mean")?,
                    vector(moving_variance, "moving_variance")?,
                    *epsilon,
                )?))
            }
        }
    }
}

/// Load and build a native artifact in one step.
pub fn load_native(path: &Path) -> std::result::Result<Arc<dyn ScorableModel>, ModelError> {
    NativeArtifact::read(path)?.build()
}

fn vector(values: &[f64], what: &str) -> std::result::Result<Array1<f64>, ModelError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::CorruptArtifact(format!("{} has non-finite weights", what)));
    }
    Ok(Array1::from(values.to_vec()))
}

fn matrix(rows: &[Vec<f64>], what: &str) -> std::result::Result<Array2<f64>, ModelError> {
    let nrows = rows.len();
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    if nrows == 0 || ncols == 0 {
        return Err(ModelError::CorruptArtifact(format!("{} is empty", what)));
    }
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(ModelError::CorruptArtifact(format!("{} is ragged", what)));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    if flat.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::CorruptArtifact(format!("{} has non-finite weights", what)));
    }
    Array2::from_shape_vec((nrows, ncols), flat)
        .map_err(|e| ModelError::CorruptArtifact(format!("{}: {}", what, e)))
}
