//! Scorable models and their descriptors.
//!
//! Every catalogued model, whatever its backend, answers the same question:
//! given a shape-checked normalized window, what is the next-step target in
//! normalized space? Backends implement [`ScorableModel`]; the pipeline never
//! looks past that trait.

mod artifact;
mod layers;
mod mlp;
#[cfg(feature = "onnx")]
mod onnx;
mod recurrent;
mod registry;

pub use artifact::{load_native, BiasSpec, HeadSpec, NativeArtifact, RecurrentWeights};
pub use layers::{Activation, BatchNorm, Dense, HeadLayer};
pub use mlp::{InputReduction, Mlp};
#[cfg(feature = "onnx")]
pub use onnx::OnnxModel;
pub use recurrent::{CellKind, GruBias, RecurrentLayer, RecurrentModel};
pub use registry::{
    ArtifactFormat, CatalogEntry, ModelCatalog, ModelGroup, ModelRegistry, RegisteredModel,
};

use crate::error::ModelError;
use crate::window::{InputLayout, InputShape, Window};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network family a model was trained as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Gru,
    Lstm,
    Rnn,
    Mlp,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Architecture::Gru => "GRU",
            Architecture::Lstm => "LSTM",
            Architecture::Rnn => "RNN",
            Architecture::Mlp => "MLP",
        };
        f.write_str(s)
    }
}

/// Test-set metrics reported when the model was trained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OfflineMetrics {
    pub r2: f64,
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
}

/// Static identity and contract of one trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub architecture: Architecture,
    pub input: InputShape,
    pub metrics: OfflineMetrics,
    /// Id of the normalization parameter set the model was fit with
    pub scaler: String,
}

impl ModelDescriptor {
    pub fn variant(&self) -> InputLayout {
        self.input.layout
    }
}

/// A loaded model able to score one window.
///
/// Implementations hold read-only weights and must be deterministic: the
/// same window always yields the same bits.
pub trait ScorableModel: Send + Sync {
    /// Shape the loaded weights accept.
    fn input_shape(&self) -> InputShape;

    /// Next-step prediction in normalized target space.
    fn predict(&self, window: &Window) -> Result<f64, ModelError>;
}

/// Reject a window the model was not built for.
pub(crate) fn check_shape(expected: InputShape, window: &Window) -> Result<(), ModelError> {
    let actual = window.dims();
    if actual != expected.dims() {
        return Err(ModelError::ShapeMismatch {
            expected: expected.dims(),
            actual,
        });
    }
    Ok(())
}

/// Guard against NaN/Inf leaking out of a backend.
pub(crate) fn finite(value: f64) -> Result<f64, ModelError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ModelError::non_finite(value))
    }
}
