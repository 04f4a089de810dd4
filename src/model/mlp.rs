//! Feed-forward regressor over a reduced window.

use super::layers::{run_head, validate_head, HeadLayer};
use super::{check_shape, finite, ScorableModel};
use crate::error::ModelError;
use crate::window::{InputShape, Window};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// How a (lookback × features) window becomes the MLP's flat input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputReduction {
    /// Only the window's last row
    #[default]
    LastStep,
    /// Every row, concatenated oldest first
    Flatten,
}

impl InputReduction {
    pub fn input_size(&self, shape: InputShape) -> usize {
        match self {
            InputReduction::LastStep => shape.layout.width(),
            InputReduction::Flatten => shape.lookback * shape.layout.width(),
        }
    }

    fn reduce(&self, window: &Window) -> Array1<f64> {
        let values = window.values();
        match self {
            InputReduction::LastStep => values.row(values.nrows() - 1).to_owned(),
            InputReduction::Flatten => values.iter().copied().collect(),
        }
    }
}

/// Dense stack (batch norm folded, dropout dropped) ending in one output.
#[derive(Debug, Clone, PartialEq)]
pub struct Mlp {
    shape: InputShape,
    reduction: InputReduction,
    layers: Vec<HeadLayer>,
}

impl Mlp {
    pub fn new(
        shape: InputShape,
        reduction: InputReduction,
        layers: Vec<HeadLayer>,
    ) -> Result<Self, ModelError> {
        if layers.is_empty() {
            return Err(ModelError::CorruptArtifact("MLP has no layers".into()));
        }
        validate_head(reduction.input_size(shape), &layers)?;
        Ok(Self {
            shape,
            reduction,
            layers,
        })
    }

    pub fn reduction(&self) -> InputReduction {
        self.reduction
    }
}

impl ScorableModel for Mlp {
    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn predict(&self, window: &Window) -> Result<f64, ModelError> {
        check_shape(self.shape, window)?;
        finite(run_head(&self.layers, self.reduction.reduce(window)))
    }
}
