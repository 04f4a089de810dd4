//! Feed-forward building blocks shared by the native backends.

use crate::error::ModelError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Activation applied after a dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply(&self, x: &mut Array1<f64>) {
        match self {
            Activation::Linear => {}
            Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Activation::Tanh => x.mapv_inplace(f64::tanh),
            Activation::Sigmoid => x.mapv_inplace(sigmoid),
        }
    }
}

#[inline]
pub(crate) fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

/// Fully connected layer, `y = act(x · W + b)` with `W` shaped (in, out).
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    weights: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

impl Dense {
    pub fn new(
        weights: Array2<f64>,
        bias: Array1<f64>,
        activation: Activation,
    ) -> Result<Self, ModelError> {
        if weights.ncols() != bias.len() {
            return Err(ModelError::CorruptArtifact(format!(
                "dense bias has {} entries for {} outputs",
                bias.len(),
                weights.ncols()
            )));
        }
        Ok(Self {
            weights,
            bias,
            activation,
        })
    }

    pub fn input_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn output_size(&self) -> usize {
        self.weights.ncols()
    }

    pub fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        let mut y = x.dot(&self.weights) + &self.bias;
        self.activation.apply(&mut y);
        y
    }
}

/// Inference-time batch normalization (moving statistics only).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm {
    scale: Array1<f64>,
    shift: Array1<f64>,
}

impl BatchNorm {
    pub fn new(
        gamma: Array1<f64>,
        beta: Array1<f64>,
        moving_mean: Array1<f64>,
        moving_variance: Array1<f64>,
        epsilon: f64,
    ) -> Result<Self, ModelError> {
        let n = gamma.len();
        if beta.len() != n || moving_mean.len() != n || moving_variance.len() != n {
            return Err(ModelError::CorruptArtifact(
                "batch norm parameter lengths differ".to_string(),
            ));
        }
        // Folded into one affine transform: y = x * scale + shift
        let scale = &gamma / &moving_variance.mapv(|v| (v + epsilon).sqrt());
        let shift = &beta - &(&moving_mean * &scale);
        Ok(Self { scale, shift })
    }

    pub fn size(&self) -> usize {
        self.scale.len()
    }

    pub fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        x * &self.scale + &self.shift
    }
}

/// One layer of an output head.
#[derive(Debug, Clone, PartialEq)]
pub enum HeadLayer {
    Dense(Dense),
    BatchNorm(BatchNorm),
}

impl HeadLayer {
    pub fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        match self {
            HeadLayer::Dense(d) => d.forward(x),
            HeadLayer::BatchNorm(b) => b.forward(x),
        }
    }

    fn io(&self) -> (usize, usize) {
        match self {
            HeadLayer::Dense(d) => (d.input_size(), d.output_size()),
            HeadLayer::BatchNorm(b) => (b.size(), b.size()),
        }
    }
}

/// Check that a head chains from `input` down to a single scalar output.
pub(crate) fn validate_head(input: usize, head: &[HeadLayer]) -> Result<(), ModelError> {
    let mut width = input;
    for (i, layer) in head.iter().enumerate() {
        let (inp, out) = layer.io();
        if inp != width {
            return Err(ModelError::CorruptArtifact(format!(
                "head layer {} expects {} inputs, previous layer yields {}",
                i, inp, width
            )));
        }
        width = out;
    }
    if width != 1 {
        return Err(ModelError::CorruptArtifact(format!(
            "head must end in a single output, ends in {}",
            width
        )));
    }
    Ok(())
}

/// Run the head and return its scalar output.
pub(crate) fn run_head(head: &[HeadLayer], x: Array1<f64>) -> f64 {
    let out = head.iter().fold(x, |acc, layer| layer.forward(&acc));
    out[0]
}
