//! Native GRU / LSTM / SimpleRNN inference.
//!
//! Weights follow the Keras layout exported by `layer.get_weights()`:
//! `kernel` is (input, gates·units), `recurrent` is (units, gates·units) and
//! gate blocks are ordered LSTM `[i, f, c, o]`, GRU `[z, r, h]`. A GRU bias
//! with two rows is the `reset_after` variant (separate input and recurrent
//! biases).

use super::layers::{run_head, sigmoid, validate_head, HeadLayer};
use super::{check_shape, finite, Architecture, ScorableModel};
use crate::error::ModelError;
use crate::window::{InputShape, Window};
use ndarray::{s, Array1, Array2, ArrayView1};

/// Recurrent cell family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    SimpleRnn,
    Lstm,
    Gru,
}

impl CellKind {
    pub fn gates(&self) -> usize {
        match self {
            CellKind::SimpleRnn => 1,
            CellKind::Lstm => 4,
            CellKind::Gru => 3,
        }
    }

    pub fn architecture(&self) -> Architecture {
        match self {
            CellKind::SimpleRnn => Architecture::Rnn,
            CellKind::Lstm => Architecture::Lstm,
            CellKind::Gru => Architecture::Gru,
        }
    }
}

/// GRU bias: one shared vector, or separate input/recurrent rows.
#[derive(Debug, Clone, PartialEq)]
pub enum GruBias {
    Shared(Array1<f64>),
    ResetAfter {
        input: Array1<f64>,
        recurrent: Array1<f64>,
    },
}

/// One recurrent layer with its weights.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentLayer {
    kind: CellKind,
    units: usize,
    kernel: Array2<f64>,
    recurrent: Array2<f64>,
    bias: GruBias,
}

impl RecurrentLayer {
    /// Validate weight shapes against `input_size` and the cell's gate count.
    ///
    /// For non-GRU cells the bias must be [`GruBias::Shared`].
    pub fn new(
        kind: CellKind,
        input_size: usize,
        kernel: Array2<f64>,
        recurrent: Array2<f64>,
        bias: GruBias,
    ) -> Result<Self, ModelError> {
        let gates = kind.gates();
        let units = recurrent.nrows();
        if units == 0 {
            return Err(ModelError::CorruptArtifact("recurrent layer has zero units".into()));
        }
        if kernel.dim() != (input_size, gates * units) {
            return Err(ModelError::CorruptArtifact(format!(
                "{:?} kernel is {:?}, expected {:?}",
                kind,
                kernel.dim(),
                (input_size, gates * units)
            )));
        }
        if recurrent.dim() != (units, gates * units) {
            return Err(ModelError::CorruptArtifact(format!(
                "{:?} recurrent kernel is {:?}, expected {:?}",
                kind,
                recurrent.dim(),
                (units, gates * units)
            )));
        }
        match &bias {
            GruBias::Shared(b) if b.len() == gates * units => {}
            GruBias::ResetAfter { input, recurrent }
                if kind == CellKind::Gru
                    && input.len() == gates * units
                    && recurrent.len() == gates * units => {}
            _ => {
                return Err(ModelError::CorruptArtifact(format!(
                    "{:?} bias does not match {} units",
                    kind, units
                )))
            }
        }

        Ok(Self {
            kind,
            units,
            kernel,
            recurrent,
            bias,
        })
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn input_size(&self) -> usize {
        self.kernel.nrows()
    }

    /// Run the layer over a sequence, returning every hidden state (T × units).
    pub fn forward_sequence(&self, inputs: &Array2<f64>) -> Array2<f64> {
        let steps = inputs.nrows();
        let mut outputs = Array2::zeros((steps, self.units));
        let mut h = Array1::zeros(self.units);
        let mut c = Array1::zeros(self.units);

        for t in 0..steps {
            let x = inputs.row(t);
            h = match self.kind {
                CellKind::SimpleRnn => self.rnn_step(x, &h),
                CellKind::Gru => self.gru_step(x, &h),
                CellKind::Lstm => {
                    let (h_next, c_next) = self.lstm_step(x, &h, &c);
                    c = c_next;
                    h_next
                }
            };
            outputs.row_mut(t).assign(&h);
        }
        outputs
    }

    fn shared_bias(&self) -> &Array1<f64> {
        match &self.bias {
            GruBias::Shared(b) => b,
            GruBias::ResetAfter { input, .. } => input,
        }
    }

    fn rnn_step(&self, x: ArrayView1<'_, f64>, h: &Array1<f64>) -> Array1<f64> {
        let pre = x.dot(&self.kernel) + h.dot(&self.recurrent) + self.shared_bias();
        pre.mapv(f64::tanh)
    }

    fn lstm_step(
        &self,
        x: ArrayView1<'_, f64>,
        h: &Array1<f64>,
        c: &Array1<f64>,
    ) -> (Array1<f64>, Array1<f64>) {
        let u = self.units;
        let z = x.dot(&self.kernel) + h.dot(&self.recurrent) + self.shared_bias();

        let i = z.slice(s![0..u]).mapv(sigmoid);
        let f = z.slice(s![u..2 * u]).mapv(sigmoid);
        let g = z.slice(s![2 * u..3 * u]).mapv(f64::tanh);
        let o = z.slice(s![3 * u..4 * u]).mapv(sigmoid);

        let c_next = &f * c + &i * &g;
        let h_next = &o * &c_next.mapv(f64::tanh);
        (h_next, c_next)
    }

    fn gru_step(&self, x: ArrayView1<'_, f64>, h: &Array1<f64>) -> Array1<f64> {
        let u = self.units;
        let k = &self.kernel;
        let r_k = &self.recurrent;

        let (x_proj, h_proj) = match &self.bias {
            GruBias::ResetAfter { input, recurrent } => {
                (x.dot(k) + input, h.dot(r_k) + recurrent)
            }
            GruBias::Shared(b) => (x.dot(k) + b, h.dot(r_k)),
        };

        let z = (&x_proj.slice(s![0..u]) + &h_proj.slice(s![0..u])).mapv(sigmoid);
        let r = (&x_proj.slice(s![u..2 * u]) + &h_proj.slice(s![u..2 * u])).mapv(sigmoid);

        let candidate_recurrent = match &self.bias {
            // reset applied after the recurrent matmul
            GruBias::ResetAfter { .. } => &r * &h_proj.slice(s![2 * u..3 * u]),
            GruBias::Shared(_) => (&r * h).dot(&r_k.slice(s![.., 2 * u..3 * u])),
        };
        let candidate = (&x_proj.slice(s![2 * u..3 * u]) + &candidate_recurrent).mapv(f64::tanh);

        &z * h + &(1.0 - &z) * &candidate
    }
}

/// Stacked recurrent layers followed by a dense head; the last hidden state
/// of the top layer feeds the head.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentModel {
    shape: InputShape,
    layers: Vec<RecurrentLayer>,
    head: Vec<HeadLayer>,
}

impl RecurrentModel {
    pub fn new(
        shape: InputShape,
        layers: Vec<RecurrentLayer>,
        head: Vec<HeadLayer>,
    ) -> Result<Self, ModelError> {
        let first = layers
            .first()
            .ok_or_else(|| ModelError::CorruptArtifact("no recurrent layers".into()))?;
        if first.input_size() != shape.layout.width() {
            return Err(ModelError::CorruptArtifact(format!(
                "first layer takes {} features, window has {}",
                first.input_size(),
                shape.layout.width()
            )));
        }
        let kind = first.kind;
        for pair in layers.windows(2) {
            if pair[1].input_size() != pair[0].units() {
                return Err(ModelError::CorruptArtifact(format!(
                    "layer expects {} inputs, previous layer has {} units",
                    pair[1].input_size(),
                    pair[0].units()
                )));
            }
            if pair[1].kind != kind {
                return Err(ModelError::CorruptArtifact("mixed cell kinds in one stack".into()));
            }
        }
        let top = layers.last().map(RecurrentLayer::units).unwrap_or(0);
        validate_head(top, &head)?;

        Ok(Self {
            shape,
            layers,
            head,
        })
    }

    pub fn architecture(&self) -> Architecture {
        self.layers[0].kind.architecture()
    }
}

impl ScorableModel for RecurrentModel {
    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn predict(&self, window: &Window) -> Result<f64, ModelError> {
        check_shape(self.shape, window)?;

        let mut sequence = window.values().to_owned();
        for layer in &self.layers {
            sequence = layer.forward_sequence(&sequence);
        }
        let last = sequence.row(sequence.nrows() - 1).to_owned();
        finite(run_head(&self.head, last))
    }
}
