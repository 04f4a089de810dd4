//! ONNX Runtime backend for exported models.

use super::{check_shape, finite, ScorableModel};
use crate::error::ModelError;
use crate::window::{InputShape, Window};
use ndarray::Axis;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;

/// A model exported to ONNX taking `(1, lookback, features)` f32 input and
/// yielding a single normalized value.
pub struct OnnxModel {
    /// Session runs need exclusive access
    session: Mutex<Session>,
    output_name: String,
    shape: InputShape,
}

impl OnnxModel {
    /// Load an ONNX model.
    ///
    /// # Arguments
    /// * `model_path` - Path to the `.onnx` file
    /// * `shape` - Input shape declared in the model catalog
    /// * `optimize_graph` - Use full graph optimization instead of basic
    pub fn load(model_path: &Path, shape: InputShape, optimize_graph: bool) -> Result<Self, ModelError> {
        let corrupt = |e: ort::Error| {
            ModelError::CorruptArtifact(format!("{}: {}", model_path.display(), e))
        };

        let session = Session::builder()
            .map_err(corrupt)?
            .with_optimization_level(if optimize_graph {
                GraphOptimizationLevel::Level3
            } else {
                GraphOptimizationLevel::Level1
            })
            .map_err(corrupt)?
            .with_intra_threads(1) // deterministic reductions
            .map_err(corrupt)?
            .commit_from_file(model_path)
            .map_err(corrupt)?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ModelError::CorruptArtifact("model declares no outputs".into()))?;

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            shape,
        })
    }
}

impl ScorableModel for OnnxModel {
    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn predict(&self, window: &Window) -> Result<f64, ModelError> {
        check_shape(self.shape, window)?;

        let batch = window.values().mapv(|v| v as f32).insert_axis(Axis(0));
        let input = Tensor::from_array(batch).map_err(|e| ModelError::Backend(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ModelError::Backend(e.to_string()))?;
        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| ModelError::Backend(format!("missing output {}", self.output_name)))?;
        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Backend(e.to_string()))?;
        let value = data
            .first()
            .copied()
            .ok_or_else(|| ModelError::Backend("empty output tensor".into()))?;

        finite(value as f64)
    }
}
