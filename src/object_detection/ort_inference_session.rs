use crate::error::{ModelError, Result};
use ndarray::Array4;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;
use std::path::Path;

/// An onnxruntime inference session.
///
/// All of the object detection models in this project are just wrappers
/// around an ONNX inference session that handles running the model on
/// hardware.
pub struct OrtInferenceSession {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OrtInferenceSession {
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| ModelError::ModelLoad(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ModelError::ModelLoad(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(intra_threads.max(1))
            .map_err(|e| ModelError::ModelLoad(format!("Failed to set intra-thread count: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| {
                ModelError::ModelLoad(format!(
                    "Failed to load model {}: {e}",
                    model_path.display()
                ))
            })?;
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "images".to_string());
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "output0".to_string());
        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    /// Looks up a custom metadata entry, e.g. the class names ultralytics embeds on export.
    pub fn custom_metadata(&self, key: &str) -> Option<String> {
        let metadata = self.session.metadata().ok()?;
        match metadata.custom(key) {
            Ok(Some(value)) => Some(value),
            _ => None,
        }
    }

    /// Runs the session on one NCHW input and returns the first output flattened, with its shape.
    pub fn run(&mut self, input: &Array4<f32>) -> Result<(Vec<f32>, Vec<usize>)> {
        let input_contiguous = input.as_standard_layout();
        let input_tensor = TensorRef::from_array_view(&input_contiguous)
            .map_err(|e| ModelError::Inference(format!("Failed to create input tensor: {e}")))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| ModelError::Inference(format!("Inference failed: {e}")))?;
        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            ModelError::Inference(format!("Output '{}' not found", self.output_name))
        })?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("Failed to extract output: {e}")))?;
        let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        Ok((data.to_vec(), shape))
    }
}
