use crate::config::ModelParams;
use crate::error::Result;
use crate::object_detection::object_detection_model::BatchDetector;
use std::path::Path;

/// What the handle passes to a training backend.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrainingRequest<'a> {
    /// Hyperparameters, forwarded untouched.
    pub params: Option<&'a ModelParams>,
    pub dataset_path: Option<&'a Path>,
    pub output_weights_path: Option<&'a Path>,
}

/// Constructs a model from a weights path or identifier.
pub trait ModelLoader {
    type Model: DetectionModel;

    fn load(&self, weights: &str) -> Result<Self::Model>;
}

/// Plain functions and closures work as loaders, which keeps stand-in backends short.
impl<M, F> ModelLoader for F
where
    M: DetectionModel,
    F: Fn(&str) -> Result<M>,
{
    type Model = M;

    fn load(&self, weights: &str) -> Result<M> {
        self(weights)
    }
}

/// A loaded model the handle can train, save and run.
///
/// Backends without a capability return `ModelError::Unsupported` from it.
pub trait DetectionModel: BatchDetector {
    /// Whatever the backend reports after training. The handle stores it verbatim.
    type TrainOutput;

    fn train(&mut self, request: &TrainingRequest<'_>) -> Result<Self::TrainOutput>;

    fn save_weights(&self, destination: &Path) -> Result<()>;
}
