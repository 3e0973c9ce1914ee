//! Configuration and orchestration for object detection models: load weights lazily, train,
//! run inference on images or frame streams, and evaluate against a labelled dataset.

pub mod annotations;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod image_utils;
pub mod model_handle;
pub mod object_detection;

pub use config::{HandleConfig, InferenceSettings, MatrixFormat, RunMode};
pub use error::{ModelError, Result};
pub use model_handle::handle::ModelHandle;
pub use object_detection::yolo::{YoloLoader, YoloModel};
