use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Hyperparameters handed verbatim to the training backend.
pub type ModelParams = BTreeMap<String, Value>;

/// Which flow `ModelHandle::run` performs.
///
/// The individual operations are never gated by the mode; it only selects what `run` does.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Load the model and, when a matrix format is set, evaluate it.
    #[default]
    Infer,
    /// Load, train, save the trained weights, then evaluate as in `Infer`.
    Train,
}

impl RunMode {
    pub fn from_train_flag(train_model: bool) -> Self {
        if train_model {
            RunMode::Train
        } else {
            RunMode::Infer
        }
    }
}

/// Encoding used when exporting a confusion matrix.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixFormat {
    #[default]
    Json,
    Csv,
    #[serde(alias = "txt")]
    Text,
}

impl FromStr for MatrixFormat {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(MatrixFormat::Json),
            "csv" => Ok(MatrixFormat::Csv),
            "text" | "txt" => Ok(MatrixFormat::Text),
            other => Err(ModelError::Config(format!(
                "unknown confusion matrix format '{}', expected json, csv or text",
                other
            ))),
        }
    }
}

impl fmt::Display for MatrixFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixFormat::Json => write!(f, "json"),
            MatrixFormat::Csv => write!(f, "csv"),
            MatrixFormat::Text => write!(f, "text"),
        }
    }
}

/// Thresholds and runtime knobs for inference.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct InferenceSettings {
    /// Minimum class score for a detection to be kept.
    pub confidence: f32,
    /// IoU above which two same-class detections are merged by NMS, and above which a
    /// detection may match a ground truth box during evaluation.
    pub iou: f32,
    pub max_detections: usize,
    pub input_width: u32,
    pub input_height: u32,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
    /// Optional classes file, one name per line. Overrides names embedded in the weights.
    pub classes_path: Option<PathBuf>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        let cpu_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        InferenceSettings {
            confidence: 0.25,
            iou: 0.45,
            max_detections: 300,
            input_width: 640,
            input_height: 640,
            intra_threads: cpu_cores,
            classes_path: None,
        }
    }
}

impl InferenceSettings {
    pub fn thresholds(&self) -> DetectionThresholds {
        DetectionThresholds {
            confidence: self.confidence,
            iou: self.iou,
            max_detections: self.max_detections,
        }
    }
}

/// The subset of `InferenceSettings` a detector needs per call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionThresholds {
    pub confidence: f32,
    pub iou: f32,
    pub max_detections: usize,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        InferenceSettings::default().thresholds()
    }
}

/// Everything a `ModelHandle` is constructed with.
///
/// Construction performs no validation; `ModelHandle::run` checks what the selected mode needs.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HandleConfig {
    /// Path or identifier of the pretrained weights.
    pub model_weights: String,
    #[serde(default)]
    pub model_params: Option<ModelParams>,
    /// Dataset descriptor, required by `RunMode::Train` and by evaluation.
    #[serde(default)]
    pub dataset_path: Option<PathBuf>,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub output_weights_path: Option<PathBuf>,
    #[serde(default)]
    pub mat_format: Option<MatrixFormat>,
    #[serde(default)]
    pub inference: InferenceSettings,
}

impl HandleConfig {
    pub fn new(model_weights: impl Into<String>) -> Self {
        HandleConfig {
            model_weights: model_weights.into(),
            model_params: None,
            dataset_path: None,
            mode: RunMode::default(),
            output_weights_path: None,
            mat_format: None,
            inference: InferenceSettings::default(),
        }
    }

    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.model_params = Some(params);
        self
    }

    pub fn with_dataset(mut self, dataset_path: impl Into<PathBuf>) -> Self {
        self.dataset_path = Some(dataset_path.into());
        self
    }

    pub fn with_train_model(mut self, train_model: bool) -> Self {
        self.mode = RunMode::from_train_flag(train_model);
        self
    }

    pub fn with_output_weights(mut self, output_weights_path: impl Into<PathBuf>) -> Self {
        self.output_weights_path = Some(output_weights_path.into());
        self
    }

    pub fn with_mat_format(mut self, mat_format: MatrixFormat) -> Self {
        self.mat_format = Some(mat_format);
        self
    }

    pub fn with_inference(mut self, inference: InferenceSettings) -> Self {
        self.inference = inference;
        self
    }

    /// Reads a configuration from a JSON file.
    pub fn from_json_file(filepath: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(filepath)?);
        let config: HandleConfig = serde_json::from_reader(reader)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_leaves_optionals_absent() {
        let config = HandleConfig::new("yolov8n.pt");
        assert_eq!(config.model_weights, "yolov8n.pt");
        assert_eq!(config.model_params, None);
        assert_eq!(config.dataset_path, None);
        assert_eq!(config.output_weights_path, None);
        assert_eq!(config.mat_format, None);
        assert_eq!(config.mode, RunMode::Infer);
    }

    #[test]
    fn deserializes_minimal_json() {
        let config: HandleConfig =
            serde_json::from_value(json!({ "model_weights": "yolo11n.onnx" })).unwrap();
        assert_eq!(config, HandleConfig::new("yolo11n.onnx"));
    }

    #[test]
    fn deserializes_full_json() {
        let config: HandleConfig = serde_json::from_value(json!({
            "model_weights": "yolo11n.onnx",
            "model_params": { "epochs": 10, "imgsz": 640 },
            "dataset_path": "data/coco8/data.json",
            "mode": "train",
            "output_weights_path": "runs/best.onnx",
            "mat_format": "txt",
            "inference": { "confidence": 0.5 }
        }))
        .unwrap();
        assert_eq!(config.mode, RunMode::Train);
        assert_eq!(config.mat_format, Some(MatrixFormat::Text));
        assert_eq!(config.model_params.unwrap()["epochs"], json!(10));
        assert_eq!(config.inference.confidence, 0.5);
        assert_eq!(config.inference.iou, 0.45);
    }

    #[test]
    fn matrix_format_from_str() {
        assert_eq!("CSV".parse::<MatrixFormat>().unwrap(), MatrixFormat::Csv);
        assert_eq!("txt".parse::<MatrixFormat>().unwrap(), MatrixFormat::Text);
        assert!("png".parse::<MatrixFormat>().is_err());
        assert_eq!(MatrixFormat::Text.to_string(), "text");
    }

    #[test]
    fn with_inference_replaces_thresholds() {
        let settings = InferenceSettings {
            confidence: 0.6,
            iou: 0.7,
            ..InferenceSettings::default()
        };
        let config = HandleConfig::new("w").with_inference(settings);
        let thresholds = config.inference.thresholds();
        assert_eq!(thresholds.confidence, 0.6);
        assert_eq!(thresholds.iou, 0.7);
        assert_eq!(thresholds.max_detections, 300);
    }

    #[test]
    fn train_flag_selects_mode() {
        assert_eq!(
            HandleConfig::new("w").with_train_model(true).mode,
            RunMode::Train
        );
        assert_eq!(RunMode::from_train_flag(false), RunMode::Infer);
    }
}
