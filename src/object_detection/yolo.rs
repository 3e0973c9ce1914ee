use crate::annotations::detection::Detection;
use crate::config::{DetectionThresholds, InferenceSettings};
use crate::error::{ModelError, Result};
use crate::image_utils::image_conversion::convert_rgb_image_to_owned_array;
use crate::image_utils::padding::letterbox_rgb8;
use crate::model_handle::backend::{DetectionModel, ModelLoader, TrainingRequest};
use crate::object_detection::object_detection_model::{
    BatchDetector, DetectionSink, Frame, StreamDetector, StreamSummary, drive_stream,
};
use crate::object_detection::object_detection_utils::{
    decode_yolo_output, parse_names_metadata, read_classes_txt_file,
};
use crate::object_detection::ort_inference_session::OrtInferenceSession;
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Builds `YoloModel`s from exported ONNX weights.
#[derive(Clone, Debug, Default)]
pub struct YoloLoader {
    settings: InferenceSettings,
}

impl YoloLoader {
    pub fn new(settings: InferenceSettings) -> Self {
        YoloLoader { settings }
    }

    fn class_names(&self, session: &OrtInferenceSession) -> Result<Vec<String>> {
        if let Some(classes_path) = &self.settings.classes_path {
            return read_classes_txt_file(classes_path).map_err(|e| {
                ModelError::ModelLoad(format!(
                    "Failed to read classes file {}: {e}",
                    classes_path.display()
                ))
            });
        }
        match session.custom_metadata("names") {
            Some(raw) => match parse_names_metadata(&raw) {
                Some(names) => Ok(names),
                None => {
                    tracing::warn!("Could not parse class names from model metadata: {}", raw);
                    Ok(Vec::new())
                }
            },
            None => {
                tracing::warn!("Model has no class names, numeric class ids will be used");
                Ok(Vec::new())
            }
        }
    }
}

impl ModelLoader for YoloLoader {
    type Model = YoloModel;

    fn load(&self, weights: &str) -> Result<YoloModel> {
        let model_path = Path::new(weights);
        if !model_path.exists() {
            return Err(ModelError::ModelLoad(format!(
                "Model path does not exist, or cannot be read: {}",
                model_path.display()
            )));
        }
        let is_onnx = model_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
        if !is_onnx {
            return Err(ModelError::ModelLoad(format!(
                "{} is not an ONNX model, export the weights to ONNX first",
                model_path.display()
            )));
        }
        let session = OrtInferenceSession::new(model_path, self.settings.intra_threads)?;
        let class_names = self.class_names(&session)?;
        tracing::info!(
            "Loaded YOLO model {} ({} classes, input {}x{})",
            model_path.display(),
            class_names.len(),
            self.settings.input_width,
            self.settings.input_height
        );
        Ok(YoloModel {
            ort_session: session,
            class_names,
            input_width: self.settings.input_width,
            input_height: self.settings.input_height,
            weights_path: model_path.to_path_buf(),
        })
    }
}

/// A YOLO detection model (v8 / 11 output layout) running on ONNX Runtime.
pub struct YoloModel {
    ort_session: OrtInferenceSession,
    class_names: Vec<String>,
    input_width: u32,
    input_height: u32,
    weights_path: PathBuf,
}

impl BatchDetector for YoloModel {
    fn detect(
        &mut self,
        image: &DynamicImage,
        thresholds: &DetectionThresholds,
    ) -> Result<Vec<Detection>> {
        let rgb = image.to_rgb8();
        let (canvas, letterbox) = letterbox_rgb8(&rgb, self.input_width, self.input_height);
        let input_array = convert_rgb_image_to_owned_array(&canvas);
        let (data, shape) = self.ort_session.run(&input_array)?;
        decode_yolo_output(&data, &shape, &letterbox, &self.class_names, thresholds)
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

impl StreamDetector for YoloModel {
    fn run_stream<S, K>(
        &mut self,
        source: S,
        sink: &mut K,
        thresholds: &DetectionThresholds,
    ) -> Result<StreamSummary>
    where
        S: IntoIterator<Item = Result<Frame>>,
        K: DetectionSink + ?Sized,
    {
        drive_stream(self, source, sink, thresholds)
    }
}

impl DetectionModel for YoloModel {
    type TrainOutput = ();

    fn train(&mut self, _request: &TrainingRequest<'_>) -> Result<()> {
        Err(ModelError::Unsupported(
            "ONNX Runtime sessions are inference-only, train with a training backend and \
             export the result to ONNX"
                .to_string(),
        ))
    }

    fn save_weights(&self, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&self.weights_path, destination)?;
        Ok(())
    }
}
