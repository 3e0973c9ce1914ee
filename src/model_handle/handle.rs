use crate::annotations::detection::Detection;
use crate::config::{HandleConfig, RunMode};
use crate::error::{ModelError, Result};
use crate::evaluation::confusion_matrix::ConfusionMatrix;
use crate::evaluation::dataset::Dataset;
use crate::image_utils::image_io::read_image;
use crate::model_handle::backend::{DetectionModel, ModelLoader, TrainingRequest};
use crate::model_handle::weights::save_versioned;
use crate::object_detection::object_detection_model::{
    BatchDetector, DetectionSink, Frame, StreamDetector, StreamSummary,
};
use image::DynamicImage;
use std::path::Path;

/// Whether the handle has a model yet.
#[derive(Debug)]
pub enum ModelState<M> {
    Unloaded,
    Loaded(M),
}

type TrainOutput<L> = <<L as ModelLoader>::Model as DetectionModel>::TrainOutput;

/// What `ModelHandle::run` did.
#[derive(Debug)]
pub struct RunSummary {
    pub mode: RunMode,
    pub trained: bool,
    pub output_weights_version: Option<String>,
    pub confusion_matrix: Option<ConfusionMatrix>,
}

/// Holds the configuration of one detection model and forwards work to it.
///
/// The model is built lazily by `load_model`. Every operation that needs it checks for it first
/// and fails with `ModelError::NotLoaded` otherwise.
pub struct ModelHandle<L: ModelLoader> {
    config: HandleConfig,
    loader: L,
    state: ModelState<L::Model>,
    results: Option<TrainOutput<L>>,
    output_weights_version: Option<String>,
}

impl<L: ModelLoader> ModelHandle<L> {
    /// Stores the configuration. Nothing is validated or loaded here.
    pub fn new(config: HandleConfig, loader: L) -> Self {
        ModelHandle {
            config,
            loader,
            state: ModelState::Unloaded,
            results: None,
            output_weights_version: None,
        }
    }

    pub fn config(&self) -> &HandleConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ModelState::Loaded(_))
    }

    pub fn model(&self) -> Option<&L::Model> {
        match &self.state {
            ModelState::Loaded(model) => Some(model),
            ModelState::Unloaded => None,
        }
    }

    /// Output of the most recent successful `train` call.
    pub fn results(&self) -> Option<&TrainOutput<L>> {
        self.results.as_ref()
    }

    /// Version assigned by the last post-training save.
    pub fn output_weights_version(&self) -> Option<&str> {
        self.output_weights_version.as_deref()
    }

    fn model_mut(&mut self, operation: &'static str) -> Result<&mut L::Model> {
        match &mut self.state {
            ModelState::Loaded(model) => Ok(model),
            ModelState::Unloaded => Err(ModelError::NotLoaded { operation }),
        }
    }

    /// Builds the model from the configured weights. A second call replaces the model; if it
    /// fails, the previous model stays in place.
    pub fn load_model(&mut self) -> Result<()> {
        tracing::info!("Loading model from {}", self.config.model_weights);
        let model = self.loader.load(&self.config.model_weights)?;
        if self.is_loaded() {
            tracing::debug!("Replacing previously loaded model");
        }
        self.state = ModelState::Loaded(model);
        Ok(())
    }

    /// Trains the loaded model with the configured parameters and stores what the backend
    /// returns. When an output weights path is configured, the trained weights are saved as a
    /// new version of it.
    pub fn train(&mut self) -> Result<&TrainOutput<L>> {
        let config = &self.config;
        let request = TrainingRequest {
            params: config.model_params.as_ref(),
            dataset_path: config.dataset_path.as_deref(),
            output_weights_path: config.output_weights_path.as_deref(),
        };
        let model = match &mut self.state {
            ModelState::Loaded(model) => model,
            ModelState::Unloaded => return Err(ModelError::NotLoaded { operation: "train" }),
        };
        tracing::info!(
            "Training with {} parameters",
            request.params.map(|p| p.len()).unwrap_or(0)
        );
        let output = model.train(&request)?;
        let version = self
            .config
            .output_weights_path
            .as_deref()
            .map(|output_path| save_versioned(&*model, output_path))
            .transpose()?;
        // Results and version only change once the save step has succeeded.
        if version.is_some() {
            self.output_weights_version = version;
        }
        Ok(self.results.insert(output))
    }

    /// Runs the loaded model on one image.
    pub fn infer(&mut self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let thresholds = self.config.inference.thresholds();
        let model = self.model_mut("infer")?;
        model.detect(image, &thresholds)
    }

    /// Runs the loaded model on one image file.
    pub fn infer_file(&mut self, image_path: &Path) -> Result<Vec<Detection>> {
        self.model_mut("infer")?;
        let image = read_image(image_path)?;
        self.infer(&image)
    }

    /// Runs the loaded model over every image of the dataset's evaluation split and tabulates
    /// the confusion matrix.
    pub fn generate_confusion_matrix(&mut self) -> Result<ConfusionMatrix> {
        let thresholds = self.config.inference.thresholds();
        let dataset_path = self.config.dataset_path.clone();
        let model = self.model_mut("generate_confusion_matrix")?;
        let dataset_path = dataset_path.ok_or_else(|| {
            ModelError::Config("dataset_path is required to build a confusion matrix".to_string())
        })?;
        let dataset = Dataset::open(&dataset_path)?;
        let names = if dataset.names().is_empty() {
            model.class_names().to_vec()
        } else {
            dataset.names().to_vec()
        };
        let mut matrix = ConfusionMatrix::new(names.clone(), thresholds.confidence, thresholds.iou);
        let samples = dataset.samples()?;
        tracing::info!(
            "Evaluating {} images from {}",
            samples.len(),
            dataset.images_dir().display()
        );
        for sample in samples {
            let image = read_image(&sample.image_path)?;
            let ground_truth = sample
                .read_labels()?
                .iter()
                .map(|gt| gt.to_bounding_box(image.width(), image.height(), &names))
                .collect::<Result<Vec<_>>>()?;
            let detections = model.detect(&image, &thresholds)?;
            tracing::debug!(
                "{}: {} labels, {} detections",
                sample.image_path.display(),
                ground_truth.len(),
                detections.len()
            );
            matrix.process_image(&detections, &ground_truth);
        }
        Ok(matrix)
    }

    /// Builds the confusion matrix and renders it in the configured format (JSON by default).
    pub fn export_confusion_matrix(&mut self) -> Result<String> {
        let format = self.config.mat_format.unwrap_or_default();
        self.generate_confusion_matrix()?.render(format)
    }

    /// Performs the flow the run mode selects.
    ///
    /// Loads the model if needed. `RunMode::Train` additionally requires a dataset and trains
    /// (and saves, when an output path is set). In either mode a confusion matrix is produced
    /// when a matrix format and a dataset are configured.
    pub fn run(&mut self) -> Result<RunSummary> {
        let mode = self.config.mode;
        if mode == RunMode::Train && self.config.dataset_path.is_none() {
            return Err(ModelError::Config("dataset_path is required when training".to_string()));
        }
        if !self.is_loaded() {
            self.load_model()?;
        }
        let mut summary = RunSummary {
            mode,
            trained: false,
            output_weights_version: None,
            confusion_matrix: None,
        };
        if mode == RunMode::Train {
            self.train()?;
            summary.trained = true;
            summary.output_weights_version = self.output_weights_version.clone();
        }
        if self.config.mat_format.is_some() && self.config.dataset_path.is_some() {
            summary.confusion_matrix = Some(self.generate_confusion_matrix()?);
        }
        Ok(summary)
    }
}

impl<L> ModelHandle<L>
where
    L: ModelLoader,
    L::Model: StreamDetector,
{
    /// Streams frames through the loaded model into a sink.
    pub fn infer_stream<S, K>(&mut self, source: S, sink: &mut K) -> Result<StreamSummary>
    where
        S: IntoIterator<Item = Result<Frame>>,
        K: DetectionSink + ?Sized,
    {
        let thresholds = self.config.inference.thresholds();
        let model = self.model_mut("infer_stream")?;
        let summary = model.run_stream(source, sink, &thresholds)?;
        tracing::info!(
            "Processed {} frames ({} detections) at {:.1} fps",
            summary.frames,
            summary.detections,
            summary.frames_per_second()
        );
        Ok(summary)
    }
}
