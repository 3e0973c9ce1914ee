use thiserror::Error;

/// Every failure the pipeline can surface.
///
/// Backend errors are passed through as-is; nothing here is retried.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Model is not loaded, call load_model() before {operation}")]
    NotLoaded { operation: &'static str },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, ModelError>;
