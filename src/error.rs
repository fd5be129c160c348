use thiserror::Error;

use crate::audio::capture::CaptureError;
use crate::audio::source::SourceError;
use crate::config::ConfigError;
use crate::features::FeatureError;
use crate::models::{InferenceError, ModelLoadError};

pub type Result<T> = std::result::Result<T, KwsError>;

#[derive(Error, Debug)]
pub enum KwsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audio capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Audio source error: {0}")]
    AudioSource(#[from] SourceError),

    #[error("Feature extraction error: {0}")]
    Feature(#[from] FeatureError),

    #[error("Model loading error: {0}")]
    ModelLoad(#[from] ModelLoadError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KwsError {
    /// Startup failures halt the device before the run loop; everything else
    /// is absorbed at cycle granularity.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KwsError::Config(_) | KwsError::ModelLoad(_) | KwsError::Io(_)
        )
    }
}
