pub mod arena;
pub mod engine;
pub mod quantized;
#[cfg(feature = "tflite")]
pub mod tflite;

use std::path::PathBuf;
use thiserror::Error;

pub use arena::{ArenaRegion, TensorArena};
pub use engine::{ClassId, ClassificationResult, InferenceEngine};
pub use quantized::{Activation, DenseLayer, QuantizedModel};
#[cfg(feature = "tflite")]
pub use tflite::TfliteClassifier;

/// Output classes: silence, unknown, yes, no
pub const CLASS_COUNT: usize = 4;

/// Failures while loading or validating a model. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("No model path configured")]
    MissingPath,

    #[error("Failed to read model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a model blob (bad magic)")]
    BadMagic,

    #[error("Unsupported model version {0}")]
    UnsupportedVersion(u16),

    #[error("Model blob truncated at offset {offset}")]
    Truncated { offset: usize },

    #[error("Model has {extra} trailing bytes")]
    TrailingBytes { extra: usize },

    #[error("Checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid quantization parameters: {0}")]
    InvalidQuantization(String),

    #[error("Arena too small: model needs {required} bytes, arena holds {capacity}")]
    ArenaTooSmall { required: usize, capacity: usize },

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Per-call inference failures; recoverable at cycle granularity
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Arena exhausted: requested {requested} bytes, {available} available")]
    ArenaExhausted { requested: usize, available: usize },

    #[error("Expected {expected} input features, got {actual}")]
    InputLength { expected: usize, actual: usize },

    #[error("Backend error: {0}")]
    Backend(String),
}

/// A model that maps one feature vector to per-class probabilities.
///
/// Scratch tensors for a forward pass must come from the supplied arena;
/// the engine resets it before every call.
pub trait ClassifierBackend: Send {
    fn name(&self) -> &'static str;
    fn input_len(&self) -> usize;
    fn output_len(&self) -> usize;

    /// Peak arena bytes one forward pass allocates
    fn arena_requirement(&self) -> usize;

    /// Write one probability per class into `scores` (length `output_len`)
    fn forward(
        &mut self,
        input: &[f32],
        arena: &mut TensorArena,
        scores: &mut [f32],
    ) -> Result<(), InferenceError>;
}

/// Numerically stable in-place softmax
pub(crate) fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax() {
        let mut v = [1.0, 1.0, 1.0, 1.0];
        softmax(&mut v);
        assert!(v.iter().all(|p| (p - 0.25).abs() < 1e-6));

        let mut v = [1000.0, 0.0];
        softmax(&mut v);
        assert!((v[0] - 1.0).abs() < 1e-6);
        assert!(v[1] >= 0.0 && v[1] < 1e-6);
    }
}
