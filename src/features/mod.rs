//! Frame → feature vector transform.
//!
//! `FeatureExtractor` applies the calibrated gain (the same scaling the VAD
//! uses) and hands the normalized samples to a pluggable [`FeatureTransform`].
//! All working memory is sized at construction; `extract` writes into a
//! caller-owned [`FeatureVector`] and never allocates.

pub mod spectral;

use thiserror::Error;

use crate::audio::FULL_SCALE;
use crate::calibration::CalibrationProfile;
use crate::config::{KwsConfig, TransformKind};

pub use spectral::SpectralTransform;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("Frame length mismatch: expected {expected} samples, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    #[error("Feature vector length mismatch: expected {expected}, got {actual}")]
    VectorLength { expected: usize, actual: usize },

    #[error("Invalid transform: {0}")]
    InvalidTransform(String),
}

/// Model input for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn zeros(len: usize) -> Self {
        Self {
            values: vec![0.0; len],
        }
    }

    pub fn from_values(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.values
    }
}

/// A deterministic mapping from normalized samples to features.
///
/// Implementations may keep scratch space (hence `&mut self`) but the output
/// must depend only on the input slice.
pub trait FeatureTransform: Send {
    fn input_len(&self) -> usize;
    fn output_len(&self) -> usize;
    fn name(&self) -> &'static str;

    /// `input.len() == input_len()` and `output.len() == output_len()` are
    /// checked by the caller.
    fn transform(&mut self, input: &[f32], output: &mut [f32]);
}

/// Normalized samples used directly as features, resampled to the output
/// length (block averaging when shrinking, linear interpolation when growing)
#[derive(Debug, Clone)]
pub struct TimeDomainTransform {
    input_len: usize,
    output_len: usize,
}

impl TimeDomainTransform {
    pub fn new(input_len: usize, output_len: usize) -> Result<Self, FeatureError> {
        if input_len == 0 || output_len == 0 {
            return Err(FeatureError::InvalidTransform(
                "time-domain lengths must be positive".to_string(),
            ));
        }
        Ok(Self {
            input_len,
            output_len,
        })
    }
}

impl FeatureTransform for TimeDomainTransform {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn name(&self) -> &'static str {
        "time_domain"
    }

    fn transform(&mut self, input: &[f32], output: &mut [f32]) {
        let (n_in, n_out) = (self.input_len, self.output_len);

        if n_in == n_out {
            output.copy_from_slice(input);
        } else if n_in > n_out {
            for (i, out) in output.iter_mut().enumerate() {
                let start = i * n_in / n_out;
                let end = ((i + 1) * n_in / n_out).max(start + 1);
                let block = &input[start..end];
                *out = block.iter().sum::<f32>() / block.len() as f32;
            }
        } else {
            let step = if n_out > 1 {
                (n_in - 1) as f32 / (n_out - 1) as f32
            } else {
                0.0
            };
            for (i, out) in output.iter_mut().enumerate() {
                let pos = i as f32 * step;
                let lo = (pos as usize).min(n_in - 1);
                let hi = (lo + 1).min(n_in - 1);
                let frac = pos - lo as f32;
                *out = input[lo] + (input[hi] - input[lo]) * frac;
            }
        }
    }
}

pub struct FeatureExtractor {
    transform: Box<dyn FeatureTransform>,
    scaled: Vec<f32>,
}

impl FeatureExtractor {
    /// Build the extractor selected by `config.features.transform`
    pub fn new(config: &KwsConfig) -> Result<Self, FeatureError> {
        let frame_size = config.audio.frame_size;
        let feature_size = config.features.feature_size;
        let transform: Box<dyn FeatureTransform> = match config.features.transform {
            TransformKind::TimeDomain => {
                Box::new(TimeDomainTransform::new(frame_size, feature_size)?)
            }
            TransformKind::Spectral => Box::new(SpectralTransform::new(frame_size, feature_size)?),
        };
        Ok(Self::with_transform(transform))
    }

    pub fn with_transform(transform: Box<dyn FeatureTransform>) -> Self {
        log::info!(
            "🧮 Feature extractor: {} ({} samples → {} features)",
            transform.name(),
            transform.input_len(),
            transform.output_len()
        );
        Self {
            scaled: vec![0.0; transform.input_len()],
            transform,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.transform.input_len()
    }

    pub fn feature_size(&self) -> usize {
        self.transform.output_len()
    }

    /// A zeroed vector of the right length for [`extract`](Self::extract)
    pub fn new_vector(&self) -> FeatureVector {
        FeatureVector::zeros(self.feature_size())
    }

    pub fn extract(
        &mut self,
        frame: &[i16],
        profile: &CalibrationProfile,
        out: &mut FeatureVector,
    ) -> Result<(), FeatureError> {
        if frame.len() != self.frame_size() {
            return Err(FeatureError::FrameLength {
                expected: self.frame_size(),
                actual: frame.len(),
            });
        }
        if out.len() != self.feature_size() {
            return Err(FeatureError::VectorLength {
                expected: self.feature_size(),
                actual: out.len(),
            });
        }

        // Gain, then clamp to the representable sample range
        let gain = profile.gain_factor;
        for (dst, &s) in self.scaled.iter_mut().zip(frame) {
            *dst = (s as f32 * gain).clamp(-FULL_SCALE, FULL_SCALE - 1.0) / FULL_SCALE;
        }

        self.transform.transform(&self.scaled, out.as_mut_slice());
        Ok(())
    }
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("transform", &self.transform.name())
            .field("frame_size", &self.frame_size())
            .field("feature_size", &self.feature_size())
            .finish()
    }
}
