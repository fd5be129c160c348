//! Fixed-arena inference executor.
//!
//! `InferenceEngine` owns the backend and the arena; neither is reachable from
//! outside. `classify` takes `&mut self`, so two calls can never be in flight
//! against the same arena.

use strum::{Display, EnumCount, EnumIter, EnumString};

use super::arena::TensorArena;
use super::quantized::QuantizedModel;
use super::{ClassifierBackend, InferenceError, ModelLoadError, CLASS_COUNT};
use crate::config::KwsConfig;
use crate::features::FeatureVector;

/// Output labels, in model output order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, EnumCount,
)]
#[strum(serialize_all = "lowercase")]
pub enum ClassId {
    Silence = 0,
    Unknown = 1,
    Yes = 2,
    No = 3,
}

impl ClassId {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(ClassId::Silence),
            1 => Some(ClassId::Unknown),
            2 => Some(ClassId::Yes),
            3 => Some(ClassId::No),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Yes or No
    pub fn is_keyword(self) -> bool {
        matches!(self, ClassId::Yes | ClassId::No)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
    pub class_id: ClassId,
    /// Highest class probability (0 for a skipped cycle)
    pub confidence: f32,
    /// Argmax before the confidence threshold was applied
    pub raw_class: ClassId,
    pub scores: [f32; CLASS_COUNT],
    pub timestamp_ms: u64,
}

impl ClassificationResult {
    /// What a skipped or failed cycle reports
    pub fn unknown(timestamp_ms: u64) -> Self {
        Self {
            class_id: ClassId::Unknown,
            confidence: 0.0,
            raw_class: ClassId::Unknown,
            scores: [0.0; CLASS_COUNT],
            timestamp_ms,
        }
    }

    /// True when the threshold replaced a different argmax with Unknown
    pub fn was_overridden(&self) -> bool {
        self.class_id != self.raw_class
    }
}

pub struct InferenceEngine {
    backend: Box<dyn ClassifierBackend>,
    arena: TensorArena,
    scores: [f32; CLASS_COUNT],
    confidence_threshold: f32,
    next_call_limit: Option<usize>,
}

impl InferenceEngine {
    /// Wrap a backend, checking its shape against the configuration and its
    /// arena requirement against the configured capacity.
    pub fn new(
        backend: Box<dyn ClassifierBackend>,
        config: &KwsConfig,
    ) -> Result<Self, ModelLoadError> {
        if backend.input_len() != config.features.feature_size {
            return Err(ModelLoadError::ShapeMismatch(format!(
                "model takes {} features, extractor produces {}",
                backend.input_len(),
                config.features.feature_size
            )));
        }
        if backend.output_len() != config.model.class_count || backend.output_len() != CLASS_COUNT
        {
            return Err(ModelLoadError::ShapeMismatch(format!(
                "model has {} outputs, expected {}",
                backend.output_len(),
                CLASS_COUNT
            )));
        }

        let required = backend.arena_requirement();
        let capacity = config.model.arena_size;
        if required > capacity {
            return Err(ModelLoadError::ArenaTooSmall { required, capacity });
        }

        log::info!(
            "🧠 Inference engine ready: backend={}, arena {}/{} bytes, threshold {:.2}",
            backend.name(),
            required,
            capacity,
            config.model.confidence_threshold
        );

        Ok(Self {
            backend,
            arena: TensorArena::new(capacity),
            scores: [0.0; CLASS_COUNT],
            confidence_threshold: config.model.confidence_threshold,
            next_call_limit: None,
        })
    }

    /// Load the model named by `config.model.model_path`. `.tflite` files go
    /// to the TensorFlow Lite backend when it is compiled in.
    pub fn from_config(config: &KwsConfig) -> Result<Self, ModelLoadError> {
        let path = config
            .model
            .model_path
            .as_ref()
            .ok_or(ModelLoadError::MissingPath)?;

        #[cfg(feature = "tflite")]
        if path.extension().is_some_and(|ext| ext == "tflite") {
            let backend = super::tflite::TfliteClassifier::new(
                path,
                config.features.feature_size,
                config.model.class_count,
            )?;
            return Self::new(Box::new(backend), config);
        }

        let model = QuantizedModel::from_path(path)?;
        Self::new(Box::new(model), config)
    }

    pub fn arena_capacity(&self) -> usize {
        self.arena.capacity()
    }

    pub fn arena_requirement(&self) -> usize {
        self.backend.arena_requirement()
    }

    pub fn arena_high_water(&self) -> usize {
        self.arena.high_water()
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Cap the arena at `bytes` for the next `classify` only
    pub fn limit_next_call_arena(&mut self, bytes: usize) {
        self.next_call_limit = Some(bytes);
    }

    pub fn classify(
        &mut self,
        features: &FeatureVector,
        timestamp_ms: u64,
    ) -> Result<ClassificationResult, InferenceError> {
        self.arena.reset(self.next_call_limit.take());
        self.scores = [0.0; CLASS_COUNT];
        self.backend
            .forward(features.as_slice(), &mut self.arena, &mut self.scores)?;

        let (best, confidence) = self
            .scores
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, v)| {
                if v > bv {
                    (i, v)
                } else {
                    (bi, bv)
                }
            });
        // NaN scores never win the fold, so a broken backend leaves -inf here
        if !confidence.is_finite() {
            return Err(InferenceError::Backend(format!(
                "non-finite class scores {:?}",
                self.scores
            )));
        }
        let raw_class = ClassId::from_index(best).unwrap_or(ClassId::Unknown);
        let class_id = if confidence < self.confidence_threshold {
            ClassId::Unknown
        } else {
            raw_class
        };

        log::debug!(
            "🧠 Scores {:?} → {} ({:.3}){}",
            self.scores,
            class_id,
            confidence,
            if class_id != raw_class {
                format!(" [raw {}]", raw_class)
            } else {
                String::new()
            }
        );

        Ok(ClassificationResult {
            class_id,
            confidence,
            raw_class,
            scores: self.scores,
            timestamp_ms,
        })
    }
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("backend", &self.backend.name())
            .field("arena_capacity", &self.arena.capacity())
            .field("confidence_threshold", &self.confidence_threshold)
            .finish()
    }
}
