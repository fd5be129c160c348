//! TensorFlow Lite backend.
//!
//! The interpreter allocates its own tensors once at load, so this backend
//! takes nothing from the engine's arena.

use std::path::Path;

use tflitec::interpreter::{Interpreter, Options};
use tflitec::model::Model;
use tflitec::tensor::Shape;

use super::arena::TensorArena;
use super::{softmax, ClassifierBackend, InferenceError, ModelLoadError};

pub struct TfliteClassifier {
    interpreter: Interpreter<'static>,
    input_len: usize,
    output_len: usize,
}

impl TfliteClassifier {
    pub fn new(model_path: &Path, input_len: usize, output_len: usize) -> Result<Self, ModelLoadError> {
        if !model_path.exists() {
            return Err(ModelLoadError::Io {
                path: model_path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        let path_str = model_path.to_string_lossy();

        // The interpreter borrows the model for its whole life
        let model = Box::leak(Box::new(Model::new(&path_str).map_err(|e| {
            ModelLoadError::Backend(format!("Failed to load model: {}", e))
        })?));

        let mut options = Options::default();
        options.thread_count = 1;

        let interpreter = Interpreter::new(model, Some(options)).map_err(|e| {
            ModelLoadError::Backend(format!("Failed to create interpreter: {}", e))
        })?;

        interpreter
            .resize_input(0, Shape::new(vec![1, input_len]))
            .map_err(|e| ModelLoadError::ShapeMismatch(format!("Failed to resize input: {}", e)))?;
        interpreter.allocate_tensors().map_err(|e| {
            ModelLoadError::Backend(format!("Failed to allocate tensors: {}", e))
        })?;

        let output = interpreter
            .output(0)
            .map_err(|e| ModelLoadError::Backend(format!("Failed to get output: {}", e)))?;
        let actual = output.shape().dimensions().iter().product::<usize>();
        if actual != output_len {
            return Err(ModelLoadError::ShapeMismatch(format!(
                "model has {} outputs, expected {}",
                actual, output_len
            )));
        }

        log::info!("✅ Loaded TFLite model {}", model_path.display());
        Ok(Self {
            interpreter,
            input_len,
            output_len,
        })
    }
}

impl ClassifierBackend for TfliteClassifier {
    fn name(&self) -> &'static str {
        "tflite"
    }

    fn input_len(&self) -> usize {
        self.input_len
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn arena_requirement(&self) -> usize {
        0
    }

    fn forward(
        &mut self,
        input: &[f32],
        _arena: &mut TensorArena,
        scores: &mut [f32],
    ) -> Result<(), InferenceError> {
        if input.len() != self.input_len {
            return Err(InferenceError::InputLength {
                expected: self.input_len,
                actual: input.len(),
            });
        }

        self.interpreter
            .copy(input, 0)
            .map_err(|e| InferenceError::Backend(format!("Failed to set input: {}", e)))?;
        self.interpreter
            .invoke()
            .map_err(|e| InferenceError::Backend(format!("Inference failed: {}", e)))?;
        let output = self
            .interpreter
            .output(0)
            .map_err(|e| InferenceError::Backend(format!("Failed to get output: {}", e)))?;

        let data = output.data::<f32>();
        if data.len() != scores.len() {
            return Err(InferenceError::Backend(format!(
                "Expected {} outputs, got {}",
                scores.len(),
                data.len()
            )));
        }
        scores.copy_from_slice(data);

        // Models exported without a softmax head give logits
        let sum: f32 = scores.iter().sum();
        let is_distribution =
            scores.iter().all(|s| (0.0..=1.0).contains(s)) && (sum - 1.0).abs() < 1e-3;
        if !is_distribution {
            softmax(scores);
        }
        Ok(())
    }
}
