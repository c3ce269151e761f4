use super::{ClassificationResult, Classifier, InferenceError};
use crate::signal::FeatureBuffer;
use std::path::Path;
use tflitec::interpreter::{Interpreter, Options};
use tflitec::model::Model as TfliteModel;

/// Anomaly model run through TensorFlow Lite
pub struct TfLiteClassifier {
    interpreter: Interpreter<'static>,
    labels: Vec<String>,
    input_size: usize,
    input: Vec<f32>,
}

impl TfLiteClassifier {
    pub fn new(model_path: impl AsRef<Path>, labels: Vec<String>) -> Result<Self, InferenceError> {
        let path = model_path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| InferenceError::ModelLoad(format!("Invalid model path: {:?}", path)))?;

        // The interpreter borrows its model for the rest of the process
        let model = Box::leak(Box::new(TfliteModel::new(path_str).map_err(|e| {
            InferenceError::ModelLoad(format!("Failed to load model {}: {}", path_str, e))
        })?));

        let mut options = Options::default();
        options.thread_count = 1;

        let interpreter = Interpreter::new(model, Some(options)).map_err(|e| {
            InferenceError::ModelLoad(format!("Failed to create interpreter: {}", e))
        })?;
        interpreter.allocate_tensors().map_err(|e| {
            InferenceError::ModelLoad(format!("Failed to allocate tensors: {}", e))
        })?;

        let input_tensor = interpreter.input(0).map_err(|e| {
            InferenceError::ModelLoad(format!("Failed to get input tensor: {}", e))
        })?;
        let output_tensor = interpreter.output(0).map_err(|e| {
            InferenceError::ModelLoad(format!("Failed to get output tensor: {}", e))
        })?;

        let input_size = input_tensor.shape().dimensions().iter().product::<usize>();
        let output_size = output_tensor.shape().dimensions().iter().product::<usize>();
        if output_size != labels.len() {
            return Err(InferenceError::OutputMismatch {
                expected: labels.len(),
                got: output_size,
            });
        }

        log::info!(
            "🧠 Loaded model {} (input: {} values, classes: {:?})",
            path_str,
            input_size,
            labels
        );

        Ok(Self {
            interpreter,
            labels,
            input_size,
            input: vec![0.0; input_size],
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }
}

impl Classifier for TfLiteClassifier {
    fn classify(&mut self, buffer: &FeatureBuffer) -> Result<ClassificationResult, InferenceError> {
        if buffer.is_empty() {
            return Err(InferenceError::EmptyInput);
        }

        // Zeros past the filled count; samples past the tensor size are dropped
        let used = buffer.count().min(self.input_size);
        self.input.fill(0.0);
        self.input[..used].copy_from_slice(&buffer.as_slice()[..used]);

        self.interpreter
            .copy(&self.input[..], 0)
            .map_err(|e| InferenceError::Invoke(format!("Failed to set input: {}", e)))?;
        self.interpreter
            .invoke()
            .map_err(|e| InferenceError::Invoke(e.to_string()))?;

        let output_tensor = self
            .interpreter
            .output(0)
            .map_err(|e| InferenceError::Invoke(format!("Failed to get output: {}", e)))?;
        let outputs = output_tensor.data::<f32>();

        log::debug!("🧠 Model outputs: {:?}", outputs);
        ClassificationResult::from_outputs(&self.labels, outputs)
    }
}
