//! Boundary to the trained model: normalized audio in, per-class scores out.

#[cfg(feature = "tflite")]
mod tflite;

#[cfg(feature = "tflite")]
pub use tflite::TfLiteClassifier;

use crate::signal::FeatureBuffer;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model load error: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Invoke(String),
    #[error("Model produced {got} outputs but {expected} labels are configured")]
    OutputMismatch { expected: usize, got: usize },
    #[error("Feature buffer is empty")]
    EmptyInput,
}

/// One class score as reported by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScore {
    pub label: String,
    pub value: f32,
}

/// Ordered (label, confidence) pairs in model output order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassificationResult {
    scores: Vec<ClassScore>,
}

impl ClassificationResult {
    pub fn new(scores: Vec<ClassScore>) -> Self {
        Self { scores }
    }

    /// Pair labels with raw model outputs, position by position
    pub fn from_outputs(labels: &[String], outputs: &[f32]) -> Result<Self, InferenceError> {
        if labels.len() != outputs.len() {
            return Err(InferenceError::OutputMismatch {
                expected: labels.len(),
                got: outputs.len(),
            });
        }

        Ok(Self::new(
            labels
                .iter()
                .zip(outputs)
                .map(|(label, &value)| ClassScore {
                    label: label.clone(),
                    value,
                })
                .collect(),
        ))
    }

    pub fn scores(&self) -> &[ClassScore] {
        &self.scores
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// A model invoked once per cycle on a complete recording.
///
/// Only `buffer.count()` samples are valid; implementations never read past it.
pub trait Classifier {
    fn classify(&mut self, buffer: &FeatureBuffer) -> Result<ClassificationResult, InferenceError>;
}
