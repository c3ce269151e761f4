//! Maps classifier scores to a verdict and its wire message.

use crate::classifier::ClassificationResult;
use serde::Serialize;
use serde_json::value::RawValue;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Fixed output position of each class
const ANOMALOUS_INDEX: usize = 0;
const NORMAL_INDEX: usize = 1;
const EXPECTED_CLASSES: usize = 2;

#[derive(Error, Debug, PartialEq)]
pub enum DecisionError {
    #[error("Expected {expected} classes, classifier returned {got}")]
    ClassCount { expected: usize, got: usize },
    #[error("Score for '{label}' is not a finite number")]
    NonFiniteScore { label: String },
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    Anomalous,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub category: Category,
    /// Score of the selected category
    pub confidence: f32,
}

impl Verdict {
    /// Anomalous only when its score is strictly greater; ties are normal
    pub fn from_scores(anomalous: f32, normal: f32) -> Self {
        if anomalous > normal {
            Self {
                category: Category::Anomalous,
                confidence: anomalous,
            }
        } else {
            Self {
                category: Category::Normal,
                confidence: normal,
            }
        }
    }

    pub fn is_anomalous(&self) -> bool {
        self.category == Category::Anomalous
    }

    pub fn message(&self) -> Result<InferenceMessage, serde_json::Error> {
        Ok(InferenceMessage {
            label: self.category,
            score: RawValue::from_string(format!("{:.3}", self.confidence))?,
        })
    }

    /// `{"label":"anomalous","score":0.820}`
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.message()?)
    }
}

/// Published payload; the score keeps exactly three decimals on the wire
#[derive(Debug, Serialize)]
pub struct InferenceMessage {
    pub label: Category,
    pub score: Box<RawValue>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DecisionEngine;

impl DecisionEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn decide(&self, result: &ClassificationResult) -> Result<Verdict, DecisionError> {
        let scores = result.scores();
        if scores.len() != EXPECTED_CLASSES {
            return Err(DecisionError::ClassCount {
                expected: EXPECTED_CLASSES,
                got: scores.len(),
            });
        }
        if let Some(bad) = scores.iter().find(|s| !s.value.is_finite()) {
            return Err(DecisionError::NonFiniteScore {
                label: bad.label.clone(),
            });
        }

        let verdict = Verdict::from_scores(scores[ANOMALOUS_INDEX].value, scores[NORMAL_INDEX].value);
        log::info!(
            "🔎 Scores anomalous={:.3} normal={:.3} → {} ({:.3})",
            scores[ANOMALOUS_INDEX].value,
            scores[NORMAL_INDEX].value,
            verdict.category,
            verdict.confidence
        );
        Ok(verdict)
    }
}
