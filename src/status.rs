//! Short status messages shown at pipeline milestones.

use crate::decision::Category;
use std::fmt;

/// Pipeline milestones reported to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Initializing,
    Ready,
    Connecting,
    Recording,
    RecordingComplete,
    StorageError,
    MicError,
    FileError,
    InferenceError,
    PublishError,
    TriggerError,
    Result(Category),
}

impl Status {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Status::StorageError
                | Status::MicError
                | Status::FileError
                | Status::InferenceError
                | Status::PublishError
                | Status::TriggerError
        )
    }
}

// Every rendering fits one 16-character display line
impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Initializing => f.write_str("Initializing..."),
            Status::Ready => f.write_str("Ready"),
            Status::Connecting => f.write_str("Broker..."),
            Status::Recording => f.write_str("Recording..."),
            Status::RecordingComplete => f.write_str("Recorded OK"),
            Status::StorageError => f.write_str("Storage error!"),
            Status::MicError => f.write_str("Mic error!"),
            Status::FileError => f.write_str("File error!"),
            Status::InferenceError => f.write_str("Inference error!"),
            Status::PublishError => f.write_str("Publish error!"),
            Status::TriggerError => f.write_str("Trigger error!"),
            Status::Result(category) => write!(f, "Result:{}", category),
        }
    }
}

/// A display that accepts status updates without acknowledgement
pub trait StatusDisplay: Send + Sync {
    fn show(&self, status: &Status);
}

/// Writes status updates to the log
#[derive(Debug, Default)]
pub struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn show(&self, status: &Status) {
        if status.is_error() {
            log::warn!("📟 {}", status);
        } else {
            log::info!("📟 {}", status);
        }
    }
}
