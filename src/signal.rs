//! Rebuilds the stored recording into the classifier's input buffer.

use crate::storage::{RecordingReader, Storage, StorageError};
use std::sync::Arc;

/// Scale that maps the full i16 range onto [-1.0, 1.0)
const NORMALIZE_SCALE: f32 = 32768.0;

/// Fixed-capacity buffer of normalized samples, rebuilt every cycle
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBuffer {
    samples: Vec<f32>,
    capacity: usize,
}

impl FeatureBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a buffer from already-normalized samples, keeping at most `capacity`
    pub fn from_samples(samples: &[f32], capacity: usize) -> Self {
        let mut buffer = Self::with_capacity(capacity);
        buffer
            .samples
            .extend(samples.iter().take(capacity).copied());
        buffer
    }

    /// Number of filled elements
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    fn push(&mut self, sample: f32) -> bool {
        if self.samples.len() >= self.capacity {
            return false;
        }
        self.samples.push(sample);
        true
    }
}

pub fn normalize(sample: i16) -> f32 {
    sample as f32 / NORMALIZE_SCALE
}

pub struct SignalAssembler {
    storage: Arc<dyn Storage>,
    capacity: usize,
}

impl SignalAssembler {
    pub fn new(storage: Arc<dyn Storage>, capacity: usize) -> Self {
        Self { storage, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Read the recording from its start until it ends or the buffer is full.
    ///
    /// Samples past the capacity are never read. A recording shorter than the
    /// capacity yields a partially filled buffer.
    pub fn assemble(&self, name: &str) -> Result<FeatureBuffer, StorageError> {
        let mut reader = RecordingReader::open(self.storage.as_ref(), name)?;
        let mut buffer = FeatureBuffer::with_capacity(self.capacity);

        while buffer.count() < self.capacity {
            match reader.next_sample()? {
                Some(sample) => {
                    buffer.push(normalize(sample));
                }
                None => break,
            }
        }

        log::debug!(
            "📈 Feature buffer filled with {}/{} samples from '{}'",
            buffer.count(),
            self.capacity,
            name
        );
        Ok(buffer)
    }
}
