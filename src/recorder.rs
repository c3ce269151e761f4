use crate::audio_source::{RawSampleBlock, SampleBlockSource, SourceError};
use crate::config::AudioConfig;
use crate::status::{Status, StatusDisplay};
use crate::storage::{RecordingWriter, Storage, StorageError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Microphone read failed: {0}")]
    Source(#[from] SourceError),
}

/// Why the capture loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `sample_rate × duration` samples were stored
    BudgetReached,
    /// Wall-clock duration elapsed
    DurationElapsed,
    /// The source had no more samples
    SourceExhausted,
}

/// A closed, readable recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingHandle {
    pub name: String,
    pub samples: usize,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

/// Project a wide sample into 16 bits by an arithmetic right shift.
///
/// Low bits are discarded (no rounding). Results outside the i16 range saturate
/// instead of wrapping as a plain `as i16` cast would.
pub fn downconvert(sample: i32, shift_bits: u32) -> i16 {
    (sample >> shift_bits).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Drains the microphone into the reusable recording object
pub struct Recorder {
    source: Box<dyn SampleBlockSource>,
    storage: Arc<dyn Storage>,
    display: Arc<dyn StatusDisplay>,
    config: AudioConfig,
    recording_name: String,
    block: RawSampleBlock,
    converted: Vec<i16>,
}

impl Recorder {
    pub fn new(
        source: Box<dyn SampleBlockSource>,
        storage: Arc<dyn Storage>,
        display: Arc<dyn StatusDisplay>,
        config: AudioConfig,
        recording_name: impl Into<String>,
    ) -> Self {
        Self {
            source,
            storage,
            display,
            block: RawSampleBlock::with_capacity(config.block_size),
            converted: Vec::with_capacity(config.block_size),
            config,
            recording_name: recording_name.into(),
        }
    }

    pub fn recording_name(&self) -> &str {
        &self.recording_name
    }

    /// Record for at most `duration`, writing block by block
    pub fn record(&mut self, duration: Duration) -> Result<RecordingHandle, RecordError> {
        let mut writer = match RecordingWriter::create(self.storage.as_ref(), &self.recording_name)
        {
            Ok(writer) => writer,
            Err(e) => {
                log::error!("❌ Cannot open recording '{}': {}", self.recording_name, e);
                self.display.show(&Status::StorageError);
                return Err(e.into());
            }
        };

        self.display.show(&Status::Recording);
        log::info!("🎙️ Recording up to {:?} into '{}'", duration, self.recording_name);

        match self.capture(&mut writer, duration) {
            Ok((stop_reason, elapsed)) => {
                let samples = match writer.finish() {
                    Ok(samples) => samples,
                    Err(e) => {
                        log::error!("❌ Failed to finalize recording: {}", e);
                        self.display.show(&Status::StorageError);
                        return Err(e.into());
                    }
                };

                log::info!(
                    "✅ Recorded {} samples in {:?} ({:?})",
                    samples,
                    elapsed,
                    stop_reason
                );
                self.display.show(&Status::RecordingComplete);

                Ok(RecordingHandle {
                    name: self.recording_name.clone(),
                    samples,
                    elapsed,
                    stop_reason,
                })
            }
            Err(e) => {
                // Dropping the writer closes the object
                drop(writer);
                log::error!("❌ Recording aborted: {}", e);
                let status = match e {
                    RecordError::Source(_) => Status::MicError,
                    RecordError::Storage(_) => Status::StorageError,
                };
                self.display.show(&status);
                Err(e)
            }
        }
    }

    fn capture(
        &mut self,
        writer: &mut RecordingWriter,
        duration: Duration,
    ) -> Result<(StopReason, Duration), RecordError> {
        let requested = (self.config.sample_rate as f64 * duration.as_secs_f64()).round() as usize;
        let budget = requested.min(self.config.sample_budget());
        let shift_bits = self.config.shift_bits;
        let start = Instant::now();

        loop {
            if writer.samples_written() >= budget {
                return Ok((StopReason::BudgetReached, start.elapsed()));
            }

            self.source.read_block(&mut self.block)?;
            if self.block.is_empty() {
                return Ok((StopReason::SourceExhausted, start.elapsed()));
            }

            let remaining = budget - writer.samples_written();
            self.converted.clear();
            self.converted.extend(
                self.block
                    .as_slice()
                    .iter()
                    .take(remaining)
                    .map(|&s| downconvert(s, shift_bits)),
            );
            writer.append(&self.converted)?;
            log::trace!("Stored block of {} samples", self.converted.len());

            if start.elapsed() > duration {
                return Ok((StopReason::DurationElapsed, start.elapsed()));
            }
        }
    }
}
