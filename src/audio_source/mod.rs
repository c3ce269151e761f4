//! Block-oriented access to the microphone.
//!
//! A source delivers fixed-size blocks of wide (24/32-bit significant) signed
//! samples, the way an I2S peripheral hands over its DMA buffers. Reads block
//! until a full block is available.

#[cfg(feature = "mic")]
mod imp_cpal;

#[cfg(feature = "mic")]
pub use imp_cpal::CpalSource;

use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("No audio block received within {0:?}")]
    Timeout(Duration),
    #[error("Unsupported audio format: {0}")]
    Format(String),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Reusable buffer holding one block of raw wide samples
#[derive(Debug, Clone)]
pub struct RawSampleBlock {
    samples: Vec<i32>,
    capacity: usize,
}

impl RawSampleBlock {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.samples
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Append a sample; returns false once the block is full
    pub fn push(&mut self, sample: i32) -> bool {
        if self.is_full() {
            return false;
        }
        self.samples.push(sample);
        true
    }
}

/// A blocking producer of raw sample blocks
pub trait SampleBlockSource {
    /// Replace the block's contents with the next block of samples.
    ///
    /// Blocks until data is available. Leaving the block empty signals that
    /// the source is exhausted.
    fn read_block(&mut self, block: &mut RawSampleBlock) -> Result<(), SourceError>;
}

/// Plays back a mono integer WAV file as if it came from the microphone.
///
/// Samples are widened so that `word >> shift_bits` yields the file's
/// 16-bit representation again.
pub struct WavFileSource {
    reader: WavReader<BufReader<File>>,
    bits_per_sample: u16,
    shift_bits: u32,
    sample_rate: u32,
    paced: bool,
}

impl WavFileSource {
    pub fn open(path: impl AsRef<Path>, shift_bits: u32) -> Result<Self, SourceError> {
        let reader = WavReader::open(path.as_ref())?;
        let spec = reader.spec();

        log::info!(
            "📊 Audio file info: {}Hz, {} channels, {} bits",
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample
        );

        if spec.channels != 1 {
            return Err(SourceError::Format(format!(
                "expected mono audio, got {} channels",
                spec.channels
            )));
        }
        if spec.sample_format != SampleFormat::Int {
            return Err(SourceError::Format(
                "expected integer PCM samples".to_string(),
            ));
        }

        Ok(Self {
            bits_per_sample: spec.bits_per_sample,
            sample_rate: spec.sample_rate,
            reader,
            shift_bits,
            paced: false,
        })
    }

    /// Sleep for one block duration per read, like a hardware sample clock
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn widen(&self, sample: i32) -> i32 {
        let bits = self.bits_per_sample as u32;
        let word = (sample as i64) << self.shift_bits;
        let word = if bits >= 16 {
            word >> (bits - 16)
        } else {
            word << (16 - bits)
        };
        word.clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }
}

impl SampleBlockSource for WavFileSource {
    fn read_block(&mut self, block: &mut RawSampleBlock) -> Result<(), SourceError> {
        block.clear();

        let wanted = block.capacity();
        let samples: Vec<i32> = self
            .reader
            .samples::<i32>()
            .take(wanted)
            .collect::<Result<_, _>>()?;

        for sample in samples {
            block.push(self.widen(sample));
        }

        if self.paced && !block.is_empty() {
            let secs = block.len() as f64 / self.sample_rate.max(1) as f64;
            std::thread::sleep(Duration::from_secs_f64(secs));
        }

        log::trace!("WAV source delivered {} samples", block.len());
        Ok(())
    }
}
