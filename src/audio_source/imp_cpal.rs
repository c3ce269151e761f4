use super::{RawSampleBlock, SampleBlockSource, SourceError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// A read that sees no samples for this long means the device has stalled
const STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the callback → reader channel, in callback buffers
const CHANNEL_DEPTH: usize = 64;

/// Microphone capture through CPAL, delivering left-justified 32-bit words
pub struct CpalSource {
    _stream: Stream,
    rx: Receiver<Vec<i32>>,
    pending: Vec<i32>,
}

impl CpalSource {
    /// Open the default (or named) input device at the given sample rate
    pub fn open(device_name: Option<&str>, sample_rate: u32) -> Result<Self, SourceError> {
        let host = cpal::default_host();

        let device = if let Some(name) = device_name {
            host.input_devices()
                .map_err(|e| SourceError::Device(format!("Failed to enumerate devices: {}", e)))?
                .find(|dev| dev.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| SourceError::Device(format!("Device '{}' not found", name)))?
        } else {
            host.default_input_device()
                .ok_or_else(|| SourceError::Device("No default input device available".into()))?
        };

        let (config, format) = find_config(&device, sample_rate)?;
        log::info!(
            "🎤 Capturing from '{}' at {}Hz ({:?}, {} channels)",
            device.name().unwrap_or_default(),
            sample_rate,
            format,
            config.channels
        );

        let (tx, rx) = bounded(CHANNEL_DEPTH);
        let stream = match format {
            SampleFormat::I32 => build_stream::<i32>(&device, &config, tx)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, tx)?,
            SampleFormat::F32 => build_stream::<f32>(&device, &config, tx)?,
            other => {
                return Err(SourceError::Format(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| SourceError::Stream(format!("Failed to start stream: {}", e)))?;

        Ok(Self {
            _stream: stream,
            rx,
            pending: Vec::new(),
        })
    }
}

fn find_config(device: &Device, sample_rate: u32) -> Result<(StreamConfig, SampleFormat), SourceError> {
    let supported: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| SourceError::Device(e.to_string()))?
        .filter(|c| {
            c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate
        })
        .collect();

    // Prefer the widest integer format, like a 32-bit I2S slot
    for preferred in [SampleFormat::I32, SampleFormat::I16, SampleFormat::F32] {
        if let Some(range) = supported.iter().find(|c| c.sample_format() == preferred) {
            let config = range.clone().with_sample_rate(cpal::SampleRate(sample_rate));
            return Ok((config.config(), preferred));
        }
    }

    Err(SourceError::Device(format!(
        "Device does not support {}Hz capture",
        sample_rate
    )))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    tx: Sender<Vec<i32>>,
) -> Result<Stream, SourceError>
where
    T: SizedSample,
    i32: FromSample<T>,
{
    let channels = config.channels as usize;
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _| {
                // First channel only
                let words: Vec<i32> = data
                    .chunks(channels)
                    .filter_map(|frame| frame.first())
                    .map(|s| i32::from_sample(*s))
                    .collect();
                if tx.try_send(words).is_err() {
                    log::warn!("⚠️ Capture buffer overrun, dropping samples");
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| SourceError::Stream(e.to_string()))
}

impl SampleBlockSource for CpalSource {
    fn read_block(&mut self, block: &mut RawSampleBlock) -> Result<(), SourceError> {
        block.clear();

        while !block.is_full() {
            if self.pending.is_empty() {
                match self.rx.recv_timeout(STALL_TIMEOUT) {
                    Ok(words) => self.pending = words,
                    Err(RecvTimeoutError::Timeout) => return Err(SourceError::Timeout(STALL_TIMEOUT)),
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(SourceError::Stream("capture stream closed".into()))
                    }
                }
            }

            let take = (block.capacity() - block.len()).min(self.pending.len());
            for word in self.pending.drain(..take) {
                block.push(word);
            }
        }

        Ok(())
    }
}
