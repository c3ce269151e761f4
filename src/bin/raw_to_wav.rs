//! Convert the stored raw recording into a WAV file for listening/inspection.

use anomaly_edge::config;
use anomaly_edge::storage::{FsStorage, RecordingReader};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert a raw 16-bit recording to WAV", long_about = None)]
struct Args {
    /// Directory holding the recording
    #[arg(long, default_value = config::STORAGE_ROOT)]
    storage_root: PathBuf,

    /// Recording name inside the storage root
    #[arg(long, default_value = config::RECORDING_NAME)]
    name: String,

    /// Sample rate written to the WAV header
    #[arg(long, default_value_t = config::SAMPLE_RATE)]
    sample_rate: u32,

    /// Output WAV file
    #[arg(short, long, default_value = "recording.wav")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let storage = FsStorage::init(&args.storage_root).context("Storage unavailable")?;
    let mut reader = RecordingReader::open(&storage, &args.name)
        .with_context(|| format!("Failed to open recording '{}'", args.name))?;

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: args.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args.output, spec)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let mut samples = 0usize;
    while let Some(sample) = reader.next_sample()? {
        writer.write_sample(sample)?;
        samples += 1;
    }
    writer.finalize()?;

    println!(
        "💾 Wrote {} samples ({:.2}s) to {}",
        samples,
        samples as f64 / args.sample_rate.max(1) as f64,
        args.output.display()
    );
    Ok(())
}
