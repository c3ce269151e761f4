use anomaly_edge::audio_source::{SampleBlockSource, WavFileSource};
use anomaly_edge::classifier::Classifier;
use anomaly_edge::config::{self, DeviceConfig};
use anomaly_edge::led_ring::LedRingDisplay;
use anomaly_edge::recorder::Recorder;
use anomaly_edge::reporter::Reporter;
use anomaly_edge::signal::SignalAssembler;
use anomaly_edge::status::{LogDisplay, Status, StatusDisplay};
use anomaly_edge::storage::{FsStorage, Storage};
use anomaly_edge::trigger::{GpioTrigger, TriggerLoop};
use anyhow::{Context, Result};
use clap::Parser;
use mqtt_protocol::{MqttClient, MqttOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Edge audio anomaly monitor", long_about = None)]
pub struct Args {
    /// Broker host name or address
    #[arg(long, default_value = config::BROKER_HOST)]
    broker_host: String,

    #[arg(long, default_value_t = config::BROKER_PORT)]
    broker_port: u16,

    /// Topic the verdicts are published to
    #[arg(long, default_value = config::TOPIC)]
    topic: String,

    #[arg(long, default_value = config::CLIENT_ID)]
    client_id: String,

    /// Directory holding the recording
    #[arg(long, default_value = config::STORAGE_ROOT)]
    storage_root: PathBuf,

    /// Value file of the active-low trigger input
    #[arg(long, default_value = config::TRIGGER_PATH)]
    trigger_path: PathBuf,

    /// Replay a mono WAV file instead of capturing from the microphone
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Input device name (defaults to the system default input)
    #[arg(long)]
    mic_device: Option<String>,

    /// TensorFlow Lite anomaly model
    #[arg(long)]
    model: Option<PathBuf>,

    #[arg(long, default_value_t = config::RECORD_SECONDS)]
    record_seconds: u32,

    #[arg(long, default_value_t = config::DEBOUNCE.as_millis() as u64)]
    debounce_ms: u64,

    #[arg(long, default_value_t = config::RECONNECT_INTERVAL.as_millis() as u64)]
    reconnect_ms: u64,

    /// Show status on a ReSpeaker LED ring
    #[arg(long)]
    led_ring: bool,
}

impl Args {
    fn device_config(&self) -> Result<DeviceConfig> {
        let mut config = DeviceConfig::new();
        config.audio.record_seconds = self.record_seconds;
        config.storage.root = self.storage_root.clone();
        config.trigger.input_path = self.trigger_path.clone();
        config.trigger.debounce = Duration::from_millis(self.debounce_ms);
        config.broker.host = self.broker_host.clone();
        config.broker.port = self.broker_port;
        config.broker.topic = self.topic.clone();
        config.broker.client_id = self.client_id.clone();
        config.broker.reconnect_interval = Duration::from_millis(self.reconnect_ms);
        config.broker = config
            .broker
            .with_env_credentials()
            .context("Failed to read broker credentials")?;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn open_display(led_ring: bool) -> Arc<dyn StatusDisplay> {
    if led_ring {
        match LedRingDisplay::open() {
            Ok(display) => return Arc::new(display),
            Err(e) => log::warn!("⚠️ LED ring unavailable ({}), using log output", e),
        }
    }
    Arc::new(LogDisplay)
}

#[cfg_attr(not(feature = "mic"), allow(unused_variables))]
fn open_source(args: &Args, config: &DeviceConfig) -> Result<Box<dyn SampleBlockSource>> {
    if let Some(path) = &args.wav {
        let source = WavFileSource::open(path, config.audio.shift_bits)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        if source.sample_rate() != config.audio.sample_rate {
            log::warn!(
                "⚠️ {} is {}Hz, recordings are tagged {}Hz",
                path.display(),
                source.sample_rate(),
                config.audio.sample_rate
            );
        }
        return Ok(Box::new(source.paced(true)));
    }

    #[cfg(feature = "mic")]
    {
        let source = anomaly_edge::audio_source::CpalSource::open(
            args.mic_device.as_deref(),
            config.audio.sample_rate,
        )
        .context("Failed to open microphone")?;
        Ok(Box::new(source))
    }

    #[cfg(not(feature = "mic"))]
    {
        anyhow::bail!("No audio source: pass --wav or build with the `mic` feature")
    }
}

#[cfg_attr(not(feature = "tflite"), allow(unused_variables))]
fn load_classifier(args: &Args, config: &DeviceConfig) -> Result<Box<dyn Classifier>> {
    let model = args
        .model
        .as_ref()
        .context("A model is required (--model <path>)")?;

    #[cfg(feature = "tflite")]
    {
        let classifier =
            anomaly_edge::classifier::TfLiteClassifier::new(model, config.labels.clone())
                .context("Failed to load model")?;
        Ok(Box::new(classifier))
    }

    #[cfg(not(feature = "tflite"))]
    {
        anyhow::bail!(
            "Cannot load {}: model support not compiled in (build with the `tflite` feature)",
            model.display()
        )
    }
}

fn mqtt_options(config: &DeviceConfig) -> MqttOptions {
    let broker = &config.broker;
    let mut options = MqttOptions::new(&broker.host, broker.port, &broker.client_id);
    options.keep_alive = broker.keep_alive;
    options.connect_timeout = broker.connect_timeout;
    options.username = broker.username.clone();
    options.password = broker.password().map(|p| p.as_bytes().to_vec());
    options
}

fn main() -> Result<()> {
    env_logger::init();
    log::info!("🚀 Initializing anomaly-edge");

    let args = Args::parse();
    let config = args.device_config()?;

    let display = open_display(args.led_ring);
    display.show(&Status::Initializing);

    // Nothing can run without durable storage
    let storage: Arc<dyn Storage> = match FsStorage::init(&config.storage.root) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            display.show(&Status::StorageError);
            return Err(e).context("Storage initialization failed, halting");
        }
    };

    let source = open_source(&args, &config).inspect_err(|_| display.show(&Status::MicError))?;
    let classifier =
        load_classifier(&args, &config).inspect_err(|_| display.show(&Status::InferenceError))?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("🛑 Received Ctrl+C, shutting down...");
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    let recorder = Recorder::new(
        source,
        storage.clone(),
        display.clone(),
        config.audio.clone(),
        config.storage.recording_name.clone(),
    );
    let assembler = SignalAssembler::new(storage, config.audio.feature_capacity);

    let client = MqttClient::new(mqtt_options(&config));
    let mut reporter = Reporter::new(
        Box::new(client),
        config.broker.topic.clone(),
        config.broker.reconnect_interval,
    )
    .with_shutdown(shutdown.clone())
    .with_display(display.clone());

    reporter.ensure_connected();
    display.show(&Status::Ready);

    let mut trigger_loop = TriggerLoop::new(
        Box::new(GpioTrigger::new(&config.trigger.input_path)),
        recorder,
        assembler,
        classifier,
        reporter,
        display,
        config.audio.record_duration(),
        config.trigger.debounce,
    )
    .with_idle_poll(config.trigger.idle_poll);

    println!("🎧 Monitoring, press the trigger to record");
    println!("   Press Ctrl+C to exit");

    trigger_loop.run(shutdown);

    println!("\n👋 Goodbye!");
    Ok(())
}
