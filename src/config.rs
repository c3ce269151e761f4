use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// Device constants. Overridable at startup only; nothing reloads at runtime.
pub const SAMPLE_RATE: u32 = 16_000;
pub const RECORD_SECONDS: u32 = 10;
pub const MAX_RECORD_SECONDS: u32 = 10;
pub const BLOCK_SIZE: usize = 1024;
pub const SHIFT_BITS: u32 = 14;
pub const FEATURE_CAPACITY: usize = 16_000;
pub const RECORDING_NAME: &str = "audio.raw";
pub const STORAGE_ROOT: &str = "./data";
pub const BROKER_HOST: &str = "127.0.0.1";
pub const BROKER_PORT: u16 = 1883;
pub const CLIENT_ID: &str = "edge-anomaly-monitor";
pub const TOPIC: &str = "machine/audio/inference";
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);
pub const KEEP_ALIVE: Duration = Duration::from_secs(15);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEBOUNCE: Duration = Duration::from_millis(1000);
pub const IDLE_POLL: Duration = Duration::from_millis(20);
pub const TRIGGER_PATH: &str = "/sys/class/gpio/gpio4/value";

/// MQTT 3.1.1 servers only have to accept client identifiers up to this length
const MAX_CLIENT_ID_LEN: usize = 23;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Capture and feature extraction parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub record_seconds: u32,
    pub block_size: usize,
    /// Right shift applied to each wide sample to reach 16 bits
    pub shift_bits: u32,
    pub feature_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            record_seconds: RECORD_SECONDS,
            block_size: BLOCK_SIZE,
            shift_bits: SHIFT_BITS,
            feature_capacity: FEATURE_CAPACITY,
        }
    }
}

impl AudioConfig {
    pub fn record_duration(&self) -> Duration {
        Duration::from_secs(self.record_seconds as u64)
    }

    /// Upper bound on samples in one recording
    pub fn sample_budget(&self) -> usize {
        self.sample_rate as usize * self.record_seconds as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub recording_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(STORAGE_ROOT),
            recording_name: RECORDING_NAME.to_string(),
        }
    }
}

/// Broker connection parameters
#[derive(Debug)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub reconnect_interval: Duration,
    pub username: Option<String>,
    pub password: Option<SecretBox<String>>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: BROKER_HOST.to_string(),
            port: BROKER_PORT,
            client_id: CLIENT_ID.to_string(),
            topic: TOPIC.to_string(),
            keep_alive: KEEP_ALIVE,
            connect_timeout: CONNECT_TIMEOUT,
            reconnect_interval: RECONNECT_INTERVAL,
            username: None,
            password: None,
        }
    }
}

impl BrokerConfig {
    /// Read optional credentials from `MQTT_USERNAME` / `MQTT_PASSWORD`
    pub fn with_env_credentials(mut self) -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        self.username = optional_env("MQTT_USERNAME")?;
        self.password = optional_env("MQTT_PASSWORD")?.map(|p| SecretBox::new(Box::new(p)));
        Ok(self)
    }

    /// Get the broker password (use only when building the CONNECT packet)
    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret().as_str())
    }
}

fn optional_env(name: &str) -> Result<Option<String>, ConfigError> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    /// Value file of the active-low trigger input
    pub input_path: PathBuf,
    pub debounce: Duration,
    pub idle_poll: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from(TRIGGER_PATH),
            debounce: DEBOUNCE,
            idle_poll: IDLE_POLL,
        }
    }
}

/// Complete device configuration, built once at startup
#[derive(Debug)]
pub struct DeviceConfig {
    pub audio: AudioConfig,
    pub storage: StorageConfig,
    pub broker: BrokerConfig,
    pub trigger: TriggerConfig,
    /// Class labels in model output order: anomalous first, normal second
    pub labels: Vec<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            storage: StorageConfig::default(),
            broker: BrokerConfig::default(),
            trigger: TriggerConfig::default(),
            labels: vec!["anomalous".to_string(), "normal".to_string()],
        }
    }
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(invalid("sample_rate", "must be greater than zero"));
        }
        if audio.record_seconds == 0 || audio.record_seconds > MAX_RECORD_SECONDS {
            return Err(invalid(
                "record_seconds",
                format!("must be between 1 and {}", MAX_RECORD_SECONDS),
            ));
        }
        if audio.block_size == 0 {
            return Err(invalid("block_size", "must be greater than zero"));
        }
        if audio.shift_bits > 31 {
            return Err(invalid("shift_bits", "must be at most 31"));
        }
        if audio.feature_capacity == 0 {
            return Err(invalid("feature_capacity", "must be greater than zero"));
        }

        let name = &self.storage.recording_name;
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(invalid(
                "recording_name",
                "must be a plain, non-empty file name",
            ));
        }

        let broker = &self.broker;
        if broker.topic.is_empty() {
            return Err(invalid("topic", "cannot be empty"));
        }
        if broker.topic.contains(['+', '#']) {
            return Err(invalid("topic", "wildcards are not allowed in a publish topic"));
        }
        if broker.client_id.is_empty() || broker.client_id.len() > MAX_CLIENT_ID_LEN {
            return Err(invalid(
                "client_id",
                format!("must be 1 to {} bytes", MAX_CLIENT_ID_LEN),
            ));
        }
        if broker.reconnect_interval.is_zero() {
            return Err(invalid("reconnect_interval", "must be greater than zero"));
        }

        if self.labels.len() != 2 {
            return Err(invalid("labels", "exactly two labels are required"));
        }

        Ok(())
    }
}
