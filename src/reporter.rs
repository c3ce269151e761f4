//! Publishes verdicts to the broker and owns the connection state.

use crate::decision::Verdict;
use crate::status::{Status, StatusDisplay};
use mqtt_protocol::{MqttClient, ProtocolError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Granularity of the retry sleep, so a shutdown request is noticed
const RETRY_SLICE: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Not connected to broker")]
    NotConnected,
    #[error("Broker error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The network client as seen by the reporter
pub trait BrokerLink {
    fn connect(&mut self) -> Result<(), ProtocolError>;

    fn is_connected(&self) -> bool;

    /// Run the client's message pump once
    fn poll(&mut self) -> Result<(), ProtocolError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ProtocolError>;

    /// Client-specific state code, for logs only
    fn state_code(&self) -> i8;
}

impl BrokerLink for MqttClient {
    fn connect(&mut self) -> Result<(), ProtocolError> {
        MqttClient::connect(self)
    }

    fn is_connected(&self) -> bool {
        MqttClient::is_connected(self)
    }

    fn poll(&mut self) -> Result<(), ProtocolError> {
        MqttClient::poll(self)
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ProtocolError> {
        MqttClient::publish(self, topic, payload)
    }

    fn state_code(&self) -> i8 {
        self.state().code()
    }
}

pub struct Reporter {
    link: Box<dyn BrokerLink>,
    topic: String,
    reconnect_interval: Duration,
    state: ConnectionState,
    shutdown: Option<Arc<AtomicBool>>,
    display: Option<Arc<dyn StatusDisplay>>,
}

impl Reporter {
    pub fn new(link: Box<dyn BrokerLink>, topic: impl Into<String>, reconnect_interval: Duration) -> Self {
        Self {
            link,
            topic: topic.into(),
            reconnect_interval,
            state: ConnectionState::Disconnected,
            shutdown: None,
            display: None,
        }
    }

    /// Abandon the reconnect loop once this flag is raised
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Show "connecting" on this display whenever a reconnect loop starts
    pub fn with_display(mut self, display: Arc<dyn StatusDisplay>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Block until the broker accepts a connection, retrying at a fixed interval.
    ///
    /// Returns true when a (re)connection was made by this call.
    pub fn ensure_connected(&mut self) -> bool {
        if self.state == ConnectionState::Connected && self.link.is_connected() {
            return false;
        }

        self.state = ConnectionState::Connecting;
        if let Some(display) = &self.display {
            display.show(&Status::Connecting);
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.link.connect() {
                Ok(()) => {
                    self.state = ConnectionState::Connected;
                    log::info!("✅ Broker connected after {} attempt(s)", attempts);
                    return true;
                }
                Err(e) => {
                    log::warn!(
                        "❌ Broker connection failed, rc={} ({}), retrying in {:?}",
                        self.link.state_code(),
                        e,
                        self.reconnect_interval
                    );
                }
            }

            if !self.wait_before_retry() {
                log::info!("🛑 Shutdown requested, giving up on broker connection");
                self.state = ConnectionState::Disconnected;
                return false;
            }
        }
    }

    /// Sleep one retry interval; false when shutdown was requested meanwhile
    fn wait_before_retry(&self) -> bool {
        let deadline = Instant::now() + self.reconnect_interval;
        loop {
            if self.shutdown_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(RETRY_SLICE));
        }
    }

    /// Pump network I/O; a failure drops the state back to Disconnected
    pub fn service(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }

        if let Err(e) = self.link.poll() {
            log::warn!("⚠️ Broker connection lost: {}", e);
            self.state = ConnectionState::Disconnected;
        } else if !self.link.is_connected() {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Send one verdict, reconnecting first if needed. Failures are not retried.
    pub fn publish(&mut self, verdict: &Verdict) -> Result<(), PublishError> {
        let payload = verdict.to_json()?;

        // A session the broker closed while we were busy only shows up on the socket
        self.service();
        self.ensure_connected();
        if self.state != ConnectionState::Connected {
            return Err(PublishError::NotConnected);
        }

        // Diagnostic mirror of every outgoing message
        println!("{}", payload);

        match self.link.publish(&self.topic, payload.as_bytes()) {
            Ok(()) => {
                log::info!("📤 Published to '{}': {}", self.topic, payload);
                Ok(())
            }
            Err(e) => {
                log::error!("❌ Publish to '{}' failed: {}", self.topic, e);
                self.state = ConnectionState::Disconnected;
                Err(e.into())
            }
        }
    }
}
