//! # MQTT Protocol
//!
//! Blocking MQTT 3.1.1 client for publishing inference results from the edge device.
//!
//! This crate provides:
//! - Low-level packet definitions and framing (CONNECT, CONNACK, PUBLISH at QoS 0,
//!   PINGREQ/PINGRESP, DISCONNECT)
//! - A high-level client with keep-alive handling
//! - A mock broker for tests and local development
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use mqtt_protocol::{MqttClient, MqttOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = MqttClient::new(MqttOptions::new("127.0.0.1", 1883, "edge-anomaly-monitor"));
//! client.connect()?;
//!
//! client.publish("machine/audio/inference", br#"{"label":"normal","score":0.912}"#)?;
//!
//! // Call regularly to keep the session alive
//! client.poll()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod mock_broker;
pub mod protocol;

// Re-export commonly used types
pub use client::{ClientState, MqttClient, MqttOptions};
pub use mock_broker::{MockBroker, MockBrokerConfig, MockBrokerHandle, ReceivedMessage};
pub use protocol::{ConnectReturnCode, Connection, Packet, PacketType, ProtocolError};
