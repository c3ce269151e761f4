use crate::protocol::{Connect, ConnectReturnCode, Connection, Packet, ProtocolError};
use log::{debug, info, warn};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Client connection state, with the numeric codes used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    ConnectionTimeout,
    ConnectionLost,
    ConnectFailed,
    Disconnected,
    Connected,
    Refused(ConnectReturnCode),
}

impl ClientState {
    pub fn code(&self) -> i8 {
        match self {
            ClientState::ConnectionTimeout => -4,
            ClientState::ConnectionLost => -3,
            ClientState::ConnectFailed => -2,
            ClientState::Disconnected => -1,
            ClientState::Connected => 0,
            ClientState::Refused(code) => *code as i8,
        }
    }
}

/// Connection options for [`MqttClient`]
#[derive(Debug, Clone)]
pub struct MqttOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl MqttOptions {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            username: None,
            password: None,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Blocking MQTT 3.1.1 client (QoS 0 publish only)
pub struct MqttClient {
    options: MqttOptions,
    connection: Option<Connection>,
    state: ClientState,
    last_outbound: Instant,
    last_inbound: Instant,
    ping_outstanding: bool,
}

impl MqttClient {
    pub fn new(options: MqttOptions) -> Self {
        let now = Instant::now();
        Self {
            options,
            connection: None,
            state: ClientState::Disconnected,
            last_outbound: now,
            last_inbound: now,
            ping_outstanding: false,
        }
    }

    pub fn options(&self) -> &MqttOptions {
        &self.options
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some() && self.state == ClientState::Connected
    }

    /// Open the TCP connection and perform the CONNECT/CONNACK handshake
    pub fn connect(&mut self) -> Result<(), ProtocolError> {
        self.connection = None;
        let address = self.options.address();
        info!("📡 Connecting to broker at {}", address);

        let stream = match self.open_stream(&address) {
            Ok(stream) => stream,
            Err(e) => {
                self.state = ClientState::ConnectFailed;
                return Err(e);
            }
        };

        let mut connection = Connection::new(stream)?;
        connection.write_packet(&Packet::Connect(Connect {
            client_id: self.options.client_id.clone(),
            keep_alive_secs: self.options.keep_alive.as_secs().min(u16::MAX as u64) as u16,
            clean_session: true,
            username: self.options.username.clone(),
            password: self.options.password.clone(),
        }))?;

        let response = match connection.read_packet() {
            Ok(packet) => packet,
            Err(ProtocolError::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                self.state = ClientState::ConnectionTimeout;
                return Err(ProtocolError::Io(e));
            }
            Err(e) => {
                self.state = ClientState::ConnectFailed;
                return Err(e);
            }
        };

        match response {
            Packet::ConnAck {
                code: ConnectReturnCode::Accepted,
                session_present,
            } => {
                let now = Instant::now();
                self.last_outbound = now;
                self.last_inbound = now;
                self.ping_outstanding = false;
                self.connection = Some(connection);
                self.state = ClientState::Connected;
                info!(
                    "✅ Connected to broker as '{}' (session present: {})",
                    self.options.client_id, session_present
                );
                Ok(())
            }
            Packet::ConnAck { code, .. } => {
                warn!("❌ Broker refused connection: {:?}", code);
                self.state = ClientState::Refused(code);
                Err(ProtocolError::Refused(code))
            }
            other => {
                self.state = ClientState::ConnectFailed;
                warn!("❌ Unexpected response to CONNECT: {:?}", other.packet_type());
                Err(ProtocolError::InvalidPacketType(other.packet_type() as u8))
            }
        }
    }

    fn open_stream(&self, address: &str) -> Result<TcpStream, ProtocolError> {
        let mut last_error = None;
        for addr in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.options.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.options.connect_timeout))?;
                    stream.set_write_timeout(Some(self.options.connect_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .map(ProtocolError::Io)
            .unwrap_or(ProtocolError::Malformed("broker address did not resolve")))
    }

    /// Publish a QoS 0 message; nothing is awaited from the broker
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ProtocolError> {
        let packet = Packet::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain: false,
        };
        self.send(&packet)?;
        debug!("📤 Published {} bytes to '{}'", payload.len(), topic);
        Ok(())
    }

    /// Service the connection: drain inbound packets and keep the session alive
    pub fn poll(&mut self) -> Result<(), ProtocolError> {
        loop {
            let connection = self
                .connection
                .as_mut()
                .ok_or(ProtocolError::ConnectionClosed)?;

            let pending = match connection.has_pending() {
                Ok(pending) => pending,
                Err(e) => {
                    self.drop_connection(ClientState::ConnectionLost);
                    return Err(e);
                }
            };
            if !pending {
                break;
            }

            match connection.read_packet() {
                Ok(Packet::PingResp) => {
                    debug!("🏓 PINGRESP");
                    self.ping_outstanding = false;
                }
                Ok(Packet::Publish { topic, .. }) => {
                    debug!("📥 Ignoring inbound publish on '{}'", topic);
                }
                Ok(other) => {
                    warn!("⚠️ Unexpected packet from broker: {:?}", other.packet_type());
                }
                Err(e) => {
                    self.drop_connection(ClientState::ConnectionLost);
                    return Err(e);
                }
            }
            self.last_inbound = Instant::now();
        }

        let keep_alive = self.options.keep_alive;
        if keep_alive.is_zero() {
            return Ok(());
        }

        if self.ping_outstanding {
            if self.last_inbound.elapsed() >= keep_alive {
                warn!("⏰ No PINGRESP within {:?}, dropping connection", keep_alive);
                self.drop_connection(ClientState::ConnectionTimeout);
                return Err(ProtocolError::ConnectionClosed);
            }
            return Ok(());
        }

        // Ping at half the keep-alive
        let ping_interval = keep_alive / 2;
        if self.last_outbound.elapsed() >= ping_interval
            || self.last_inbound.elapsed() >= ping_interval
        {
            self.send(&Packet::PingReq)?;
            self.last_inbound = Instant::now();
            self.ping_outstanding = true;
        }

        Ok(())
    }

    /// Send DISCONNECT and close the socket
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            if let Err(e) = connection.write_packet(&Packet::Disconnect) {
                debug!("DISCONNECT not delivered: {}", e);
            }
        }
        self.drop_connection(ClientState::Disconnected);
        info!("🔌 Disconnected from broker");
    }

    fn send(&mut self, packet: &Packet) -> Result<(), ProtocolError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(ProtocolError::ConnectionClosed)?;

        if let Err(e) = connection.write_packet(packet) {
            self.drop_connection(ClientState::ConnectionLost);
            return Err(e);
        }
        self.last_outbound = Instant::now();
        Ok(())
    }

    fn drop_connection(&mut self, state: ClientState) {
        self.connection = None;
        self.ping_outstanding = false;
        self.state = state;
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if self.is_connected() {
            self.disconnect();
        }
    }
}
