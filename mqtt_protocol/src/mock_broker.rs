use crate::protocol::{ConnectReturnCode, Connection, Packet, ProtocolError};
use log::{debug, error, info, warn};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Configuration for the mock broker
#[derive(Debug, Clone)]
pub struct MockBrokerConfig {
    /// Address to bind the TCP server to (use "127.0.0.1:0" for random port)
    pub bind_address: String,
    /// Number of CONNECT attempts answered with "server unavailable" before accepting
    pub refuse_first: usize,
}

impl Default for MockBrokerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            refuse_first: 0,
        }
    }
}

/// A message received by the mock broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub client_id: String,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl ReceivedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

#[derive(Debug, Default)]
struct BrokerShared {
    messages: Mutex<Vec<ReceivedMessage>>,
    connect_attempts: AtomicUsize,
    pings: AtomicUsize,
}

/// Minimal single-purpose broker: accepts QoS 0 publishes and records them
pub struct MockBroker {
    config: MockBrokerConfig,
}

impl MockBroker {
    pub fn new(config: MockBrokerConfig) -> Self {
        Self { config }
    }

    /// Start accepting clients in a background thread
    pub fn start_background(self) -> Result<MockBrokerHandle, ProtocolError> {
        let listener = TcpListener::bind(&self.config.bind_address)?;
        let port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;

        info!("🧪 Mock broker listening on 127.0.0.1:{}", port);

        let should_stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(BrokerShared::default());
        let on_message: Arc<dyn Fn(&ReceivedMessage) + Send + Sync> = Arc::new(|_| {});

        let thread = {
            let should_stop = should_stop.clone();
            let shared = shared.clone();
            let refuse_first = self.config.refuse_first;
            thread::spawn(move || {
                Self::accept_loop(listener, should_stop, shared, refuse_first, on_message)
            })
        };

        Ok(MockBrokerHandle {
            port,
            should_stop,
            shared,
            thread: Some(thread),
        })
    }

    /// Run in the foreground, calling `on_message` for every publish
    pub fn run(
        self,
        on_message: impl Fn(&ReceivedMessage) + Send + Sync + 'static,
    ) -> Result<(), ProtocolError> {
        let listener = TcpListener::bind(&self.config.bind_address)?;
        listener.set_nonblocking(true)?;
        info!("🧪 Mock broker listening on {}", listener.local_addr()?);

        let should_stop = Arc::new(AtomicBool::new(false));
        {
            let should_stop = should_stop.clone();
            ctrlc::set_handler(move || should_stop.store(true, Ordering::SeqCst))
                .map_err(|e| ProtocolError::Io(std::io::Error::other(e.to_string())))?;
        }

        Self::accept_loop(
            listener,
            should_stop,
            Arc::new(BrokerShared::default()),
            self.config.refuse_first,
            Arc::new(on_message),
        );
        Ok(())
    }

    fn accept_loop(
        listener: TcpListener,
        should_stop: Arc<AtomicBool>,
        shared: Arc<BrokerShared>,
        refuse_first: usize,
        on_message: Arc<dyn Fn(&ReceivedMessage) + Send + Sync>,
    ) {
        while !should_stop.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    debug!("📡 Client connected from {}", addr);
                    let shared = shared.clone();
                    let should_stop = should_stop.clone();
                    let on_message = on_message.clone();
                    thread::spawn(move || {
                        if let Err(e) = Self::handle_client(
                            stream,
                            &shared,
                            &should_stop,
                            refuse_first,
                            on_message.as_ref(),
                        ) {
                            debug!("Client session ended: {}", e);
                        }
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    error!("❌ Accept error: {}", e);
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }
        info!("🛑 Mock broker stopped");
    }

    fn handle_client(
        stream: TcpStream,
        shared: &BrokerShared,
        should_stop: &AtomicBool,
        refuse_first: usize,
        on_message: &(dyn Fn(&ReceivedMessage) + Send + Sync),
    ) -> Result<(), ProtocolError> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(Duration::from_millis(100)))?;
        let mut connection = Connection::new(stream)?;
        let mut client_id = None;

        while !should_stop.load(Ordering::SeqCst) {
            let packet = match connection.read_packet() {
                Ok(packet) => packet,
                Err(ProtocolError::Io(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            };

            match packet {
                Packet::Connect(connect) => {
                    let attempt = shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt < refuse_first {
                        info!("🚫 Refusing CONNECT #{} from '{}'", attempt + 1, connect.client_id);
                        connection.write_packet(&Packet::ConnAck {
                            session_present: false,
                            code: ConnectReturnCode::ServerUnavailable,
                        })?;
                        return Ok(());
                    }
                    info!("🤝 CONNECT from '{}'", connect.client_id);
                    connection.write_packet(&Packet::ConnAck {
                        session_present: false,
                        code: ConnectReturnCode::Accepted,
                    })?;
                    client_id = Some(connect.client_id);
                }
                Packet::Publish { topic, payload, .. } => {
                    let Some(client_id) = client_id.clone() else {
                        warn!("⚠️ PUBLISH before CONNECT, closing");
                        return Ok(());
                    };
                    let message = ReceivedMessage {
                        client_id,
                        topic,
                        payload,
                    };
                    on_message(&message);
                    if let Ok(mut messages) = shared.messages.lock() {
                        messages.push(message);
                    }
                }
                Packet::PingReq => {
                    shared.pings.fetch_add(1, Ordering::SeqCst);
                    connection.write_packet(&Packet::PingResp)?;
                }
                Packet::Disconnect => {
                    debug!("👋 Client disconnected cleanly");
                    return Ok(());
                }
                other => {
                    warn!("⚠️ Unexpected packet from client: {:?}", other.packet_type());
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

/// Handle to a mock broker running in the background
pub struct MockBrokerHandle {
    pub port: u16,
    should_stop: Arc<AtomicBool>,
    shared: Arc<BrokerShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MockBrokerHandle {
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Snapshot of the messages published so far
    pub fn messages(&self) -> Vec<ReceivedMessage> {
        self.shared
            .messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` messages arrived, or the timeout elapses
    pub fn wait_for_messages(&self, count: usize, timeout: Duration) -> Vec<ReceivedMessage> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let messages = self.messages();
            if messages.len() >= count || std::time::Instant::now() >= deadline {
                return messages;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Wait until at least `count` PINGREQs arrived, or the timeout elapses
    pub fn wait_for_pings(&self, count: usize, timeout: Duration) -> usize {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let pings = self.pings();
            if pings >= count || std::time::Instant::now() >= deadline {
                return pings;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MockBrokerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
