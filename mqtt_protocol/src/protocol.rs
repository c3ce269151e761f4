use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use thiserror::Error;

/// Largest packet accepted from the wire (remaining length)
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Protocol level byte for MQTT 3.1.1
pub const PROTOCOL_LEVEL: u8 = 4;

const PROTOCOL_NAME: &str = "MQTT";

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Malformed packet: {0}")]
    Malformed(&'static str),

    #[error("Invalid string encoding")]
    InvalidString,

    #[error("Unsupported QoS level: {0}")]
    UnsupportedQos(u8),

    #[error("Connection refused by broker: {0:?}")]
    Refused(ConnectReturnCode),

    #[error("Connection closed by peer")]
    ConnectionClosed,
}

/// Control packet types (upper nibble of the fixed header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    // Client → Broker
    Connect = 1,
    Publish = 3,
    PingReq = 12,
    Disconnect = 14,

    // Broker → Client
    ConnAck = 2,
    PingResp = 13,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::ConnAck),
            3 => Ok(PacketType::Publish),
            12 => Ok(PacketType::PingReq),
            13 => Ok(PacketType::PingResp),
            14 => Ok(PacketType::Disconnect),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

/// CONNACK return codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernameOrPassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadUsernameOrPassword),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            _ => Err(ProtocolError::Malformed("unknown CONNACK return code")),
        }
    }
}

/// CONNECT payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

/// Protocol packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck {
        session_present: bool,
        code: ConnectReturnCode,
    },
    /// QoS 0 only: no packet identifier, no acknowledgement
    Publish {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Get the packet type for this packet
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck { .. } => PacketType::ConnAck,
            Packet::Publish { .. } => PacketType::Publish,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    fn flags(&self) -> u8 {
        match self {
            Packet::Publish { retain, .. } => u8::from(*retain),
            _ => 0,
        }
    }

    /// Serialize packet to bytes: [type|flags][remaining length][body]
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut body = Vec::new();
        match self {
            Packet::Connect(connect) => {
                write_str(&mut body, PROTOCOL_NAME)?;
                body.push(PROTOCOL_LEVEL);

                let mut connect_flags = 0u8;
                if connect.clean_session {
                    connect_flags |= 0x02;
                }
                if connect.password.is_some() {
                    connect_flags |= 0x40;
                }
                if connect.username.is_some() {
                    connect_flags |= 0x80;
                }
                body.push(connect_flags);
                body.extend_from_slice(&connect.keep_alive_secs.to_be_bytes());

                write_str(&mut body, &connect.client_id)?;
                if let Some(username) = &connect.username {
                    write_str(&mut body, username)?;
                }
                if let Some(password) = &connect.password {
                    write_binary(&mut body, password)?;
                }
            }
            Packet::ConnAck {
                session_present,
                code,
            } => {
                body.push(u8::from(*session_present));
                body.push(*code as u8);
            }
            Packet::Publish { topic, payload, .. } => {
                write_str(&mut body, topic)?;
                body.extend_from_slice(payload);
            }
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
        }

        if body.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge(body.len()));
        }

        let mut bytes = Vec::with_capacity(body.len() + 5);
        bytes.push(((self.packet_type() as u8) << 4) | self.flags());
        encode_remaining_length(body.len(), &mut bytes);
        bytes.extend_from_slice(&body);

        Ok(bytes)
    }

    /// Deserialize a packet from its fixed-header byte and body
    pub fn from_bytes(header: u8, body: &[u8]) -> Result<Self, ProtocolError> {
        let packet_type = PacketType::try_from(header >> 4)?;
        let flags = header & 0x0F;
        let mut cursor = body;

        match packet_type {
            PacketType::Connect => {
                let name = read_str(&mut cursor)?;
                if name != PROTOCOL_NAME {
                    return Err(ProtocolError::Malformed("unexpected protocol name"));
                }
                let level = read_u8(&mut cursor)?;
                if level != PROTOCOL_LEVEL {
                    return Err(ProtocolError::Malformed("unsupported protocol level"));
                }
                let connect_flags = read_u8(&mut cursor)?;
                let keep_alive_secs = read_u16(&mut cursor)?;
                let client_id = read_str(&mut cursor)?;
                // Will topic/message are never sent by this client
                if connect_flags & 0x04 != 0 {
                    return Err(ProtocolError::Malformed("will messages are not supported"));
                }
                let username = if connect_flags & 0x80 != 0 {
                    Some(read_str(&mut cursor)?)
                } else {
                    None
                };
                let password = if connect_flags & 0x40 != 0 {
                    Some(read_binary(&mut cursor)?)
                } else {
                    None
                };
                Ok(Packet::Connect(Connect {
                    client_id,
                    keep_alive_secs,
                    clean_session: connect_flags & 0x02 != 0,
                    username,
                    password,
                }))
            }
            PacketType::ConnAck => {
                let ack_flags = read_u8(&mut cursor)?;
                let code = ConnectReturnCode::try_from(read_u8(&mut cursor)?)?;
                Ok(Packet::ConnAck {
                    session_present: ack_flags & 0x01 != 0,
                    code,
                })
            }
            PacketType::Publish => {
                let qos = (flags >> 1) & 0x03;
                if qos != 0 {
                    return Err(ProtocolError::UnsupportedQos(qos));
                }
                let topic = read_str(&mut cursor)?;
                Ok(Packet::Publish {
                    topic,
                    payload: cursor.to_vec(),
                    retain: flags & 0x01 != 0,
                })
            }
            PacketType::PingReq => Ok(Packet::PingReq),
            PacketType::PingResp => Ok(Packet::PingResp),
            PacketType::Disconnect => Ok(Packet::Disconnect),
        }
    }
}

/// Encode the variable-length "remaining length" field (1-4 bytes)
pub fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// Decode the remaining length field from a reader
pub fn decode_remaining_length<R: Read>(reader: &mut R) -> Result<usize, ProtocolError> {
    let mut multiplier = 1usize;
    let mut value = 0usize;

    for _ in 0..4 {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        value += (byte[0] & 0x7F) as usize * multiplier;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        multiplier *= 128;
    }

    Err(ProtocolError::InvalidRemainingLength)
}

fn write_str(out: &mut Vec<u8>, value: &str) -> Result<(), ProtocolError> {
    write_binary(out, value.as_bytes())
}

fn write_binary(out: &mut Vec<u8>, value: &[u8]) -> Result<(), ProtocolError> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::PacketTooLarge(value.len()))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(value);
    Ok(())
}

fn read_u8(cursor: &mut &[u8]) -> Result<u8, ProtocolError> {
    let (&byte, rest) = cursor
        .split_first()
        .ok_or(ProtocolError::Malformed("truncated packet"))?;
    *cursor = rest;
    Ok(byte)
}

fn read_u16(cursor: &mut &[u8]) -> Result<u16, ProtocolError> {
    let hi = read_u8(cursor)?;
    let lo = read_u8(cursor)?;
    Ok(u16::from_be_bytes([hi, lo]))
}

fn read_binary(cursor: &mut &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = read_u16(cursor)? as usize;
    if cursor.len() < len {
        return Err(ProtocolError::Malformed("truncated packet"));
    }
    let (value, rest) = cursor.split_at(len);
    *cursor = rest;
    Ok(value.to_vec())
}

fn read_str(cursor: &mut &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(read_binary(cursor)?).map_err(|_| ProtocolError::InvalidString)
}

/// TCP connection wrapper for the broker protocol
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    /// Create a new connection from a TCP stream
    pub fn new(stream: TcpStream) -> Result<Self, ProtocolError> {
        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Connection {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
        })
    }

    /// Read a packet from the connection (blocking, subject to the stream's read timeout)
    pub fn read_packet(&mut self) -> Result<Packet, ProtocolError> {
        let mut header = [0u8; 1];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::ConnectionClosed)
            }
            Err(e) => return Err(e.into()),
        }

        let remaining = decode_remaining_length(&mut self.reader)?;
        if remaining > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge(remaining));
        }

        let mut body = vec![0u8; remaining];
        if remaining > 0 {
            self.reader.read_exact(&mut body)?;
        }

        Packet::from_bytes(header[0], &body)
    }

    /// Write a packet to the connection
    pub fn write_packet(&mut self, packet: &Packet) -> Result<(), ProtocolError> {
        let bytes = packet.to_bytes()?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Check, without blocking, whether inbound bytes are waiting
    pub fn has_pending(&mut self) -> Result<bool, ProtocolError> {
        if !self.reader.buffer().is_empty() {
            return Ok(true);
        }

        self.reader.get_ref().set_nonblocking(true)?;
        let peeked = self.reader.fill_buf().map(|buf| buf.len());
        self.reader.get_ref().set_nonblocking(false)?;

        match peeked {
            Ok(0) => Err(ProtocolError::ConnectionClosed),
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Peer address, for logging
    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.reader.get_ref().peer_addr().ok()
    }
}
