//! Packet definitions module
//!
//! Defines the message tags, the message envelope and the payload of every
//! message kind, together with the reliability mode each kind travels on.
//!
//! All numeric fields are little-endian and fixed-width, strings are
//! length-prefixed UTF-8, and nothing is padded.

use bytes::Bytes;
use glam::Vec3;

use crate::error::ProtocolError;
use crate::net::buffer::{PacketBuffer, MAX_PACKET_SIZE};
use crate::protocol::Identity;

/// Message tag, fixed at build time on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Tag {
    Spawn = 0,
    Movement = 1,
    Chat = 2,
    Disconnect = 3,
}

impl Tag {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Tag::Spawn),
            1 => Some(Tag::Movement),
            2 => Some(Tag::Chat),
            3 => Some(Tag::Disconnect),
            _ => None,
        }
    }

    /// Delivery quality for this message kind.
    ///
    /// Spawn, Chat and Disconnect are structural and must not be lost.
    /// Movement is continuously superseded, so it goes unreliable.
    pub fn send_mode(self) -> SendMode {
        match self {
            Tag::Movement => SendMode::Unreliable,
            Tag::Spawn | Tag::Chat | Tag::Disconnect => SendMode::Reliable,
        }
    }
}

/// Delivery quality offered by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendMode {
    /// Ordered, never dropped
    Reliable,
    /// May be dropped or reordered
    Unreliable,
}

/// Immutable message envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    tag: u16,
    payload: Bytes,
}

impl Message {
    pub fn new(tag: u16, payload: Bytes) -> Self {
        Self { tag, payload }
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The known tag of this message, if any
    pub fn known_tag(&self) -> Result<Tag, ProtocolError> {
        Tag::from_u16(self.tag).ok_or(ProtocolError::UnknownTag(self.tag))
    }

    fn reader(&self) -> PacketBuffer {
        PacketBuffer::from_bytes(&self.payload)
    }
}

/// A payload with a fixed tag and field layout
pub trait Packet: Sized {
    /// The tag this payload travels under
    const TAG: Tag;

    /// Write the fields in wire order
    fn encode(&self, buffer: &mut PacketBuffer);

    /// Read the fields in wire order
    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError>;

    /// Delivery quality for this payload
    fn send_mode() -> SendMode {
        Self::TAG.send_mode()
    }

    /// Build a fresh envelope carrying this payload
    fn to_message(&self) -> Message {
        let mut buffer = PacketBuffer::with_capacity(32);
        self.encode(&mut buffer);
        Message::new(Self::TAG.as_u16(), buffer.freeze())
    }
}

// ============ Server -> Client ============

/// A player entered the world (identity, x, y, z)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPacket {
    pub identity: Identity,
    pub position: Vec3,
}

impl Packet for SpawnPacket {
    const TAG: Tag = Tag::Spawn;

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_u16_le(self.identity);
        buffer.write_vec3(self.position);
    }

    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buffer.ensure(14)?;
        Ok(Self {
            identity: buffer.read_u16_le()?,
            position: buffer.read_vec3()?,
        })
    }
}

/// Relayed movement of another player (identity, x, y, z, yaw)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementBroadcast {
    pub identity: Identity,
    pub position: Vec3,
    pub yaw: f32,
}

impl Packet for MovementBroadcast {
    const TAG: Tag = Tag::Movement;

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_u16_le(self.identity);
        buffer.write_vec3(self.position);
        buffer.write_f32_le(self.yaw);
    }

    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buffer.ensure(18)?;
        Ok(Self {
            identity: buffer.read_u16_le()?,
            position: buffer.read_vec3()?,
            yaw: buffer.read_f32_le()?,
        })
    }
}

/// Chat line with its sender attached (sender, text)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatBroadcast {
    pub sender: Identity,
    pub text: String,
}

impl Packet for ChatBroadcast {
    const TAG: Tag = Tag::Chat;

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_u16_le(self.sender);
        buffer.write_string(&self.text);
    }

    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buffer.ensure(6)?;
        Ok(Self {
            sender: buffer.read_u16_le()?,
            text: buffer.read_string()?,
        })
    }
}

/// A player left (identity)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectPacket {
    pub identity: Identity,
}

impl Packet for DisconnectPacket {
    const TAG: Tag = Tag::Disconnect;

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_u16_le(self.identity);
    }

    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        Ok(Self {
            identity: buffer.read_u16_le()?,
        })
    }
}

// ============ Client -> Server ============

/// The sender's own movement (x, y, z, yaw); the sender is implied by the connection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementUpdate {
    pub position: Vec3,
    pub yaw: f32,
}

impl Packet for MovementUpdate {
    const TAG: Tag = Tag::Movement;

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_vec3(self.position);
        buffer.write_f32_le(self.yaw);
    }

    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        buffer.ensure(16)?;
        Ok(Self {
            position: buffer.read_vec3()?,
            yaw: buffer.read_f32_le()?,
        })
    }
}

/// Longest chat text in bytes. The relayed broadcast (tag, sender, length
/// prefix, text) must still fit in one frame.
pub const MAX_CHAT_BYTES: usize = MAX_PACKET_SIZE - 2 - 2 - 4;

/// Chat text submitted by the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub text: String,
}

impl Packet for ChatRequest {
    const TAG: Tag = Tag::Chat;

    fn encode(&self, buffer: &mut PacketBuffer) {
        buffer.write_string(&self.text);
    }

    fn decode(buffer: &mut PacketBuffer) -> Result<Self, ProtocolError> {
        let text = buffer.read_string()?;
        if text.len() > MAX_CHAT_BYTES {
            return Err(ProtocolError::ChatTooLong {
                len: text.len(),
                max: MAX_CHAT_BYTES,
            });
        }
        Ok(Self { text })
    }
}

// ============ Direction-typed messages ============

/// Messages a client sends to the relay
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Movement(MovementUpdate),
    Chat(ChatRequest),
}

impl ClientMessage {
    /// Decode an envelope received from a client
    pub fn decode(message: &Message) -> Result<Self, ProtocolError> {
        let mut reader = message.reader();
        match message.known_tag()? {
            Tag::Movement => Ok(Self::Movement(MovementUpdate::decode(&mut reader)?)),
            Tag::Chat => Ok(Self::Chat(ChatRequest::decode(&mut reader)?)),
            Tag::Spawn | Tag::Disconnect => Err(ProtocolError::UnknownTag(message.tag())),
        }
    }

    pub fn to_message(&self) -> Message {
        match self {
            Self::Movement(packet) => packet.to_message(),
            Self::Chat(packet) => packet.to_message(),
        }
    }

    pub fn send_mode(&self) -> SendMode {
        match self {
            Self::Movement(_) => MovementUpdate::send_mode(),
            Self::Chat(_) => ChatRequest::send_mode(),
        }
    }
}

/// Messages the relay sends to clients
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Spawn(SpawnPacket),
    Movement(MovementBroadcast),
    Chat(ChatBroadcast),
    Disconnect(DisconnectPacket),
}

impl ServerMessage {
    /// Decode an envelope received from the relay
    pub fn decode(message: &Message) -> Result<Self, ProtocolError> {
        let mut reader = message.reader();
        match message.known_tag()? {
            Tag::Spawn => Ok(Self::Spawn(SpawnPacket::decode(&mut reader)?)),
            Tag::Movement => Ok(Self::Movement(MovementBroadcast::decode(&mut reader)?)),
            Tag::Chat => Ok(Self::Chat(ChatBroadcast::decode(&mut reader)?)),
            Tag::Disconnect => Ok(Self::Disconnect(DisconnectPacket::decode(&mut reader)?)),
        }
    }

    pub fn to_message(&self) -> Message {
        match self {
            Self::Spawn(packet) => packet.to_message(),
            Self::Movement(packet) => packet.to_message(),
            Self::Chat(packet) => packet.to_message(),
            Self::Disconnect(packet) => packet.to_message(),
        }
    }

    pub fn send_mode(&self) -> SendMode {
        self.tag().send_mode()
    }

    pub fn tag(&self) -> Tag {
        match self {
            Self::Spawn(_) => Tag::Spawn,
            Self::Movement(_) => Tag::Movement,
            Self::Chat(_) => Tag::Chat,
            Self::Disconnect(_) => Tag::Disconnect,
        }
    }
}
