//! Protocol module
//!
//! This module contains the wire protocol shared by the relay and its clients:
//! - Message tags and the reliability mode of each kind
//! - Payload layouts and their encode/decode rules
//! - Transform samples and angle helpers

pub mod packets;
pub mod transform;

pub use packets::{
    ChatBroadcast, ChatRequest, ClientMessage, DisconnectPacket, Message, MovementBroadcast,
    MovementUpdate, Packet, SendMode, ServerMessage, SpawnPacket, Tag, MAX_CHAT_BYTES,
};
pub use transform::{delta_angle, wrap_degrees, Transform};

/// Connection identity assigned by the transport, unique while connected
pub type Identity = u16;
