//! Transport framing module
//!
//! The reliable channel is a TCP stream of length-prefixed frames, the
//! unreliable channel is UDP with one message per datagram:
//!
//! ```text
//! TCP frame:  [length: u32 LE][tag: u16 LE][payload ...]   length = 2 + payload
//! Datagram:   [tag: u16 LE][payload ...]
//! ```
//!
//! Tags from [`CONTROL_TAG_BASE`] upwards carry the connection handshake and
//! never reach the relay or the client's applier.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::error::{ProtocolError, RelayError};
use crate::net::buffer::{PacketBuffer, MAX_PACKET_SIZE};
use crate::protocol::{Identity, Message};

/// Largest frame body (tag + payload) accepted on either channel
pub const MAX_FRAME_SIZE: usize = MAX_PACKET_SIZE;

/// First tag reserved for transport control messages
pub const CONTROL_TAG_BASE: u16 = 0xFF00;

const WELCOME_TAG: u16 = 0xFF00;
const BIND_TAG: u16 = 0xFF01;
const BIND_ACK_TAG: u16 = 0xFF02;

/// Frame length prefix size
const LENGTH_SIZE: usize = 4;

/// Tag size
const TAG_SIZE: usize = 2;

/// Whether a tag belongs to the transport handshake
pub fn is_control_tag(tag: u16) -> bool {
    tag >= CONTROL_TAG_BASE
}

/// Handshake messages exchanged before a connection joins the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Server -> client (TCP): your identity and the token to bind your datagrams with
    Welcome { identity: Identity, token: u32 },
    /// Client -> server (UDP): datagrams from this address belong to `identity`
    Bind { identity: Identity, token: u32 },
    /// Server -> client (TCP): datagram binding accepted
    BindAck,
}

impl Control {
    pub fn to_message(&self) -> Message {
        let mut buffer = PacketBuffer::with_capacity(8);
        let tag = match *self {
            Control::Welcome { identity, token } => {
                buffer.write_u16_le(identity);
                buffer.write_u32_le(token);
                WELCOME_TAG
            }
            Control::Bind { identity, token } => {
                buffer.write_u16_le(identity);
                buffer.write_u32_le(token);
                BIND_TAG
            }
            Control::BindAck => BIND_ACK_TAG,
        };
        Message::new(tag, buffer.freeze())
    }

    /// Decode a control message; `Ok(None)` if the tag is not a control tag
    pub fn decode(message: &Message) -> Result<Option<Self>, ProtocolError> {
        if !is_control_tag(message.tag()) {
            return Ok(None);
        }

        let mut reader = PacketBuffer::from_bytes(message.payload());
        let control = match message.tag() {
            WELCOME_TAG => {
                reader.ensure(6)?;
                Control::Welcome {
                    identity: reader.read_u16_le()?,
                    token: reader.read_u32_le()?,
                }
            }
            BIND_TAG => {
                reader.ensure(6)?;
                Control::Bind {
                    identity: reader.read_u16_le()?,
                    token: reader.read_u32_le()?,
                }
            }
            BIND_ACK_TAG => Control::BindAck,
            other => return Err(ProtocolError::UnknownTag(other)),
        };
        Ok(Some(control))
    }
}

/// Length-prefixed frame codec for the reliable channel
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, RelayError> {
        if src.len() < LENGTH_SIZE {
            return Ok(None);
        }

        let mut prefix = &src[..LENGTH_SIZE];
        let length = prefix.get_u32_le() as usize;

        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            }
            .into());
        }
        if length < TAG_SIZE {
            return Err(ProtocolError::MalformedMessage {
                needed: TAG_SIZE,
                remaining: length,
            }
            .into());
        }

        if src.len() < LENGTH_SIZE + length {
            src.reserve(LENGTH_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_SIZE);
        let mut body = src.split_to(length);
        let tag = body.get_u16_le();
        Ok(Some(Message::new(tag, body.freeze())))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = RelayError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), RelayError> {
        let length = TAG_SIZE + item.payload().len();
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            }
            .into());
        }

        dst.reserve(LENGTH_SIZE + length);
        dst.put_u32_le(length as u32);
        dst.put_u16_le(item.tag());
        dst.extend_from_slice(item.payload());
        Ok(())
    }
}

/// Encode a message as a single datagram
pub fn encode_datagram(message: &Message) -> Bytes {
    let mut datagram = BytesMut::with_capacity(TAG_SIZE + message.payload().len());
    datagram.put_u16_le(message.tag());
    datagram.extend_from_slice(message.payload());
    datagram.freeze()
}

/// Drain a reliable queue onto a framed stream until the queue closes.
///
/// A message that cannot be encoded is logged and skipped; the stream stays
/// open. Any other write error ends the writer.
pub async fn write_frames<S>(mut sink: S, mut outbound: mpsc::Receiver<Message>, identity: Identity)
where
    S: Sink<Message, Error = RelayError> + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let tag = message.tag();
        match sink.send(message).await {
            Ok(()) => {}
            Err(RelayError::Protocol(e)) => {
                warn!(identity = identity, tag = tag, error = %e, "Skipping unencodable frame");
            }
            Err(e) => {
                debug!(identity = identity, error = %e, "Reliable write failed");
                return;
            }
        }
    }

    if let Err(e) = sink.close().await {
        trace!(identity = identity, error = %e, "Error closing reliable stream");
    }
    trace!(identity = identity, "Writer finished");
}

/// Decode a single datagram into a message
pub fn decode_datagram(datagram: &[u8]) -> Result<Message, ProtocolError> {
    if datagram.len() < TAG_SIZE {
        return Err(ProtocolError::MalformedMessage {
            needed: TAG_SIZE,
            remaining: datagram.len(),
        });
    }
    let mut reader = datagram;
    let tag = reader.get_u16_le();
    Ok(Message::new(tag, Bytes::copy_from_slice(reader)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ChatRequest, Packet};
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[test]
    fn test_frame_layout() {
        let message = ChatRequest {
            text: "hi".to_string(),
        }
        .to_message();

        let mut dst = BytesMut::new();
        MessageCodec.encode(message, &mut dst).unwrap();

        assert_eq!(
            &dst[..],
            &[8, 0, 0, 0, 2, 0, 2, 0, 0, 0, b'h', b'i']
        );
    }

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let message = ChatRequest {
            text: "partial".to_string(),
        }
        .to_message();
        let mut encoded = BytesMut::new();
        MessageCodec.encode(message.clone(), &mut encoded).unwrap();

        let mut src = BytesMut::from(&encoded[..3]);
        assert_eq!(MessageCodec.decode(&mut src).unwrap(), None);

        src.extend_from_slice(&encoded[3..encoded.len() - 1]);
        assert_eq!(MessageCodec.decode(&mut src).unwrap(), None);

        src.extend_from_slice(&encoded[encoded.len() - 1..]);
        assert_eq!(MessageCodec.decode(&mut src).unwrap(), Some(message));
        assert!(src.is_empty());
    }

    #[test]
    fn test_decoder_splits_back_to_back_frames() {
        let first = Control::BindAck.to_message();
        let second = Control::Welcome {
            identity: 4,
            token: 99,
        }
        .to_message();

        let mut src = BytesMut::new();
        MessageCodec.encode(first.clone(), &mut src).unwrap();
        MessageCodec.encode(second.clone(), &mut src).unwrap();

        assert_eq!(MessageCodec.decode(&mut src).unwrap(), Some(first));
        assert_eq!(MessageCodec.decode(&mut src).unwrap(), Some(second));
        assert_eq!(MessageCodec.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn test_decoder_rejects_oversized_frame() {
        let mut src = BytesMut::new();
        src.put_u32_le((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(
            MessageCodec.decode(&mut src),
            Err(RelayError::Protocol(ProtocolError::FrameTooLarge { .. }))
        ));
    }

    #[test]
    fn test_datagram_framing() {
        let message = Control::Bind {
            identity: 3,
            token: 0xAABBCCDD,
        }
        .to_message();
        let datagram = encode_datagram(&message);
        assert_eq!(&datagram[..2], &[0x01, 0xFF]);
        assert_eq!(decode_datagram(&datagram).unwrap(), message);

        assert!(decode_datagram(&[7]).unwrap_err().is_malformed());
    }

    #[test]
    fn test_control_decode() {
        let welcome = Control::Welcome {
            identity: 12,
            token: 7,
        };
        assert_eq!(
            Control::decode(&welcome.to_message()).unwrap(),
            Some(welcome)
        );

        let core = ChatRequest {
            text: String::new(),
        }
        .to_message();
        assert_eq!(Control::decode(&core).unwrap(), None);

        let truncated = Message::new(BIND_TAG, Bytes::from_static(&[1, 0]));
        assert!(Control::decode(&truncated).unwrap_err().is_malformed());

        let unknown = Message::new(0xFFFF, Bytes::new());
        assert_eq!(
            Control::decode(&unknown).unwrap_err(),
            ProtocolError::UnknownTag(0xFFFF)
        );
    }

    #[tokio::test]
    async fn test_framed_read_across_partial_reads() {
        let first = ChatRequest {
            text: "split across reads".to_string(),
        }
        .to_message();
        let second = Control::BindAck.to_message();

        let mut encoded = BytesMut::new();
        MessageCodec.encode(first.clone(), &mut encoded).unwrap();
        MessageCodec.encode(second.clone(), &mut encoded).unwrap();

        let stream = tokio_test::io::Builder::new()
            .read(&encoded[..3])
            .read(&encoded[3..9])
            .read(&encoded[9..])
            .build();
        let mut frames = FramedRead::new(stream, MessageCodec);

        assert_eq!(frames.next().await.unwrap().unwrap(), first);
        assert_eq!(frames.next().await.unwrap().unwrap(), second);
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_writer_skips_oversized_frame_and_keeps_going() {
        let oversized = Message::new(2, Bytes::from(vec![0u8; MAX_FRAME_SIZE]));
        let after = Control::BindAck.to_message();

        let mut expected = BytesMut::new();
        MessageCodec.encode(after.clone(), &mut expected).unwrap();

        // Only the second frame may reach the stream
        let stream = tokio_test::io::Builder::new().write(&expected).build();
        let (tx, rx) = mpsc::channel(4);
        tx.send(oversized).await.unwrap();
        tx.send(after).await.unwrap();
        drop(tx);

        write_frames(FramedWrite::new(stream, MessageCodec), rx, 1).await;
    }
}
