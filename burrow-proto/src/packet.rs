//! The packet codec: a fixed 11-byte big-endian header followed by the chunk payload.
//!
//! Wire layout: `event:u8, connection_id:u16, message_id:u16, chunk_index:u16,
//! total_chunks:u16, payload_length:u16`, then `payload_length` raw bytes.

use std::fmt;

use crate::{u8_repr_enum::U8ReprEnum, MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE};

/// The type of a packet, driving how the multiplexer handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketEvent {
    /// Carries a slice of tunneled TCP data.
    Data,

    /// Signals that the sending side tore down its end of the logical connection.
    Close,

    /// Signals that a new logical connection was bound to the carried connection id.
    Connect,
}

impl U8ReprEnum for PacketEvent {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Data),
            1 => Some(Self::Close),
            2 => Some(Self::Connect),
            _ => None,
        }
    }

    fn into_u8(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Close => 1,
            Self::Connect => 2,
        }
    }
}

impl fmt::Display for PacketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "DATA"),
            Self::Close => write!(f, "CLOSE"),
            Self::Connect => write!(f, "CONNECT"),
        }
    }
}

/// The fixed-size header carried by every packet.
///
/// Constructed per chunk by the [`Chunker`](crate::chunk::Chunker) and consumed
/// immediately by [`Packet::encode`]; never persisted anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub event: PacketEvent,
    pub connection_id: u16,
    pub message_id: u16,
    pub chunk_index: u16,
    pub total_chunks: u16,
    pub payload_length: u16,
}

/// One wire packet: a header plus the payload bytes it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

/// The ways a packet can fail to encode or decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// The payload is longer than [`MAX_PAYLOAD_SIZE`], or the total chunk count is zero.
    InvalidPayload,

    /// The input is shorter than [`PACKET_HEADER_SIZE`].
    TooSmall,

    /// The header's declared payload length disagrees with the input's actual length.
    SizeMismatch,

    /// The event byte does not name any [`PacketEvent`].
    InvalidEvent(u8),

    /// The total chunk count is zero, or the chunk index is not below it.
    InvalidChunkCount,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPayload => write!(f, "Payload too long or chunk count zero"),
            Self::TooSmall => write!(f, "Input shorter than a packet header"),
            Self::SizeMismatch => write!(f, "Declared payload length disagrees with actual length"),
            Self::InvalidEvent(value) => write!(f, "Unknown event byte {value}"),
            Self::InvalidChunkCount => write!(f, "Chunk index or total chunk count out of range"),
        }
    }
}

impl Packet {
    /// Serializes this packet into a freshly allocated buffer.
    ///
    /// Fails with [`PacketError::InvalidPayload`] if the payload exceeds
    /// [`MAX_PAYLOAD_SIZE`], if the header's declared payload length disagrees with the
    /// payload's actual length, or if the total chunk count is zero.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE || self.header.total_chunks == 0 {
            return Err(PacketError::InvalidPayload);
        }

        if self.header.payload_length as usize != self.payload.len() {
            return Err(PacketError::InvalidPayload);
        }

        let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE + self.payload.len());
        buf.push(self.header.event.into_u8());
        buf.extend_from_slice(&self.header.connection_id.to_be_bytes());
        buf.extend_from_slice(&self.header.message_id.to_be_bytes());
        buf.extend_from_slice(&self.header.chunk_index.to_be_bytes());
        buf.extend_from_slice(&self.header.total_chunks.to_be_bytes());
        buf.extend_from_slice(&self.header.payload_length.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        Ok(buf)
    }

    /// Deserializes a packet from `buf`, which must contain exactly one packet.
    pub fn decode(buf: &[u8]) -> Result<Packet, PacketError> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(PacketError::TooSmall);
        }

        let event = PacketEvent::from_u8(buf[0]).ok_or(PacketError::InvalidEvent(buf[0]))?;
        let connection_id = u16::from_be_bytes([buf[1], buf[2]]);
        let message_id = u16::from_be_bytes([buf[3], buf[4]]);
        let chunk_index = u16::from_be_bytes([buf[5], buf[6]]);
        let total_chunks = u16::from_be_bytes([buf[7], buf[8]]);
        let payload_length = u16::from_be_bytes([buf[9], buf[10]]);

        if PACKET_HEADER_SIZE + payload_length as usize != buf.len() {
            return Err(PacketError::SizeMismatch);
        }

        if total_chunks == 0 || chunk_index >= total_chunks {
            return Err(PacketError::InvalidChunkCount);
        }

        Ok(Packet {
            header: PacketHeader {
                event,
                connection_id,
                message_id,
                chunk_index,
                total_chunks,
                payload_length,
            },
            payload: buf[PACKET_HEADER_SIZE..].to_vec(),
        })
    }
}
