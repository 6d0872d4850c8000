//! The chunker, which splits an arbitrary-length byte buffer into codec-ready packets.

use std::fmt;

use crate::{
    packet::{Packet, PacketEvent, PacketHeader},
    MAX_CHUNK_COUNT, MAX_PAYLOAD_SIZE,
};

/// The ways splitting a buffer into chunks can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    /// The buffer would require more than [`MAX_CHUNK_COUNT`] chunks.
    TooManyChunks,
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyChunks => write!(f, "Data requires more chunks than a message can carry"),
        }
    }
}

/// Splits byte buffers into packets for one connection identifier.
///
/// Each instance owns the private message-id counter for its connection, starting at 0
/// and wrapping around after 65,535. Message ids only need to stay unique for as long
/// as their chunks are in flight, so wraparound is harmless in practice. The counter
/// mutation is not synchronized; a chunker has a single owner.
pub struct Chunker {
    connection_id: u16,
    next_message_id: u16,
    max_payload: usize,
}

impl Chunker {
    /// Creates a chunker for `connection_id` using the protocol's payload ceiling.
    pub fn new(connection_id: u16) -> Self {
        Self::with_max_payload(connection_id, MAX_PAYLOAD_SIZE)
    }

    /// Creates a chunker with a smaller payload ceiling, for channels whose maximum
    /// message size is below the protocol's.
    ///
    /// # Panics
    /// Panics if `max_payload` is zero or larger than [`MAX_PAYLOAD_SIZE`].
    pub fn with_max_payload(connection_id: u16, max_payload: usize) -> Self {
        assert!(max_payload >= 1 && max_payload <= MAX_PAYLOAD_SIZE);

        Self {
            connection_id,
            next_message_id: 0,
            max_payload,
        }
    }

    /// The connection identifier this chunker stamps on every packet.
    pub fn connection_id(&self) -> u16 {
        self.connection_id
    }

    /// Splits `data` into packets carrying `event`, in increasing chunk index order.
    ///
    /// All produced packets share a freshly allocated message id and the same total
    /// chunk count. An empty buffer yields exactly one packet with a zero-length
    /// payload, which is how CONNECT and CLOSE signaling travels.
    pub fn split(&mut self, event: PacketEvent, data: &[u8]) -> Result<Vec<Packet>, ChunkError> {
        let total_chunks = data.len().div_ceil(self.max_payload).max(1);
        if total_chunks > MAX_CHUNK_COUNT {
            return Err(ChunkError::TooManyChunks);
        }

        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        let mut packets = Vec::with_capacity(total_chunks);
        for index in 0..total_chunks {
            let payload = match data.is_empty() {
                true => &[] as &[u8],
                false => {
                    let start = index * self.max_payload;
                    &data[start..data.len().min(start + self.max_payload)]
                }
            };

            packets.push(Packet {
                header: PacketHeader {
                    event,
                    connection_id: self.connection_id,
                    message_id,
                    chunk_index: index as u16,
                    total_chunks: total_chunks as u16,
                    payload_length: payload.len() as u16,
                },
                payload: payload.to_vec(),
            });
        }

        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChunkError, Chunker};
    use crate::packet::PacketEvent;

    #[test]
    fn test_empty_buffer_yields_one_chunk() {
        let mut chunker = Chunker::new(3);
        let packets = chunker.split(PacketEvent::Connect, &[]).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].header.total_chunks, 1);
        assert_eq!(packets[0].header.chunk_index, 0);
        assert_eq!(packets[0].header.connection_id, 3);
        assert!(packets[0].payload.is_empty());
    }

    #[test]
    fn test_boundary_sizes() {
        let mut chunker = Chunker::with_max_payload(0, 100);

        let packets = chunker.split(PacketEvent::Data, &[7u8; 100]).unwrap();
        assert_eq!(packets.len(), 1);

        let packets = chunker.split(PacketEvent::Data, &[7u8; 101]).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload.len(), 100);
        assert_eq!(packets[1].payload.len(), 1);

        let packets = chunker.split(PacketEvent::Data, &[7u8; 250]).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2].payload.len(), 50);
        for (index, packet) in packets.iter().enumerate() {
            assert_eq!(packet.header.chunk_index, index as u16);
            assert_eq!(packet.header.total_chunks, 3);
        }
    }

    #[test]
    fn test_boundary_at_protocol_ceiling() {
        let mut chunker = Chunker::new(1);

        let packets = chunker.split(PacketEvent::Data, &vec![0u8; crate::MAX_PAYLOAD_SIZE]).unwrap();
        assert_eq!(packets.len(), 1);

        let packets = chunker.split(PacketEvent::Data, &vec![0u8; crate::MAX_PAYLOAD_SIZE + 1]).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].payload.len(), 1);
    }

    #[test]
    fn test_message_id_increments_and_wraps() {
        let mut chunker = Chunker::new(0);

        for expected in 0..=65535u16 {
            let packets = chunker.split(PacketEvent::Data, b"x").unwrap();
            assert_eq!(packets[0].header.message_id, expected);
        }

        let packets = chunker.split(PacketEvent::Data, b"x").unwrap();
        assert_eq!(packets[0].header.message_id, 0);
    }

    #[test]
    fn test_chunks_share_message_id() {
        let mut chunker = Chunker::with_max_payload(9, 10);
        let packets = chunker.split(PacketEvent::Data, &[1u8; 35]).unwrap();
        assert_eq!(packets.len(), 4);
        assert!(packets.iter().all(|p| p.header.message_id == 0));
    }

    #[test]
    fn test_too_many_chunks() {
        let mut chunker = Chunker::with_max_payload(0, 1);
        let result = chunker.split(PacketEvent::Data, &[0u8; 65536]);
        assert_eq!(result, Err(ChunkError::TooManyChunks));
    }
}
