//! The reassembler, which accumulates packets back into complete messages.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::packet::{Packet, PacketEvent};

/// How long an incomplete message is kept around before it is given up on.
pub const DEFAULT_ENTRY_TIMEOUT: Duration = Duration::from_secs(60);

/// A fully reconstructed message, as originally handed to a chunker on the other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub event: PacketEvent,
    pub connection_id: u16,
    pub data: Vec<u8>,
}

struct ReassemblyEntry {
    chunks: HashMap<u16, Vec<u8>>,
    total_chunks: u16,
    created_at: Instant,
}

/// Accumulates chunks for all connection identifiers at once, keyed by
/// (connection id, message id).
///
/// Chunks may arrive in any order; reconstruction is driven by the explicit chunk
/// index, never by arrival order. Entries that have not completed within the timeout
/// are pruned lazily before each new packet is processed, which bounds memory under
/// lossy or adversarial peers. Purely synchronous bookkeeping; never blocks.
pub struct Reassembler {
    entries: HashMap<(u16, u16), ReassemblyEntry>,
    entry_timeout: Duration,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_ENTRY_TIMEOUT)
    }

    /// Creates a reassembler that gives up on incomplete messages after `entry_timeout`.
    pub fn with_timeout(entry_timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            entry_timeout,
        }
    }

    /// The amount of messages currently pending completion.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Feeds one packet in, returning the reconstructed message if this packet
    /// completed one.
    ///
    /// Re-delivery of an already-stored chunk index is ignored, so duplicated packets
    /// can neither complete a message twice nor corrupt a pending one. A packet whose
    /// declared total disagrees with its key's existing entry discards that entry and
    /// reseeds it, treating the packet as the start of a completely new message.
    pub fn ingest(&mut self, packet: Packet) -> Option<Message> {
        self.prune();

        let header = packet.header;
        if header.chunk_index >= header.total_chunks {
            return None;
        }

        // Single-chunk messages never touch the map. This is the path every CONNECT,
        // CLOSE and small DATA message takes.
        if header.total_chunks == 1 {
            return Some(Message {
                event: header.event,
                connection_id: header.connection_id,
                data: packet.payload,
            });
        }

        let key = (header.connection_id, header.message_id);
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| ReassemblyEntry::new(header.total_chunks));

        if entry.total_chunks != header.total_chunks {
            *entry = ReassemblyEntry::new(header.total_chunks);
        }

        entry.chunks.entry(header.chunk_index).or_insert(packet.payload);

        if entry.chunks.len() == entry.total_chunks as usize {
            let entry = self.entries.remove(&key).unwrap();
            let mut data = Vec::with_capacity(entry.chunks.values().map(Vec::len).sum());
            for index in 0..entry.total_chunks {
                data.extend_from_slice(&entry.chunks[&index]);
            }

            return Some(Message {
                event: header.event,
                connection_id: header.connection_id,
                data,
            });
        }

        None
    }

    fn prune(&mut self) {
        let timeout = self.entry_timeout;
        self.entries.retain(|_, entry| entry.created_at.elapsed() < timeout);
    }
}

impl ReassemblyEntry {
    fn new(total_chunks: u16) -> Self {
        Self {
            chunks: HashMap::new(),
            total_chunks,
            created_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Message, Reassembler};
    use crate::{
        chunk::Chunker,
        packet::{Packet, PacketEvent},
        MAX_PAYLOAD_SIZE,
    };

    fn split(connection_id: u16, event: PacketEvent, data: &[u8], max_payload: usize) -> Vec<Packet> {
        Chunker::with_max_payload(connection_id, max_payload).split(event, data).unwrap()
    }

    #[test]
    fn test_single_chunk_fast_path() {
        let mut reassembler = Reassembler::new();
        let packets = split(1, PacketEvent::Data, b"hello", MAX_PAYLOAD_SIZE);
        assert_eq!(packets.len(), 1);

        let message = reassembler.ingest(packets.into_iter().next().unwrap()).unwrap();
        assert_eq!(
            message,
            Message {
                event: PacketEvent::Data,
                connection_id: 1,
                data: b"hello".to_vec(),
            }
        );
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_multi_chunk_any_order() {
        let data: Vec<u8> = (0..2500u32).map(|v| v as u8).collect();
        let packets = split(9, PacketEvent::Data, &data, 100);
        assert_eq!(packets.len(), 25);

        // A fixed stride walks the chunks in a thoroughly shuffled order.
        let mut reassembler = Reassembler::new();
        let mut completed = None;
        for step in 0..25usize {
            let index = (step * 7) % 25;
            let result = reassembler.ingest(packets[index].clone());
            match step {
                24 => completed = result,
                _ => assert_eq!(result, None),
            }
        }

        let message = completed.unwrap();
        assert_eq!(message.connection_id, 9);
        assert_eq!(message.data, data);
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let data = [3u8; 300];
        let packets = split(2, PacketEvent::Data, &data, 100);
        assert_eq!(packets.len(), 3);

        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.ingest(packets[0].clone()), None);
        assert_eq!(reassembler.ingest(packets[0].clone()), None);
        assert_eq!(reassembler.ingest(packets[1].clone()), None);
        assert_eq!(reassembler.ingest(packets[1].clone()), None);

        let message = reassembler.ingest(packets[2].clone()).unwrap();
        assert_eq!(message.data, data.to_vec());

        // The message completed and its entry is gone; a late duplicate starts a fresh
        // entry rather than completing anything a second time.
        assert_eq!(reassembler.ingest(packets[2].clone()), None);
        assert_eq!(reassembler.pending(), 1);
    }

    #[test]
    fn test_incomplete_message_stays_pending() {
        let data = [1u8; 1000];
        let packets = split(5, PacketEvent::Data, &data, 100);
        let total = packets.len();

        let mut reassembler = Reassembler::new();
        let mut packets = packets.into_iter();
        for packet in packets.by_ref().take(total - 1) {
            assert_eq!(reassembler.ingest(packet), None);
        }

        assert_eq!(reassembler.pending(), 1);

        // The entry held the first total - 1 chunks: the one missing chunk completes it.
        let message = reassembler.ingest(packets.next().unwrap()).unwrap();
        assert_eq!(message.data, data.to_vec());
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_total_mismatch_restarts_entry() {
        let mut reassembler = Reassembler::new();

        let packets = split(4, PacketEvent::Data, &[8u8; 300], 100);
        assert_eq!(reassembler.ingest(packets[0].clone()), None);
        assert_eq!(reassembler.ingest(packets[1].clone()), None);

        // Same key, different declared total: the stale entry is discarded and the new
        // packet seeds a fresh one.
        let mut restarted = split(4, PacketEvent::Data, &[9u8; 150], 100);
        for packet in &mut restarted {
            packet.header.message_id = packets[0].header.message_id;
        }

        assert_eq!(reassembler.ingest(restarted[0].clone()), None);
        let message = reassembler.ingest(restarted[1].clone()).unwrap();
        assert_eq!(message.data, vec![9u8; 150]);
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_stale_entries_are_pruned() {
        let mut reassembler = Reassembler::with_timeout(Duration::from_millis(10));

        let packets = split(1, PacketEvent::Data, &[0u8; 300], 100);
        assert_eq!(reassembler.ingest(packets[0].clone()), None);
        assert_eq!(reassembler.pending(), 1);

        std::thread::sleep(Duration::from_millis(20));

        // The next ingest prunes the stale entry before processing, so the old chunks
        // can no longer contribute to a completion.
        let other = split(2, PacketEvent::Data, b"z", 100);
        reassembler.ingest(other[0].clone()).unwrap();
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_connections_are_isolated() {
        let mut reassembler = Reassembler::new();

        let first = split(10, PacketEvent::Data, &[1u8; 200], 100);
        let second = split(11, PacketEvent::Data, &[2u8; 200], 100);

        assert_eq!(reassembler.ingest(first[0].clone()), None);
        assert_eq!(reassembler.ingest(second[0].clone()), None);
        assert_eq!(reassembler.pending(), 2);

        let message = reassembler.ingest(second[1].clone()).unwrap();
        assert_eq!(message.connection_id, 11);
        assert_eq!(message.data, vec![2u8; 200]);

        let message = reassembler.ingest(first[1].clone()).unwrap();
        assert_eq!(message.connection_id, 10);
        assert_eq!(message.data, vec![1u8; 200]);
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_chunker_reassembler_roundtrip() {
        for len in [0usize, 1, 99, 100, 101, 300, 65536, 300_000] {
            for event in [PacketEvent::Data, PacketEvent::Close, PacketEvent::Connect] {
                let data: Vec<u8> = (0..len as u32).map(|v| (v * 31) as u8).collect();
                let packets = split(77, event, &data, if len > 1000 { MAX_PAYLOAD_SIZE } else { 100 });

                let mut reassembler = Reassembler::new();
                let total = packets.len();
                let mut messages = Vec::new();
                // Feeding in reverse index order exercises out-of-order arrival.
                for packet in packets.into_iter().rev() {
                    if let Some(message) = reassembler.ingest(packet) {
                        messages.push(message);
                    }
                }

                assert_eq!(messages.len(), 1, "len {len} total {total}");
                assert_eq!(messages[0].event, event);
                assert_eq!(messages[0].connection_id, 77);
                assert_eq!(messages[0].data, data);
                assert_eq!(reassembler.pending(), 0);
            }
        }
    }
}
