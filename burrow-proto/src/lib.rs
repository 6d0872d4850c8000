//! The framed, multiplexed chunking protocol used by burrow.
//!
//! This crate contains the pure, I/O-free half of the tunneling engine: the
//! packet codec, the chunker that splits arbitrary-length byte buffers into
//! codec-ready packets, and the reassembler that puts them back together on
//! the other side.
//!
//! The protocol assumes a message-oriented channel with a maximum message
//! size and no cross-message ordering guarantee. Each message is split into
//! up to 65,535 chunks, each chunk carrying its position and the total, so
//! the receiving side can reconstruct the message no matter the order the
//! chunks arrive in. Messages are scoped by a (connection id, message id)
//! pair; both identifiers are 16 bits wide and wrap around.

pub mod assemble;
pub mod chunk;
pub mod packet;
pub mod u8_repr_enum;

/// The size of an encoded packet header in bytes.
pub const PACKET_HEADER_SIZE: usize = 11;

/// The largest allowed encoded packet, header included.
pub const MAX_PACKET_SIZE: usize = 65535;

/// The largest payload a single chunk can carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - PACKET_HEADER_SIZE;

/// The largest amount of chunks a single message can be split into.
pub const MAX_CHUNK_COUNT: usize = 65535;
