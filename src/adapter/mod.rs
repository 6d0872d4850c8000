//! The socket multiplexer: binds real TCP sockets to logical connection identifiers
//! and shuttles bytes between them and the channel.
//!
//! Both adapter variants share everything here: the socket table, the demultiplex
//! loop consuming the channel, and the per-socket reader/writer tasks. What differs
//! is only where TCP connections come from; see [`client`] and [`host`].
//!
//! Teardown is symmetric and error-path-driven. A read error, a write error, an EOF,
//! a remote CLOSE and a channel shutdown all funnel into [`close_socket`], which
//! removes the table entry exactly once and, when the teardown originated locally,
//! emits a CLOSE chunk so the peer always learns about it.

use std::{
    cell::RefCell,
    collections::HashMap,
    net::Ipv4Addr,
    rc::Rc,
    sync::atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, Notify},
};

use burrow_proto::{
    assemble::{Message, Reassembler},
    chunk::Chunker,
    packet::{Packet, PacketEvent},
};

use crate::{channel::ChannelReceiver, sender::FlowSender};

pub mod client;
pub mod host;

/// How many inbound channel messages a logical socket buffers before further data
/// for it is dropped as unwritable.
pub const WRITE_QUEUE_MESSAGES: usize = 32;

// Larger than one chunk's payload, so a fast TCP side produces multi-chunk messages
// instead of one channel round per read.
const READ_BUFFER_SIZE: usize = 262144;

/// One connection identifier bound to one live TCP socket.
///
/// At most one exists per connection identifier per adapter. Identifiers wrap modulo
/// 65536 and are never knowingly reused while still bound; a wraparound collision
/// under extreme connection churn is an accepted risk, not a prevented one.
pub struct LogicalSocket {
    write_tx: mpsc::Sender<Bytes>,
    chunker: Chunker,
    closed: Rc<Notify>,
}

/// The table of live logical sockets, shared by the tasks of one adapter and only
/// ever touched from the one event loop driving them.
pub type SocketTable = Rc<RefCell<HashMap<u16, LogicalSocket>>>;

pub fn new_socket_table() -> SocketTable {
    Rc::new(RefCell::new(HashMap::new()))
}

static ADAPTER_ACTIVE: AtomicBool = AtomicBool::new(false);

/// The process-wide start-of-life lock: at most one adapter may be active per
/// process. Dropping the guard releases the slot.
pub struct AdapterGuard(());

impl AdapterGuard {
    /// Claims the process's adapter slot. Returns `None`, after logging a warning,
    /// if an adapter is already active; the existing adapter is not disturbed.
    pub fn acquire() -> Option<Self> {
        match ADAPTER_ACTIVE.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Some(Self(())),
            Err(_) => {
                log::warn!("An adapter is already active in this process, rejecting start request");
                None
            }
        }
    }
}

impl Drop for AdapterGuard {
    fn drop(&mut self) {
        ADAPTER_ACTIVE.store(false, Ordering::Release);
    }
}

#[derive(Clone, Copy)]
pub(crate) enum AdapterMode {
    Host { target_port: u16 },
    Client,
}

/// Consumes the channel until it closes, routing each reassembled message to the
/// logical socket it names. Owns the adapter's one reassembler.
pub(crate) async fn run_demux(mut receiver: ChannelReceiver, table: SocketTable, flow: FlowSender, mode: AdapterMode) {
    let mut reassembler = Reassembler::new();

    while let Some(frame) = receiver.recv().await {
        let packet = match Packet::decode(&frame) {
            Ok(packet) => packet,
            Err(error) => {
                log::warn!("Dropping malformed packet: {error}");
                continue;
            }
        };

        let message = match reassembler.ingest(packet) {
            Some(message) => message,
            None => continue,
        };

        match message.event {
            PacketEvent::Connect => match mode {
                AdapterMode::Host { target_port } => handle_remote_connect(&table, &flow, message.connection_id, target_port),
                AdapterMode::Client => {
                    log::warn!("Peer sent CONNECT for connection {} to a client adapter, ignoring", message.connection_id)
                }
            },
            PacketEvent::Data => deliver_data(&table, message),
            PacketEvent::Close => {
                log::info!("Peer closed connection {}", message.connection_id);
                close_socket(&table, &flow, message.connection_id, false);
            }
        }
    }

    let remaining = table.borrow().len();
    if remaining > 0 {
        log::info!("Channel closed, tearing down {remaining} tunneled connections");
    }

    for (_, socket) in table.borrow_mut().drain() {
        socket.closed.notify_waiters();
    }
}

/// Inserts a fresh logical socket for `connection_id`, returning the receiving end
/// of its write queue for the writer task.
pub(crate) fn bind_socket(table: &SocketTable, connection_id: u16) -> mpsc::Receiver<Bytes> {
    let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_MESSAGES);
    let socket = LogicalSocket {
        write_tx,
        chunker: Chunker::new(connection_id),
        closed: Rc::new(Notify::new()),
    };

    table.borrow_mut().insert(connection_id, socket);
    write_rx
}

/// Unbinds `connection_id` and wakes its tasks. Safe to call from any teardown path;
/// whichever call finds the entry still present wins, the rest are no-ops.
///
/// With `notify_peer`, a CLOSE chunk goes out before the socket is discarded, which
/// is what keeps teardown symmetric even when it started from a local error.
pub(crate) fn close_socket(table: &SocketTable, flow: &FlowSender, connection_id: u16, notify_peer: bool) {
    let mut socket = match table.borrow_mut().remove(&connection_id) {
        Some(socket) => socket,
        None => return,
    };

    socket.closed.notify_waiters();

    if notify_peer {
        match socket.chunker.split(PacketEvent::Close, &[]) {
            Ok(packets) => push_packets(flow, packets),
            Err(error) => log::error!("Couldn't emit CLOSE for connection {connection_id}: {error}"),
        }
    }

    log::info!("Connection {connection_id} closed");
}

/// Splits a zero-length control message through the socket's own chunker and sends it.
pub(crate) fn send_control(table: &SocketTable, flow: &FlowSender, connection_id: u16, event: PacketEvent) {
    let packets = match table.borrow_mut().get_mut(&connection_id) {
        Some(socket) => socket.chunker.split(event, &[]),
        None => return,
    };

    match packets {
        Ok(packets) => push_packets(flow, packets),
        Err(error) => log::error!("Couldn't emit {event} for connection {connection_id}: {error}"),
    }
}

pub(crate) fn push_packets(flow: &FlowSender, packets: Vec<Packet>) {
    for packet in packets {
        match packet.encode() {
            Ok(buf) => flow.push(Bytes::from(buf)),
            Err(error) => log::error!("Couldn't encode outbound packet: {error}"),
        }
    }
}

fn deliver_data(table: &SocketTable, message: Message) {
    let connection_id = message.connection_id;
    let length = message.data.len();

    match table.borrow().get(&connection_id) {
        None => log::warn!("Dropping {length} bytes for unknown connection {connection_id}"),
        Some(socket) => {
            // A full or closed write queue means the socket can't take the data; the
            // message is dropped, never queued elsewhere.
            if socket.write_tx.try_send(Bytes::from(message.data)).is_err() {
                log::warn!("Dropping {length} bytes for unwritable connection {connection_id}");
            }
        }
    }
}

/// Binds the identifier right away and connects to the local service in the
/// background, so DATA arriving before the TCP connect finishes lands in the write
/// queue instead of being dropped.
fn handle_remote_connect(table: &SocketTable, flow: &FlowSender, connection_id: u16, target_port: u16) {
    if table.borrow().contains_key(&connection_id) {
        log::warn!("Peer sent CONNECT for already-bound connection {connection_id}, ignoring");
        return;
    }

    let write_rx = bind_socket(table, connection_id);
    log::info!("Peer opened connection {connection_id}, connecting it to 127.0.0.1:{target_port}");

    let table = Rc::clone(table);
    let flow = flow.clone();
    tokio::task::spawn_local(async move {
        let stream = match TcpStream::connect((Ipv4Addr::LOCALHOST, target_port)).await {
            Ok(stream) => stream,
            Err(error) => {
                log::warn!("Connection {connection_id} couldn't reach the local service: {error}");
                close_socket(&table, &flow, connection_id, true);
                return;
            }
        };

        spawn_socket_tasks(table, flow, connection_id, stream, write_rx);
    });
}

/// Starts the reader and writer tasks for a bound connection's TCP stream.
pub(crate) fn spawn_socket_tasks(
    table: SocketTable,
    flow: FlowSender,
    connection_id: u16,
    stream: TcpStream,
    write_rx: mpsc::Receiver<Bytes>,
) {
    // The socket may have been closed while its TCP connect was in flight.
    let closed = match table.borrow().get(&connection_id) {
        Some(socket) => Rc::clone(&socket.closed),
        None => return,
    };

    let (read_half, write_half) = stream.into_split();
    tokio::task::spawn_local(run_socket_reader(Rc::clone(&table), flow.clone(), connection_id, read_half, closed));
    tokio::task::spawn_local(run_socket_writer(table, flow, connection_id, write_half, write_rx));
}

async fn run_socket_reader(table: SocketTable, flow: FlowSender, connection_id: u16, mut read_half: OwnedReadHalf, closed: Rc<Notify>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read_result = tokio::select! {
            _ = closed.notified() => return,
            result = read_half.read(&mut buf) => result,
        };

        let count = match read_result {
            Ok(0) => break,
            Ok(count) => count,
            Err(error) => {
                log::warn!("Read error on connection {connection_id}: {error}");
                break;
            }
        };

        let packets = {
            let mut table_ref = table.borrow_mut();
            match table_ref.get_mut(&connection_id) {
                Some(socket) => socket.chunker.split(PacketEvent::Data, &buf[..count]),
                None => return,
            }
        };

        match packets {
            Ok(packets) => push_packets(&flow, packets),
            Err(error) => {
                log::error!("Couldn't chunk {count} bytes for connection {connection_id}: {error}");
                break;
            }
        }
    }

    close_socket(&table, &flow, connection_id, true);
}

async fn run_socket_writer(
    table: SocketTable,
    flow: FlowSender,
    connection_id: u16,
    mut write_half: OwnedWriteHalf,
    mut write_rx: mpsc::Receiver<Bytes>,
) {
    while let Some(data) = write_rx.recv().await {
        if let Err(error) = write_half.write_all(&data).await {
            log::warn!("Write error on connection {connection_id}: {error}");
            close_socket(&table, &flow, connection_id, true);
            return;
        }
    }

    // The socket was unbound and the queue drained; signal the end to the TCP side.
    let _ = write_half.shutdown().await;
}
