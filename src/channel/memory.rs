//! A linked pair of in-process channel ends, used by tests.
//!
//! The two ends are connected by bounded queues, so a slow consumer exerts real
//! backpressure on the other end's driver, the same way QUIC flow control does for
//! the stream implementation. The queue capacity is in messages; a small capacity
//! makes the watermark mechanism observable without moving megabytes.

use std::rc::Rc;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{ChannelReceiver, ChannelSender, SendShared};

/// Creates two linked channel ends with `capacity` messages of transport buffering
/// in each direction, spawning the driver tasks on the current `LocalSet`.
pub fn open_memory_channel(capacity: usize) -> ((ChannelSender, ChannelReceiver), (ChannelSender, ChannelReceiver)) {
    let (to_second, from_first) = mpsc::channel(capacity);
    let (to_first, from_second) = mpsc::channel(capacity);

    let first = open_end(to_second, from_second);
    let second = open_end(to_first, from_first);
    (first, second)
}

fn open_end(peer_tx: mpsc::Sender<Bytes>, inbound_rx: mpsc::Receiver<Bytes>) -> (ChannelSender, ChannelReceiver) {
    let shared = SendShared::new();
    tokio::task::spawn_local(run_driver(Rc::clone(&shared), peer_tx));
    (ChannelSender::new(shared), ChannelReceiver::new(inbound_rx))
}

async fn run_driver(shared: Rc<SendShared>, peer_tx: mpsc::Sender<Bytes>) {
    while let Some(message) = shared.next_message().await {
        let len = message.len();
        if peer_tx.send(message).await.is_err() {
            shared.mark_closed();
            return;
        }

        shared.message_flushed(len);
    }
}
