//! The QUIC-backed channel implementation.
//!
//! Messages travel over one bidirectional stream as big-endian u16-length-prefixed
//! frames. The driver task is the only writer; QUIC flow control is what makes it
//! slow down, which in turn is what lets the buffered amount grow and the watermark
//! mechanism engage. The pump task is the only reader and feeds the receiving end's
//! inbound queue.

use std::rc::Rc;

use bytes::Bytes;
use quinn::{RecvStream, SendStream};
use tokio::sync::mpsc;

use super::{ChannelReceiver, ChannelSender, SendShared, INBOUND_QUEUE_MESSAGES};

/// Wraps an open bidirectional QUIC stream into a channel end, spawning its driver
/// and pump tasks on the current `LocalSet`.
pub fn open_stream_channel(send_stream: SendStream, recv_stream: RecvStream) -> (ChannelSender, ChannelReceiver) {
    let shared = SendShared::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_MESSAGES);

    tokio::task::spawn_local(run_driver(Rc::clone(&shared), send_stream));
    tokio::task::spawn_local(run_pump(recv_stream, inbound_tx));

    (ChannelSender::new(shared), ChannelReceiver::new(inbound_rx))
}

async fn run_driver(shared: Rc<SendShared>, mut stream: SendStream) {
    while let Some(message) = shared.next_message().await {
        let len = message.len();
        let result = async {
            stream.write_all(&(len as u16).to_be_bytes()).await?;
            stream.write_all(&message).await
        }
        .await;

        match result {
            Ok(()) => shared.message_flushed(len),
            Err(error) => {
                log::debug!("Channel send stream ended: {error}");
                shared.mark_closed();
                return;
            }
        }
    }

    let _ = stream.finish().await;
}

async fn run_pump(mut stream: RecvStream, inbound_tx: mpsc::Sender<Bytes>) {
    loop {
        let mut length = [0u8; 2];
        if let Err(error) = stream.read_exact(&mut length).await {
            log::debug!("Channel recv stream ended: {error}");
            return;
        }

        let mut frame = vec![0u8; u16::from_be_bytes(length) as usize];
        if let Err(error) = stream.read_exact(&mut frame).await {
            log::debug!("Channel recv stream ended mid-frame: {error}");
            return;
        }

        if inbound_tx.send(Bytes::from(frame)).await.is_err() {
            return;
        }
    }
}
