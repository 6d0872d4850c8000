//! The message channel between the two peers.
//!
//! A channel moves whole messages of up to [`MAX_MESSAGE_SIZE`] bytes and promises
//! nothing about ordering across messages; everything above it (the packet protocol
//! and the adapters) is written against that contract. The production implementation
//! runs over a QUIC stream ([`stream`]); tests use a linked in-process pair
//! ([`memory`]).
//!
//! Sending is split from receiving the same way a TCP stream splits into halves: the
//! [`ChannelSender`] is a cheap clonable handle with a non-blocking [`send`], and the
//! [`ChannelReceiver`] is the single consumer of inbound messages. Each end's
//! outbound queue is drained by one owning driver task, which is also what makes the
//! buffered-amount accounting meaningful: a message counts as buffered from `send`
//! until the driver has handed it to the transport.
//!
//! [`send`]: ChannelSender::send

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::Rc,
};

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};

pub mod memory;
pub mod stream;

/// The largest message a channel accepts, chosen so every message fits the u16
/// frame-length prefix used by the stream transport.
pub const MAX_MESSAGE_SIZE: usize = 65535;

/// The buffered-byte threshold above which senders should pause, and below which
/// the channel fires its low-watermark notification.
pub const BUFFERED_AMOUNT_WATERMARK: usize = 65536;

/// The byte the stream opener writes before any frame, announcing the channel.
pub const CHANNEL_OPEN_MARKER: u8 = 0x42;

/// Capacity of a receiving end's inbound message queue, in messages.
pub(crate) const INBOUND_QUEUE_MESSAGES: usize = 256;

/// The ways handing a message to a channel can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel is closed; the message was discarded.
    Closed,

    /// The message exceeds [`MAX_MESSAGE_SIZE`].
    TooLarge,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "The channel is closed"),
            Self::TooLarge => write!(f, "Message exceeds the channel's maximum message size"),
        }
    }
}

/// State shared between a [`ChannelSender`] and the driver task draining it.
pub(crate) struct SendShared {
    queue: RefCell<VecDeque<Bytes>>,
    buffered: Cell<usize>,
    open: Cell<bool>,
    send_ready: Notify,
    drained: Notify,
}

impl SendShared {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            queue: RefCell::new(VecDeque::new()),
            buffered: Cell::new(0),
            open: Cell::new(true),
            send_ready: Notify::new(),
            drained: Notify::new(),
        })
    }

    /// Waits for the next queued message. Returns `None` once the channel is closed
    /// and the queue is drained.
    pub(crate) async fn next_message(&self) -> Option<Bytes> {
        loop {
            if let Some(message) = self.queue.borrow_mut().pop_front() {
                return Some(message);
            }

            if !self.open.get() {
                return None;
            }

            self.send_ready.notified().await;
        }
    }

    /// Records that the driver handed `len` bytes to the transport, firing the
    /// low-watermark notification on a high-to-low crossing.
    pub(crate) fn message_flushed(&self, len: usize) {
        let before = self.buffered.get();
        let after = before.saturating_sub(len);
        self.buffered.set(after);

        if before >= BUFFERED_AMOUNT_WATERMARK && after < BUFFERED_AMOUNT_WATERMARK {
            self.drained.notify_waiters();
        }
    }

    /// Closes the sending side, discarding anything still queued.
    pub(crate) fn mark_closed(&self) {
        if self.open.replace(false) {
            self.queue.borrow_mut().clear();
            self.buffered.set(0);
            self.send_ready.notify_one();
            self.drained.notify_waiters();
        }
    }
}

/// The sending half of a channel. Cloning yields another handle to the same end.
#[derive(Clone)]
pub struct ChannelSender {
    shared: Rc<SendShared>,
}

impl ChannelSender {
    pub(crate) fn new(shared: Rc<SendShared>) -> Self {
        Self { shared }
    }

    /// Enqueues one message for the peer without blocking.
    ///
    /// The queue is unbounded; callers that care about memory growth must watch
    /// [`buffered_amount`](Self::buffered_amount) and pause above
    /// [`BUFFERED_AMOUNT_WATERMARK`], resuming on [`drained`](Self::drained).
    pub fn send(&self, message: Bytes) -> Result<(), ChannelError> {
        if !self.shared.open.get() {
            return Err(ChannelError::Closed);
        }

        if message.len() > MAX_MESSAGE_SIZE {
            return Err(ChannelError::TooLarge);
        }

        self.shared.buffered.set(self.shared.buffered.get() + message.len());
        self.shared.queue.borrow_mut().push_back(message);
        self.shared.send_ready.notify_one();
        Ok(())
    }

    /// The amount of bytes accepted by [`send`](Self::send) but not yet handed to
    /// the transport.
    pub fn buffered_amount(&self) -> usize {
        self.shared.buffered.get()
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.get()
    }

    /// Resolves on the next edge where the buffered amount drops below
    /// [`BUFFERED_AMOUNT_WATERMARK`], or when the channel closes.
    pub async fn drained(&self) {
        self.shared.drained.notified().await
    }

    /// Closes this end. Idempotent; queued messages are discarded and later sends
    /// fail with [`ChannelError::Closed`].
    pub fn close(&self) {
        self.shared.mark_closed();
    }
}

/// The receiving half of a channel; the single consumer of inbound messages.
pub struct ChannelReceiver {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelReceiver {
    pub(crate) fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Waits for the next whole message from the peer, or `None` once the channel
    /// is down.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}
