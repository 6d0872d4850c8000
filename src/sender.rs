//! The flow-controlled sender that feeds outbound packets to the channel.
//!
//! The channel accepts messages without blocking and without bound, so something has
//! to stop handing it data when the transport falls behind. That is this type's only
//! job: it keeps its own FIFO of pending packets and drains them into the channel,
//! pausing whenever the channel's buffered amount climbs past the watermark and
//! resuming on the channel's low-watermark notification. It provides no ordering and
//! no reliability; those concerns belong to the packet protocol.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use bytes::Bytes;

use crate::channel::{ChannelSender, BUFFERED_AMOUNT_WATERMARK};

/// A backpressure-aware queue in front of a [`ChannelSender`]. Cloning yields
/// another handle to the same queue.
#[derive(Clone)]
pub struct FlowSender {
    inner: Rc<FlowInner>,
}

struct FlowInner {
    channel: ChannelSender,
    queue: RefCell<VecDeque<Bytes>>,
    draining: Cell<bool>,
    closed: Cell<bool>,
}

impl FlowSender {
    pub fn new(channel: ChannelSender) -> Self {
        Self {
            inner: Rc::new(FlowInner {
                channel,
                queue: RefCell::new(VecDeque::new()),
                draining: Cell::new(false),
                closed: Cell::new(false),
            }),
        }
    }

    /// Enqueues one encoded packet and kicks off draining.
    ///
    /// After [`close`](Self::close) this is a silent no-op: by that point the owning
    /// session has already left the connected state, and late packets from winding-down
    /// socket tasks have nowhere meaningful to go.
    pub fn push(&self, frame: Bytes) {
        if self.inner.closed.get() || !self.inner.channel.is_open() {
            return;
        }

        self.inner.queue.borrow_mut().push_back(frame);
        self.drain();
    }

    /// The amount of packets waiting in this queue (not counting the channel's own
    /// buffered bytes).
    pub fn queued(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Clears the queue and closes the underlying channel sender. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }

        self.inner.queue.borrow_mut().clear();
        self.inner.channel.close();
    }

    fn drain(&self) {
        if self.inner.draining.replace(true) {
            return;
        }

        let inner = Rc::clone(&self.inner);
        tokio::task::spawn_local(async move {
            loop {
                if inner.closed.get() || !inner.channel.is_open() {
                    break;
                }

                let frame = match inner.queue.borrow_mut().pop_front() {
                    Some(frame) => frame,
                    None => break,
                };

                if inner.channel.send(frame).is_err() {
                    break;
                }

                if inner.channel.buffered_amount() > BUFFERED_AMOUNT_WATERMARK {
                    inner.channel.drained().await;
                }
            }

            inner.draining.set(false);
        });
    }
}
