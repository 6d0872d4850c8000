//! The connection status state machine.
//!
//! Exactly one instance exists per running peer. Every transition is validated
//! against the fixed table in [`StateMachine::transition`]; the establishment flows
//! drive it forward with [`advance`](StateMachine::advance), which also observes
//! abort requests at every step.

use std::{cell::Cell, fmt, rc::Rc};

use tokio::sync::Notify;

use super::SessionError;

/// Where a peer is in its session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Joining,
    Waiting,
    Signaling,
    Connected,
    Aborting,
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Joining => write!(f, "joining"),
            Self::Waiting => write!(f, "waiting"),
            Self::Signaling => write!(f, "signaling"),
            Self::Connected => write!(f, "connected"),
            Self::Aborting => write!(f, "aborting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    InvalidTransition {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { from, to } => write!(f, "Invalid status transition {from} -> {to}"),
        }
    }
}

/// The one status machine of a running peer, plus its abort flag.
pub struct StateMachine {
    status: Cell<ConnectionStatus>,
    abort_requested: Cell<bool>,
    abort_notify: Notify,
}

impl StateMachine {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            status: Cell::new(ConnectionStatus::Disconnected),
            abort_requested: Cell::new(false),
            abort_notify: Notify::new(),
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Moves to `to` if the transition table allows it, leaving the status untouched
    /// otherwise. A transition to the current status is a no-op warning, not an error.
    pub fn transition(&self, to: ConnectionStatus) -> Result<(), StateError> {
        let from = self.status.get();
        if from == to {
            log::warn!("Session status is already {to}, ignoring transition request");
            return Ok(());
        }

        match transition_allowed(from, to) {
            true => {
                self.status.set(to);
                log::info!("Session status: {from} -> {to}");
                Ok(())
            }
            false => Err(StateError::InvalidTransition { from, to }),
        }
    }

    /// Like [`transition`](Self::transition), but honors a pending abort request
    /// first: instead of reaching `to`, the machine unwinds to `failed` and the
    /// attempt gets [`SessionError::Aborted`]. The establishment flows call this (or
    /// [`checkpoint`](Self::checkpoint)) around every await point, so an abort can
    /// never be outrun by a late offer or answer.
    pub fn advance(&self, to: ConnectionStatus) -> Result<(), SessionError> {
        self.checkpoint()?;
        Ok(self.transition(to)?)
    }

    /// Fails the attempt now if an abort was requested, doing nothing otherwise.
    pub fn checkpoint(&self) -> Result<(), SessionError> {
        match self.abort_requested.get() {
            false => Ok(()),
            true => {
                self.unwind();
                Err(SessionError::Aborted)
            }
        }
    }

    /// Drives the machine to `failed` through `aborting`, from wherever it is.
    pub fn unwind(&self) {
        let _ = self.transition(ConnectionStatus::Aborting);
        let _ = self.transition(ConnectionStatus::Failed);
    }

    /// Marks the attempt as failed, unless it already is.
    pub fn fail(&self) {
        if self.status.get() != ConnectionStatus::Failed {
            let _ = self.transition(ConnectionStatus::Failed);
        }
    }

    /// Recovers a failed attempt back to `disconnected`, clearing the abort flag.
    pub fn reset(&self) -> Result<(), StateError> {
        self.transition(ConnectionStatus::Disconnected)?;
        self.abort_requested.set(false);
        Ok(())
    }

    /// Asks the running attempt to unwind at its next step. Idempotent.
    pub fn request_abort(&self) {
        if !self.abort_requested.replace(true) {
            log::warn!("Session abort requested");
            self.abort_notify.notify_waiters();
        }
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested.get()
    }

    /// Resolves once an abort has been requested. Used as the one-shot watch that
    /// closes the peer connection when an abort arrives after `connected`.
    pub async fn aborted(&self) {
        loop {
            if self.abort_requested.get() {
                return;
            }

            self.abort_notify.notified().await;
        }
    }
}

fn transition_allowed(from: ConnectionStatus, to: ConnectionStatus) -> bool {
    use ConnectionStatus::*;

    matches!(
        (from, to),
        (Disconnected, Joining)
            | (Joining, Waiting)
            | (Joining, Failed)
            | (Joining, Aborting)
            | (Waiting, Signaling)
            | (Waiting, Failed)
            | (Waiting, Aborting)
            | (Signaling, Connected)
            | (Signaling, Failed)
            | (Signaling, Aborting)
            | (Connected, Failed)
            | (Connected, Aborting)
            | (Aborting, Failed)
            | (Failed, Disconnected)
    )
}
