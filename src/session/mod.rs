//! Session establishment: the connection status state machine, the signaling
//! client, and the flows that turn a session code into an open channel.

use std::{fmt, io};

use self::{signaling::SignalingError, state::StateError};

pub mod candidates;
pub mod establish;
mod http;
pub mod signaling;
pub mod state;

/// The ways a whole session attempt can fail. Any of these drives the state
/// machine to `failed`; nothing here ever crashes the process.
#[derive(Debug)]
pub enum SessionError {
    /// An abort was requested and the attempt unwound.
    Aborted,

    /// A status transition was requested that the table does not allow.
    State(StateError),

    /// The signaling service said no, or went away.
    Signaling(SignalingError),

    /// The network let us down while establishing the peer connection.
    Io(io::Error),

    /// The peer's offer or answer couldn't be used.
    BadSignal(String),

    /// The peer never opened the data channel within the allowed time.
    ChannelOpenTimeout,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted => write!(f, "The session attempt was aborted"),
            Self::State(error) => error.fmt(f),
            Self::Signaling(error) => write!(f, "Signaling failed: {error}"),
            Self::Io(error) => write!(f, "Connection failed: {error}"),
            Self::BadSignal(reason) => write!(f, "Unusable signal from peer: {reason}"),
            Self::ChannelOpenTimeout => write!(f, "Timed out waiting for the data channel to open"),
        }
    }
}

impl From<StateError> for SessionError {
    fn from(error: StateError) -> Self {
        Self::State(error)
    }
}

impl From<SignalingError> for SessionError {
    fn from(error: SignalingError) -> Self {
        Self::Signaling(error)
    }
}

impl From<io::Error> for SessionError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}
