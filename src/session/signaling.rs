//! The client of the signaling service, the external collaborator both peers use
//! to exchange their session and their opaque offer/answer blobs.
//!
//! The service holds `GET` requests open for a few seconds (long-poll) and answers
//! 404 once a session's TTL has expired; everything else that goes wrong is
//! transient and worth retrying. The core never mutates a session, it only reads
//! what the service returns.

use std::{fmt, io};

use serde::{Deserialize, Serialize};

use super::http;

/// A session as the signaling service reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub host: String,
    #[serde(default)]
    pub client: Option<String>,
    pub status: String,
    pub created_at: u64,
    #[serde(default)]
    pub signal: SignalState,
}

/// The at-most-one offer and at-most-one answer a session carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalState {
    #[serde(default)]
    pub offer: Option<SignalBlob>,
    #[serde(default)]
    pub answer: Option<SignalBlob>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// One peer's published signal: an opaque description plus its gathered candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBlob {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SignalKind>,
    pub sdp: String,
    #[serde(default)]
    pub candidate: Vec<String>,
}

#[derive(Debug)]
pub enum SignalingError {
    /// HTTP 404: the session's TTL expired. Polling must stop permanently.
    Gone,

    /// Any other unsuccessful HTTP status; transient from the core's point of view.
    Status(u16),

    /// The service couldn't be reached; transient.
    Io(io::Error),

    /// The service answered something that isn't the expected JSON; transient.
    Json(serde_json::Error),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gone => write!(f, "The session is gone (TTL expired)"),
            Self::Status(status) => write!(f, "The signaling service answered HTTP {status}"),
            Self::Io(error) => write!(f, "Couldn't reach the signaling service: {error}"),
            Self::Json(error) => write!(f, "The signaling service answered invalid JSON: {error}"),
        }
    }
}

impl From<io::Error> for SignalingError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_json::Error> for SignalingError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error)
    }
}

/// Talks the signaling contract against one `host:port` server.
pub struct SignalingClient {
    server: String,
}

impl SignalingClient {
    pub fn new(server: String) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// `POST /session`: creates a session owned by `host`.
    pub async fn create_session(&self, host: &str) -> Result<Session, SignalingError> {
        let body = serde_json::json!({ "host": host }).to_string();
        let response = http::request(&self.server, "POST", "/session", Some(&body)).await?;
        parse_json(response)
    }

    /// `POST /session/{id}`: joins an existing session as `client`.
    pub async fn join_session(&self, session_id: &str, client: &str) -> Result<Session, SignalingError> {
        let body = serde_json::json!({ "client": client }).to_string();
        let response = http::request(&self.server, "POST", &format!("/session/{session_id}"), Some(&body)).await?;
        parse_json(response)
    }

    /// `GET /session/{id}` (long-poll): the session's current state.
    pub async fn poll_session(&self, session_id: &str) -> Result<Session, SignalingError> {
        let response = http::request(&self.server, "GET", &format!("/session/{session_id}"), None).await?;
        parse_json(response)
    }

    /// `POST /session/{id}/signal`: publishes this peer's offer or answer.
    pub async fn publish_signal(&self, session_id: &str, blob: &SignalBlob) -> Result<(), SignalingError> {
        let body = serde_json::to_string(blob)?;
        let response = http::request(&self.server, "POST", &format!("/session/{session_id}/signal"), Some(&body)).await?;

        match response.status {
            404 => Err(SignalingError::Gone),
            _ if response.is_success() => Ok(()),
            status => Err(SignalingError::Status(status)),
        }
    }

    /// `GET /session/{id}/signal?type=..` (long-poll): the peer's published signal,
    /// or `None` if it hasn't appeared yet.
    pub async fn poll_signal(&self, session_id: &str, kind: SignalKind) -> Result<Option<SignalBlob>, SignalingError> {
        let path = format!("/session/{session_id}/signal?type={kind}");
        let response = http::request(&self.server, "GET", &path, None).await?;

        match response.status {
            404 => Err(SignalingError::Gone),
            _ if !response.is_success() => Err(SignalingError::Status(response.status)),
            _ if response.body.is_empty() => Ok(None),
            _ => Ok(Some(serde_json::from_slice(&response.body)?)),
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(response: http::HttpResponse) -> Result<T, SignalingError> {
    match response.status {
        404 => Err(SignalingError::Gone),
        _ if !response.is_success() => Err(SignalingError::Status(response.status)),
        _ => Ok(serde_json::from_slice(&response.body)?),
    }
}
