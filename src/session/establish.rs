//! The establishment flows that take a peer from `disconnected` to `connected`
//! with an open channel in hand.
//!
//! The host creates the session, waits for a peer, publishes its offer (pinned
//! certificate plus candidates) and accepts the incoming QUIC connection. The
//! client mirrors it: join, take the offer, answer with its own candidates, then
//! race a direct connection attempt against every offered candidate and open the
//! channel stream. Both sides observe abort requests around every await point.

use std::{
    future::{poll_fn, Future},
    io::{self, Error, ErrorKind},
    net::{Ipv4Addr, SocketAddr},
    pin::Pin,
    rc::Rc,
    task::Poll,
    time::Duration,
};

use base64::Engine;
use quinn::{Connection, Endpoint};
use serde::{Deserialize, Serialize};

use crate::{
    channel::{stream::open_stream_channel, ChannelReceiver, ChannelSender, CHANNEL_OPEN_MARKER},
    endpoint::{make_client_endpoint, make_server_endpoint, SERVER_NAME},
};

use super::{
    candidates::gather_candidates,
    signaling::{Session, SignalBlob, SignalKind, SignalingClient, SignalingError},
    state::{ConnectionStatus, StateMachine},
    SessionError,
};

/// How long to wait for the data channel once signaling has finished.
pub const CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// The pause between signaling polls (the service itself holds each poll open for
/// a few seconds; this is just the breather between them, and the retry delay on
/// transient errors).
pub const POLL_RETRY_INTERVAL: Duration = Duration::from_millis(100);

const DESCRIPTION_PROTO: &str = "burrow-quic-1";

const UNSPECIFIED_BIND: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// Everything a successful establishment leaves behind.
pub struct EstablishedPeer {
    pub endpoint: Endpoint,
    pub connection: Connection,
    pub channel: (ChannelSender, ChannelReceiver),
    pub session: Session,
}

/// The opaque description carried in a signal's `sdp` field.
#[derive(Debug, Serialize, Deserialize)]
struct Description {
    proto: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    certificate: Option<String>,
}

impl Description {
    fn offer(cert_der: &[u8]) -> Self {
        Self {
            proto: DESCRIPTION_PROTO.to_string(),
            certificate: Some(base64::prelude::BASE64_STANDARD.encode(cert_der)),
        }
    }

    fn answer() -> Self {
        Self {
            proto: DESCRIPTION_PROTO.to_string(),
            certificate: None,
        }
    }

    fn encode(&self) -> String {
        serde_json::to_string(self).unwrap()
    }

    fn decode(sdp: &str) -> Result<Self, SessionError> {
        let description: Self =
            serde_json::from_str(sdp).map_err(|_| SessionError::BadSignal("The peer's description is not valid JSON".to_string()))?;

        match description.proto == DESCRIPTION_PROTO {
            true => Ok(description),
            false => Err(SessionError::BadSignal(format!(
                "The peer speaks \"{}\", this side speaks \"{DESCRIPTION_PROTO}\"",
                description.proto
            ))),
        }
    }
}

/// Runs the host flow to completion. On any error the state machine lands on
/// `failed`; recover it with [`StateMachine::reset`].
pub async fn establish_host(state: &Rc<StateMachine>, signaling: &SignalingClient, host_name: &str) -> Result<EstablishedPeer, SessionError> {
    match host_flow(state, signaling, host_name).await {
        Ok(peer) => Ok(peer),
        Err(error) => {
            state.fail();
            Err(error)
        }
    }
}

/// Runs the client flow to completion, joining the session named by `session_id`.
pub async fn establish_client(
    state: &Rc<StateMachine>,
    signaling: &SignalingClient,
    client_name: &str,
    session_id: &str,
) -> Result<EstablishedPeer, SessionError> {
    match client_flow(state, signaling, client_name, session_id).await {
        Ok(peer) => Ok(peer),
        Err(error) => {
            state.fail();
            Err(error)
        }
    }
}

async fn host_flow(state: &Rc<StateMachine>, signaling: &SignalingClient, host_name: &str) -> Result<EstablishedPeer, SessionError> {
    state.advance(ConnectionStatus::Joining)?;
    let session = signaling.create_session(host_name).await?;
    let session_id = session.id.clone();
    println!("Session code: {session_id}");

    state.advance(ConnectionStatus::Waiting)?;
    let session = loop {
        state.checkpoint()?;
        match signaling.poll_session(&session_id).await {
            Ok(session) if session.client.is_some() => break session,
            Ok(_) => {}
            Err(SignalingError::Gone) => return Err(SessionError::Signaling(SignalingError::Gone)),
            Err(error) => log::warn!("Session poll failed: {error}"),
        }
        tokio::time::sleep(POLL_RETRY_INTERVAL).await;
    };
    log::info!("Peer {} joined session {session_id}", session.client.as_deref().unwrap_or("?"));

    state.advance(ConnectionStatus::Signaling)?;
    let (endpoint, cert_der) = make_server_endpoint(UNSPECIFIED_BIND)?;
    let port = endpoint.local_addr()?.port();

    let candidates = gather_candidates(port).await;
    log::info!("Gathered {} candidates", candidates.len());
    state.checkpoint()?;

    let offer = SignalBlob {
        kind: Some(SignalKind::Offer),
        sdp: Description::offer(&cert_der).encode(),
        candidate: candidates.iter().map(SocketAddr::to_string).collect(),
    };
    signaling.publish_signal(&session_id, &offer).await?;

    let answer = loop {
        state.checkpoint()?;
        match signaling.poll_signal(&session_id, SignalKind::Answer).await {
            Ok(Some(blob)) => break blob,
            Ok(None) => {}
            Err(SignalingError::Gone) => return Err(SessionError::Signaling(SignalingError::Gone)),
            Err(error) => log::warn!("Answer poll failed: {error}"),
        }
        tokio::time::sleep(POLL_RETRY_INTERVAL).await;
    };

    // Applying the answer is just validation here; connecting is the client's job.
    Description::decode(&answer.sdp)?;
    log::info!("Peer answered with {} candidates, waiting for it to connect", answer.candidate.len());
    state.checkpoint()?;

    let opened = tokio::time::timeout(CHANNEL_OPEN_TIMEOUT, async {
        let connecting = endpoint
            .accept()
            .await
            .ok_or_else(|| Error::new(ErrorKind::Other, "The endpoint closed before the peer connected"))?;
        let connection = connecting.await.map_err(into_io_error)?;

        let (send_stream, mut recv_stream) = connection.accept_bi().await.map_err(into_io_error)?;
        let mut marker = [0u8; 1];
        recv_stream.read_exact(&mut marker).await.map_err(into_io_error)?;
        if marker[0] != CHANNEL_OPEN_MARKER {
            return Err(Error::new(ErrorKind::InvalidData, "The peer opened the channel with an unexpected marker"));
        }

        Ok::<_, io::Error>((connection, send_stream, recv_stream))
    })
    .await;

    let (connection, send_stream, recv_stream) = match opened {
        Ok(Ok(opened)) => opened,
        Ok(Err(error)) => return Err(SessionError::Io(error)),
        Err(_) => return Err(SessionError::ChannelOpenTimeout),
    };

    state.advance(ConnectionStatus::Connected)?;
    log::info!("Peer connected from {}", connection.remote_address());
    spawn_abort_watcher(Rc::clone(state), connection.clone());

    let channel = open_stream_channel(send_stream, recv_stream);
    Ok(EstablishedPeer {
        endpoint,
        connection,
        channel,
        session,
    })
}

async fn client_flow(
    state: &Rc<StateMachine>,
    signaling: &SignalingClient,
    client_name: &str,
    session_id: &str,
) -> Result<EstablishedPeer, SessionError> {
    state.advance(ConnectionStatus::Joining)?;
    let session = signaling.join_session(session_id, client_name).await?;
    log::info!("Joined session {} hosted by {}", session.id, session.host);

    state.advance(ConnectionStatus::Waiting)?;
    state.advance(ConnectionStatus::Signaling)?;

    let offer = loop {
        state.checkpoint()?;
        match signaling.poll_signal(session_id, SignalKind::Offer).await {
            Ok(Some(blob)) => break blob,
            Ok(None) => {}
            Err(SignalingError::Gone) => return Err(SessionError::Signaling(SignalingError::Gone)),
            Err(error) => log::warn!("Offer poll failed: {error}"),
        }
        tokio::time::sleep(POLL_RETRY_INTERVAL).await;
    };

    let description = Description::decode(&offer.sdp)?;
    let cert_der = match description.certificate {
        Some(encoded) => base64::prelude::BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| SessionError::BadSignal("The offer's certificate is not valid base64".to_string()))?,
        None => return Err(SessionError::BadSignal("The offer carries no certificate".to_string())),
    };

    let mut remote_candidates = Vec::with_capacity(offer.candidate.len());
    for candidate in &offer.candidate {
        match candidate.parse::<SocketAddr>() {
            Ok(address) => remote_candidates.push(address),
            Err(_) => log::warn!("Ignoring unparseable candidate \"{candidate}\""),
        }
    }
    if remote_candidates.is_empty() {
        return Err(SessionError::BadSignal("The offer carries no usable candidates".to_string()));
    }

    let endpoint = make_client_endpoint(UNSPECIFIED_BIND, cert_der)?;
    let port = endpoint.local_addr()?.port();

    let candidates = gather_candidates(port).await;
    state.checkpoint()?;

    let answer = SignalBlob {
        kind: Some(SignalKind::Answer),
        sdp: Description::answer().encode(),
        candidate: candidates.iter().map(SocketAddr::to_string).collect(),
    };
    signaling.publish_signal(session_id, &answer).await?;
    state.checkpoint()?;

    log::info!("Connecting to {} candidates", remote_candidates.len());
    let opened = tokio::time::timeout(CHANNEL_OPEN_TIMEOUT, async {
        let connection = connect_any(&endpoint, &remote_candidates).await?;
        let (mut send_stream, recv_stream) = connection.open_bi().await.map_err(into_io_error)?;
        send_stream.write_all(&[CHANNEL_OPEN_MARKER]).await.map_err(into_io_error)?;
        Ok::<_, io::Error>((connection, send_stream, recv_stream))
    })
    .await;

    let (connection, send_stream, recv_stream) = match opened {
        Ok(Ok(opened)) => opened,
        Ok(Err(error)) => return Err(SessionError::Io(error)),
        Err(_) => return Err(SessionError::ChannelOpenTimeout),
    };

    state.advance(ConnectionStatus::Connected)?;
    log::info!("Connected to peer at {}", connection.remote_address());
    spawn_abort_watcher(Rc::clone(state), connection.clone());

    let channel = open_stream_channel(send_stream, recv_stream);
    Ok(EstablishedPeer {
        endpoint,
        connection,
        channel,
        session,
    })
}

/// Starts a connection attempt towards every candidate at once and takes whichever
/// succeeds first; an attempt failing only drops that attempt.
async fn connect_any(endpoint: &Endpoint, addresses: &[SocketAddr]) -> io::Result<Connection> {
    let mut connect_futures = Vec::with_capacity(addresses.len());
    for address in addresses {
        match endpoint.connect(*address, SERVER_NAME) {
            Ok(connecting) => connect_futures.push((connecting, *address)),
            Err(error) => log::warn!("Couldn't start a connection to candidate {address}: {error}"),
        }
    }

    if connect_futures.is_empty() {
        return Err(Error::new(ErrorKind::Other, "No candidate connection could even be started"));
    }

    let result = poll_fn(move |cx| {
        let mut i = 0;
        while i < connect_futures.len() {
            match Pin::new(&mut connect_futures[i].0).poll(cx) {
                Poll::Ready(Ok(connection)) => return Poll::Ready(Some(connection)),
                Poll::Ready(Err(error)) => {
                    log::debug!("Candidate {} didn't answer: {error}", connect_futures[i].1);
                    drop(connect_futures.swap_remove(i));

                    if connect_futures.is_empty() {
                        return Poll::Ready(None);
                    }
                }
                Poll::Pending => i += 1,
            }
        }

        Poll::Pending
    })
    .await;

    result.ok_or_else(|| Error::new(ErrorKind::Other, "None of the peer's candidates could be reached"))
}

/// The one-shot watch that closes the peer connection if an abort arrives after
/// the session reached `connected`.
fn spawn_abort_watcher(state: Rc<StateMachine>, connection: Connection) {
    tokio::task::spawn_local(async move {
        state.aborted().await;
        log::warn!("Abort requested, closing the peer connection");
        connection.close(0u32.into(), b"aborted");
        state.unwind();
    });
}

fn into_io_error<E: std::error::Error + Send + Sync + 'static>(error: E) -> io::Error {
    Error::new(ErrorKind::Other, error)
}
