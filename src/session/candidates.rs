//! One-shot ("vanilla") candidate gathering.
//!
//! All candidates are collected up front, under a single hard ceiling, and sent
//! together; there is no incremental exchange. The ceiling exists because the
//! public address probe may never answer on some networks; whatever was gathered
//! by then is accepted and sent as-is.

use std::{
    io::{self, Error, ErrorKind},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use tokio::net::UdpSocket;

/// The hard ceiling on candidate gathering.
pub const CANDIDATE_GATHER_TIMEOUT: Duration = Duration::from_secs(2);

const PUBLIC_IP_SERVER: &str = "api.ipify.org:80";

/// Gathers this peer's candidate addresses for a QUIC endpoint bound at `port`.
///
/// Best effort: the route-probe address, the publicly-visible address, and the
/// loopback address (which is what makes same-host peers work), deduplicated. Never
/// returns empty, since loopback is always there.
pub async fn gather_candidates(port: u16) -> Vec<SocketAddr> {
    let mut candidates = Vec::with_capacity(3);

    if let Some(ip) = local_route_ip().await {
        push_unique(&mut candidates, SocketAddr::new(ip, port));
    }

    match tokio::time::timeout(CANDIDATE_GATHER_TIMEOUT, public_ipv4()).await {
        Ok(Ok(ip)) => push_unique(&mut candidates, SocketAddr::new(IpAddr::V4(ip), port)),
        Ok(Err(error)) => log::debug!("Couldn't determine the public address: {error}"),
        Err(_) => log::debug!("Public address lookup exceeded the gathering ceiling, continuing without it"),
    }

    push_unique(&mut candidates, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
    candidates
}

fn push_unique(candidates: &mut Vec<SocketAddr>, candidate: SocketAddr) {
    if !candidates.contains(&candidate) {
        candidates.push(candidate);
    }
}

/// The local address the OS would route outbound traffic from. Connecting a UDP
/// socket sends nothing; it only makes the OS pick a route.
async fn local_route_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect("8.8.8.8:80").await.ok()?;
    socket.local_addr().ok().map(|address| address.ip())
}

/// Asks `api.ipify.org` which address this machine is seen as.
async fn public_ipv4() -> io::Result<Ipv4Addr> {
    let response = super::http::request(PUBLIC_IP_SERVER, "GET", "/", None).await?;
    if !response.is_success() {
        let message = format!("The public address service answered HTTP {}", response.status);
        return Err(Error::new(ErrorKind::Other, message));
    }

    let text = String::from_utf8_lossy(&response.body);
    let text = text.trim();
    text.parse().map_err(|_| {
        let message = format!("The public address service answered an invalid address: {text}");
        Error::new(ErrorKind::InvalidData, message)
    })
}
