//! QUIC endpoint configuration for both peers.
//!
//! The host generates a throwaway self-signed certificate whose DER travels to the
//! client inside the offer; the client's TLS verifier then requires exactly that
//! certificate, so the connection is authenticated by the signaling exchange rather
//! than by any certificate authority.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use quinn::{ClientConfig, Endpoint, IdleTimeout, ServerConfig, TransportConfig, VarInt};

pub const KEEPALIVE_INTERVAL_MILLIS: u64 = 1000;
pub const MAX_IDLE_TIMEOUT_MILLIS: u32 = 5000;

/// The TLS server name given to quinn; never checked, since the verifier pins the
/// whole certificate instead.
pub const SERVER_NAME: &str = "burrow";

/// Creates the host's endpoint, returning it along with the DER of the certificate
/// it will present.
pub fn make_server_endpoint(bind_address: SocketAddr) -> io::Result<(Endpoint, Vec<u8>)> {
    let (server_config, cert_der) = configure_server();
    let endpoint = Endpoint::server(server_config, bind_address)?;
    Ok((endpoint, cert_der))
}

/// Creates the client's endpoint, configured to accept only `pinned_cert_der`.
pub fn make_client_endpoint(bind_address: SocketAddr, pinned_cert_der: Vec<u8>) -> io::Result<Endpoint> {
    let mut endpoint = Endpoint::client(bind_address)?;
    endpoint.set_default_client_config(configure_client(pinned_cert_der));
    Ok(endpoint)
}

fn make_transport_config() -> TransportConfig {
    let mut transport_config = TransportConfig::default();
    transport_config.max_concurrent_uni_streams(0_u8.into());
    transport_config.keep_alive_interval(Some(Duration::from_millis(KEEPALIVE_INTERVAL_MILLIS)));
    transport_config.max_idle_timeout(Some(IdleTimeout::from(VarInt::from_u32(MAX_IDLE_TIMEOUT_MILLIS))));
    transport_config
}

fn configure_client(pinned_cert_der: Vec<u8>) -> ClientConfig {
    let crypto = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(PinnedCertVerification::new(pinned_cert_der))
        .with_no_client_auth();

    let mut client_config = ClientConfig::new(Arc::new(crypto));
    client_config.transport_config(Arc::new(make_transport_config()));
    client_config
}

fn configure_server() -> (ServerConfig, Vec<u8>) {
    let cert = rcgen::generate_simple_self_signed(vec![SERVER_NAME.into()]).unwrap();
    let cert_der = cert.serialize_der().unwrap();
    let priv_key = rustls::PrivateKey(cert.serialize_private_key_der());
    let cert_chain = vec![rustls::Certificate(cert_der.clone())];

    let mut server_config = ServerConfig::with_single_cert(cert_chain, priv_key).unwrap();
    server_config.transport = Arc::new(make_transport_config());

    (server_config, cert_der)
}

/// Accepts exactly the certificate announced through the signaling service.
struct PinnedCertVerification {
    expected: rustls::Certificate,
}

impl PinnedCertVerification {
    fn new(expected_der: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            expected: rustls::Certificate(expected_der),
        })
    }
}

impl rustls::client::ServerCertVerifier for PinnedCertVerification {
    fn verify_server_cert(
        &self,
        end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        match end_entity == &self.expected {
            true => Ok(rustls::client::ServerCertVerified::assertion()),
            false => Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            )),
        }
    }
}
