//! Endpoint construction and the 0-RTT dial.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{Connection, Endpoint, TransportConfig, VarInt};
use tracing::debug;

use crate::tls::{self, AcceptAnyServerCert, TlsMaterial};
use crate::{
    CONNECTION_RECEIVE_WINDOW, HANDSHAKE_TIMEOUT, KEEP_ALIVE_INTERVAL, MAX_STREAM_RECEIVE_WINDOW,
    SetupError,
};

/// How the client decides whether to trust the server certificate.
#[derive(Clone, Debug)]
pub enum ClientTrust {
    /// Validate against a PEM root-CA bundle.
    CaFile(PathBuf),
    /// Skip certificate verification. Testing only.
    Insecure,
}

fn stream_windows() -> TransportConfig {
    let mut transport = TransportConfig::default();
    transport.stream_receive_window(VarInt::from_u32(MAX_STREAM_RECEIVE_WINDOW));
    transport.receive_window(VarInt::from_u32(CONNECTION_RECEIVE_WINDOW));
    transport
}

/// Builds a client endpoint bound to `bind`, with ALPN pinned, early data
/// enabled and the transfer window tuning applied.
pub fn client_endpoint(bind: SocketAddr, trust: &ClientTrust) -> Result<Endpoint, SetupError> {
    let builder = rustls::ClientConfig::builder();
    let mut crypto = match trust {
        ClientTrust::CaFile(path) => builder
            .with_root_certificates(tls::load_root_store(path)?)
            .with_no_client_auth(),
        ClientTrust::Insecure => builder
            .dangerous()
            .with_custom_certificate_verifier(AcceptAnyServerCert::new())
            .with_no_client_auth(),
    };
    crypto.alpn_protocols = vec![qft_protocol::ALPN.to_vec()];
    crypto.enable_early_data = true;

    let mut client_config = quinn::ClientConfig::new(Arc::new(QuicClientConfig::try_from(crypto)?));
    client_config.transport_config(Arc::new(stream_windows()));

    let mut endpoint = Endpoint::client(bind)?;
    endpoint.set_default_client_config(client_config);
    Ok(endpoint)
}

/// Builds a server endpoint bound to `bind` serving `material`, with 0-RTT
/// permitted and keep-alives at [`KEEP_ALIVE_INTERVAL`].
pub fn server_endpoint(bind: SocketAddr, material: TlsMaterial) -> Result<Endpoint, SetupError> {
    let mut crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(material.cert_chain, material.key)?;
    crypto.alpn_protocols = vec![qft_protocol::ALPN.to_vec()];
    crypto.max_early_data_size = u32::MAX;

    let mut server_config =
        quinn::ServerConfig::with_crypto(Arc::new(QuicServerConfig::try_from(crypto)?));
    let mut transport = stream_windows();
    transport.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));
    server_config.transport_config(Arc::new(transport));

    Ok(Endpoint::server(server_config, bind)?)
}

/// Dials `remote`, attempting 0-RTT and falling back to a full handshake
/// bounded by [`HANDSHAKE_TIMEOUT`].
pub async fn connect(
    endpoint: &Endpoint,
    remote: SocketAddr,
    server_name: &str,
) -> Result<Connection, SetupError> {
    let connecting = endpoint.connect(remote, server_name)?;
    match connecting.into_0rtt() {
        Ok((connection, _accepted)) => {
            debug!(%remote, "connected with 0-RTT");
            Ok(connection)
        }
        Err(connecting) => {
            let connection = tokio::time::timeout(HANDSHAKE_TIMEOUT, connecting)
                .await
                .map_err(|_| SetupError::HandshakeTimeout)??;
            debug!(%remote, "connected after full handshake");
            Ok(connection)
        }
    }
}
