#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `qft_transport` owns everything between a socket address and a usable
//! QUIC connection: rustls configuration for both roles, endpoint
//! construction with the transfer protocol's flow-control tuning, the
//! 0-RTT dial with its handshake deadline, and the typed application close
//! that maps [`CloseCode`]s onto the wire.
//!
//! TLS credential *provisioning* stays at the edges: callers either inject
//! PEM material loaded via [`tls::load_material`] or ask
//! [`tls::self_signed`] for a throwaway certificate. The core endpoints
//! accept whatever they are given.

pub mod tls;

mod endpoint;

use std::io;
use std::time::Duration;

use qft_protocol::CloseCode;
use quinn::VarInt;

pub use endpoint::{ClientTrust, client_endpoint, connect, server_endpoint};

/// Deadline for completing the QUIC handshake on a fresh dial.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Keep-alive interval applied to server connections.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(3);

/// Initial per-stream receive window; also the server's body read size.
pub const INITIAL_STREAM_RECEIVE_WINDOW: u32 = 1024 * 1024;

/// Maximum per-stream receive window; also the client's body read size.
pub const MAX_STREAM_RECEIVE_WINDOW: u32 = 2 * 1024 * 1024;

/// Connection-level receive window shared by all streams.
pub const CONNECTION_RECEIVE_WINDOW: u32 = 8 * 1024 * 1024;

/// Failure to set up an endpoint or establish a connection.
///
/// Everything here happens before (or instead of) a usable connection; once
/// a connection exists, failures are stream-level and typed by the peers'
/// close codes instead.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Binding the UDP socket or reading TLS material from disk failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// Building the rustls configuration failed.
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
    /// The TLS configuration lacks a QUIC-compatible TLS 1.3 cipher suite.
    #[error("TLS configuration is unusable for QUIC: {0}")]
    CipherSuite(#[from] quinn::crypto::rustls::NoInitialCipherSuite),
    /// Generating self-signed certificate material failed.
    #[error("certificate generation failed: {0}")]
    CertGen(#[from] rcgen::Error),
    /// PEM material was unreadable or did not contain what was expected.
    #[error("bad TLS material in {path}: {detail}")]
    BadMaterial {
        /// File the material was read from.
        path: String,
        /// What was wrong with it.
        detail: String,
    },
    /// The remote address or server name was rejected by the endpoint.
    #[error("invalid dial target: {0}")]
    Target(#[from] quinn::ConnectError),
    /// The handshake failed.
    #[error("QUIC handshake failed: {0}")]
    Handshake(#[from] quinn::ConnectionError),
    /// The handshake did not complete within [`HANDSHAKE_TIMEOUT`].
    #[error("QUIC handshake timed out after {HANDSHAKE_TIMEOUT:?}")]
    HandshakeTimeout,
}

/// Closes `connection` with a typed application code and a short reason.
pub fn close_with(connection: &quinn::Connection, code: CloseCode, reason: &str) {
    connection.close(VarInt::from_u32(code.code()), reason.as_bytes());
}
