#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `qft_protocol` defines the wire vocabulary of the qft transfer protocol:
//! the four fixed-layout payloads exchanged over a QUIC connection, the
//! partitioning of a file into per-stream chunks, and the typed application
//! close codes.
//!
//! All multi-byte integers travel little-endian. There are no length
//! prefixes and no version field; compatibility is by exact layout. Decoding
//! is all-or-nothing: a slice whose length differs from the payload's fixed
//! size fails with [`WireError`] and no partial value is produced.
//!
//! # Payloads
//!
//! - [`TransferRequest`] (client to server, variable length): stream count,
//!   digest flag, UTF-8 source path.
//! - [`FileMeta`] (server to client, 24 bytes): file size plus the source
//!   MD5 digest, or sixteen zero bytes when no digest was requested.
//! - [`ChunkMeta`] (server to client, 16 bytes, first frame of every data
//!   stream): start offset and chunk size.
//! - [`ProgressTick`] (8 bytes): a per-read byte count. Retained as a wire
//!   shape; current peers derive progress locally and never emit it.
//!
//! # Invariants
//!
//! [`chunk_spans`] partitions `[0, file_size)` into `streams` disjoint,
//! contiguous, offset-ordered spans that cover the file exactly: every
//! stream gets `file_size / streams` bytes and the last additionally takes
//! the remainder. Recomputing spans for the same inputs yields identical
//! tuples.

mod chunks;
mod wire;

pub use chunks::{chunk_span, chunk_spans};
pub use wire::{ChunkMeta, FileMeta, ProgressTick, TransferRequest, WireError};

/// ALPN identifier negotiated on every qft connection.
pub const ALPN: &[u8] = b"quic-file-transfer";

/// Upper bound on the source path carried in a [`TransferRequest`].
pub const MAX_FILENAME_LENGTH: usize = 1024;

/// Maximum encoded size of a [`TransferRequest`].
pub const TRANSFER_REQUEST_MAX_LENGTH: usize = 2 + MAX_FILENAME_LENGTH;

/// Exact encoded size of a [`FileMeta`] payload.
pub const FILE_META_LENGTH: usize = 24;

/// Exact encoded size of a [`ChunkMeta`] payload.
pub const CHUNK_META_LENGTH: usize = 16;

/// Exact encoded size of a [`ProgressTick`] payload.
pub const PROGRESS_TICK_LENGTH: usize = 8;

/// Highest stream count a client may request.
pub const MAX_STREAMS: u8 = 100;

/// Width of an MD5 digest on the wire.
pub const MD5_LENGTH: usize = 16;

/// Digest sentinel sent when the client did not request verification.
pub const ZERO_DIGEST: [u8; MD5_LENGTH] = [0; MD5_LENGTH];

/// Application error codes carried on QUIC connection close.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCode {
    /// Orderly shutdown after a completed transfer.
    NoError,
    /// Local I/O failure or a violated protocol invariant.
    Internal,
    /// Stream open or accept failure.
    Connection,
    /// Stream read or write failure, including premature EOF.
    Transport,
}

impl CloseCode {
    /// Returns the numeric code placed on the wire.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            CloseCode::NoError => 0x0,
            CloseCode::Internal => 0x1,
            CloseCode::Connection => 0x2,
            CloseCode::Transport => 0x3,
        }
    }

    /// Maps a received application code back to its meaning, if known.
    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            0x0 => Some(CloseCode::NoError),
            0x1 => Some(CloseCode::Internal),
            0x2 => Some(CloseCode::Connection),
            0x3 => Some(CloseCode::Transport),
            _ => None,
        }
    }
}
