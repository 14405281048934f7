//! The client-side error taxonomy and its close-code mapping.

use std::io;

use qft_checksums::ChecksumError;
use qft_protocol::{CloseCode, WireError};
use qft_transport::SetupError;

/// Failure of a transfer, from configuration checks through verification.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The options were invalid; no network activity happened.
    #[error("invalid transfer configuration: {0}")]
    Config(String),
    /// Establishing the connection failed; no connection exists.
    #[error(transparent)]
    Setup(#[from] SetupError),
    /// A wire payload violated its fixed layout.
    #[error("malformed payload: {0}")]
    Payload(#[from] WireError),
    /// Opening or accepting a stream failed.
    #[error("stream open/accept failure: {0}")]
    Connection(String),
    /// A stream read or write failed, including EOF before the advertised
    /// chunk size was delivered.
    #[error("transport failure: {0}")]
    Transport(String),
    /// A chunk header advertised a span outside the file.
    #[error("chunk span {offset}+{size} exceeds file size {file_size}")]
    InvalidChunk {
        /// Advertised start offset.
        offset: u64,
        /// Advertised chunk size.
        size: u64,
        /// File size from the control exchange.
        file_size: u64,
    },
    /// Local file I/O failed.
    #[error("local i/o failure while {context}: {source}")]
    LocalIo {
        /// What the transfer was doing when the failure hit.
        context: String,
        /// The underlying error.
        source: io::Error,
    },
    /// Digest computation or sidecar handling failed.
    #[error("checksum failure: {0}")]
    Checksum(#[from] ChecksumError),
    /// The finished file does not match the source digest. The destination
    /// has been deleted.
    #[error("integrity mismatch: source md5 {expected}, local md5 {computed}")]
    IntegrityMismatch {
        /// Hex digest advertised by the server.
        expected: String,
        /// Hex digest of the received file.
        computed: String,
    },
}

impl TransferError {
    pub(crate) fn local_io(context: impl Into<String>, source: io::Error) -> Self {
        TransferError::LocalIo {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn transport(detail: impl ToString) -> Self {
        TransferError::Transport(detail.to_string())
    }

    pub(crate) fn join(err: tokio::task::JoinError) -> Self {
        TransferError::local_io("waiting for a blocking task", io::Error::other(err))
    }

    /// The application close code a task failing with this error puts on
    /// the connection, if the failure maps to one.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            TransferError::Config(_) | TransferError::Setup(_) => None,
            TransferError::Payload(_)
            | TransferError::InvalidChunk { .. }
            | TransferError::LocalIo { .. }
            | TransferError::Checksum(_) => Some(CloseCode::Internal),
            TransferError::Connection(_) => Some(CloseCode::Connection),
            TransferError::Transport(_) => Some(CloseCode::Transport),
            // Verification runs after the streams are done; the connection
            // closes cleanly either way.
            TransferError::IntegrityMismatch { .. } => Some(CloseCode::NoError),
        }
    }
}

impl From<quinn::ReadExactError> for TransferError {
    fn from(err: quinn::ReadExactError) -> Self {
        match err {
            quinn::ReadExactError::FinishedEarly(read) => {
                TransferError::Transport(format!("stream finished after {read} header bytes"))
            }
            quinn::ReadExactError::ReadError(err) => TransferError::transport(err),
        }
    }
}
