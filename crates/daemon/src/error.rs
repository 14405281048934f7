//! Per-connection failure taxonomy on the serving side.

use std::io;

use qft_checksums::ChecksumError;
use qft_protocol::{CloseCode, WireError};

/// Failure while serving one control stream or one of its data streams.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The request violated the wire layout.
    #[error("malformed payload: {0}")]
    Payload(#[from] WireError),
    /// Opening a data stream failed.
    #[error("stream open failure: {0}")]
    Connection(String),
    /// A stream read or write failed.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Opening, statting or reading the source failed.
    #[error("local i/o failure while {context}: {source}")]
    LocalIo {
        /// What the handler was doing when the failure hit.
        context: String,
        /// The underlying error.
        source: io::Error,
    },
    /// The digest sidecar was missing or malformed.
    #[error("checksum failure: {0}")]
    Checksum(#[from] ChecksumError),
}

impl HandlerError {
    pub(crate) fn local_io(context: impl Into<String>, source: io::Error) -> Self {
        HandlerError::LocalIo {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn transport(detail: impl ToString) -> Self {
        HandlerError::Transport(detail.to_string())
    }

    pub(crate) fn join(err: tokio::task::JoinError) -> Self {
        HandlerError::local_io("waiting for a blocking task", io::Error::other(err))
    }

    /// The application close code this failure puts on the connection.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            HandlerError::Payload(_)
            | HandlerError::LocalIo { .. }
            | HandlerError::Checksum(_) => CloseCode::Internal,
            HandlerError::Connection(_) => CloseCode::Connection,
            HandlerError::Transport(_) => CloseCode::Transport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_follow_the_taxonomy() {
        assert_eq!(
            HandlerError::Payload(WireError::StreamCount(0)).close_code(),
            CloseCode::Internal
        );
        assert_eq!(
            HandlerError::Connection("open_uni".into()).close_code(),
            CloseCode::Connection
        );
        assert_eq!(
            HandlerError::Transport("reset".into()).close_code(),
            CloseCode::Transport
        );
        assert_eq!(
            HandlerError::local_io("stat", io::Error::other("gone")).close_code(),
            CloseCode::Internal
        );
    }
}
