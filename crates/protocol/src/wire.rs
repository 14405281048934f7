//! Fixed-layout little-endian payload codecs.

use std::str;

use crate::{
    CHUNK_META_LENGTH, FILE_META_LENGTH, MAX_FILENAME_LENGTH, MAX_STREAMS, MD5_LENGTH,
    PROGRESS_TICK_LENGTH,
};

/// Failure to encode or decode a wire payload.
///
/// Every variant is a malformed-payload condition: the bytes on the wire (or
/// the value being encoded) do not fit the fixed layout. Peers treat any of
/// these as fatal to the stream and escalate to a connection close.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    /// The input slice length does not match the payload's exact size.
    #[error("{payload} payload must be {expected} bytes, got {actual}")]
    Length {
        /// Payload name for diagnostics.
        payload: &'static str,
        /// Exact size the layout requires.
        expected: usize,
        /// Size observed on the wire.
        actual: usize,
    },
    /// A transfer request was shorter than its two fixed header bytes, or
    /// longer than the path bound allows.
    #[error("transfer request length {0} outside 2..={max}", max = 2 + MAX_FILENAME_LENGTH)]
    RequestLength(usize),
    /// The requested stream count is outside `1..=100`.
    #[error("stream count {0} outside 1..={MAX_STREAMS}")]
    StreamCount(u8),
    /// The request path is not valid UTF-8.
    #[error("request path is not valid UTF-8")]
    PathEncoding,
    /// The path to encode exceeds [`MAX_FILENAME_LENGTH`].
    #[error("request path length {0} exceeds {MAX_FILENAME_LENGTH}")]
    PathLength(usize),
}

fn read_u64_le(data: &[u8], payload: &'static str) -> Result<u64, WireError> {
    let bytes: [u8; 8] = data.try_into().map_err(|_| WireError::Length {
        payload,
        expected: 8,
        actual: data.len(),
    })?;
    Ok(u64::from_le_bytes(bytes))
}

const fn encode_bool(value: bool) -> u8 {
    if value { 0x01 } else { 0x00 }
}

const fn decode_bool(value: u8) -> bool {
    value == 0x01
}

/// Client request carried on the control stream.
///
/// Layout: `streams: u8`, `check_md5: u8`, then the UTF-8 source path with
/// no terminator; the path length is implied by the read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    /// Requested data-stream parallelism, `1..=100`.
    pub streams: u8,
    /// Whether the server should include the source digest in its response.
    pub check_md5: bool,
    /// Path of the source file on the server.
    pub path: String,
}

impl TransferRequest {
    /// Serializes the request.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.streams == 0 || self.streams > MAX_STREAMS {
            return Err(WireError::StreamCount(self.streams));
        }
        let path = self.path.as_bytes();
        if path.len() > MAX_FILENAME_LENGTH {
            return Err(WireError::PathLength(path.len()));
        }

        let mut buf = Vec::with_capacity(2 + path.len());
        buf.push(self.streams);
        buf.push(encode_bool(self.check_md5));
        buf.extend_from_slice(path);
        Ok(buf)
    }

    /// Deserializes a request, validating the stream count and path bounds.
    /// The path may be empty; resolving it is the filesystem's problem, not
    /// the codec's.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < 2 || data.len() > 2 + MAX_FILENAME_LENGTH {
            return Err(WireError::RequestLength(data.len()));
        }

        let streams = data[0];
        if streams == 0 || streams > MAX_STREAMS {
            return Err(WireError::StreamCount(streams));
        }

        let path = str::from_utf8(&data[2..]).map_err(|_| WireError::PathEncoding)?;
        Ok(TransferRequest {
            streams,
            check_md5: decode_bool(data[1]),
            path: path.to_owned(),
        })
    }
}

/// Server response on the control stream: file size plus source digest.
///
/// The digest field is [`crate::ZERO_DIGEST`] when the request did not ask
/// for verification; the payload is always exactly 24 bytes either way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileMeta {
    /// Total size of the source file in bytes.
    pub file_size: u64,
    /// MD5 digest of the source file, or the zero sentinel.
    pub md5: [u8; MD5_LENGTH],
}

impl FileMeta {
    /// Serializes the payload into its fixed 24-byte layout.
    #[must_use]
    pub fn encode(&self) -> [u8; FILE_META_LENGTH] {
        let mut buf = [0u8; FILE_META_LENGTH];
        buf[..8].copy_from_slice(&self.file_size.to_le_bytes());
        buf[8..].copy_from_slice(&self.md5);
        buf
    }

    /// Deserializes exactly 24 bytes.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() != FILE_META_LENGTH {
            return Err(WireError::Length {
                payload: "file-meta",
                expected: FILE_META_LENGTH,
                actual: data.len(),
            });
        }

        let mut md5 = [0u8; MD5_LENGTH];
        md5.copy_from_slice(&data[8..]);
        Ok(FileMeta {
            file_size: read_u64_le(&data[..8], "file-meta")?,
            md5,
        })
    }
}

/// First frame on every data stream: the chunk the body that follows covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkMeta {
    /// Byte offset of the chunk within the file.
    pub start_offset: u64,
    /// Number of body bytes that follow the header on this stream.
    pub chunk_size: u64,
}

impl ChunkMeta {
    /// Serializes the payload into its fixed 16-byte layout.
    #[must_use]
    pub fn encode(&self) -> [u8; CHUNK_META_LENGTH] {
        let mut buf = [0u8; CHUNK_META_LENGTH];
        buf[..8].copy_from_slice(&self.start_offset.to_le_bytes());
        buf[8..].copy_from_slice(&self.chunk_size.to_le_bytes());
        buf
    }

    /// Deserializes exactly 16 bytes.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() != CHUNK_META_LENGTH {
            return Err(WireError::Length {
                payload: "chunk-meta",
                expected: CHUNK_META_LENGTH,
                actual: data.len(),
            });
        }

        Ok(ChunkMeta {
            start_offset: read_u64_le(&data[..8], "chunk-meta")?,
            chunk_size: read_u64_le(&data[8..], "chunk-meta")?,
        })
    }
}

/// A per-read byte count, the progress frame of an earlier protocol
/// revision. Defined for wire compatibility; current peers derive progress
/// from local read counts instead of emitting it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressTick {
    /// Bytes delivered since the previous tick.
    pub bytes: u64,
}

impl ProgressTick {
    /// Serializes the payload into its fixed 8-byte layout.
    #[must_use]
    pub fn encode(&self) -> [u8; PROGRESS_TICK_LENGTH] {
        self.bytes.to_le_bytes()
    }

    /// Deserializes exactly 8 bytes.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        Ok(ProgressTick {
            bytes: read_u64_le(data, "progress-tick")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn request_round_trip() {
        let request = TransferRequest {
            streams: 8,
            check_md5: true,
            path: "/srv/files/archive.tar".to_owned(),
        };
        let encoded = request.encode().unwrap();
        assert_eq!(encoded[0], 8);
        assert_eq!(encoded[1], 0x01);
        assert_eq!(TransferRequest::decode(&encoded).unwrap(), request);
    }

    #[test]
    fn request_bool_is_strict_one() {
        let decoded = TransferRequest::decode(&[1, 0x02, b'f']).unwrap();
        assert!(!decoded.check_md5);
        let decoded = TransferRequest::decode(&[1, 0x00, b'f']).unwrap();
        assert!(!decoded.check_md5);
    }

    #[test]
    fn request_length_bounds_are_two_to_max() {
        // A bare header is a valid frame: the path is simply empty, and the
        // server's open("") fails on its own later.
        let decoded = TransferRequest::decode(&[1, 0]).unwrap();
        assert_eq!(decoded.path, "");

        assert!(matches!(
            TransferRequest::decode(&[1]),
            Err(WireError::RequestLength(1))
        ));

        let mut oversized = vec![1u8, 0u8];
        oversized.extend(std::iter::repeat_n(b'a', MAX_FILENAME_LENGTH + 1));
        assert!(matches!(
            TransferRequest::decode(&oversized),
            Err(WireError::RequestLength(_))
        ));
    }

    #[test]
    fn request_rejects_stream_counts_outside_range() {
        assert_eq!(
            TransferRequest::decode(&[0, 0, b'f']),
            Err(WireError::StreamCount(0))
        );
        assert_eq!(
            TransferRequest::decode(&[0, 0]),
            Err(WireError::StreamCount(0))
        );
        assert_eq!(
            TransferRequest::decode(&[101, 0, b'f']),
            Err(WireError::StreamCount(101))
        );
        assert!(
            TransferRequest {
                streams: 0,
                check_md5: false,
                path: "f".to_owned(),
            }
            .encode()
            .is_err()
        );
    }

    #[test]
    fn request_rejects_invalid_utf8_path() {
        assert_eq!(
            TransferRequest::decode(&[1, 0, 0xff, 0xfe]),
            Err(WireError::PathEncoding)
        );
    }

    #[test]
    fn request_with_an_empty_path_round_trips_as_two_bytes() {
        let request = TransferRequest {
            streams: 1,
            check_md5: false,
            path: String::new(),
        };
        let encoded = request.encode().unwrap();
        assert_eq!(encoded, vec![1, 0]);
        assert_eq!(TransferRequest::decode(&encoded).unwrap(), request);
    }

    #[test]
    fn request_encode_rejects_oversized_paths() {
        let request = TransferRequest {
            streams: 1,
            check_md5: false,
            path: "a".repeat(MAX_FILENAME_LENGTH + 1),
        };
        assert_eq!(
            request.encode(),
            Err(WireError::PathLength(MAX_FILENAME_LENGTH + 1))
        );
    }

    #[test]
    fn file_meta_round_trip_and_layout() {
        let meta = FileMeta {
            file_size: 0x0102_0304_0506_0708,
            md5: *b"0123456789abcdef",
        };
        let encoded = meta.encode();
        // Little-endian size in the first eight bytes.
        assert_eq!(encoded[0], 0x08);
        assert_eq!(encoded[7], 0x01);
        assert_eq!(&encoded[8..], b"0123456789abcdef");
        assert_eq!(FileMeta::decode(&encoded).unwrap(), meta);
    }

    #[test]
    fn chunk_meta_round_trip() {
        let meta = ChunkMeta {
            start_offset: 262_144,
            chunk_size: 262_147,
        };
        assert_eq!(ChunkMeta::decode(&meta.encode()).unwrap(), meta);
    }

    #[test]
    fn progress_tick_round_trip() {
        let tick = ProgressTick { bytes: u64::MAX };
        assert_eq!(ProgressTick::decode(&tick.encode()).unwrap(), tick);
    }

    #[test]
    fn fixed_payloads_reject_off_by_one_lengths() {
        let meta = FileMeta {
            file_size: 9,
            md5: [0xaa; 16],
        }
        .encode();
        assert!(FileMeta::decode(&meta[..23]).is_err());
        let mut longer = meta.to_vec();
        longer.push(0);
        assert!(FileMeta::decode(&longer).is_err());

        let chunk = ChunkMeta {
            start_offset: 1,
            chunk_size: 2,
        }
        .encode();
        assert!(ChunkMeta::decode(&chunk[..15]).is_err());
        let mut longer = chunk.to_vec();
        longer.push(0);
        assert!(ChunkMeta::decode(&longer).is_err());

        assert!(ProgressTick::decode(&[0; 7]).is_err());
        assert!(ProgressTick::decode(&[0; 9]).is_err());
    }

    proptest! {
        #[test]
        fn file_meta_round_trips(file_size in any::<u64>(), md5 in any::<[u8; 16]>()) {
            let meta = FileMeta { file_size, md5 };
            prop_assert_eq!(FileMeta::decode(&meta.encode()).unwrap(), meta);
        }

        #[test]
        fn chunk_meta_round_trips(start_offset in any::<u64>(), chunk_size in any::<u64>()) {
            let meta = ChunkMeta { start_offset, chunk_size };
            prop_assert_eq!(ChunkMeta::decode(&meta.encode()).unwrap(), meta);
        }

        #[test]
        fn request_round_trips(streams in 1u8..=100, check_md5 in any::<bool>(), path in "[a-zA-Z0-9/._-]{0,64}") {
            let request = TransferRequest { streams, check_md5, path };
            let encoded = request.encode().unwrap();
            prop_assert_eq!(TransferRequest::decode(&encoded).unwrap(), request);
        }

        #[test]
        fn file_meta_rejects_wrong_lengths(len in 0usize..64) {
            prop_assume!(len != FILE_META_LENGTH);
            prop_assert!(FileMeta::decode(&vec![0u8; len]).is_err());
        }

        #[test]
        fn chunk_meta_rejects_wrong_lengths(len in 0usize..64) {
            prop_assume!(len != CHUNK_META_LENGTH);
            prop_assert!(ChunkMeta::decode(&vec![0u8; len]).is_err());
        }
    }
}
