#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `qft_checksums` computes and validates the MD5 digests qft uses for
//! end-to-end content verification: a streaming digest over a finished
//! file, the strict 16-byte hex codec, and the `.md5` sidecar format (a hex
//! digest, possibly wrapped in whitespace or other ASCII control
//! characters, stored next to the file it describes).
//!
//! Digest material is always exactly [`DIGEST_LENGTH`] bytes; every decoder
//! in this crate rejects any other width instead of truncating or padding.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use digest::Digest;
use md5::Md5;

/// Width of an MD5 digest in bytes.
pub const DIGEST_LENGTH: usize = 16;

const READ_BUFFER_LENGTH: usize = 64 * 1024;

/// Failure to compute, encode or decode digest material.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// Digest material was not exactly [`DIGEST_LENGTH`] bytes.
    #[error("md5 digest must be {DIGEST_LENGTH} bytes, got {0}")]
    Length(usize),
    /// Sidecar contents were not valid hex.
    #[error("invalid hex digit {0:?} in md5 digest")]
    HexDigit(char),
    /// Reading the file or its sidecar failed.
    #[error("checksum i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Computes the MD5 digest of the file at `path` with a single streaming
/// pass.
pub fn file_digest(path: &Path) -> Result<[u8; DIGEST_LENGTH], ChecksumError> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_BUFFER_LENGTH];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().into())
}

/// Encodes a digest as lowercase hex. The input must be exactly
/// [`DIGEST_LENGTH`] bytes.
pub fn to_hex(digest: &[u8]) -> Result<String, ChecksumError> {
    if digest.len() != DIGEST_LENGTH {
        return Err(ChecksumError::Length(digest.len()));
    }

    let mut out = String::with_capacity(DIGEST_LENGTH * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    Ok(out)
}

/// Decodes a hex digest. The input must decode to exactly
/// [`DIGEST_LENGTH`] bytes.
pub fn from_hex(hex: &str) -> Result<[u8; DIGEST_LENGTH], ChecksumError> {
    if hex.len() != DIGEST_LENGTH * 2 {
        return Err(ChecksumError::Length(hex.len().div_ceil(2)));
    }

    let mut digest = [0u8; DIGEST_LENGTH];
    for (slot, pair) in digest.iter_mut().zip(hex.as_bytes().chunks_exact(2)) {
        let hi = hex_value(pair[0])?;
        let lo = hex_value(pair[1])?;
        *slot = (hi << 4) | lo;
    }
    Ok(digest)
}

fn hex_value(byte: u8) -> Result<u8, ChecksumError> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        other => Err(ChecksumError::HexDigit(char::from(other))),
    }
}

/// Reads a `.md5` sidecar file: ASCII control characters (newlines,
/// carriage returns, tabs) are stripped before the hex decode, and the
/// result must be a full digest.
pub fn read_sidecar(path: &Path) -> Result<[u8; DIGEST_LENGTH], ChecksumError> {
    let raw = std::fs::read_to_string(path)?;
    let cleaned: String = raw.chars().filter(|c| !c.is_ascii_control()).collect();
    from_hex(cleaned.trim())
}

/// Writes the hex form of `digest` to a sidecar at `path`.
pub fn write_sidecar(path: &Path, digest: &[u8; DIGEST_LENGTH]) -> Result<(), ChecksumError> {
    let hex = to_hex(digest)?;
    std::fs::write(path, hex)?;
    Ok(())
}
