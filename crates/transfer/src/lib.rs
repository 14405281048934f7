#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `qft_transfer` is the client side of the transfer engine. One control
//! exchange learns the file size and (optionally) the source digest, then N
//! unidirectional streams deliver offset-aligned chunks in parallel. Each
//! accepted stream gets a worker task that drains its chunk into the
//! destination file with positional writes; a progress task turns the
//! shared byte counter into occasional log lines; and when verification was
//! requested the finished file is digested and compared before a sidecar is
//! written.
//!
//! Two write paths implement the same contract: the default pwrites into
//! per-worker opens of the destination, and [`WriteMode::Mapped`] funnels
//! chunks through a channel into a pool of writers that copy into a
//! memory-mapped view of the pre-sized file.
//!
//! # Ordering
//!
//! The control exchange strictly precedes data-stream acceptance. Exactly
//! one worker truncates the destination to its final size (a `OnceCell`
//! latch; the losers await the winner) and every write lands after that.
//! Workers complete in arbitrary order; chunks are disjoint so their writes
//! never overlap.

mod client;
mod error;
mod mapped;
mod progress;
mod worker;

pub use client::{Client, ClientOptions, WriteMode};
pub use error::TransferError;

/// Capacity of pooled read buffers on the client write paths.
pub const WRITE_SIZE: usize = qft_transport::MAX_STREAM_RECEIVE_WINDOW as usize;

/// Default number of copy tasks for [`WriteMode::Mapped`].
pub const DEFAULT_WRITERS: usize = 4;
