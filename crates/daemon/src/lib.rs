#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `qft_daemon` is the serving side of the transfer protocol. One endpoint
//! accepts QUIC connections forever; each connection gets a task that
//! accepts bidirectional control streams in a loop, and each control stream
//! is handled independently: read the request, stat the source, answer with
//! the 24-byte file meta, then fan the file out over N unidirectional data
//! streams, each fed by its own read-only open of the source through pooled
//! positional reads.
//!
//! A connection that fails is closed with a typed application code and
//! logged; the accept loop itself never stops because one peer misbehaved.

mod error;
mod frontend;
mod server;

pub use error::HandlerError;
pub use frontend::run;
pub use server::{FileServer, ServerOptions};
