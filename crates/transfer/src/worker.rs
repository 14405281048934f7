//! Per-stream reader/writer tasks.
//!
//! Every accepted data stream is handled the same way: read the 16-byte
//! chunk header, make sure the destination has its final size, then drain
//! exactly `chunk_size` body bytes into the file at the advertised offset.
//! Short reads are normal; the loop ends on byte count, not on EOF. A
//! stream that finishes early underdelivered and fails the transfer.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use qft_pool::{ByteBufferPool, WriteChunk, WriteChunkPool};
use qft_protocol::{CHUNK_META_LENGTH, ChunkMeta};
use tokio::sync::{OnceCell, mpsc, watch};
use tokio::task;
use tracing::debug;

use crate::error::TransferError;

/// State shared by every worker of one transfer.
pub(crate) struct WorkerContext {
    pub dst_path: Arc<PathBuf>,
    pub file_size: u64,
    pub byte_pool: Arc<ByteBufferPool>,
    pub bytes_received: Arc<AtomicU64>,
    pub progress: watch::Sender<()>,
}

/// Where a worker puts the bytes it drains.
pub(crate) enum WriteBackend {
    /// Positional writes through a per-worker open of the destination. The
    /// latch elects the single worker that truncates the file first.
    Direct { resized: Arc<OnceCell<()>> },
    /// Hand pooled chunks to the mapped-write copy tasks.
    Mapped {
        tx: mpsc::Sender<WriteChunk>,
        chunk_pool: Arc<WriteChunkPool>,
    },
}

pub(crate) async fn run(
    mut stream: quinn::RecvStream,
    ctx: Arc<WorkerContext>,
    backend: WriteBackend,
) -> Result<(), TransferError> {
    let mut header = [0u8; CHUNK_META_LENGTH];
    stream.read_exact(&mut header).await?;
    let meta = ChunkMeta::decode(&header)?;

    let end = meta.start_offset.checked_add(meta.chunk_size);
    if end.is_none_or(|end| end > ctx.file_size) {
        return Err(TransferError::InvalidChunk {
            offset: meta.start_offset,
            size: meta.chunk_size,
            file_size: ctx.file_size,
        });
    }
    debug!(
        offset = meta.start_offset,
        size = meta.chunk_size,
        "data stream accepted"
    );

    match backend {
        WriteBackend::Direct { resized } => direct(stream, &ctx, meta, &resized).await,
        WriteBackend::Mapped { tx, chunk_pool } => {
            mapped(stream, &ctx, meta, &tx, &chunk_pool).await
        }
    }
}

/// Truncates the destination exactly once across all workers; losers wait
/// for the winner instead of spinning.
async fn ensure_sized(resized: &OnceCell<()>, ctx: &WorkerContext) -> Result<(), TransferError> {
    let path = Arc::clone(&ctx.dst_path);
    let file_size = ctx.file_size;
    resized
        .get_or_try_init(|| async move {
            task::spawn_blocking(move || {
                let file = OpenOptions::new().write(true).open(path.as_path())?;
                file.set_len(file_size)
            })
            .await
            .map_err(TransferError::join)?
            .map_err(|err| TransferError::local_io("sizing the destination", err))
        })
        .await?;
    Ok(())
}

async fn direct(
    mut stream: quinn::RecvStream,
    ctx: &WorkerContext,
    meta: ChunkMeta,
    resized: &OnceCell<()>,
) -> Result<(), TransferError> {
    ensure_sized(resized, ctx).await?;

    let path = Arc::clone(&ctx.dst_path);
    let file = task::spawn_blocking(move || OpenOptions::new().write(true).open(path.as_path()))
        .await
        .map_err(TransferError::join)?
        .map_err(|err| TransferError::local_io("opening the destination", err))?;
    let file = Arc::new(file);

    let capacity = ctx.byte_pool.buffer_capacity().max(1);
    let mut buf = ctx.byte_pool.acquire();
    buf.resize(capacity, 0);

    let mut written = 0u64;
    while written < meta.chunk_size {
        let remaining = meta.chunk_size - written;
        let want = if remaining < capacity as u64 {
            remaining as usize
        } else {
            capacity
        };

        let n = read_some(&mut stream, &mut buf[..want], meta, written).await?;
        note_progress(ctx, n);

        let offset = meta.start_offset + written;
        let handle = Arc::clone(&file);
        buf = task::spawn_blocking(move || -> io::Result<Vec<u8>> {
            handle.write_all_at(&buf[..n], offset)?;
            Ok(buf)
        })
        .await
        .map_err(TransferError::join)?
        .map_err(|err| TransferError::local_io("writing a chunk", err))?;

        written += n as u64;
    }

    ctx.byte_pool.release(buf);
    Ok(())
}

async fn mapped(
    mut stream: quinn::RecvStream,
    ctx: &WorkerContext,
    meta: ChunkMeta,
    tx: &mpsc::Sender<WriteChunk>,
    chunk_pool: &WriteChunkPool,
) -> Result<(), TransferError> {
    let capacity = ctx.byte_pool.buffer_capacity().max(1);

    let mut written = 0u64;
    while written < meta.chunk_size {
        let remaining = meta.chunk_size - written;
        let want = if remaining < capacity as u64 {
            remaining as usize
        } else {
            capacity
        };

        let mut buf = ctx.byte_pool.acquire();
        buf.resize(want, 0);
        let n = read_some(&mut stream, &mut buf[..], meta, written).await?;
        buf.truncate(n);
        note_progress(ctx, n);

        let mut chunk = chunk_pool.acquire();
        chunk.offset = meta.start_offset + written;
        chunk.data = buf;
        tx.send(chunk).await.map_err(|_| {
            TransferError::local_io("queueing a mapped write", io::Error::other("writers gone"))
        })?;

        written += n as u64;
    }
    Ok(())
}

async fn read_some(
    stream: &mut quinn::RecvStream,
    buf: &mut [u8],
    meta: ChunkMeta,
    written: u64,
) -> Result<usize, TransferError> {
    match stream.read(buf).await {
        Ok(Some(n)) => Ok(n),
        Ok(None) => Err(TransferError::Transport(format!(
            "stream finished after {written} of {} chunk bytes",
            meta.chunk_size
        ))),
        Err(err) => Err(TransferError::transport(err)),
    }
}

fn note_progress(ctx: &WorkerContext, read: usize) {
    ctx.bytes_received.fetch_add(read as u64, Ordering::Relaxed);
    let _ = ctx.progress.send(());
}
