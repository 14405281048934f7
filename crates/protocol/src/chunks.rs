//! Partitioning of a file into per-stream chunks.

use std::num::NonZeroU8;

use crate::ChunkMeta;

/// Computes the chunk assigned to data stream `index` of `streams`.
///
/// Every stream receives `file_size / streams` bytes starting at
/// `index * (file_size / streams)`; the final stream additionally takes the
/// division remainder. The spans produced for `0..streams` are disjoint,
/// contiguous and cover `[0, file_size)` exactly.
///
/// # Panics
///
/// Panics if `index` is not less than `streams`.
#[must_use]
pub fn chunk_span(file_size: u64, streams: NonZeroU8, index: u8) -> ChunkMeta {
    assert!(index < streams.get(), "stream index out of range");

    let streams = u64::from(streams.get());
    let base = file_size / streams;
    let mut chunk_size = base;
    if u64::from(index) == streams - 1 {
        chunk_size += file_size % streams;
    }

    ChunkMeta {
        start_offset: u64::from(index) * base,
        chunk_size,
    }
}

/// Computes the full partition for `streams` data streams, in stream order.
#[must_use]
pub fn chunk_spans(file_size: u64, streams: NonZeroU8) -> Vec<ChunkMeta> {
    (0..streams.get())
        .map(|index| chunk_span(file_size, streams, index))
        .collect()
}
