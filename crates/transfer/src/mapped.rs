//! The memory-mapped write path.
//!
//! The destination is pre-sized and mapped once; per-stream readers hand
//! pooled [`WriteChunk`]s through a channel to a fixed pool of copy tasks,
//! and a flusher drains a single-slot signal to schedule asynchronous
//! msyncs while the transfer is still running. The final synchronous flush
//! and the unmap happen when the transfer completes.

use std::fs::File;
use std::io;
use std::sync::Arc;

use memmap2::MmapMut;
use qft_pool::{ByteBufferPool, WriteChunk, WriteChunkPool};
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

/// A writable view of the pre-sized destination file, shared by the copy
/// tasks.
pub(crate) struct MappedDest {
    ptr: *mut u8,
    len: usize,
    map: MmapMut,
}

impl MappedDest {
    /// Maps `file`, which must already have its final length. Fails for
    /// zero-length files; callers skip the mapped path in that case.
    #[allow(unsafe_code)]
    pub(crate) fn new(file: &File) -> io::Result<Self> {
        // SAFETY: the file is exclusively owned by this transfer for its
        // whole duration; no other mapping or writer mutates it.
        let mut map = unsafe { MmapMut::map_mut(file)? };
        let ptr = map.as_mut_ptr();
        let len = map.len();
        Ok(Self { ptr, len, map })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Copies `data` into the mapping at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range falls outside the mapping; callers validate
    /// chunk spans against the file size before writing.
    #[allow(unsafe_code)]
    pub(crate) fn write_at(&self, offset: u64, data: &[u8]) {
        let offset = usize::try_from(offset).expect("offset fits the mapping");
        assert!(offset + data.len() <= self.len, "write outside the mapping");
        // SAFETY: bounds checked above; concurrent writers copy into
        // disjoint chunk ranges, and `map` keeps the region alive.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
        }
    }

    pub(crate) fn flush_async(&self) -> io::Result<()> {
        self.map.flush_async()
    }

    pub(crate) fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }
}

// SAFETY: the raw pointer aliases memory owned by `map`, which lives as
// long as the value; mutation discipline (disjoint ranges) is upheld by the
// chunk partition.
#[allow(unsafe_code)]
unsafe impl Send for MappedDest {}
#[allow(unsafe_code)]
unsafe impl Sync for MappedDest {}

/// One copy task: drains the shared chunk channel into the mapping,
/// recycling buffers and descriptors, ringing the flusher after each copy.
pub(crate) async fn copy_task(
    dest: Arc<MappedDest>,
    rx: Arc<Mutex<mpsc::Receiver<WriteChunk>>>,
    byte_pool: Arc<ByteBufferPool>,
    chunk_pool: Arc<WriteChunkPool>,
    flush_signal: mpsc::Sender<()>,
) {
    loop {
        let chunk = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(mut chunk) = chunk else { break };

        dest.write_at(chunk.offset, &chunk.data);
        let _ = flush_signal.try_send(());

        byte_pool.release(std::mem::take(&mut chunk.data));
        chunk_pool.release(chunk);
    }
}

/// The optimistic flusher: every doorbell becomes one asynchronous msync.
/// Ends when the last writer drops its sender.
pub(crate) async fn flush_task(dest: Arc<MappedDest>, mut signal: mpsc::Receiver<()>) {
    while signal.recv().await.is_some() {
        if let Err(err) = dest.flush_async() {
            warn!("optimistic flush failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn sized_file(len: u64) -> (tempfile::TempDir, File) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dest");
        let file = File::options()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        file.set_len(len).unwrap();
        (dir, file)
    }

    #[test]
    fn writes_land_at_their_offsets() {
        let (dir, file) = sized_file(8);
        let dest = MappedDest::new(&file).unwrap();
        dest.write_at(0, b"abcd");
        dest.write_at(4, b"efgh");
        dest.flush().unwrap();
        drop(dest);

        let mut contents = Vec::new();
        File::open(dir.path().join("dest"))
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"abcdefgh");
    }

    #[test]
    #[should_panic(expected = "write outside the mapping")]
    fn out_of_bounds_writes_are_refused() {
        let (_dir, file) = sized_file(4);
        let dest = MappedDest::new(&file).unwrap();
        dest.write_at(2, b"abc");
    }

    #[tokio::test]
    async fn copy_tasks_drain_the_channel_and_recycle() {
        let (_dir, file) = sized_file(6);
        let dest = Arc::new(MappedDest::new(&file).unwrap());
        let byte_pool = Arc::new(ByteBufferPool::new(16, 4));
        let chunk_pool = Arc::new(WriteChunkPool::new(4));
        let (tx, rx) = mpsc::channel(4);
        let (flush_tx, mut flush_rx) = mpsc::channel(1);

        let writer = tokio::spawn(copy_task(
            Arc::clone(&dest),
            Arc::new(Mutex::new(rx)),
            Arc::clone(&byte_pool),
            Arc::clone(&chunk_pool),
            flush_tx,
        ));

        for (offset, data) in [(0u64, b"foo".as_slice()), (3, b"bar".as_slice())] {
            let mut chunk = chunk_pool.acquire();
            chunk.offset = offset;
            chunk.data = data.to_vec();
            tx.send(chunk).await.unwrap();
        }
        drop(tx);
        writer.await.unwrap();

        assert_eq!(dest.len(), 6);
        assert!(flush_rx.recv().await.is_some());
        dest.flush().unwrap();
    }
}
