#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `qft_pool` caps allocation on the transfer hot paths by recycling the
//! two objects that churn the most: the large scratch buffers that stream
//! bodies are read into, and the small [`WriteChunk`] descriptors handed
//! from network readers to disk writers.
//!
//! Both pools are optimizations, not semaphores. Acquiring never blocks:
//! an empty store allocates a fresh object, and releasing into a full
//! store simply drops the object. The stores are bounded lock-free queues,
//! safe to share across tasks behind an `Arc`.

use crossbeam_queue::ArrayQueue;

/// A bounded pool of byte buffers with a fixed capacity per buffer.
///
/// Acquired buffers have logical length zero but retain their full
/// allocation, so callers distinguish capacity from length the same way
/// `Vec` does.
#[derive(Debug)]
pub struct ByteBufferPool {
    store: ArrayQueue<Vec<u8>>,
    buffer_capacity: usize,
}

impl ByteBufferPool {
    /// Creates a pool of up to `slots` buffers of `buffer_capacity` bytes
    /// each, preallocating every slot.
    #[must_use]
    pub fn new(buffer_capacity: usize, slots: usize) -> Self {
        let store = ArrayQueue::new(slots.max(1));
        for _ in 0..store.capacity() {
            let _ = store.push(Vec::with_capacity(buffer_capacity));
        }
        Self {
            store,
            buffer_capacity,
        }
    }

    /// Capacity of every buffer this pool hands out.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Pops a recycled buffer, or allocates a fresh one when the store is
    /// empty. Never blocks.
    #[must_use]
    pub fn acquire(&self) -> Vec<u8> {
        self.store
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_capacity))
    }

    /// Returns a buffer to the store with its length reset to zero. The
    /// allocation is dropped when the store is already full.
    pub fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        let _ = self.store.push(buffer);
    }
}

/// A chunk of received data plus the file offset it belongs at, passed from
/// network readers to disk writers.
#[derive(Debug, Default)]
pub struct WriteChunk {
    /// Destination offset of the first byte of `data`.
    pub offset: u64,
    /// The received bytes.
    pub data: Vec<u8>,
}

/// A bounded pool of [`WriteChunk`] descriptors.
#[derive(Debug)]
pub struct WriteChunkPool {
    store: ArrayQueue<WriteChunk>,
}

impl WriteChunkPool {
    /// Creates a pool holding up to `slots` descriptors.
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self {
            store: ArrayQueue::new(slots.max(1)),
        }
    }

    /// Pops a recycled descriptor, or builds an empty one when the store is
    /// empty. Never blocks.
    #[must_use]
    pub fn acquire(&self) -> WriteChunk {
        self.store.pop().unwrap_or_default()
    }

    /// Zeroes both fields and returns the descriptor to the store. Callers
    /// that want the data buffer back should take it before releasing.
    pub fn release(&self, mut chunk: WriteChunk) {
        chunk.offset = 0;
        chunk.data = Vec::new();
        let _ = self.store.push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn acquired_buffers_are_empty_with_full_capacity() {
        let pool = ByteBufferPool::new(4096, 2);
        let buf = pool.acquire();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), 4096);
    }

    #[test]
    fn release_resets_length_and_keeps_allocation() {
        let pool = ByteBufferPool::new(1024, 1);
        // Drain the preallocated slot so the recycled buffer is observable.
        let preallocated = pool.acquire();
        drop(preallocated);

        let mut buf = pool.acquire();
        buf.extend_from_slice(&[7u8; 512]);
        let ptr = buf.as_ptr();
        pool.release(buf);

        let recycled = pool.acquire();
        assert_eq!(recycled.len(), 0);
        assert!(recycled.capacity() >= 512);
        assert_eq!(recycled.as_ptr(), ptr);
    }

    #[test]
    fn empty_store_allocates_instead_of_blocking() {
        let pool = ByteBufferPool::new(64, 1);
        let first = pool.acquire();
        let second = pool.acquire();
        assert_eq!(second.capacity(), 64);
        drop((first, second));
    }

    #[test]
    fn full_store_drops_excess_releases() {
        let pool = ByteBufferPool::new(64, 1);
        pool.release(Vec::with_capacity(64));
        // A second release must not panic or block even though the store
        // only has one slot.
        pool.release(Vec::with_capacity(64));
    }

    #[test]
    fn write_chunks_are_zeroed_on_release() {
        let pool = WriteChunkPool::new(1);
        let _ = pool.acquire();

        let chunk = WriteChunk {
            offset: 42,
            data: vec![1, 2, 3],
        };
        pool.release(chunk);

        let recycled = pool.acquire();
        assert_eq!(recycled.offset, 0);
        assert!(recycled.data.is_empty());
    }

    #[test]
    fn pools_are_shareable_across_threads() {
        let pool = Arc::new(ByteBufferPool::new(256, 8));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let mut buf = pool.acquire();
                        buf.push(1);
                        pool.release(buf);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
