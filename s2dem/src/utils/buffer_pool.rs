use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::utils::bit_cursor::{BitCursor, SLED, Source};

/// Buffer capacity for cursors over short blobs (packets, table data).
pub const SMALL_BUFFER: usize = 512;

/// Buffer capacity for the cursor over the whole recording.
pub const LARGE_BUFFER: usize = 128 * 1024;

/// A thread-safe pool of reusable cursor buffers of one size.
///
/// Buffers handed out by [`acquire`](Self::acquire) are owned by the caller
/// until they come back through [`release`](Self::release).
#[derive(Debug, Clone)]
pub struct BufferPool {
    pool: Arc<Mutex<VecDeque<Vec<u8>>>>,
    max_size: usize,
    buffer_capacity: usize,
}

impl BufferPool {
    /// Creates a new buffer pool.
    ///
    /// # Arguments
    ///
    /// * `max_size` - Maximum number of idle buffers kept in the pool
    /// * `buffer_capacity` - Cursor generation size of every buffer in bytes
    pub fn new(max_size: usize, buffer_capacity: usize) -> Self {
        Self {
            pool: Arc::new(Mutex::new(VecDeque::with_capacity(max_size))),
            max_size,
            buffer_capacity,
        }
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Acquires an empty buffer from the pool or allocates a new one.
    pub fn acquire(&self) -> Vec<u8> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        pool.pop_front()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_capacity + SLED))
    }

    /// Returns a buffer to the pool. It is marked empty before reuse.
    pub fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();

        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < self.max_size {
            pool.push_back(buffer);
        }
    }

    pub fn idle(&self) -> usize {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Size class of a pooled cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Small,
    Large,
}

/// Hands out [`BitCursor`]s backed by pooled buffers, one pool per
/// [`SizeClass`].
#[derive(Debug, Clone)]
pub struct CursorPool {
    small: BufferPool,
    large: BufferPool,
}

impl Default for CursorPool {
    fn default() -> Self {
        Self {
            small: BufferPool::new(64, SMALL_BUFFER),
            large: BufferPool::new(2, LARGE_BUFFER),
        }
    }
}

impl CursorPool {
    pub fn pool(&self, class: SizeClass) -> &BufferPool {
        match class {
            SizeClass::Small => &self.small,
            SizeClass::Large => &self.large,
        }
    }

    /// Opens a cursor over `source` with a buffer taken from the given pool.
    pub fn acquire<S: Source>(&self, class: SizeClass, source: S) -> BitCursor<S> {
        let pool = self.pool(class);
        BitCursor::with_buffer(source, pool.acquire(), pool.buffer_capacity())
    }

    /// Detaches the cursor from its source and returns its buffer to the
    /// pool it belongs to.
    pub fn release<S: Source>(&self, cursor: BitCursor<S>) {
        let class = if cursor.capacity() >= LARGE_BUFFER {
            SizeClass::Large
        } else {
            SizeClass::Small
        };
        let (_, buffer) = cursor.into_parts();
        self.pool(class).release(buffer);
    }
}

#[test]
fn buffers_are_reused() {
    let pool = BufferPool::new(1, 16);
    let mut first = pool.acquire();
    first.extend_from_slice(&[1, 2, 3]);
    let ptr = first.as_ptr();
    pool.release(first);
    assert_eq!(pool.idle(), 1);

    let second = pool.acquire();
    assert!(second.is_empty());
    assert_eq!(second.as_ptr(), ptr);

    pool.release(second);
    pool.release(Vec::new());
    assert_eq!(pool.idle(), 1);
}

#[test]
fn cursors_return_to_their_size_class() -> anyhow::Result<()> {
    let pools = CursorPool::default();

    let mut small = pools.acquire(SizeClass::Small, &[0xAB_u8, 0xCD][..]);
    assert_eq!(small.read_byte()?, 0xAB);
    pools.release(small);
    assert_eq!(pools.pool(SizeClass::Small).idle(), 1);
    assert_eq!(pools.pool(SizeClass::Large).idle(), 0);

    let large = pools.acquire(SizeClass::Large, &[][..]);
    pools.release(large);
    assert_eq!(pools.pool(SizeClass::Large).idle(), 1);

    let mut reused = pools.acquire(SizeClass::Small, &[0x11_u8][..]);
    assert_eq!(reused.read_byte()?, 0x11);
    Ok(())
}
