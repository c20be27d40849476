//! Pooled scratch buffers
//!
//! Write batching, checkpoint rewrites, and prune streaming all need
//! short-lived byte buffers. Rather than allocating per operation, a
//! process-wide pool hands out recycled `Vec<u8>`s; dropping the
//! [`PooledBuffer`] returns the allocation to the pool.
//!
//! The pool is shared across every open store in the process.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Maximum number of idle buffers retained by the pool
const MAX_POOLED: usize = 64;

/// Buffers larger than this are dropped instead of pooled, so one oversized
/// batch does not pin memory forever
const MAX_RETAINED_CAPACITY: usize = 4 * 1024 * 1024;

/// Process-wide buffer pool shared across stores
pub static BUFFER_POOL: Lazy<BufferPool> = Lazy::new(BufferPool::new);

/// A pool of reusable byte buffers
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    fn new() -> Self {
        BufferPool {
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Acquire a cleared buffer with at least `capacity` bytes reserved.
    pub fn acquire(&'static self, capacity: usize) -> PooledBuffer {
        let mut idle = self.idle.lock();
        let mut buf = idle.pop().unwrap_or_default();
        drop(idle);

        buf.clear();
        if buf.capacity() < capacity {
            buf.reserve(capacity - buf.capacity());
        }
        PooledBuffer {
            pool: self,
            buf: Some(buf),
        }
    }

    /// Number of idle buffers currently held
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, buf: Vec<u8>) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < MAX_POOLED {
            idle.push(buf);
        }
    }
}

/// A scratch buffer checked out from a [`BufferPool`]
///
/// Dereferences to `Vec<u8>`; the allocation returns to the pool on drop.
pub struct PooledBuffer {
    pool: &'static BufferPool,
    buf: Option<Vec<u8>>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_cleared_and_sized() {
        let mut buf = BUFFER_POOL.acquire(1024);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 1024);
        buf.extend_from_slice(b"scratch");
        assert_eq!(&buf[..], b"scratch");
    }

    #[test]
    fn test_buffer_returns_to_pool() {
        let before = BUFFER_POOL.idle_count();
        {
            let mut buf = BUFFER_POOL.acquire(64);
            buf.push(1);
        }
        assert!(BUFFER_POOL.idle_count() >= before);

        // The recycled buffer comes back cleared
        let buf = BUFFER_POOL.acquire(64);
        assert!(buf.is_empty());
    }
}
