//! A size-class pool of scratch CPU buffers (§4.2), used by CPU nodes
//! that need working memory (e.g. a YUV conversion scratch area)
//! without allocating fresh on every frame.

use std::collections::HashMap;
use std::sync::Mutex;

/// Rounds `size` up to the next power-of-two size class, so a modest
/// number of distinct request sizes still map onto a small number of
/// buckets.
fn size_class(size: usize) -> usize {
    size.max(1).next_power_of_two()
}

#[derive(Debug, Default)]
struct BufferPoolInner {
    idle: HashMap<usize, Vec<Vec<u8>>>,
    in_use_bytes: usize,
}

#[derive(Debug, Default)]
pub struct BufferPool {
    inner: Mutex<BufferPoolInner>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a zeroed buffer of at least `size` bytes, reused from
    /// the matching size class if one is idle.
    pub fn acquire(&self, size: usize) -> Vec<u8> {
        let class = size_class(size);
        let mut inner = self.inner.lock().expect(crate::THREAD_PANIC_MSG);
        inner.in_use_bytes += class;
        if let Some(buf) = inner.idle.get_mut(&class).and_then(Vec::pop) {
            let mut buf = buf;
            buf.iter_mut().for_each(|b| *b = 0);
            buf.resize(size, 0);
            return buf;
        }
        vec![0u8; size]
    }

    /// Returns a buffer to its size class for reuse. The buffer's
    /// current length determines its class, so callers must not grow
    /// a buffer's capacity arbitrarily between acquire and release.
    pub fn release(&self, mut buffer: Vec<u8>) {
        let class = size_class(buffer.len());
        buffer.resize(class, 0);
        let mut inner = self.inner.lock().expect(crate::THREAD_PANIC_MSG);
        inner.in_use_bytes = inner.in_use_bytes.saturating_sub(class);
        inner.idle.entry(class).or_default().push(buffer);
    }

    pub fn clear(&self) {
        self.inner.lock().expect(crate::THREAD_PANIC_MSG).idle.clear();
    }

    /// Total bytes held across idle buffers only (in-use buffers are
    /// owned by their caller and not tracked by byte count here).
    pub fn memory_usage(&self) -> usize {
        self.inner
            .lock()
            .expect(crate::THREAD_PANIC_MSG)
            .idle
            .iter()
            .map(|(class, bufs)| class * bufs.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_round_trip_reuses_allocation() {
        let pool = BufferPool::new();
        let buf = pool.acquire(100);
        assert_eq!(buf.len(), 100);
        pool.release(buf);
        assert!(pool.memory_usage() >= 100);
        let buf2 = pool.acquire(100);
        assert_eq!(buf2.len(), 100);
        assert!(buf2.iter().all(|&b| b == 0));
    }

    #[test]
    fn distinct_size_classes_do_not_collide() {
        let pool = BufferPool::new();
        pool.release(vec![1u8; 64]);
        pool.release(vec![2u8; 256]);
        assert_eq!(pool.acquire(50).len(), 50);
        assert_eq!(pool.acquire(200).len(), 200);
    }
}
