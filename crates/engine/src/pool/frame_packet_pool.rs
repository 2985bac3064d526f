//! A single bounded pool of recyclable frame packets (§4.2, I-FP-1).
//! Unlike [crate::pool::texture_pool::TexturePool], which buckets by
//! `(width, height, format)`, the frame packet pool is one shared
//! queue: packets are lightweight metadata wrappers, and a size
//! mismatch on reuse just means the wrapper's texture gets dropped and
//! reallocated through the texture pool, not that the whole packet is
//! discarded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::frame_packet::{next_frame_id, FramePacketCore, FramePacketHandle};
use crate::pixel_format::PixelFormat;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePacketPoolConfig {
    pub capacity: usize,
    /// When set, a saturated `acquire` blocks up to `block_timeout`
    /// waiting for a packet to be released (§5 back-pressure). When
    /// clear, a saturated `acquire` fails immediately with
    /// [PoolError::Exhausted] — the same behavior `try_acquire` always
    /// has, applied to the blocking entry point too.
    pub enable_backpressure: bool,
    pub block_timeout: Duration,
}

impl Default for FramePacketPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            enable_backpressure: true,
            block_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("frame packet pool exhausted and blocking timed out after {0:?}")]
    AcquireTimeout(Duration),
    #[error("frame packet pool is at capacity and backpressure is disabled")]
    Exhausted,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FramePacketPoolStats {
    pub total_allocations: u64,
    pub total_releases: u64,
    pub block_count: u64,
    pub timeout_count: u64,
}

/// The pool's shared innards, reachable both from [FramePacketPool]
/// handles and (weakly) from every [FramePacketHandle] it has issued,
/// so a handle's `Drop` can find its way home (I-FP-1).
#[derive(Debug)]
pub struct FramePacketPoolShared {
    config: Mutex<FramePacketPoolConfig>,
    available: Mutex<VecDeque<Arc<FramePacketCore>>>,
    available_cond: Condvar,
    in_use: AtomicUsize,
    stats: Mutex<FramePacketPoolStats>,
}

impl FramePacketPoolShared {
    pub(crate) fn recycle(&self, core: Arc<FramePacketCore>) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        self.stats.lock().expect(crate::THREAD_PANIC_MSG).total_releases += 1;
        let mut available = self.available.lock().expect(crate::THREAD_PANIC_MSG);
        available.push_back(core);
        self.available_cond.notify_one();
    }

    /// Non-blocking acquire used for `clone()`-style packet creation,
    /// where blocking would risk deadlocking the node that triggered
    /// the clone. Returns `None` rather than waiting if the pool is dry.
    fn try_acquire(
        self: &Arc<Self>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Option<FramePacketHandle> {
        let mut available = self.available.lock().expect(crate::THREAD_PANIC_MSG);
        if let Some(core) = available.pop_front() {
            drop(available);
            self.in_use.fetch_add(1, Ordering::AcqRel);
            let handle = FramePacketHandle::from_core(core);
            handle.reset_for_reuse(next_frame_id(), width, height, format);
            self.stats.lock().expect(crate::THREAD_PANIC_MSG).total_allocations += 1;
            return Some(handle);
        }
        let config = self.config.lock().expect(crate::THREAD_PANIC_MSG).clone();
        if self.in_use.load(Ordering::Acquire) < config.capacity {
            self.in_use.fetch_add(1, Ordering::AcqRel);
            self.stats.lock().expect(crate::THREAD_PANIC_MSG).total_allocations += 1;
            return Some(FramePacketHandle::fresh(
                next_frame_id(),
                width,
                height,
                format,
                Arc::downgrade(self),
            ));
        }
        None
    }
}

/// Handle to a shared frame-packet pool (§4.2). Cheap to clone; every
/// clone refers to the same underlying queue.
#[derive(Debug, Clone)]
pub struct FramePacketPool {
    shared: Arc<FramePacketPoolShared>,
}

impl FramePacketPool {
    pub fn new(config: FramePacketPoolConfig) -> Self {
        Self {
            shared: Arc::new(FramePacketPoolShared {
                config: Mutex::new(config),
                available: Mutex::new(VecDeque::new()),
                available_cond: Condvar::new(),
                in_use: AtomicUsize::new(0),
                stats: Mutex::new(FramePacketPoolStats::default()),
            }),
        }
    }

    /// Acquires a packet, blocking (subject to `block_timeout`) if the
    /// pool is at capacity and `enable_backpressure` is set; otherwise
    /// returns [PoolError::Exhausted] immediately (§5 back-pressure).
    pub fn acquire(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<FramePacketHandle, PoolError> {
        let config = self.shared.config.lock().expect(crate::THREAD_PANIC_MSG).clone();
        let mut available = self.shared.available.lock().expect(crate::THREAD_PANIC_MSG);
        loop {
            if let Some(core) = available.pop_front() {
                drop(available);
                self.shared.in_use.fetch_add(1, Ordering::AcqRel);
                let handle = FramePacketHandle::from_core(core);
                handle.reset_for_reuse(next_frame_id(), width, height, format);
                self.shared.stats.lock().expect(crate::THREAD_PANIC_MSG).total_allocations += 1;
                return Ok(handle);
            }
            if self.shared.in_use.load(Ordering::Acquire) < config.capacity {
                self.shared.in_use.fetch_add(1, Ordering::AcqRel);
                self.shared.stats.lock().expect(crate::THREAD_PANIC_MSG).total_allocations += 1;
                return Ok(FramePacketHandle::fresh(
                    next_frame_id(),
                    width,
                    height,
                    format,
                    Arc::downgrade(&self.shared),
                ));
            }
            if !config.enable_backpressure {
                self.shared.stats.lock().expect(crate::THREAD_PANIC_MSG).timeout_count += 1;
                return Err(PoolError::Exhausted);
            }
            self.shared.stats.lock().expect(crate::THREAD_PANIC_MSG).block_count += 1;
            let (guard, result) = self
                .shared
                .available_cond
                .wait_timeout(available, config.block_timeout)
                .expect(crate::THREAD_PANIC_MSG);
            available = guard;
            if result.timed_out() && available.is_empty() {
                self.shared.stats.lock().expect(crate::THREAD_PANIC_MSG).timeout_count += 1;
                return Err(PoolError::AcquireTimeout(config.block_timeout));
            }
        }
    }

    pub(crate) fn acquire_for_clone(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Option<FramePacketHandle> {
        self.shared.try_acquire(width, height, format)
    }

    /// Acquires a packet without blocking (§4.4 `tryAcquire`): returns
    /// [PoolError::Exhausted] immediately if no packet is idle and
    /// capacity is already in use, rather than waiting out
    /// `block_timeout` the way [Self::acquire] does.
    pub fn try_acquire(&self, width: u32, height: u32, format: PixelFormat) -> Result<FramePacketHandle, PoolError> {
        self.shared.try_acquire(width, height, format).ok_or(PoolError::Exhausted)
    }

    /// Whether the pool has no idle packet ready for reuse right now
    /// (§4.4 `isEmpty`). A `try_acquire` call made at this instant only
    /// succeeds if capacity still has room to allocate fresh.
    pub fn is_empty(&self) -> bool {
        self.available_count() == 0
    }

    /// Whether every packet the pool is allowed to hold is currently in
    /// use (§4.4 `isFull`) — the next `acquire` call blocks (or, under
    /// `try_acquire`, fails) until one is released.
    pub fn is_full(&self) -> bool {
        self.in_use_count() >= self.capacity()
    }

    /// Grows the available queue by `count` freshly allocated, unused
    /// packets, up to `capacity` (§4.2 "preallocate"). Packets beyond
    /// capacity are silently skipped rather than over-allocating.
    pub fn preallocate(&self, width: u32, height: u32, format: PixelFormat, count: usize) {
        let capacity = self.shared.config.lock().expect(crate::THREAD_PANIC_MSG).capacity;
        let mut available = self.shared.available.lock().expect(crate::THREAD_PANIC_MSG);
        let room = capacity.saturating_sub(available.len() + self.shared.in_use.load(Ordering::Acquire));
        for _ in 0..count.min(room) {
            let core = Arc::new(crate::frame_packet::FramePacketCore::new_idle(
                width,
                height,
                format,
                Arc::downgrade(&self.shared),
            ));
            available.push_back(core);
        }
    }

    /// Drops every currently-available packet. In-use packets are
    /// unaffected and will simply not be re-added to the queue when
    /// released.
    pub fn clear(&self) {
        self.shared.available.lock().expect(crate::THREAD_PANIC_MSG).clear();
    }

    pub fn available_count(&self) -> usize {
        self.shared.available.lock().expect(crate::THREAD_PANIC_MSG).len()
    }

    pub fn in_use_count(&self) -> usize {
        self.shared.in_use.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.lock().expect(crate::THREAD_PANIC_MSG).capacity
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.shared.config.lock().expect(crate::THREAD_PANIC_MSG).capacity = capacity;
    }

    pub fn set_backpressure_enabled(&self, enabled: bool) {
        self.shared.config.lock().expect(crate::THREAD_PANIC_MSG).enable_backpressure = enabled;
    }

    pub fn stats(&self) -> FramePacketPoolStats {
        *self.shared.stats.lock().expect(crate::THREAD_PANIC_MSG)
    }

    pub fn reset_stats(&self) {
        *self.shared.stats.lock().expect(crate::THREAD_PANIC_MSG) = FramePacketPoolStats::default();
    }

    /// Blocks up to `timeout` for every outstanding packet to be
    /// released back to the pool (§4.4 `waitAllReleased`), used by
    /// [crate::executor::Executor::shutdown] to let in-flight frames
    /// drain before tearing down. Returns whether `in_use` reached zero
    /// before the deadline.
    pub fn wait_all_released(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut available = self.shared.available.lock().expect(crate::THREAD_PANIC_MSG);
        while self.shared.in_use.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return self.shared.in_use.load(Ordering::Acquire) == 0;
            }
            let (guard, result) = self
                .shared
                .available_cond
                .wait_timeout(available, remaining)
                .expect(crate::THREAD_PANIC_MSG);
            available = guard;
            if result.timed_out() {
                break;
            }
        }
        self.shared.in_use.load(Ordering::Acquire) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_blocks_then_times_out_when_exhausted() {
        let pool = FramePacketPool::new(FramePacketPoolConfig {
            capacity: 1,
            enable_backpressure: true,
            block_timeout: Duration::from_millis(20),
        });
        let _held = pool.acquire(4, 4, PixelFormat::Rgba8).unwrap();
        let result = pool.acquire(4, 4, PixelFormat::Rgba8);
        assert_eq!(result.unwrap_err(), PoolError::AcquireTimeout(Duration::from_millis(20)));
        assert_eq!(pool.stats().timeout_count, 1);
    }

    #[test]
    fn non_blocking_mode_returns_exhausted_immediately() {
        let pool = FramePacketPool::new(FramePacketPoolConfig {
            capacity: 1,
            enable_backpressure: false,
            block_timeout: Duration::from_millis(20),
        });
        let _held = pool.acquire(4, 4, PixelFormat::Rgba8).unwrap();
        assert_eq!(pool.acquire(4, 4, PixelFormat::Rgba8).unwrap_err(), PoolError::Exhausted);
    }

    #[test]
    fn try_acquire_never_blocks_when_exhausted() {
        let pool = FramePacketPool::new(FramePacketPoolConfig { capacity: 1, ..FramePacketPoolConfig::default() });
        let _held = pool.acquire(4, 4, PixelFormat::Rgba8).unwrap();
        assert!(pool.is_full());
        assert_eq!(pool.try_acquire(4, 4, PixelFormat::Rgba8).unwrap_err(), PoolError::Exhausted);
    }

    #[test]
    fn is_empty_and_is_full_reflect_pool_state() {
        let pool = FramePacketPool::new(FramePacketPoolConfig { capacity: 2, ..FramePacketPoolConfig::default() });
        assert!(pool.is_empty());
        assert!(!pool.is_full());
        let handle = pool.acquire(4, 4, PixelFormat::Rgba8).unwrap();
        assert!(pool.is_empty());
        assert!(!pool.is_full());
        let _held = pool.acquire(4, 4, PixelFormat::Rgba8).unwrap();
        assert!(pool.is_full());
        drop(handle);
        assert!(!pool.is_empty());
        assert!(!pool.is_full());
    }

    #[test]
    fn released_packet_becomes_available_again() {
        let pool = FramePacketPool::new(FramePacketPoolConfig::default());
        let handle = pool.acquire(8, 8, PixelFormat::Rgba8).unwrap();
        assert_eq!(pool.in_use_count(), 1);
        drop(handle);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn preallocate_fills_up_to_capacity() {
        let pool = FramePacketPool::new(FramePacketPoolConfig { capacity: 3, ..FramePacketPoolConfig::default() });
        pool.preallocate(4, 4, PixelFormat::Rgba8, 10);
        assert_eq!(pool.available_count(), 3);
    }

    #[test]
    fn wait_all_released_returns_once_in_use_hits_zero() {
        let pool = FramePacketPool::new(FramePacketPoolConfig::default());
        let handle = pool.acquire(4, 4, PixelFormat::Rgba8).unwrap();
        let pool2 = pool.clone();
        let released = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(handle);
        });
        assert!(pool2.wait_all_released(Duration::from_secs(1)));
        released.join().unwrap();
    }

    #[test]
    fn wait_all_released_times_out_if_still_in_use() {
        let pool = FramePacketPool::new(FramePacketPoolConfig::default());
        let _held = pool.acquire(4, 4, PixelFormat::Rgba8).unwrap();
        assert!(!pool.wait_all_released(Duration::from_millis(20)));
    }
}
