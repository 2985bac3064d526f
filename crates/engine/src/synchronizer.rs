//! Timestamp-keyed pair matcher for the dual GPU/CPU path (§4.3,
//! grounded on `original_source/include/pipeline/input/FrameSynchronizer.h`).
//!
//! Two branches of the graph race to analyze the same capture instant;
//! the synchronizer buckets their arrivals by timestamp (within
//! tolerance) and emits a matched pair as soon as both sides have
//! landed, or evicts stale entries according to [SyncPolicy].

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::frame_packet::FramePacketHandle;

/// How to resolve a pending, unpaired arrival once it has waited longer
/// than `max_wait_time_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Unpaired entries are dropped once they age out; only a complete
    /// pair is ever emitted.
    WaitBoth,
    /// An aged-out entry is emitted with only its GPU field filled, if
    /// the GPU branch is the one present; otherwise dropped (§9 Open
    /// Question — this spec commits to dropping, never emitting with
    /// only the non-preferred branch).
    GpuFirst,
    /// Symmetric to [SyncPolicy::GpuFirst], preferring the CPU branch.
    CpuFirst,
    /// On eviction, keeps only the newest pending entry and drops every
    /// other one, regardless of how long they've waited.
    DropOld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSyncConfig {
    pub policy: SyncPolicy,
    pub max_wait_time_ms: u64,
    pub timestamp_tolerance_us: i64,
    pub max_pending_frames: usize,
}

impl Default for FrameSyncConfig {
    fn default() -> Self {
        Self {
            policy: SyncPolicy::WaitBoth,
            max_wait_time_ms: 100,
            timestamp_tolerance_us: 500,
            max_pending_frames: 8,
        }
    }
}

/// A synced pair, each side present if that branch arrived (or was
/// preferred under [SyncPolicy::GpuFirst]/[SyncPolicy::CpuFirst]).
#[derive(Debug)]
pub struct SyncedPair {
    pub timestamp_us: i64,
    pub gpu: Option<FramePacketHandle>,
    pub cpu: Option<FramePacketHandle>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SynchronizerStats {
    pub gpu_arrivals: u64,
    pub cpu_arrivals: u64,
    pub paired: u64,
    pub dropped: u64,
    pub evicted_half_filled: u64,
}

#[derive(Debug)]
struct PendingFrame {
    bucket_key: i64,
    gpu: Option<FramePacketHandle>,
    cpu: Option<FramePacketHandle>,
    arrived_at: Instant,
}

struct Inner {
    pending: BTreeMap<i64, PendingFrame>,
    stats: SynchronizerStats,
}

/// Matches [FramePacketHandle] arrivals from a GPU branch and a CPU
/// branch that share a capture timestamp, within `timestamp_tolerance_us`.
pub struct Synchronizer {
    config: Mutex<FrameSyncConfig>,
    inner: Mutex<Inner>,
    arrived: Condvar,
}

impl Synchronizer {
    pub fn new(config: FrameSyncConfig) -> Self {
        Self {
            config: Mutex::new(config),
            inner: Mutex::new(Inner { pending: BTreeMap::new(), stats: SynchronizerStats::default() }),
            arrived: Condvar::new(),
        }
    }

    /// Rounds `timestamp_us` down to the nearest tolerance-sized
    /// bucket, so arrivals within tolerance of each other land on the
    /// same key regardless of which one came first.
    fn bucket_key(&self, timestamp_us: i64, tolerance: i64) -> i64 {
        if tolerance <= 0 {
            return timestamp_us;
        }
        (timestamp_us as f64 / tolerance as f64).round() as i64 * tolerance
    }

    pub fn push_gpu(&self, packet: FramePacketHandle) -> Option<SyncedPair> {
        self.push(packet, true)
    }

    pub fn push_cpu(&self, packet: FramePacketHandle) -> Option<SyncedPair> {
        self.push(packet, false)
    }

    fn push(&self, packet: FramePacketHandle, is_gpu: bool) -> Option<SyncedPair> {
        let config = *self.config.lock().expect(crate::THREAD_PANIC_MSG);
        let timestamp_us = packet.timestamp_us();
        let key = self.bucket_key(timestamp_us, config.timestamp_tolerance_us);

        let mut inner = self.inner.lock().expect(crate::THREAD_PANIC_MSG);
        if is_gpu {
            inner.stats.gpu_arrivals += 1;
        } else {
            inner.stats.cpu_arrivals += 1;
        }

        if inner.pending.len() >= config.max_pending_frames && !inner.pending.contains_key(&key) {
            self.evict_oldest_locked(&mut inner, config);
        }

        let result = if let Some(existing) = inner.pending.remove(&key) {
            let (gpu, cpu) = if is_gpu {
                (Some(packet), existing.cpu)
            } else {
                (existing.gpu, Some(packet))
            };
            inner.stats.paired += 1;
            Some(SyncedPair { timestamp_us, gpu, cpu })
        } else {
            let entry = PendingFrame {
                bucket_key: key,
                gpu: if is_gpu { Some(packet) } else { None },
                cpu: if is_gpu { None } else { Some(packet) },
                arrived_at: Instant::now(),
            };
            inner.pending.insert(key, entry);
            None
        };

        drop(inner);
        self.arrived.notify_all();
        result
    }

    /// Evicts the single oldest pending entry under the current policy.
    /// Called both on push-time back-pressure and from [Self::sweep].
    fn evict_oldest_locked(&self, inner: &mut Inner, config: FrameSyncConfig) {
        let Some((&key, _)) = inner
            .pending
            .iter()
            .min_by_key(|(_, p)| p.arrived_at)
        else {
            return;
        };
        self.evict_one_locked(inner, key, config);
    }

    fn evict_one_locked(&self, inner: &mut Inner, key: i64, config: FrameSyncConfig) -> Option<SyncedPair> {
        let entry = inner.pending.remove(&key)?;
        match config.policy {
            SyncPolicy::WaitBoth => {
                inner.stats.dropped += 1;
                None
            }
            SyncPolicy::GpuFirst => {
                if entry.gpu.is_some() {
                    inner.stats.evicted_half_filled += 1;
                    Some(SyncedPair { timestamp_us: key, gpu: entry.gpu, cpu: None })
                } else {
                    inner.stats.dropped += 1;
                    None
                }
            }
            SyncPolicy::CpuFirst => {
                if entry.cpu.is_some() {
                    inner.stats.evicted_half_filled += 1;
                    Some(SyncedPair { timestamp_us: key, gpu: None, cpu: entry.cpu })
                } else {
                    inner.stats.dropped += 1;
                    None
                }
            }
            SyncPolicy::DropOld => {
                inner.stats.dropped += 1;
                None
            }
        }
    }

    /// Under [SyncPolicy::DropOld], discards every pending entry except
    /// the newest, regardless of age.
    fn drop_old_locked(&self, inner: &mut Inner) {
        let Some(&newest_key) = inner
            .pending
            .iter()
            .max_by_key(|(_, p)| p.arrived_at)
            .map(|(k, _)| k)
        else {
            return;
        };
        let dropped = inner.pending.len() - 1;
        inner.pending.retain(|k, _| *k == newest_key);
        inner.stats.dropped += dropped as u64;
    }

    /// Evicts every pending entry older than `max_wait_time_ms`,
    /// applying the configured policy to each. Called periodically by a
    /// background sweep, and opportunistically on every arrival.
    pub fn sweep(&self) -> Vec<SyncedPair> {
        let config = *self.config.lock().expect(crate::THREAD_PANIC_MSG);
        let mut inner = self.inner.lock().expect(crate::THREAD_PANIC_MSG);

        if config.policy == SyncPolicy::DropOld {
            self.drop_old_locked(&mut inner);
            return Vec::new();
        }

        let max_wait = Duration::from_millis(config.max_wait_time_ms);
        let now = Instant::now();
        let expired: Vec<i64> = inner
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.arrived_at) >= max_wait)
            .map(|(k, _)| *k)
            .collect();

        let mut emitted = Vec::new();
        for key in expired {
            if let Some(pair) = self.evict_one_locked(&mut inner, key, config) {
                emitted.push(pair);
            }
        }
        emitted
    }

    /// Blocks until a pair is available or `timeout` elapses (`None` =
    /// unbounded), polling a background-style sweep on each wakeup so a
    /// caller using only `wait_synced_frame` still observes eviction
    /// emissions without a separate sweep thread.
    pub fn wait_synced_frame(&self, timeout: Option<Duration>) -> Option<SyncedPair> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            if let Some(pair) = self.sweep().into_iter().next() {
                return Some(pair);
            }
            let wait_for = match deadline {
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    remaining
                }
                None => Duration::from_millis(50),
            };
            let guard = self.inner.lock().expect(crate::THREAD_PANIC_MSG);
            let _ = self.arrived.wait_timeout(guard, wait_for.min(Duration::from_millis(50)));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().expect(crate::THREAD_PANIC_MSG).pending.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect(crate::THREAD_PANIC_MSG);
        inner.pending.clear();
    }

    /// Force-completes every currently pending entry under the
    /// configured policy, regardless of how long it has been waiting,
    /// and emits whatever partial results that implies — unlike
    /// [Self::clear], no pending frame silently vanishes. Used at
    /// shutdown so a frame stuck waiting for its other branch is still
    /// surfaced instead of dropped on the floor.
    pub fn flush(&self) -> Vec<SyncedPair> {
        let config = *self.config.lock().expect(crate::THREAD_PANIC_MSG);
        let mut inner = self.inner.lock().expect(crate::THREAD_PANIC_MSG);

        let keys: Vec<i64> = inner.pending.keys().copied().collect();
        let mut emitted = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(pair) = self.evict_one_locked(&mut inner, key, config) {
                emitted.push(pair);
            }
        }
        inner.pending.clear();
        emitted
    }

    pub fn stats(&self) -> SynchronizerStats {
        self.inner.lock().expect(crate::THREAD_PANIC_MSG).stats
    }

    pub fn reset_stats(&self) {
        self.inner.lock().expect(crate::THREAD_PANIC_MSG).stats = SynchronizerStats::default();
    }

    pub fn config(&self) -> FrameSyncConfig {
        *self.config.lock().expect(crate::THREAD_PANIC_MSG)
    }

    pub fn set_config(&self, config: FrameSyncConfig) {
        *self.config.lock().expect(crate::THREAD_PANIC_MSG) = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_format::PixelFormat;
    use crate::pool::frame_packet_pool::{FramePacketPool, FramePacketPoolConfig};

    fn pool() -> FramePacketPool {
        FramePacketPool::new(FramePacketPoolConfig { capacity: 16, ..FramePacketPoolConfig::default() })
    }

    fn packet(pool: &FramePacketPool, ts: i64) -> FramePacketHandle {
        let handle = pool.acquire(16, 16, PixelFormat::Rgba8).unwrap();
        handle.set_timestamp_us(ts);
        handle
    }

    #[test]
    fn matching_timestamps_pair_immediately() {
        let pool = pool();
        let sync = Synchronizer::new(FrameSyncConfig::default());
        assert!(sync.push_gpu(packet(&pool, 1000)).is_none());
        let pair = sync.push_cpu(packet(&pool, 1000)).unwrap();
        assert_eq!(pair.timestamp_us, 1000);
        assert!(pair.gpu.is_some());
        assert!(pair.cpu.is_some());
        assert_eq!(sync.stats().paired, 1);
    }

    #[test]
    fn within_tolerance_still_pairs() {
        let pool = pool();
        let sync = Synchronizer::new(FrameSyncConfig { timestamp_tolerance_us: 500, ..FrameSyncConfig::default() });
        assert!(sync.push_gpu(packet(&pool, 1000)).is_none());
        let pair = sync.push_cpu(packet(&pool, 1033)).unwrap();
        assert!(pair.gpu.is_some() && pair.cpu.is_some());
    }

    #[test]
    fn wait_both_drops_unpaired_entries_after_timeout() {
        let pool = pool();
        let sync = Synchronizer::new(FrameSyncConfig {
            policy: SyncPolicy::WaitBoth,
            max_wait_time_ms: 10,
            ..FrameSyncConfig::default()
        });
        assert!(sync.push_gpu(packet(&pool, 1000)).is_none());
        std::thread::sleep(Duration::from_millis(30));
        let emitted = sync.sweep();
        assert!(emitted.is_empty());
        assert_eq!(sync.stats().dropped, 1);
        assert_eq!(sync.pending_count(), 0);
    }

    #[test]
    fn gpu_first_emits_gpu_only_entries_on_timeout() {
        let pool = pool();
        let sync = Synchronizer::new(FrameSyncConfig {
            policy: SyncPolicy::GpuFirst,
            max_wait_time_ms: 10,
            ..FrameSyncConfig::default()
        });
        assert!(sync.push_gpu(packet(&pool, 1000)).is_none());
        std::thread::sleep(Duration::from_millis(30));
        let emitted = sync.sweep();
        assert_eq!(emitted.len(), 1);
        assert!(emitted[0].gpu.is_some());
        assert!(emitted[0].cpu.is_none());
    }

    #[test]
    fn gpu_first_drops_cpu_only_entries_on_timeout() {
        let pool = pool();
        let sync = Synchronizer::new(FrameSyncConfig {
            policy: SyncPolicy::GpuFirst,
            max_wait_time_ms: 10,
            ..FrameSyncConfig::default()
        });
        assert!(sync.push_cpu(packet(&pool, 1000)).is_none());
        std::thread::sleep(Duration::from_millis(30));
        let emitted = sync.sweep();
        assert!(emitted.is_empty());
        assert_eq!(sync.stats().dropped, 1);
    }

    #[test]
    fn flush_force_completes_pending_entries_under_policy() {
        let pool = pool();
        let sync = Synchronizer::new(FrameSyncConfig {
            policy: SyncPolicy::GpuFirst,
            max_wait_time_ms: 60_000,
            ..FrameSyncConfig::default()
        });
        assert!(sync.push_gpu(packet(&pool, 1000)).is_none());
        assert!(sync.push_cpu(packet(&pool, 2000)).is_none());
        let emitted = sync.flush();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].timestamp_us, 1000);
        assert!(emitted[0].gpu.is_some());
        assert_eq!(sync.stats().evicted_half_filled, 1);
        assert_eq!(sync.stats().dropped, 1);
        assert_eq!(sync.pending_count(), 0);
    }

    #[test]
    fn backpressure_evicts_oldest_when_max_pending_reached() {
        let pool = pool();
        let sync = Synchronizer::new(FrameSyncConfig {
            policy: SyncPolicy::WaitBoth,
            max_pending_frames: 2,
            timestamp_tolerance_us: 1,
            ..FrameSyncConfig::default()
        });
        assert!(sync.push_gpu(packet(&pool, 1000)).is_none());
        assert!(sync.push_gpu(packet(&pool, 2000)).is_none());
        assert!(sync.push_gpu(packet(&pool, 3000)).is_none());
        assert_eq!(sync.pending_count(), 2);
        assert_eq!(sync.stats().dropped, 1);
    }
}
