//! The shared unit of data flowing along a graph's edges (§3 Frame
//! Packet, I-FP-1, I-FP-2). A packet pairs a GPU texture with an
//! optional lazily-populated CPU buffer and a small tagged metadata
//! map, and is handed out and reclaimed by a [crate::pool::FramePacketPool].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::graphics::{FenceHandle, GraphicsBackend, TextureHandle};
use crate::pixel_format::PixelFormat;
use crate::pool::frame_packet_pool::FramePacketPoolShared;

/// A tagged value attachable to a frame packet's metadata map. Closed
/// set, per design note "disallow arbitrary opaque values across
/// threads" — the same reasoning that shapes [crate::node::ParameterValue].
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Float(f32),
    Int(i32),
    Rect { x: f32, y: f32, width: f32, height: f32 },
    Faces(Vec<FaceBox>),
    Bytes(Vec<u8>),
}

/// A single detected-face bounding box, normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next monotonic frame id, used by a source node to tag
/// a freshly produced packet (§3 "sequence_number", I-FP-3).
pub fn next_frame_id() -> u64 {
    NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct FramePacketFields {
    frame_id: u64,
    timestamp_us: i64,
    sequence_number: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: usize,
    texture: Option<TextureHandle>,
    cpu_buffer: Option<Vec<u8>>,
    fence: Option<FenceHandle>,
    metadata: HashMap<String, MetadataValue>,
}

/// The packet's non-refcount state, plus the logical reference count
/// and a weak back-pointer to the pool it was acquired from. Storage
/// backing a [FramePacketHandle]; never exposed directly.
#[derive(Debug)]
pub struct FramePacketCore {
    fields: Mutex<FramePacketFields>,
    ref_count: AtomicI32,
    pool: Weak<FramePacketPoolShared>,
}

/// A shared, reference-counted handle to a [FramePacketCore]. Dropping
/// the last handle returns the packet to its originating pool rather
/// than deallocating it (design note "Shared ownership of packets").
/// The logical reference count is the packet's own atomic counter
/// (I-FP-1), not `Arc`'s internal strong count, so `retain`/drop track
/// the spec's explicit ref-count contract one-to-one.
#[derive(Debug)]
pub struct FramePacketHandle(Option<Arc<FramePacketCore>>);

impl FramePacketCore {
    /// Builds packet storage with no outstanding handle, for the pool's
    /// `preallocate` path — the queue itself is the only owner until
    /// `acquire` hands a handle out.
    pub(crate) fn new_idle(
        width: u32,
        height: u32,
        format: PixelFormat,
        pool: Weak<FramePacketPoolShared>,
    ) -> Self {
        FramePacketCore {
            fields: Mutex::new(FramePacketFields {
                frame_id: 0,
                timestamp_us: 0,
                sequence_number: 0,
                width,
                height,
                format,
                stride: width as usize * format.bytes_per_pixel(),
                texture: None,
                cpu_buffer: None,
                fence: None,
                metadata: HashMap::new(),
            }),
            ref_count: AtomicI32::new(0),
            pool,
        }
    }
}

impl FramePacketHandle {
    /// Constructs a fresh handle over newly allocated packet state,
    /// with ref-count `1`. Used only by the pool when it needs to grow.
    pub(crate) fn fresh(
        frame_id: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        pool: Weak<FramePacketPoolShared>,
    ) -> Self {
        let core = Arc::new(FramePacketCore {
            fields: Mutex::new(FramePacketFields {
                frame_id,
                timestamp_us: 0,
                sequence_number: 0,
                width,
                height,
                format,
                stride: width as usize * format.bytes_per_pixel(),
                texture: None,
                cpu_buffer: None,
                fence: None,
                metadata: HashMap::new(),
            }),
            ref_count: AtomicI32::new(1),
            pool,
        });
        Self(Some(core))
    }

    pub(crate) fn from_core(core: Arc<FramePacketCore>) -> Self {
        core.ref_count.store(1, Ordering::Release);
        Self(Some(core))
    }

    fn core(&self) -> &Arc<FramePacketCore> {
        self.0.as_ref().expect("frame packet handle used after release")
    }

    /// Increments the logical ref-count and returns a second handle to
    /// the same packet. Both handles must be dropped (or explicitly
    /// [FramePacketHandle::release]d) before the packet returns to its
    /// pool (I-FP-1).
    pub fn retain(&self) -> FramePacketHandle {
        self.core().ref_count.fetch_add(1, Ordering::AcqRel);
        FramePacketHandle(Some(self.core().clone()))
    }

    pub fn ref_count(&self) -> i32 {
        self.core().ref_count.load(Ordering::Acquire)
    }

    /// Explicitly releases this handle, equivalent to dropping it. The
    /// handle is consumed and may not be used afterward.
    pub fn release(self) {
        drop(self);
    }

    pub fn frame_id(&self) -> u64 {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).frame_id
    }

    pub fn timestamp_us(&self) -> i64 {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).timestamp_us
    }

    pub fn set_timestamp_us(&self, ts: i64) {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).timestamp_us = ts;
    }

    pub fn sequence_number(&self) -> u64 {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).sequence_number
    }

    pub fn set_sequence_number(&self, seq: u64) {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).sequence_number = seq;
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let f = self.core().fields.lock().expect(crate::THREAD_PANIC_MSG);
        (f.width, f.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).format
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).texture.clone()
    }

    pub fn set_texture(&self, texture: TextureHandle) {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).texture = Some(texture);
    }

    pub fn fence(&self) -> Option<FenceHandle> {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).fence.clone()
    }

    pub fn set_fence(&self, fence: FenceHandle) {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).fence = Some(fence);
    }

    /// Blocks on the packet's GPU fence (if any) via `backend`, then
    /// returns the CPU buffer, downloading it first if it hasn't been
    /// fetched yet (I-FP-2: the CPU buffer is populated on demand, not
    /// eagerly on every frame).
    pub fn cpu_buffer(&self, backend: &dyn GraphicsBackend) -> Option<Vec<u8>> {
        let mut f = self.core().fields.lock().expect(crate::THREAD_PANIC_MSG);
        if f.cpu_buffer.is_none() {
            let texture = f.texture.clone()?;
            if let Some(fence) = &f.fence {
                backend.wait_fence(fence, None);
            }
            let bytes = backend.download_texture(&texture, f.width, f.height, f.format).ok()?;
            f.cpu_buffer = Some(bytes);
        }
        f.cpu_buffer.clone()
    }

    /// Blocks on this packet's fence without downloading anything (§4.6
    /// `waitGpu`), for a node that only needs to know rendering has
    /// finished — e.g. a sink about to hand the texture to a display
    /// surface. Returns `true` immediately if there is no fence to wait
    /// on.
    pub fn wait_gpu(&self, backend: &dyn GraphicsBackend, timeout_ms: Option<u64>) -> bool {
        match self.fence() {
            Some(fence) => backend.wait_fence(&fence, timeout_ms),
            None => true,
        }
    }

    /// Inserts a fresh fence for this packet's current texture (§4.6
    /// `signalGpu`), called by a GPU node right after issuing its
    /// render commands so downstream CPU readback knows when to wait.
    pub fn signal_gpu(&self, backend: &dyn GraphicsBackend) {
        if let Some(texture) = self.texture() {
            let fence = backend.insert_fence(&texture);
            self.set_fence(fence);
        }
    }

    /// Directly installs a CPU-side buffer, bypassing the backend
    /// download path. Used by source ingestion when the application
    /// submits a raw pixel buffer rather than a GPU texture.
    pub fn set_cpu_buffer(&self, bytes: Vec<u8>) {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).cpu_buffer = Some(bytes);
    }

    pub fn get_metadata(&self, key: &str) -> Option<MetadataValue> {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).metadata.get(key).cloned()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: MetadataValue) {
        self.core()
            .fields
            .lock()
            .expect(crate::THREAD_PANIC_MSG)
            .metadata
            .insert(key.into(), value);
    }

    pub fn metadata_keys(&self) -> Vec<String> {
        self.core().fields.lock().expect(crate::THREAD_PANIC_MSG).metadata.keys().cloned().collect()
    }

    /// Resets the packet to a pristine state for reuse: clears the CPU
    /// buffer, fence, and metadata, and zeroes the timestamp/sequence
    /// number. If the requested dimensions/format differ from what the
    /// packet previously held, its GPU texture handle is dropped too —
    /// a mismatched texture is the caller's (and ultimately the texture
    /// pool's) responsibility to reallocate, never silently reused
    /// under a new size. Called by the pool immediately before handing
    /// a recycled packet back out.
    pub(crate) fn reset_for_reuse(&self, frame_id: u64, width: u32, height: u32, format: PixelFormat) {
        let mut f = self.core().fields.lock().expect(crate::THREAD_PANIC_MSG);
        f.frame_id = frame_id;
        f.timestamp_us = 0;
        f.sequence_number = 0;
        f.cpu_buffer = None;
        f.fence = None;
        f.metadata.clear();
        if f.width != width || f.height != height || f.format != format {
            f.width = width;
            f.height = height;
            f.format = format;
            f.stride = width as usize * format.bytes_per_pixel();
            f.texture = None;
        }
    }

    /// Produces a new packet (from the same pool) that shares this
    /// packet's texture handle and copies its metadata, but does not
    /// copy the CPU buffer — the clone starts with no CPU buffer of its
    /// own and will re-download lazily if asked (design note "clone()
    /// shares the texture, copies metadata, not the CPU buffer").
    pub fn clone_shallow(&self) -> Option<FramePacketHandle> {
        let pool = self.core().pool.upgrade()?;
        let src = self.core().fields.lock().expect(crate::THREAD_PANIC_MSG);
        let clone = pool.acquire_for_clone(src.width, src.height, src.format)?;
        {
            let mut dst = clone.core().fields.lock().expect(crate::THREAD_PANIC_MSG);
            dst.texture = src.texture.clone();
            dst.fence = src.fence.clone();
            dst.timestamp_us = src.timestamp_us;
            dst.sequence_number = src.sequence_number;
            dst.metadata = src.metadata.clone();
        }
        Some(clone)
    }
}

impl Drop for FramePacketHandle {
    fn drop(&mut self) {
        let Some(core) = self.0.take() else { return };
        let prev = core.ref_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            if let Some(pool) = core.pool.upgrade() {
                pool.recycle(core);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::frame_packet_pool::{FramePacketPool, FramePacketPoolConfig};

    fn test_pool() -> FramePacketPool {
        FramePacketPool::new(FramePacketPoolConfig::default())
    }

    #[test]
    fn retain_keeps_packet_alive_until_all_handles_drop() {
        let pool = test_pool();
        let handle = pool.acquire(64, 64, PixelFormat::Rgba8).unwrap();
        let second = handle.retain();
        assert_eq!(handle.ref_count(), 2);
        drop(handle);
        assert_eq!(pool.in_use_count(), 1);
        drop(second);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn signal_then_wait_gpu_round_trips_through_backend() {
        use crate::graphics::{GraphicsBackend, NullBackend};

        let backend = NullBackend::new();
        let pool = test_pool();
        let handle = pool.acquire(16, 16, PixelFormat::Rgba8).unwrap();
        assert!(handle.wait_gpu(&backend, Some(0)));
        handle.set_texture(backend.create_texture(16, 16, PixelFormat::Rgba8).unwrap());
        handle.signal_gpu(&backend);
        assert!(handle.fence().is_some());
        assert!(handle.wait_gpu(&backend, Some(0)));
    }

    #[test]
    fn reset_for_reuse_clears_transient_state() {
        let pool = test_pool();
        let handle = pool.acquire(32, 32, PixelFormat::Rgba8).unwrap();
        handle.set_timestamp_us(42);
        handle.set_metadata("gain", MetadataValue::Float(1.0));
        let frame_id = handle.frame_id();
        drop(handle);

        let recycled = pool.acquire(32, 32, PixelFormat::Rgba8).unwrap();
        assert_ne!(recycled.frame_id(), frame_id);
        assert_eq!(recycled.timestamp_us(), 0);
        assert!(recycled.get_metadata("gain").is_none());
    }
}
