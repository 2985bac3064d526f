//! The per-pipeline shared context handed to every [crate::node::Node]
//! call: the graphics backend, the three pools, the active config, the
//! current frame's identity, and a scratch space for cross-node
//! bookkeeping that doesn't belong on any one node (§4.3 Pipeline
//! Context, grounded on `original_source/include/pipeline/core/PipelineContext.h`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::frame_packet::FramePacketHandle;
use crate::graphics::GraphicsBackend;
use crate::pool::{BufferPool, FramePacketPool, TexturePool};

#[derive(Default)]
struct SharedState {
    metadata: HashMap<String, String>,
    timers: HashMap<String, Instant>,
    pending_capture: Option<FramePacketHandle>,
}

/// Shared, thread-safe context passed by reference to every node
/// invocation. Cloning a [PipelineContext] is cheap — it's a handle to
/// the same pools and config, not a copy of them.
#[derive(Clone)]
pub struct PipelineContext {
    backend: Arc<dyn GraphicsBackend>,
    texture_pool: Arc<TexturePool>,
    frame_packet_pool: FramePacketPool,
    buffer_pool: Arc<BufferPool>,
    config: Arc<Mutex<PipelineConfig>>,
    current_frame_id: Arc<Mutex<u64>>,
    current_timestamp_us: Arc<Mutex<i64>>,
    shared: Arc<Mutex<SharedState>>,
}

impl PipelineContext {
    pub fn new(backend: Arc<dyn GraphicsBackend>, config: PipelineConfig) -> Self {
        let texture_pool = Arc::new(TexturePool::new(backend.clone(), config.texture_pool_config()));
        let frame_packet_pool = FramePacketPool::new(config.frame_packet_pool_config());
        Self {
            backend,
            texture_pool,
            frame_packet_pool,
            buffer_pool: Arc::new(BufferPool::new()),
            config: Arc::new(Mutex::new(config)),
            current_frame_id: Arc::new(Mutex::new(0)),
            current_timestamp_us: Arc::new(Mutex::new(0)),
            shared: Arc::new(Mutex::new(SharedState::default())),
        }
    }

    pub fn backend(&self) -> &Arc<dyn GraphicsBackend> {
        &self.backend
    }

    pub fn texture_pool(&self) -> &Arc<TexturePool> {
        &self.texture_pool
    }

    pub fn frame_packet_pool(&self) -> &FramePacketPool {
        &self.frame_packet_pool
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn config(&self) -> PipelineConfig {
        self.config.lock().expect(crate::THREAD_PANIC_MSG).clone()
    }

    pub fn set_config(&self, config: PipelineConfig) {
        *self.config.lock().expect(crate::THREAD_PANIC_MSG) = config;
    }

    pub fn current_frame_id(&self) -> u64 {
        *self.current_frame_id.lock().expect(crate::THREAD_PANIC_MSG)
    }

    pub fn set_current_frame_id(&self, id: u64) {
        *self.current_frame_id.lock().expect(crate::THREAD_PANIC_MSG) = id;
    }

    pub fn current_timestamp_us(&self) -> i64 {
        *self.current_timestamp_us.lock().expect(crate::THREAD_PANIC_MSG)
    }

    pub fn set_current_timestamp_us(&self, ts: i64) {
        *self.current_timestamp_us.lock().expect(crate::THREAD_PANIC_MSG) = ts;
    }

    /// Scratch key/value storage a node can use to pass small bits of
    /// state to itself across frames, or to another node cooperating
    /// out-of-band (e.g. a face detector publishing "last seen face
    /// count" for a debug overlay node to read). Not a substitute for
    /// declared graph edges.
    pub fn get_shared(&self, key: &str) -> Option<String> {
        self.shared.lock().expect(crate::THREAD_PANIC_MSG).metadata.get(key).cloned()
    }

    pub fn set_shared(&self, key: impl Into<String>, value: impl Into<String>) {
        self.shared
            .lock()
            .expect(crate::THREAD_PANIC_MSG)
            .metadata
            .insert(key.into(), value.into());
    }

    /// Starts (or restarts) a named timer, for nodes that want to
    /// report per-stage timing without threading a `Instant` through
    /// their own state.
    pub fn start_timer(&self, name: impl Into<String>) {
        self.shared
            .lock()
            .expect(crate::THREAD_PANIC_MSG)
            .timers
            .insert(name.into(), Instant::now());
    }

    /// Returns the elapsed time since `start_timer(name)`, or `None` if
    /// that timer was never started.
    pub fn elapsed_timer(&self, name: &str) -> Option<std::time::Duration> {
        self.shared
            .lock()
            .expect(crate::THREAD_PANIC_MSG)
            .timers
            .get(name)
            .map(|t| t.elapsed())
    }

    /// Stashes the packet a source node should emit on its next
    /// `process` call. The executor sets this immediately before
    /// dispatching a source node for a frame; the source node takes it
    /// back out in its own `process` and assigns it to its one output.
    pub fn set_pending_capture(&self, packet: FramePacketHandle) {
        self.shared.lock().expect(crate::THREAD_PANIC_MSG).pending_capture = Some(packet);
    }

    /// Takes the packet stashed by [Self::set_pending_capture], if any.
    pub fn take_pending_capture(&self) -> Option<FramePacketHandle> {
        self.shared.lock().expect(crate::THREAD_PANIC_MSG).pending_capture.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::NullBackend;

    fn test_context() -> PipelineContext {
        PipelineContext::new(Arc::new(NullBackend::new()), PipelineConfig::default())
    }

    #[test]
    fn frame_id_and_timestamp_round_trip() {
        let ctx = test_context();
        ctx.set_current_frame_id(7);
        ctx.set_current_timestamp_us(12_345);
        assert_eq!(ctx.current_frame_id(), 7);
        assert_eq!(ctx.current_timestamp_us(), 12_345);
    }

    #[test]
    fn clone_shares_the_same_pools() {
        let ctx = test_context();
        let clone = ctx.clone();
        let handle = ctx.frame_packet_pool().acquire(4, 4, crate::pixel_format::PixelFormat::Rgba8).unwrap();
        drop(handle);
        assert_eq!(clone.frame_packet_pool().available_count(), 1);
    }

    #[test]
    fn timers_measure_elapsed_time() {
        let ctx = test_context();
        ctx.start_timer("decode");
        assert!(ctx.elapsed_timer("decode").is_some());
        assert!(ctx.elapsed_timer("missing").is_none());
    }
}
