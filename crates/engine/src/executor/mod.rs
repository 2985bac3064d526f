//! The graph executor (§4.5): owns the three task queues, dispatches a
//! frame through the graph's cached layered plan, and propagates
//! outputs along declared edges. Grounded on the teacher's
//! `graph_executor.rs` for the overall submit/await shape and on
//! `original_source/include/pipeline/core/PipelineExecutor.h` for the
//! `submitEntityTask`/`FrameExecutionState` naming this module's
//! `run_frame`/`ExecutionStats` mirror.

mod task_queue;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::context::PipelineContext;
use crate::frame_packet::FramePacketHandle;
use crate::graph::{Graph, GraphError, NodeId};
use crate::node::{Node, NodeError, NodeKind, NodeState, NodeStateCell, NodeStats, ParameterMap, ParameterValue};
use crate::pool::PoolError;
use crate::port::{InputPort, OutputPort};
use crate::source::{Capture, FrameSource};
use task_queue::TaskQueue;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("node {0} is not registered with this executor")]
    UnknownNode(NodeId),
    #[error("frame packet pool exhausted: {0}")]
    Backpressure(#[from] PoolError),
    #[error("executor was cancelled")]
    Cancelled,
    #[error("too many frames already in flight")]
    TooManyPendingFrames,
}

/// Decrements a layer's shared completion counter and wakes the
/// waiting dispatcher when it hits zero, no matter which of a node
/// task's several early-return paths was taken. One of these is held
/// for the lifetime of every per-node task submitted for a layer, so
/// `run_frame`'s wait below only returns once every node in the layer
/// — across all three queues, not just whichever queue's backlog
/// happened to drain first — has actually finished.
struct LayerBarrierGuard<'a> {
    remaining: &'a Arc<(Mutex<usize>, Condvar)>,
}

impl Drop for LayerBarrierGuard<'_> {
    fn drop(&mut self) {
        let (count, cvar) = &**self.remaining;
        let mut count = count.lock().expect(crate::THREAD_PANIC_MSG);
        *count -= 1;
        if *count == 0 {
            cvar.notify_all();
        }
    }
}

/// A registered node: the boxed behavior plus the port wiring and
/// bookkeeping the executor drives it through. Not exposed directly —
/// callers interact with nodes by [NodeId] through the [Executor].
struct NodeEntry {
    kind: NodeKind,
    input_ports: Vec<InputPort>,
    output_ports: Vec<OutputPort>,
    state: NodeStateCell,
    stats: Mutex<NodeStats>,
    params: ParameterMap,
    node: Mutex<Box<dyn Node>>,
    prepared: AtomicBool,
}

/// Aggregate throughput/latency counters sampled across frames (§4.5).
/// No cross-field consistency is guaranteed between two reads taken at
/// different times.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionStats {
    pub frames_submitted: u64,
    pub frames_completed: u64,
    pub frames_dropped: u64,
    pub average_frame_time_us: u64,
    pub peak_frame_time_us: u64,
    pub last_frame_time_us: u64,
    pub gpu_queue_time_us: u64,
    pub cpu_queue_time_us: u64,
    pub io_queue_time_us: u64,
}

type ErrorHook = Box<dyn Fn(NodeId, NodeError) + Send + Sync>;
type DropHook = Box<dyn Fn(Capture) + Send + Sync>;
type FrameCompleteHook = Box<dyn Fn(u64) + Send + Sync>;

/// Drives a [Graph] of registered [Node]s to completion frame by frame.
/// Each frame walks the graph's cached layered plan one layer at a
/// time, submitting every node in a layer to its `NodeKind`-appropriate
/// queue and waiting for the whole layer before moving to the next
/// (§4.5 point 3's "equivalent layered-plan" dispatch mode).
pub struct Executor {
    graph: Mutex<Graph>,
    nodes: Mutex<HashMap<NodeId, Arc<NodeEntry>>>,
    ctx: PipelineContext,

    gpu_queue: TaskQueue,
    cpu_queue: TaskQueue,
    io_queue: TaskQueue,

    cached_plan: Mutex<Option<(u64, Vec<Vec<NodeId>>)>>,
    stats: Mutex<ExecutionStats>,
    cancelled: Arc<AtomicBool>,
    pending_frames: AtomicU64,
    next_frame_seq: AtomicU64,

    source_node: Mutex<Option<NodeId>>,
    sink_nodes: Mutex<Vec<NodeId>>,

    on_error: Arc<Mutex<Option<ErrorHook>>>,
    on_drop: Arc<Mutex<Option<DropHook>>>,
    on_frame_complete: Arc<Mutex<Option<FrameCompleteHook>>>,
}

impl Executor {
    pub fn new(ctx: PipelineContext) -> Self {
        let config = ctx.config();
        let cpu_workers = if config.enable_parallel_execution {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            1
        };
        Self {
            graph: Mutex::new(Graph::new()),
            nodes: Mutex::new(HashMap::new()),
            ctx,
            gpu_queue: TaskQueue::new(1),
            cpu_queue: TaskQueue::new(cpu_workers),
            io_queue: TaskQueue::new(1),
            cached_plan: Mutex::new(None),
            stats: Mutex::new(ExecutionStats::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            pending_frames: AtomicU64::new(0),
            next_frame_seq: AtomicU64::new(0),
            source_node: Mutex::new(None),
            sink_nodes: Mutex::new(Vec::new()),
            on_error: Arc::new(Mutex::new(None)),
            on_drop: Arc::new(Mutex::new(None)),
            on_frame_complete: Arc::new(Mutex::new(None)),
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Registers a node with its declared input/output port names,
    /// returning its graph id. `input_names.len()` and
    /// `output_names.len()` must match `node.input_count()` /
    /// `node.output_count()` — the [Node] trait itself only reports
    /// counts (§3), so naming is supplied separately at registration.
    pub fn add_node(&self, mut node: Box<dyn Node>, input_names: Vec<String>, output_names: Vec<String>) -> NodeId {
        debug_assert_eq!(input_names.len(), node.input_count());
        debug_assert_eq!(output_names.len(), node.output_count());
        let name = node.name().to_string();
        let id = self.graph.lock().expect(crate::THREAD_PANIC_MSG).add_node(name);

        let input_ports = input_names.into_iter().map(|n| InputPort::new(id, n)).collect();
        let output_ports = output_names.into_iter().map(|n| OutputPort::new(id, n)).collect();
        node.on_parameter_changed("");

        let entry = Arc::new(NodeEntry {
            kind: node.kind(),
            input_ports,
            output_ports,
            state: NodeStateCell::new(),
            stats: Mutex::new(NodeStats::default()),
            params: ParameterMap::new(),
            node: Mutex::new(node),
            prepared: AtomicBool::new(false),
        });
        self.nodes.lock().expect(crate::THREAD_PANIC_MSG).insert(id, entry);
        id
    }

    /// Marks `id` as the node the executor stages each incoming
    /// [Capture] onto via [PipelineContext::set_pending_capture].
    pub fn set_source_node(&self, id: NodeId) {
        *self.source_node.lock().expect(crate::THREAD_PANIC_MSG) = Some(id);
    }

    pub fn add_sink_node(&self, id: NodeId) {
        self.sink_nodes.lock().expect(crate::THREAD_PANIC_MSG).push(id);
    }

    pub fn sink_nodes(&self) -> Vec<NodeId> {
        self.sink_nodes.lock().expect(crate::THREAD_PANIC_MSG).clone()
    }

    /// Connects `src`'s `src_port` output to `dst`'s `dst_port` input.
    /// Port names are validated against the nodes' declared ports in
    /// addition to the graph's own structural checks; delivery at
    /// frame-run time looks up the destination port by name through the
    /// graph's edge list rather than through any state stored on the
    /// [InputPort] itself (§4.5 completion propagation).
    pub fn connect(&self, src: NodeId, src_port: &str, dst: NodeId, dst_port: &str) -> Result<(), ExecutorError> {
        let nodes = self.nodes.lock().expect(crate::THREAD_PANIC_MSG);
        let src_entry = nodes.get(&src).ok_or(ExecutorError::UnknownNode(src))?;
        if !src_entry.output_ports.iter().any(|p| p.name() == src_port) {
            return Err(ExecutorError::Graph(GraphError::PortNotFound { node: src, port: src_port.to_string() }));
        }
        let dst_entry = nodes.get(&dst).ok_or(ExecutorError::UnknownNode(dst))?;
        if !dst_entry.input_ports.iter().any(|p| p.name() == dst_port) {
            return Err(ExecutorError::Graph(GraphError::PortNotFound { node: dst, port: dst_port.to_string() }));
        }
        drop(nodes);

        self.graph
            .lock()
            .expect(crate::THREAD_PANIC_MSG)
            .connect(src, src_port.to_string(), dst, dst_port.to_string())?;
        Ok(())
    }

    /// Disconnects a specific edge, if present (§4.2). Safe to call
    /// between frames to re-route the graph (S5): `run_frame` always
    /// reads outgoing edges fresh from the graph at the start of the
    /// frame it dispatches, so a disconnect/connect pair committed
    /// before a `submit_frame` call is fully observed by that frame and
    /// none of the frames before it.
    pub fn disconnect(&self, src: NodeId, src_port: &str, dst: NodeId, dst_port: &str) -> bool {
        self.graph.lock().expect(crate::THREAD_PANIC_MSG).disconnect(src, src_port, dst, dst_port)
    }

    pub fn node_state(&self, id: NodeId) -> Option<NodeState> {
        self.nodes.lock().expect(crate::THREAD_PANIC_MSG).get(&id).map(|e| e.state.get())
    }

    pub fn node_stats(&self, id: NodeId) -> Option<NodeStats> {
        self.nodes
            .lock()
            .expect(crate::THREAD_PANIC_MSG)
            .get(&id)
            .map(|e| *e.stats.lock().expect(crate::THREAD_PANIC_MSG))
    }

    pub fn set_on_error<F: Fn(NodeId, NodeError) + Send + Sync + 'static>(&self, f: F) {
        *self.on_error.lock().expect(crate::THREAD_PANIC_MSG) = Some(Box::new(f));
    }

    pub fn set_on_drop<F: Fn(Capture) + Send + Sync + 'static>(&self, f: F) {
        *self.on_drop.lock().expect(crate::THREAD_PANIC_MSG) = Some(Box::new(f));
    }

    pub fn set_on_frame_complete<F: Fn(u64) + Send + Sync + 'static>(&self, f: F) {
        *self.on_frame_complete.lock().expect(crate::THREAD_PANIC_MSG) = Some(Box::new(f));
    }

    /// Sets a node parameter and invokes its `on_parameter_changed` hook
    /// (§3): live-reconfiguration without tearing down the graph.
    pub fn set_node_parameter(&self, id: NodeId, key: impl Into<String>, value: ParameterValue) -> Result<(), ExecutorError> {
        let nodes = self.nodes.lock().expect(crate::THREAD_PANIC_MSG);
        let entry = nodes.get(&id).ok_or(ExecutorError::UnknownNode(id))?;
        let key = key.into();
        entry.params.set(key.clone(), value);
        entry.node.lock().expect(crate::THREAD_PANIC_MSG).on_parameter_changed(&key);
        Ok(())
    }

    pub fn node_parameter(&self, id: NodeId, key: &str) -> Option<ParameterValue> {
        self.nodes.lock().expect(crate::THREAD_PANIC_MSG).get(&id)?.params.get(key)
    }

    pub fn stats(&self) -> ExecutionStats {
        *self.stats.lock().expect(crate::THREAD_PANIC_MSG)
    }

    /// Zeroes the aggregate counters without otherwise disturbing
    /// executor state (§4.5) — in-flight frames, registered nodes, and
    /// the graph itself are untouched.
    pub fn reset_stats(&self) {
        *self.stats.lock().expect(crate::THREAD_PANIC_MSG) = ExecutionStats::default();
    }

    fn layered_plan(&self) -> Result<Vec<Vec<NodeId>>, ExecutorError> {
        let version = self.graph.lock().expect(crate::THREAD_PANIC_MSG).version();
        let mut cached = self.cached_plan.lock().expect(crate::THREAD_PANIC_MSG);
        if let Some((v, plan)) = cached.as_ref() {
            if *v == version {
                return Ok(plan.clone());
            }
        }
        let plan = self.graph.lock().expect(crate::THREAD_PANIC_MSG).layered_plan()?;
        *cached = Some((version, plan.clone()));
        Ok(plan)
    }

    /// Admits one [Capture] and runs it synchronously through the
    /// entire graph, returning the frame id assigned. Applies
    /// back-pressure per §5: when `enable_frame_skipping` is set and
    /// the frame packet pool is exhausted, the capture is dropped (the
    /// drop hook fires) rather than propagating [PoolError].
    ///
    /// `max_concurrent_frames` is checked against `pending_frames`
    /// below, but a single caller driving `submit_frame` sequentially
    /// (as [Self::run_loop] does) never observes it trip: this call
    /// increments `pending_frames`, runs the frame to completion, and
    /// decrements it again before returning, so the counter is back at
    /// zero by the time the next sequential call checks it. The guard
    /// only has teeth against genuinely concurrent submitters —
    /// multiple threads calling `submit_frame` on the same `Executor`
    /// at once. In-pool exhaustion (below) is what actually throttles
    /// a single fast producer.
    pub fn submit_frame(&self, capture: Capture) -> Result<u64, ExecutorError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(ExecutorError::Cancelled);
        }

        let config = self.ctx.config();
        if self.pending_frames.load(Ordering::Acquire) >= config.max_concurrent_frames as u64 {
            if config.enable_frame_skipping {
                self.record_drop(capture);
                return Err(ExecutorError::TooManyPendingFrames);
            }
            return Err(ExecutorError::TooManyPendingFrames);
        }

        let (width, height) = capture.dimensions();
        let format = capture.format();
        let timestamp_us = capture.timestamp_us();

        let packet = match self.ctx.frame_packet_pool().acquire(width, height, format) {
            Ok(p) => p,
            Err(e) => {
                if config.enable_frame_skipping {
                    self.record_drop(capture);
                    return Err(ExecutorError::Backpressure(e));
                }
                return Err(ExecutorError::Backpressure(e));
            }
        };
        packet.set_timestamp_us(timestamp_us);
        let sequence = self.next_frame_seq.fetch_add(1, Ordering::Relaxed);
        packet.set_sequence_number(sequence);

        match &capture {
            Capture::RawBuffer { bytes, .. } => packet.set_cpu_buffer(bytes.clone()),
            Capture::Texture { texture, .. } => packet.set_texture(texture.clone()),
        }

        self.pending_frames.fetch_add(1, Ordering::AcqRel);
        self.stats.lock().expect(crate::THREAD_PANIC_MSG).frames_submitted += 1;

        self.ctx.set_pending_capture(packet);
        let frame_id = self.run_frame();
        self.pending_frames.fetch_sub(1, Ordering::AcqRel);
        Ok(frame_id)
    }

    fn record_drop(&self, capture: Capture) {
        util::debug_log_warning!("dropping frame at timestamp {}us under back-pressure", capture.timestamp_us());
        self.stats.lock().expect(crate::THREAD_PANIC_MSG).frames_dropped += 1;
        if let Some(hook) = self.on_drop.lock().expect(crate::THREAD_PANIC_MSG).as_ref() {
            hook(capture);
        }
    }

    /// Runs one frame through every layer of the cached plan, returns
    /// the frame id the source node assigned. If the plan computation
    /// itself fails (cycle — shouldn't happen post-validation, but the
    /// executor never trusts that blindly), the frame is treated as a
    /// total failure and reported through the error hook.
    fn run_frame(&self) -> u64 {
        let start = Instant::now();
        let plan = match self.layered_plan() {
            Ok(p) => p,
            Err(_) => {
                self.stats.lock().expect(crate::THREAD_PANIC_MSG).frames_dropped += 1;
                return 0;
            }
        };

        let nodes = Arc::new(self.nodes.lock().expect(crate::THREAD_PANIC_MSG).clone());
        for entry in nodes.values() {
            for port in &entry.input_ports {
                port.reset_for_next_frame();
            }
            entry.state.reset_for_next_frame();
        }

        let edges_by_node: HashMap<NodeId, Vec<crate::graph::Edge>> = {
            let graph = self.graph.lock().expect(crate::THREAD_PANIC_MSG);
            nodes.keys().map(|id| (*id, graph.outgoing_edges(*id).to_vec())).collect()
        };
        let source_id = *self.source_node.lock().expect(crate::THREAD_PANIC_MSG);

        for layer in &plan {
            if self.cancelled.load(Ordering::Acquire) {
                break;
            }
            let present: Vec<NodeId> = layer.iter().copied().filter(|id| nodes.contains_key(id)).collect();
            if present.is_empty() {
                continue;
            }
            // Every node in the layer shares one completion barrier
            // regardless of which of the three queues it lands on, so
            // the next layer never starts while a `CpuParallel` worker
            // (there may be several) is still mid-`process` on this one
            // (§4.5 point 3's "submit a layer, wait on the group").
            let remaining = Arc::new((Mutex::new(present.len()), Condvar::new()));
            for id in present {
                let entry = nodes.get(&id).cloned().expect("checked present above");
                let edges = edges_by_node.get(&id).cloned().unwrap_or_default();
                let ctx = self.ctx.clone();
                let cancelled = self.cancelled.clone();
                let nodes_for_task = nodes.clone();
                let on_error = self.on_error.clone();
                let is_source = source_id == Some(id);
                let remaining = remaining.clone();

                let task: Box<dyn FnOnce() + Send> = Box::new(move || {
                    let _guard = LayerBarrierGuard { remaining: &remaining };
                    if cancelled.load(Ordering::Acquire) {
                        entry.state.set(NodeState::Cancelled);
                        return;
                    }

                    let input_count = entry.input_ports.len();
                    let mut inputs: Vec<Option<FramePacketHandle>> = (0..input_count)
                        .map(|i| entry.input_ports[i].try_take())
                        .collect();

                    if !is_source && input_count > 0 && inputs.iter().all(Option::is_none) {
                        // Every declared input is absent: an upstream
                        // node either didn't run or failed. Skip this
                        // node entirely for the frame (§3 I-ND-3).
                        return;
                    }

                    entry.state.set(NodeState::Ready);
                    entry.state.set(NodeState::Processing);
                    let mut node = entry.node.lock().expect(crate::THREAD_PANIC_MSG);

                    if !entry.prepared.swap(true, Ordering::AcqRel) {
                        if let Err(e) = node.prepare(&ctx) {
                            entry.state.set(NodeState::Error);
                            entry.stats.lock().expect(crate::THREAD_PANIC_MSG).frames_failed += 1;
                            drop(node);
                            if let Some(hook) = on_error.lock().expect(crate::THREAD_PANIC_MSG).as_ref() {
                                hook(id, e);
                            }
                            return;
                        }
                    }

                    let frame_start = Instant::now();
                    let mut outputs: Vec<Option<FramePacketHandle>> = vec![None; entry.output_ports.len()];
                    let result = node.process(&inputs, &mut outputs, &ctx);
                    node.finalize(&ctx);
                    drop(node);
                    inputs.clear();

                    let elapsed_us = frame_start.elapsed().as_micros() as u64;
                    let mut stats = entry.stats.lock().expect(crate::THREAD_PANIC_MSG);
                    stats.last_process_time_us = elapsed_us;

                    match result {
                        Ok(()) => {
                            stats.frames_processed += 1;
                            drop(stats);
                            entry.state.set(NodeState::Completed);
                            for (port_idx, output) in outputs.into_iter().enumerate() {
                                let Some(packet) = output else { continue };
                                let port_name = entry.output_ports[port_idx].name().to_string();
                                let targets: Vec<_> = edges.iter().filter(|e| e.src_port == port_name).collect();
                                if let Some((last, rest)) = targets.split_last() {
                                    for edge in rest {
                                        if let Some(dst) = nodes_for_task.get(&edge.dst_node) {
                                            if let Some(dst_port) = dst.input_ports.iter().find(|p| p.name() == edge.dst_port) {
                                                dst_port.deliver(packet.retain());
                                            }
                                        }
                                    }
                                    if let Some(dst) = nodes_for_task.get(&last.dst_node) {
                                        if let Some(dst_port) = dst.input_ports.iter().find(|p| p.name() == last.dst_port) {
                                            dst_port.deliver(packet);
                                        }
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            stats.frames_failed += 1;
                            drop(stats);
                            entry.state.set(NodeState::Error);
                            util::debug_log_error!("node {id} failed to process its frame: {e}");
                            if let Some(hook) = on_error.lock().expect(crate::THREAD_PANIC_MSG).as_ref() {
                                hook(id, e);
                            }
                        }
                    }
                });

                match entry.kind {
                    NodeKind::GpuSerial => self.gpu_queue.submit(task),
                    NodeKind::CpuParallel => self.cpu_queue.submit(task),
                    NodeKind::Io => self.io_queue.submit(task),
                }
            }
            let (count, cvar) = &*remaining;
            let mut count = count.lock().expect(crate::THREAD_PANIC_MSG);
            while *count > 0 {
                count = cvar.wait(count).expect(crate::THREAD_PANIC_MSG);
            }
        }

        let frame_id = self.next_frame_seq.load(Ordering::Relaxed).saturating_sub(1);

        let elapsed_us = start.elapsed().as_micros() as u64;
        let mut stats = self.stats.lock().expect(crate::THREAD_PANIC_MSG);
        stats.frames_completed += 1;
        stats.last_frame_time_us = elapsed_us;
        stats.peak_frame_time_us = stats.peak_frame_time_us.max(elapsed_us);
        let n = stats.frames_completed.max(1);
        stats.average_frame_time_us = stats.average_frame_time_us + (elapsed_us.saturating_sub(stats.average_frame_time_us)) / n;
        stats.gpu_queue_time_us = self.gpu_queue.accumulated_time().as_micros() as u64;
        stats.cpu_queue_time_us = self.cpu_queue.accumulated_time().as_micros() as u64;
        stats.io_queue_time_us = self.io_queue.accumulated_time().as_micros() as u64;
        drop(stats);

        if let Some(hook) = self.on_frame_complete.lock().expect(crate::THREAD_PANIC_MSG).as_ref() {
            hook(frame_id);
        }

        frame_id
    }

    /// Drains all three queues without running their pending work,
    /// calls `cancel()` on every node, and marks the executor cancelled
    /// so in-flight tasks exit at their next cooperative check (§4.5
    /// point 7 `cancelAll`).
    pub fn cancel_all(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.gpu_queue.drain_pending();
        self.cpu_queue.drain_pending();
        self.io_queue.drain_pending();
        for entry in self.nodes.lock().expect(crate::THREAD_PANIC_MSG).values() {
            entry.node.lock().expect(crate::THREAD_PANIC_MSG).cancel();
            entry.state.set(NodeState::Cancelled);
        }
    }

    /// Blocks until every currently in-flight frame finishes or
    /// `timeout` elapses, whichever comes first, and returns whether
    /// the wait drained cleanly (§5 suspension point "Executor
    /// `flush`"). Unlike [Self::shutdown], this never cancels anything
    /// and the executor is left fully usable afterward — a later
    /// `submit_frame` call still admits new frames normally.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending_frames.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.pending_frames.load(Ordering::Acquire) == 0
    }

    /// Waits up to `timeout` for in-flight frames to finish, then force
    /// cancels whatever remains (§4.5 point 7). The frame-packet pool's
    /// `waitAllReleased` gives the same grace period a second chance to
    /// observe outstanding packets returning before the hard cancel.
    /// Unlike [Self::flush], this is terminal: it ends with
    /// [Self::cancel_all], after which the executor refuses new
    /// frames.
    pub fn shutdown(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        self.flush(timeout);
        self.ctx.frame_packet_pool().wait_all_released(deadline.saturating_duration_since(Instant::now()));
        self.cancel_all();
    }

    /// Runs a loop pulling captures from `source` and submitting them
    /// until the source is exhausted or the executor is cancelled
    /// (§4.5 "loop restart").
    pub fn run_loop(&self, source: &mut dyn FrameSource, poll_timeout: Duration) {
        while !self.cancelled.load(Ordering::Acquire) {
            match source.next_capture(Some(poll_timeout)) {
                Some(capture) => {
                    let _ = self.submit_frame(capture);
                }
                None => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin_nodes::{AlwaysFailNode, PassthroughNode, SourceNode};
    use crate::config::PipelineConfig;
    use crate::context::PipelineContext;
    use crate::graphics::NullBackend;
    use crate::pixel_format::PixelFormat;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn test_ctx(config: PipelineConfig) -> PipelineContext {
        PipelineContext::new(Arc::new(NullBackend::new()), config)
    }

    fn raw_capture(ts: i64) -> Capture {
        Capture::RawBuffer {
            width: 4,
            height: 4,
            format: PixelFormat::Rgba8,
            stride: 16,
            bytes: vec![0u8; 64],
            timestamp_us: ts,
        }
    }

    #[test]
    fn single_node_pass_through_completes() {
        let ctx = test_ctx(PipelineConfig::default());
        let exec = Executor::new(ctx);
        let source = exec.add_node(Box::new(SourceNode::new("src")), vec![], vec!["out".into()]);
        let sink = exec.add_node(Box::new(PassthroughNode::new("sink", NodeKind::CpuParallel)), vec!["in".into()], vec!["out".into()]);
        exec.set_source_node(source);
        exec.connect(source, "out", sink, "in").unwrap();

        let completed = Arc::new(AtomicUsize::new(0));
        let completed2 = completed.clone();
        exec.set_on_frame_complete(move |_| {
            completed2.fetch_add(1, Ordering::SeqCst);
        });

        exec.submit_frame(raw_capture(1)).unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(exec.node_stats(sink).unwrap().frames_processed, 1);
    }

    #[test]
    fn node_failure_stops_at_the_failing_node() {
        let ctx = test_ctx(PipelineConfig::default());
        let exec = Executor::new(ctx);
        let source = exec.add_node(Box::new(SourceNode::new("src")), vec![], vec!["out".into()]);
        let failing = exec.add_node(Box::new(AlwaysFailNode::new("bad")), vec!["in".into()], vec!["out".into()]);
        let downstream = exec.add_node(Box::new(PassthroughNode::new("after", NodeKind::CpuParallel)), vec!["in".into()], vec!["out".into()]);
        exec.set_source_node(source);
        exec.connect(source, "out", failing, "in").unwrap();
        exec.connect(failing, "out", downstream, "in").unwrap();

        let errors = Arc::new(AtomicUsize::new(0));
        let errors2 = errors.clone();
        exec.set_on_error(move |_, _| {
            errors2.fetch_add(1, Ordering::SeqCst);
        });

        exec.submit_frame(raw_capture(2)).unwrap();
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(exec.node_stats(failing).unwrap().frames_failed, 1);
        assert_eq!(exec.node_stats(downstream).unwrap().frames_processed, 0);
    }

    #[test]
    fn back_pressure_drops_frames_once_pool_is_exhausted() {
        let mut config = PipelineConfig::default();
        config.frame_packet_pool_size = 1;
        config.max_concurrent_frames = 100;
        config.enable_frame_skipping = true;
        let ctx = test_ctx(config);
        // drain the only packet the pool will hand out and never
        // return it, so the very next acquire is forced to block and
        // time out rather than succeed.
        let held = ctx.frame_packet_pool().acquire(4, 4, PixelFormat::Rgba8).unwrap();
        let exec = Executor::new(ctx);
        let source = exec.add_node(Box::new(SourceNode::new("src")), vec![], vec!["out".into()]);
        exec.set_source_node(source);

        let dropped = Arc::new(AtomicUsize::new(0));
        let dropped2 = dropped.clone();
        exec.set_on_drop(move |_| {
            dropped2.fetch_add(1, Ordering::SeqCst);
        });

        assert!(exec.submit_frame(raw_capture(3)).is_err());
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        drop(held);
    }

    /// Exercises the `pendingFrames >= maxPendingFrames` admission
    /// check (§4.5 point 2) directly against the spec's literal S3
    /// value rather than through sequential `submit_frame` calls, since
    /// those always observe `pending_frames` back at zero between
    /// calls (see the doc comment on `submit_frame`) — only a
    /// concurrent submitter or, as here, a directly-raised counter
    /// actually trips this branch.
    #[test]
    fn admission_control_drops_when_pending_frames_at_capacity() {
        let mut config = PipelineConfig::default();
        config.max_concurrent_frames = 2;
        config.enable_frame_skipping = true;
        let ctx = test_ctx(config);
        let exec = Executor::new(ctx);

        exec.pending_frames.store(2, Ordering::SeqCst);
        let result = exec.submit_frame(raw_capture(1000));
        assert!(matches!(result, Err(ExecutorError::TooManyPendingFrames)));
        assert_eq!(exec.stats().frames_dropped, 1);
    }
}
