//! End-to-end pipeline scenarios exercised through the public
//! `Executor`/`Graph`/`Synchronizer` surface rather than any one
//! module's internals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use engine::builtin_nodes::{CompositeNode, PassthroughNode, SinkNode, SourceNode};
use engine::context::PipelineContext;
use engine::frame_packet::FramePacketHandle;
use engine::graph::GraphError;
use engine::graphics::NullBackend;
use engine::node::{Node, NodeError, NodeKind};
use engine::pixel_format::PixelFormat;
use engine::sink::{FrameSink, SinkError};
use engine::source::Capture;
use engine::synchronizer::{FrameSyncConfig, Synchronizer};
use engine::{Executor, Graph, PipelineConfig};

fn raw_capture(width: u32, height: u32, timestamp_us: i64, fill: u8) -> Capture {
    Capture::RawBuffer {
        width,
        height,
        format: PixelFormat::Rgba8,
        stride: (width * 4) as usize,
        bytes: vec![fill; (width * height * 4) as usize],
        timestamp_us,
    }
}

fn test_ctx(config: PipelineConfig) -> PipelineContext {
    PipelineContext::new(Arc::new(NullBackend::new()), config)
}

/// A `FrameSink` that hands every delivered frame's (width, height,
/// timestamp, bytes) to a shared `Vec`, for assertion after the fact.
struct RecordingSink {
    records: Arc<Mutex<Vec<(u32, u32, i64, Vec<u8>)>>>,
}

impl FrameSink for RecordingSink {
    fn name(&self) -> &str {
        "recording_sink"
    }

    fn deliver(&mut self, packet: &FramePacketHandle, ctx: &PipelineContext) -> Result<(), SinkError> {
        let (w, h) = packet.dimensions();
        let bytes = packet
            .cpu_buffer(ctx.backend().as_ref())
            .ok_or_else(|| SinkError::DeliveryFailed(self.name().to_string(), "no data".into()))?;
        self.records.lock().unwrap().push((w, h, packet.timestamp_us(), bytes));
        Ok(())
    }
}

/// A `FrameSink` that keeps every packet checked out of its pool
/// forever (via `retain`), for forcing pool exhaustion in the
/// back-pressure scenario.
struct HoardingSink {
    held: Arc<Mutex<Vec<FramePacketHandle>>>,
}

impl FrameSink for HoardingSink {
    fn name(&self) -> &str {
        "hoarding_sink"
    }

    fn deliver(&mut self, packet: &FramePacketHandle, _ctx: &PipelineContext) -> Result<(), SinkError> {
        self.held.lock().unwrap().push(packet.retain());
        Ok(())
    }
}

/// A node that fails only on its `fail_on`-th invocation (1-indexed),
/// for exercising S4 without a permanently broken node.
struct FailsOnceNode {
    name: String,
    fail_on: usize,
    calls: AtomicUsize,
}

impl FailsOnceNode {
    fn new(name: impl Into<String>, fail_on: usize) -> Self {
        Self { name: name.into(), fail_on, calls: AtomicUsize::new(0) }
    }
}

impl Node for FailsOnceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::CpuParallel
    }

    fn process(
        &mut self,
        inputs: &[Option<FramePacketHandle>],
        outputs: &mut [Option<FramePacketHandle>],
        _ctx: &PipelineContext,
    ) -> Result<(), NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(NodeError::ProcessFailed(self.name.clone(), "scheduled failure".into()));
        }
        outputs[0] = inputs[0].as_ref().map(FramePacketHandle::retain);
        Ok(())
    }

    fn input_count(&self) -> usize {
        1
    }

    fn output_count(&self) -> usize {
        1
    }
}

/// S1 pass-through: source -> pass-through -> callback sink. The
/// callback fires exactly once with the submitted dimensions,
/// timestamp, and identical pixel bytes.
#[test]
fn s1_pass_through_delivers_one_matching_frame() {
    let ctx = test_ctx(PipelineConfig::default());
    let exec = Executor::new(ctx);

    let records = Arc::new(Mutex::new(Vec::new()));
    let source = exec.add_node(Box::new(SourceNode::new("source")), vec![], vec!["out".into()]);
    let pass = exec.add_node(
        Box::new(PassthroughNode::new("pass", NodeKind::CpuParallel)),
        vec!["in".into()],
        vec!["out".into()],
    );
    let sink = exec.add_node(
        Box::new(SinkNode::new(Box::new(RecordingSink { records: records.clone() }))),
        vec!["in".into()],
        vec![],
    );
    exec.set_source_node(source);
    exec.add_sink_node(sink);
    exec.connect(source, "out", pass, "in").unwrap();
    exec.connect(pass, "out", sink, "in").unwrap();

    let input_bytes = vec![7u8; 16 * 16 * 4];
    exec.submit_frame(Capture::RawBuffer {
        width: 16,
        height: 16,
        format: PixelFormat::Rgba8,
        stride: 64,
        bytes: input_bytes.clone(),
        timestamp_us: 1000,
    })
    .unwrap();

    let records = records.lock().unwrap();
    assert_eq!(records.len(), 1);
    let (w, h, ts, bytes) = &records[0];
    assert_eq!(*w, 16);
    assert_eq!(*h, 16);
    assert_eq!(*ts, 1000);
    assert_eq!(bytes, &input_bytes);
}

/// S2 fan-out/fan-in: source feeds two independent branches (a
/// GPU-serial "blur" and a CPU-parallel "face-detect"), each branch's
/// sink pushes into a shared `Synchronizer`. Three timestamps within
/// tolerance of each other all pair up with no drops, and each paired
/// result composes cleanly through a `CompositeNode`.
#[test]
fn s2_fan_out_fan_in_pairs_every_frame_with_no_drops() {
    let ctx = test_ctx(PipelineConfig::default());
    let exec = Executor::new(ctx);

    let sync = Arc::new(Synchronizer::new(FrameSyncConfig {
        policy: engine::synchronizer::SyncPolicy::WaitBoth,
        max_wait_time_ms: 200,
        timestamp_tolerance_us: 500,
        max_pending_frames: 8,
    }));

    let completed_pairs = Arc::new(Mutex::new(Vec::new()));

    struct SyncPushSink {
        sync: Arc<Synchronizer>,
        is_gpu: bool,
        completed: Arc<Mutex<Vec<engine::synchronizer::SyncedPair>>>,
    }
    impl FrameSink for SyncPushSink {
        fn name(&self) -> &str {
            if self.is_gpu { "gpu_branch_sink" } else { "cpu_branch_sink" }
        }
        fn deliver(&mut self, packet: &FramePacketHandle, _ctx: &PipelineContext) -> Result<(), SinkError> {
            // Whichever of the two branches lands second for a given
            // timestamp is the one that observes the completed pair;
            // both push into the same shared result Vec.
            let pair = if self.is_gpu {
                self.sync.push_gpu(packet.retain())
            } else {
                self.sync.push_cpu(packet.retain())
            };
            if let Some(pair) = pair {
                self.completed.lock().unwrap().push(pair);
            }
            Ok(())
        }
    }

    let source = exec.add_node(Box::new(SourceNode::new("source")), vec![], vec!["out".into()]);
    let blur = exec.add_node(
        Box::new(PassthroughNode::new("blur", NodeKind::GpuSerial)),
        vec!["in".into()],
        vec!["out".into()],
    );
    let face_detect = exec.add_node(
        Box::new(PassthroughNode::new("face_detect", NodeKind::CpuParallel)),
        vec!["in".into()],
        vec!["out".into()],
    );
    let gpu_sink = exec.add_node(
        Box::new(SinkNode::new(Box::new(SyncPushSink {
            sync: sync.clone(),
            is_gpu: true,
            completed: completed_pairs.clone(),
        }))),
        vec!["in".into()],
        vec![],
    );
    let cpu_sink = exec.add_node(
        Box::new(SinkNode::new(Box::new(SyncPushSink {
            sync: sync.clone(),
            is_gpu: false,
            completed: completed_pairs.clone(),
        }))),
        vec!["in".into()],
        vec![],
    );
    exec.set_source_node(source);
    exec.connect(source, "out", blur, "in").unwrap();
    exec.connect(source, "out", face_detect, "in").unwrap();
    exec.connect(blur, "out", gpu_sink, "in").unwrap();
    exec.connect(face_detect, "out", cpu_sink, "in").unwrap();

    for ts in [1000, 1033, 1066] {
        exec.submit_frame(raw_capture(4, 4, ts, 0)).unwrap();
    }

    let stats = sync.stats();
    assert_eq!(stats.paired, 3);
    assert_eq!(stats.dropped, 0);
    assert_eq!(sync.pending_count(), 0);

    // Run each completed pair through a composite node, confirming it
    // composes into exactly one output.
    let pairs = completed_pairs.lock().unwrap();
    assert_eq!(pairs.len(), 3);
    let mut composite = CompositeNode::new("composite", 2, 0, true);
    let composite_ctx = PipelineContext::new(Arc::new(NullBackend::new()), PipelineConfig::default());
    for pair in pairs.iter() {
        let inputs = vec![pair.gpu.as_ref().map(FramePacketHandle::retain), pair.cpu.as_ref().map(FramePacketHandle::retain)];
        let mut outputs: Vec<Option<FramePacketHandle>> = vec![None];
        composite.process(&inputs, &mut outputs, &composite_ctx).unwrap();
        assert!(outputs[0].is_some());
    }
}

/// S3 back-pressure: a pool of capacity 2 with a sink that never
/// releases its packets. Five submissions produce exactly two
/// completions and three drops.
#[test]
fn s3_back_pressure_drops_the_overflow_exactly() {
    let mut config = PipelineConfig::default();
    config.frame_packet_pool_size = 2;
    config.max_concurrent_frames = 100;
    config.enable_frame_skipping = true;
    let ctx = test_ctx(config);
    let exec = Executor::new(ctx);

    let held = Arc::new(Mutex::new(Vec::new()));
    let source = exec.add_node(Box::new(SourceNode::new("source")), vec![], vec!["out".into()]);
    let sink = exec.add_node(
        Box::new(SinkNode::new(Box::new(HoardingSink { held: held.clone() }))),
        vec!["in".into()],
        vec![],
    );
    exec.set_source_node(source);
    exec.add_sink_node(sink);
    exec.connect(source, "out", sink, "in").unwrap();

    let dropped = Arc::new(AtomicUsize::new(0));
    let dropped2 = dropped.clone();
    exec.set_on_drop(move |_| {
        dropped2.fetch_add(1, Ordering::SeqCst);
    });

    let mut ok_count = 0;
    for i in 0..5 {
        if exec.submit_frame(raw_capture(4, 4, i, 0)).is_ok() {
            ok_count += 1;
        }
    }

    assert_eq!(ok_count, 2);
    assert_eq!(dropped.load(Ordering::SeqCst), 3);
    assert_eq!(exec.stats().frames_completed, 2);
    assert_eq!(exec.stats().frames_dropped, 3);
    assert_eq!(held.lock().unwrap().len(), 2);
}

/// S4 node failure: A -> B -> C where B fails on the second frame
/// only. Frames 1 and 3 complete normally through C; frame 2 fires the
/// error hook for B and never reaches C.
#[test]
fn s4_node_failure_skips_downstream_for_that_frame_only() {
    let ctx = test_ctx(PipelineConfig::default());
    let exec = Executor::new(ctx);

    let a = exec.add_node(Box::new(SourceNode::new("a")), vec![], vec!["out".into()]);
    let b = exec.add_node(Box::new(FailsOnceNode::new("b", 2)), vec!["in".into()], vec!["out".into()]);
    let c = exec.add_node(
        Box::new(PassthroughNode::new("c", NodeKind::CpuParallel)),
        vec!["in".into()],
        vec!["out".into()],
    );
    exec.set_source_node(a);
    exec.connect(a, "out", b, "in").unwrap();
    exec.connect(b, "out", c, "in").unwrap();

    let errors: Arc<Mutex<Vec<engine::NodeId>>> = Arc::new(Mutex::new(Vec::new()));
    let errors2 = errors.clone();
    exec.set_on_error(move |id, _| {
        errors2.lock().unwrap().push(id);
    });

    exec.submit_frame(raw_capture(4, 4, 1, 0)).unwrap();
    exec.submit_frame(raw_capture(4, 4, 2, 0)).unwrap();
    exec.submit_frame(raw_capture(4, 4, 3, 0)).unwrap();

    assert_eq!(*errors.lock().unwrap(), vec![b]);
    assert_eq!(exec.node_stats(b).unwrap().frames_failed, 1);
    assert_eq!(exec.node_stats(b).unwrap().frames_processed, 2);
    // C only ever sees the frames where B succeeded.
    assert_eq!(exec.node_stats(c).unwrap().frames_processed, 2);
}

/// S5 live edit: between frames 1 and 2, A's output is rewired from B
/// to C. Frame 1 takes the old path, frame 2 takes the new path, and
/// neither node observes a frame meant for the other.
#[test]
fn s5_live_edit_reroutes_cleanly_between_frames() {
    let ctx = test_ctx(PipelineConfig::default());
    let exec = Executor::new(ctx);

    let a = exec.add_node(Box::new(SourceNode::new("a")), vec![], vec!["out".into()]);
    let b = exec.add_node(
        Box::new(PassthroughNode::new("b", NodeKind::CpuParallel)),
        vec!["in".into()],
        vec!["out".into()],
    );
    let c = exec.add_node(
        Box::new(PassthroughNode::new("c", NodeKind::CpuParallel)),
        vec!["in".into()],
        vec!["out".into()],
    );
    exec.set_source_node(a);
    exec.connect(a, "out", b, "in").unwrap();

    exec.submit_frame(raw_capture(4, 4, 1, 0)).unwrap();
    assert_eq!(exec.node_stats(b).unwrap().frames_processed, 1);
    assert_eq!(exec.node_stats(c).unwrap().frames_processed, 0);

    assert!(exec.disconnect(a, "out", b, "in"));
    exec.connect(a, "out", c, "in").unwrap();

    exec.submit_frame(raw_capture(4, 4, 2, 0)).unwrap();
    assert_eq!(exec.node_stats(b).unwrap().frames_processed, 1);
    assert_eq!(exec.node_stats(c).unwrap().frames_processed, 1);
}

/// S6 cycle rejection: A -> B -> C already connected; connecting
/// C -> A is rejected and the graph is left exactly as it was.
#[test]
fn s6_cycle_rejection_leaves_the_graph_unchanged() {
    let mut g = Graph::new();
    let a = g.add_node("a");
    let b = g.add_node("b");
    let c = g.add_node("c");
    g.connect(a, "out", b, "in").unwrap();
    g.connect(b, "out", c, "in").unwrap();
    let version_before = g.version();

    let err = g.connect(c, "out", a, "in").unwrap_err();
    assert!(matches!(err, GraphError::WouldCycle { .. }));
    assert_eq!(g.version(), version_before);
    assert!(!g.has_cycle());
    assert_eq!(g.successors(c), Default::default());
}
