//! Brief
//! -----
//! The `engine` crate is a real-time image-processing pipeline core: a
//! directed acyclic [graph] of [node]s executed frame by frame by an
//! [executor], backed by pooled [frame_packet]s, GPU [graphics]
//! resources, and a [synchronizer] for pairing frames that travel
//! independent GPU and CPU paths. The concrete image algorithms any
//! particular pipeline runs are supplied by the application through
//! the [node::Node] trait — this crate owns scheduling, pooling, and
//! the external boundary contracts ([source], [sink]), not pixel math.
//!
//! Key modules
//! -----------
//! - `graph` - the node/edge registry: cycle checking, deterministic
//!   topological order, and cached layered execution plans.
//! - `node` - the four-operation [node::Node] trait, its queue-kind
//!   classification, lifecycle state machine, and parameter map.
//! - `port` - typed input/output stubs a node's ports are built from.
//! - `frame_packet` - the pooled, reference-counted unit of work that
//!   flows along graph edges.
//! - `pool` - the frame-packet, texture, and scratch-buffer pools.
//! - `context` - the per-pipeline handle every node call receives.
//! - `graphics` - the backend-agnostic GPU resource contract.
//! - `synchronizer` - timestamp-bucketed pairing for dual-path frames.
//! - `executor` - drives registered nodes through the graph's layered
//!   plan across three task queues (GPU-serial, CPU-parallel, I/O).
//! - `source` / `sink` - the application-facing capture/delivery
//!   contracts at the edges of the pipeline.
//! - `config` - persisted pipeline-wide settings.
//! - `error` - the top-level error taxonomy every subsystem composes
//!   into.
//!
//! Usage
//! -----
//! ```ignore
//! let ctx = PipelineContext::new(Arc::new(WgpuBackend::new(device, queue)), config);
//! let executor = Executor::new(ctx);
//! let source = executor.add_node(Box::new(SourceNode::new("camera")), vec![], vec!["out".into()]);
//! let grayscale = executor.add_node(Box::new(MyGrayscaleNode::new()), vec!["in".into()], vec!["out".into()]);
//! executor.set_source_node(source);
//! executor.connect(source, "out", grayscale, "in")?;
//! executor.submit_frame(capture)?;
//! ```
pub mod builtin_nodes;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod frame_packet;
pub mod graph;
pub mod graphics;
pub mod node;
pub mod pixel_format;
pub mod pool;
pub mod port;
pub mod sink;
pub mod source;
pub mod synchronizer;
pub mod wgpu_backend;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::PipelineError;
pub use executor::{ExecutionStats, Executor, ExecutorError};
pub use frame_packet::FramePacketHandle;
pub use graph::{Graph, GraphError, NodeId};
pub use graphics::{GraphicsBackend, NullBackend};
pub use node::{Node, NodeError, NodeKind, NodeState};
pub use pixel_format::PixelFormat;
pub use sink::{FrameSink, SinkError};
pub use source::{Capture, FrameSource};
pub use synchronizer::{SyncPolicy, Synchronizer};
pub use wgpu_backend::WgpuBackend;

pub use wgpu;

/// Every mutex lock in this crate is `.expect()`-ed against this
/// message rather than silently swallowed: a poisoned lock means some
/// other thread already panicked mid-update to shared pipeline state,
/// and continuing past that would only process corrupt data.
pub(crate) const THREAD_PANIC_MSG: &str = "a thread holding pipeline state panicked while this one was waiting on it";
