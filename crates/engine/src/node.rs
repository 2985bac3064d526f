//! The processing-unit abstraction: the [Node] trait, its queue-kind
//! classification, lifecycle state machine, and parameter map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use thiserror::Error;

use crate::context::PipelineContext;
use crate::frame_packet::FramePacketHandle;

/// Declares which task queue a node's work is submitted to. Affects
/// scheduling only, never the meaning of [Node::process] itself (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Single-worker, strict-FIFO queue. GPU-context-affine.
    GpuSerial,
    /// Fixed worker pool, default size = detected core count.
    CpuParallel,
    /// Small pool (usually one worker), insulated from CPU work.
    Io,
}

/// Lifecycle states of a node for a single frame: `Idle -> Ready ->
/// Processing -> Completed -> Idle`, with side edges `* -> Error` and
/// `* -> Cancelled` (§3 Node invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    Idle = 0,
    Ready = 1,
    Processing = 2,
    Completed = 3,
    Error = 4,
    Cancelled = 5,
}

impl NodeState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => NodeState::Idle,
            1 => NodeState::Ready,
            2 => NodeState::Processing,
            3 => NodeState::Completed,
            4 => NodeState::Error,
            _ => NodeState::Cancelled,
        }
    }
}

/// Atomically-tracked node lifecycle state (I-ND-1, I-ND-2).
#[derive(Debug, Default)]
pub struct NodeStateCell(AtomicU8);

impl NodeStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(NodeState::Idle as u8))
    }

    pub fn get(&self) -> NodeState {
        NodeState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: NodeState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Resets to `Idle` at the start of a new frame, regardless of the
    /// current state (I-ND-2: `Error`/`Cancelled` are terminal only for
    /// the frame that produced them).
    pub fn reset_for_next_frame(&self) {
        self.set(NodeState::Idle);
    }
}

/// Per-node running statistics, sampled under the parent executor's
/// stats lock; no cross-field consistency is guaranteed (§4.5).
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeStats {
    pub frames_processed: u64,
    pub frames_failed: u64,
    pub last_process_time_us: u64,
}

/// A tagged value allowed in a node's parameter map. Closed set, per
/// design note "disallow arbitrary opaque values across threads".
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// `{key -> value}`, mutable across threads under a single mutex.
/// Setting a value returns the previous value so the caller's
/// `on_parameter_changed` hook can diff against it.
#[derive(Debug, Default)]
pub struct ParameterMap {
    values: Mutex<HashMap<String, ParameterValue>>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ParameterValue> {
        self.values.lock().expect(crate::THREAD_PANIC_MSG).get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: ParameterValue) -> Option<ParameterValue> {
        self.values
            .lock()
            .expect(crate::THREAD_PANIC_MSG)
            .insert(key.into(), value)
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.lock().expect(crate::THREAD_PANIC_MSG).keys().cloned().collect()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("node '{0}' failed during prepare: {1}")]
    PrepareFailed(String, String),
    #[error("node '{0}' failed during process: {1}")]
    ProcessFailed(String, String),
    #[error("node '{0}' was cancelled")]
    Cancelled(String),
    #[error("node '{0}' is missing a required input on port '{1}'")]
    MissingInput(String, String),
}

/// The four-operation interface every processing unit implements. A
/// node is a value (no class hierarchy, per design note "Node dynamic
/// dispatch") stored in the graph under a shared-ownership handle keyed
/// by [crate::graph::NodeId]; executor tasks capture the id and resolve
/// to the node via the pipeline's node table.
pub trait Node: Send {
    /// Human name, used in diagnostics and DOT/JSON export.
    fn name(&self) -> &str;

    /// Which queue this node's work is submitted to.
    fn kind(&self) -> NodeKind;

    /// Optional one-shot setup on first dispatch; may acquire GPU
    /// resources. Default: no-op success.
    fn prepare(&mut self, _ctx: &PipelineContext) -> Result<(), NodeError> {
        Ok(())
    }

    /// The mandatory per-frame body. `inputs` is ordered aligned with
    /// the node's declared input ports; the node populates `outputs`
    /// aligned with its declared output ports. The node owns what it
    /// writes into `outputs` — the executor owns subsequent
    /// distribution to downstream ports.
    fn process(
        &mut self,
        inputs: &[Option<FramePacketHandle>],
        outputs: &mut [Option<FramePacketHandle>],
        ctx: &PipelineContext,
    ) -> Result<(), NodeError>;

    /// Optional per-frame cleanup, always invoked after `process`,
    /// including on failure. Default: no-op.
    fn finalize(&mut self, _ctx: &PipelineContext) {}

    /// Invalidates in-flight work; subsequent `process` calls must
    /// return [NodeError::Cancelled] immediately. Default: no-op (a
    /// node with no cancellable internal state need not override this).
    fn cancel(&mut self) {}

    /// Number of declared input ports.
    fn input_count(&self) -> usize {
        0
    }

    /// Number of declared output ports.
    fn output_count(&self) -> usize {
        1
    }

    /// Called when a parameter changes via the node's [ParameterMap];
    /// default is a no-op. Nodes that cache shader/lookup resources
    /// keyed by a parameter should dirty that cache here.
    fn on_parameter_changed(&mut self, _key: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_resets_across_frames() {
        let cell = NodeStateCell::new();
        cell.set(NodeState::Error);
        assert_eq!(cell.get(), NodeState::Error);
        cell.reset_for_next_frame();
        assert_eq!(cell.get(), NodeState::Idle);
    }

    #[test]
    fn parameter_map_round_trip() {
        let params = ParameterMap::new();
        assert!(params.set("gain", ParameterValue::Float(1.5)).is_none());
        assert_eq!(params.get("gain"), Some(ParameterValue::Float(1.5)));
        let prev = params.set("gain", ParameterValue::Float(2.0));
        assert_eq!(prev, Some(ParameterValue::Float(1.5)));
    }
}
