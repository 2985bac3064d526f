//! A handful of small, concrete [Node] implementations used by the
//! executor's own tests and available to callers who just need basic
//! plumbing (ingest, pass-through, sink delivery) without writing a
//! node from scratch. Real image algorithms are an external concern
//! (§1 Non-goals) — none of these do any pixel processing.

use crate::context::PipelineContext;
use crate::node::{Node, NodeError, NodeKind};
use crate::frame_packet::FramePacketHandle;
use crate::sink::FrameSink;

/// The graph's entry point: on every frame, takes the packet the
/// executor stashed via [PipelineContext::set_pending_capture] and
/// emits it as its one output. Grounded on §4.5's description of a
/// source node as "just another node, classified `Io`, with zero
/// inputs and one output."
pub struct SourceNode {
    name: String,
}

impl SourceNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Node for SourceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Io
    }

    fn process(
        &mut self,
        _inputs: &[Option<FramePacketHandle>],
        outputs: &mut [Option<FramePacketHandle>],
        ctx: &PipelineContext,
    ) -> Result<(), NodeError> {
        let packet = ctx
            .take_pending_capture()
            .ok_or_else(|| NodeError::ProcessFailed(self.name.clone(), "no capture staged for this frame".into()))?;
        outputs[0] = Some(packet);
        Ok(())
    }

    fn input_count(&self) -> usize {
        0
    }

    fn output_count(&self) -> usize {
        1
    }
}

/// Forwards its one input to its one output unchanged (I-ND-4: a
/// pass-through must emit the very same packet instance, not a copy).
/// Useful as a branch point in a fan-out graph, or as a stand-in node
/// in tests that only care about scheduling, not transformation.
pub struct PassthroughNode {
    name: String,
    kind: NodeKind,
}

impl PassthroughNode {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self { name: name.into(), kind }
    }
}

impl Node for PassthroughNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn process(
        &mut self,
        inputs: &[Option<FramePacketHandle>],
        outputs: &mut [Option<FramePacketHandle>],
        _ctx: &PipelineContext,
    ) -> Result<(), NodeError> {
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

/// A node that fails every frame, for exercising node-failure and
/// downstream-skip behavior (§3 S4) without a real broken node.
pub struct AlwaysFailNode {
    name: String,
}

impl AlwaysFailNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Node for AlwaysFailNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::CpuParallel
    }

    fn process(
        &mut self,
        _inputs: &[Option<FramePacketHandle>],
        _outputs: &mut [Option<FramePacketHandle>],
        _ctx: &PipelineContext,
    ) -> Result<(), NodeError> {
        Err(NodeError::ProcessFailed(self.name.clone(), "deliberate failure".into()))
    }

    fn input_count(&self) -> usize {
        1
    }

    fn output_count(&self) -> usize {
        1
    }
}

/// Wraps a [FrameSink] as a terminal, zero-output node (§6): the
/// executor's graph traversal can treat sink delivery exactly like any
/// other node's work, submitted to the `Io` queue.
pub struct SinkNode {
    sink: Box<dyn FrameSink>,
}

impl SinkNode {
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        Self { sink }
    }
}

impl Node for SinkNode {
    fn name(&self) -> &str {
        self.sink.name()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Io
    }

    fn process(
        &mut self,
        inputs: &[Option<FramePacketHandle>],
        _outputs: &mut [Option<FramePacketHandle>],
        ctx: &PipelineContext,
    ) -> Result<(), NodeError> {
        let packet = inputs[0]
            .as_ref()
            .ok_or_else(|| NodeError::MissingInput(self.sink.name().to_string(), "in".into()))?;
        self.sink
            .deliver(packet, ctx)
            .map_err(|e| NodeError::ProcessFailed(self.sink.name().to_string(), e.to_string()))
    }

    fn input_count(&self) -> usize {
        1
    }

    fn output_count(&self) -> usize {
        0
    }
}

/// A GPU node combining 2-8 inputs under a blend mode into a single
/// output (§4.1 "Composite node"). The concrete blend math is an
/// external concern (§1 Non-goals); this builtin only implements the
/// structural contract — input-count validation, primary-input sizing,
/// and the `requireAllInputs` admission rule — so callers can compose
/// real blending behind it without re-deriving that scaffolding.
pub struct CompositeNode {
    name: String,
    input_count: usize,
    primary_input: usize,
    require_all_inputs: bool,
}

impl CompositeNode {
    /// `input_count` must be in `2..=8` per §4.1. `primary_input` is
    /// the index whose size the composite output inherits.
    pub fn new(name: impl Into<String>, input_count: usize, primary_input: usize, require_all_inputs: bool) -> Self {
        assert!((2..=8).contains(&input_count), "composite nodes take 2-8 inputs");
        assert!(primary_input < input_count, "primary_input must be one of the declared inputs");
        Self { name: name.into(), input_count, primary_input, require_all_inputs }
    }
}

impl Node for CompositeNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::GpuSerial
    }

    fn process(
        &mut self,
        inputs: &[Option<FramePacketHandle>],
        outputs: &mut [Option<FramePacketHandle>],
        _ctx: &PipelineContext,
    ) -> Result<(), NodeError> {
        if self.require_all_inputs && inputs.iter().any(Option::is_none) {
            return Err(NodeError::MissingInput(self.name.clone(), "one or more composite inputs".into()));
        }
        let Some(primary) = inputs[self.primary_input].as_ref() else {
            return Err(NodeError::MissingInput(self.name.clone(), "primary composite input".into()));
        };
        // Every present input beyond the primary is transparent filler
        // when `requireAllInputs` is false (§4.1); the real blend pass
        // would read each present input's texture here.
        outputs[0] = Some(primary.retain());
        Ok(())
    }

    fn input_count(&self) -> usize {
        self.input_count
    }

    fn output_count(&self) -> usize {
        1
    }
}
