//! The node + edge registry: a directed acyclic graph of [NodeId]s, with
//! cycle checking, deterministic topological ordering, and layered
//! execution plans cached behind a version counter.

use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;

use thiserror::Error;

/// A node's stable identity within a graph. Assigned monotonically on
/// [Graph::add_node] and never reused within the lifetime of a [Graph].
pub type NodeId = u64;

/// The name of a port, unique within the node that owns it.
pub type PortName = String;

/// A single directed edge: `src_node`'s `src_port` feeds `dst_node`'s
/// `dst_port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub src_node: NodeId,
    pub src_port: PortName,
    pub dst_node: NodeId,
    pub dst_port: PortName,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} does not exist in the graph")]
    NodeNotFound(NodeId),
    #[error("port '{port}' does not exist on node {node}")]
    PortNotFound { node: NodeId, port: PortName },
    #[error("node {0} cannot connect to itself")]
    SelfConnection(NodeId),
    #[error("input port '{port}' on node {node} is already connected")]
    InputAlreadyConnected { node: NodeId, port: PortName },
    #[error("connecting node {src} to node {dst} would introduce a cycle")]
    WouldCycle { src: NodeId, dst: NodeId },
}

/// The result of [Graph::validate]: whether the graph is currently
/// acyclic, and if not, which nodes participate in the cycle found.
///
/// Supplements the plain boolean `has_cycle` with the offending node
/// ids, mirroring the original implementation's `ValidationResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: String,
    pub problematic_nodes: Vec<NodeId>,
}

/// A node + edge registry. Does not own node behavior (see
/// [crate::node::Node]) — it only tracks topology, keyed by [NodeId].
#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashSet<NodeId>,
    node_names: HashMap<NodeId, String>,
    outgoing: HashMap<NodeId, Vec<Edge>>,
    incoming: HashMap<NodeId, Vec<Edge>>,
    next_id: NodeId,
    version: u64,

    cached_order: Option<(u64, Vec<NodeId>)>,
    cached_layers: Option<(u64, Vec<Vec<NodeId>>)>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current structural version. Bumped on every add/remove/connect/
    /// disconnect/clear. Cached analyses are valid only while this
    /// matches the version they were built against (I-GR-3).
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.node_names.get(&id).map(String::as_str)
    }

    /// Registers a new node and returns its assigned id.
    pub fn add_node(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id);
        self.node_names.insert(id, name.into());
        self.outgoing.insert(id, Vec::new());
        self.incoming.insert(id, Vec::new());
        self.bump_version();
        id
    }

    /// Removes a node and every edge incident to it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        if !self.nodes.remove(&id) {
            return Err(GraphError::NodeNotFound(id));
        }
        self.node_names.remove(&id);

        let out_edges = self.outgoing.remove(&id).unwrap_or_default();
        for edge in &out_edges {
            if let Some(incoming) = self.incoming.get_mut(&edge.dst_node) {
                incoming.retain(|e| e.src_node != id || e.src_port != edge.src_port);
            }
        }

        let in_edges = self.incoming.remove(&id).unwrap_or_default();
        for edge in &in_edges {
            if let Some(outgoing) = self.outgoing.get_mut(&edge.src_node) {
                outgoing.retain(|e| e.dst_node != id || e.dst_port != edge.dst_port);
            }
        }

        self.bump_version();
        Ok(())
    }

    /// Connects `src_node.src_port` to `dst_node.dst_port`. Succeeds only
    /// if both nodes exist, the destination input is not already
    /// connected, and the resulting graph remains acyclic (I-PT-1).
    pub fn connect(
        &mut self,
        src_node: NodeId,
        src_port: impl Into<PortName>,
        dst_node: NodeId,
        dst_port: impl Into<PortName>,
    ) -> Result<(), GraphError> {
        let src_port = src_port.into();
        let dst_port = dst_port.into();

        if !self.nodes.contains(&src_node) {
            return Err(GraphError::NodeNotFound(src_node));
        }
        if !self.nodes.contains(&dst_node) {
            return Err(GraphError::NodeNotFound(dst_node));
        }
        if src_node == dst_node {
            return Err(GraphError::SelfConnection(src_node));
        }

        if let Some(existing) = self.incoming.get(&dst_node) {
            if existing.iter().any(|e| e.dst_port == dst_port) {
                return Err(GraphError::InputAlreadyConnected {
                    node: dst_node,
                    port: dst_port,
                });
            }
        }

        if self.would_cycle(src_node, dst_node) {
            return Err(GraphError::WouldCycle {
                src: src_node,
                dst: dst_node,
            });
        }

        let edge = Edge {
            src_node,
            src_port,
            dst_node,
            dst_port,
        };
        self.outgoing.get_mut(&src_node).unwrap().push(edge.clone());
        self.incoming.get_mut(&dst_node).unwrap().push(edge);

        self.bump_version();
        Ok(())
    }

    /// Disconnects a specific edge, if present.
    pub fn disconnect(
        &mut self,
        src_node: NodeId,
        src_port: &str,
        dst_node: NodeId,
        dst_port: &str,
    ) -> bool {
        let mut removed = false;
        if let Some(outgoing) = self.outgoing.get_mut(&src_node) {
            let before = outgoing.len();
            outgoing.retain(|e| !(e.src_port == src_port && e.dst_node == dst_node && e.dst_port == dst_port));
            removed |= outgoing.len() != before;
        }
        if let Some(incoming) = self.incoming.get_mut(&dst_node) {
            incoming.retain(|e| !(e.src_node == src_node && e.src_port == src_port && e.dst_port == dst_port));
        }
        if removed {
            self.bump_version();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.node_names.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.next_id = 0;
        self.bump_version();
    }

    pub fn outgoing_edges(&self, id: NodeId) -> &[Edge] {
        self.outgoing.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming_edges(&self, id: NodeId) -> &[Edge] {
        self.incoming.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids of this node's direct predecessors (sources of its incoming
    /// edges), deduplicated.
    pub fn predecessors(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.incoming_edges(id).iter().map(|e| e.src_node).collect()
    }

    /// Ids of this node's direct successors, deduplicated.
    pub fn successors(&self, id: NodeId) -> BTreeSet<NodeId> {
        self.outgoing_edges(id).iter().map(|e| e.dst_node).collect()
    }

    /// Nodes with no incoming edges.
    pub fn source_nodes(&self) -> Vec<NodeId> {
        let mut v: Vec<NodeId> = self
            .nodes
            .iter()
            .copied()
            .filter(|id| self.incoming_edges(*id).is_empty())
            .collect();
        v.sort_unstable();
        v
    }

    /// Nodes with no outgoing edges.
    pub fn sink_nodes(&self) -> Vec<NodeId> {
        let mut v: Vec<NodeId> = self
            .nodes
            .iter()
            .copied()
            .filter(|id| self.outgoing_edges(*id).is_empty())
            .collect();
        v.sort_unstable();
        v
    }

    /// Whether adding an edge `src -> dst` would create a cycle, i.e.
    /// whether `dst` can already reach `src`.
    fn would_cycle(&self, src: NodeId, dst: NodeId) -> bool {
        if src == dst {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![dst];
        while let Some(node) = stack.pop() {
            if node == src {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            for edge in self.outgoing_edges(node) {
                stack.push(edge.dst_node);
            }
        }
        false
    }

    /// DFS-coloring cycle check over the whole graph (I-GR-1).
    pub fn has_cycle(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: HashMap<NodeId, Color> = self.nodes.iter().map(|id| (*id, Color::White)).collect();

        fn visit(
            node: NodeId,
            graph: &Graph,
            color: &mut HashMap<NodeId, Color>,
        ) -> bool {
            color.insert(node, Color::Gray);
            for edge in graph.outgoing_edges(node) {
                match color.get(&edge.dst_node).copied().unwrap_or(Color::White) {
                    Color::Gray => return true,
                    Color::White => {
                        if visit(edge.dst_node, graph, color) {
                            return true;
                        }
                    }
                    Color::Black => {}
                }
            }
            color.insert(node, Color::Black);
            false
        }

        let mut ids: Vec<NodeId> = self.nodes.iter().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if color.get(&id).copied() == Some(Color::White) && visit(id, self, &mut color) {
                return true;
            }
        }
        false
    }

    /// Validates the graph, returning a structured report naming the
    /// ids involved in a cycle when one is found.
    pub fn validate(&self) -> ValidationResult {
        if let Some(cycle_nodes) = self.find_cycle_nodes() {
            ValidationResult {
                valid: false,
                message: format!("graph contains a cycle through {} node(s)", cycle_nodes.len()),
                problematic_nodes: cycle_nodes,
            }
        } else {
            ValidationResult {
                valid: true,
                message: String::new(),
                problematic_nodes: Vec::new(),
            }
        }
    }

    fn find_cycle_nodes(&self) -> Option<Vec<NodeId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color: HashMap<NodeId, Color> = self.nodes.iter().map(|id| (*id, Color::White)).collect();
        let mut path = Vec::new();

        fn visit(
            node: NodeId,
            graph: &Graph,
            color: &mut HashMap<NodeId, Color>,
            path: &mut Vec<NodeId>,
        ) -> Option<Vec<NodeId>> {
            color.insert(node, Color::Gray);
            path.push(node);
            for edge in graph.outgoing_edges(node) {
                match color.get(&edge.dst_node).copied().unwrap_or(Color::White) {
                    Color::Gray => {
                        let start = path.iter().position(|n| *n == edge.dst_node).unwrap_or(0);
                        return Some(path[start..].to_vec());
                    }
                    Color::White => {
                        if let Some(cycle) = visit(edge.dst_node, graph, color, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
            path.pop();
            color.insert(node, Color::Black);
            None
        }

        let mut ids: Vec<NodeId> = self.nodes.iter().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if color.get(&id).copied() == Some(Color::White) {
                if let Some(cycle) = visit(id, self, &mut color, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Deterministic topological order via Kahn's algorithm. Among all
    /// currently-zero-in-degree nodes, the smallest id is always
    /// removed first, guaranteeing byte-identical output across runs
    /// on the same graph shape (testable property 3).
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree: HashMap<NodeId, usize> = self
            .nodes
            .iter()
            .map(|id| (*id, self.predecessors(*id).len()))
            .collect();

        let mut frontier: BinaryHeap<Reverse<NodeId>> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(id)) = frontier.pop() {
            order.push(id);
            for succ in self.successors(id) {
                let deg = in_degree.get_mut(&succ).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    frontier.push(Reverse(succ));
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(GraphError::WouldCycle { src: 0, dst: 0 });
        }

        Ok(order)
    }

    /// Layered execution plan: layer `k` is the set of nodes whose
    /// predecessors all lie in layers `< k`. Nodes within a layer have
    /// no mutual dependency and are safe to dispatch in parallel;
    /// within each layer they are additionally sorted ascending by id
    /// for deterministic diagnostics (dispatch order itself is
    /// unordered with respect to the layer).
    pub fn layered_plan(&self) -> Result<Vec<Vec<NodeId>>, GraphError> {
        let mut in_degree: HashMap<NodeId, usize> = self
            .nodes
            .iter()
            .map(|id| (*id, self.predecessors(*id).len()))
            .collect();

        let mut remaining: HashSet<NodeId> = self.nodes.clone();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let mut layer: Vec<NodeId> = remaining
                .iter()
                .copied()
                .filter(|id| in_degree[id] == 0)
                .collect();

            if layer.is_empty() {
                return Err(GraphError::WouldCycle { src: 0, dst: 0 });
            }

            layer.sort_unstable();

            for id in &layer {
                remaining.remove(id);
                for succ in self.successors(*id) {
                    if remaining.contains(&succ) {
                        *in_degree.get_mut(&succ).unwrap() -= 1;
                    }
                }
            }

            layers.push(layer);
        }

        Ok(layers)
    }

    /// Returns the cached topological order if it is still valid for
    /// the current version, recomputing and caching otherwise.
    pub fn cached_topological_order(&mut self) -> Result<Vec<NodeId>, GraphError> {
        if let Some((v, order)) = &self.cached_order {
            if *v == self.version {
                return Ok(order.clone());
            }
        }
        let order = self.topological_order()?;
        self.cached_order = Some((self.version, order.clone()));
        Ok(order)
    }

    /// Returns the cached layered plan if it is still valid for the
    /// current version, recomputing and caching otherwise.
    pub fn cached_layered_plan(&mut self) -> Result<Vec<Vec<NodeId>>, GraphError> {
        if let Some((v, layers)) = &self.cached_layers {
            if *v == self.version {
                return Ok(layers.clone());
            }
        }
        let layers = self.layered_plan()?;
        self.cached_layers = Some((self.version, layers.clone()));
        Ok(layers)
    }

    fn bump_version(&mut self) {
        self.version += 1;
        self.cached_order = None;
        self.cached_layers = None;
    }

    /// GraphViz DOT export, for debug tooling.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        let mut ids: Vec<NodeId> = self.nodes.iter().copied().collect();
        ids.sort_unstable();
        for id in &ids {
            let name = self.node_names.get(id).map(String::as_str).unwrap_or("");
            out.push_str(&format!("  n{id} [label=\"{id}: {name}\"];\n"));
        }
        for id in &ids {
            for edge in self.outgoing_edges(*id) {
                out.push_str(&format!(
                    "  n{} -> n{} [label=\"{}->{}\"];\n",
                    edge.src_node, edge.dst_node, edge.src_port, edge.dst_port
                ));
            }
        }
        out.push_str("}\n");
        out
    }

    /// JSON structural dump: nodes (id, name) and connections as
    /// 4-tuples. Diagnostics only — no persisted state survives a
    /// restart (§6).
    pub fn to_json(&self) -> serde_json::Value {
        let mut ids: Vec<NodeId> = self.nodes.iter().copied().collect();
        ids.sort_unstable();

        let nodes: Vec<_> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "name": self.node_names.get(id).cloned().unwrap_or_default(),
                })
            })
            .collect();

        let mut connections = Vec::new();
        for id in &ids {
            for edge in self.outgoing_edges(*id) {
                connections.push(serde_json::json!([
                    edge.src_node,
                    edge.src_port,
                    edge.dst_node,
                    edge.dst_port,
                ]));
            }
        }

        serde_json::json!({ "nodes": nodes, "connections": connections })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_connect_disconnect() {
        let mut g = Graph::new();
        let a = g.add_node("a");
        let b = g.add_node("b");
        assert!(g.connect(a, "out", b, "in").is_ok());
        assert_eq!(g.successors(a), [b].into_iter().collect());
        assert!(g.disconnect(a, "out", b, "in"));
        assert!(g.successors(a).is_empty());
    }

    #[test]
    fn rejects_self_connection() {
        let mut g = Graph::new();
        let a = g.add_node("a");
        assert_eq!(g.connect(a, "out", a, "in"), Err(GraphError::SelfConnection(a)));
    }

    #[test]
    fn rejects_duplicate_input_connection() {
        let mut g = Graph::new();
        let a = g.add_node("a");
        let b = g.add_node("b");
        let c = g.add_node("c");
        g.connect(a, "out", c, "in").unwrap();
        assert!(matches!(
            g.connect(b, "out", c, "in"),
            Err(GraphError::InputAlreadyConnected { .. })
        ));
    }

    #[test]
    fn rejects_cycle() {
        let mut g = Graph::new();
        let a = g.add_node("a");
        let b = g.add_node("b");
        let c = g.add_node("c");
        g.connect(a, "out", b, "in").unwrap();
        g.connect(b, "out", c, "in").unwrap();
        assert!(matches!(
            g.connect(c, "out", a, "in"),
            Err(GraphError::WouldCycle { .. })
        ));
        // Graph is unchanged (S6).
        assert!(!g.has_cycle());
    }

    #[test]
    fn topological_order_breaks_ties_by_ascending_id() {
        let mut g = Graph::new();
        let c = g.add_node("c");
        let b = g.add_node("b");
        let a = g.add_node("a");
        // No edges: all three are independent, in-degree 0, so the tie
        // break must fall back to ascending numeric id regardless of
        // insertion order.
        let order = g.topological_order().unwrap();
        let mut expected = vec![c, b, a];
        expected.sort_unstable();
        assert_eq!(order, expected);
    }

    #[test]
    fn layering_respects_dependencies() {
        let mut g = Graph::new();
        let a = g.add_node("a");
        let b = g.add_node("b");
        let c = g.add_node("c");
        g.connect(a, "out", b, "in").unwrap();
        g.connect(a, "out", c, "in").unwrap();
        let layers = g.layered_plan().unwrap();
        assert_eq!(layers[0], vec![a]);
        let mut rest = layers[1].clone();
        rest.sort_unstable();
        assert_eq!(rest, vec![b, c]);
    }

    #[test]
    fn version_bumps_on_mutation() {
        let mut g = Graph::new();
        let v0 = g.version();
        let a = g.add_node("a");
        assert!(g.version() > v0);
        let v1 = g.version();
        let b = g.add_node("b");
        g.connect(a, "out", b, "in").unwrap();
        assert!(g.version() > v1);
    }

    #[test]
    fn remove_node_clears_incident_edges() {
        let mut g = Graph::new();
        let a = g.add_node("a");
        let b = g.add_node("b");
        g.connect(a, "out", b, "in").unwrap();
        g.remove_node(a).unwrap();
        assert!(g.incoming_edges(b).is_empty());
    }
}
