//! Directed execution graph over named participants.
//!
//! A [`DirectedGraph`] constrains which participant may speak after which. Each
//! [`GraphNode`] is one participant's position in the graph; its ordered
//! [`GraphEdge`]s name the nodes that may follow it, optionally guarded by a
//! keyword condition evaluated against the node's reply (see
//! [`condition`](crate::condition)).
//!
//! The graph is built once, validated eagerly when a conversation starts, and
//! only read afterwards.
//!
//! # Wire format
//!
//! Graphs (de)serialise with serde as
//!
//! ```text
//! { "nodes": { "<name>": { "edges": [{ "target": "...", "condition": "..." }],
//!                          "activation": "all" | "any" } },
//!   "default_start_node": "<name>" }
//! ```
//!
//! Node names are the map keys; declaration order is preserved through a round
//! trip because it is the tie-break for parent ordering.
//!
//! # Examples
//!
//! ```
//! use groupflow::graph::{DirectedGraph, GraphNode};
//!
//! let graph = DirectedGraph::new()
//!     .with_node(GraphNode::new("brief").with_edge("writer"))
//!     .with_node(GraphNode::new("writer").with_edge("reviewer"))
//!     .with_node(
//!         GraphNode::new("reviewer")
//!             .with_conditional_edge("writer", "REVISE")
//!             .with_conditional_edge("publisher", "APPROVE"),
//!     )
//!     .with_node(GraphNode::new("publisher"));
//!
//! graph.validate().unwrap();
//! assert_eq!(graph.start_nodes().into_iter().collect::<Vec<_>>(), vec!["brief"]);
//! assert_eq!(graph.parents("writer"), vec!["brief", "reviewer"]);
//! assert!(graph.has_cycle_with_safe_exit().unwrap());
//! ```

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt;
use std::sync::OnceLock;

/// How a node with several incoming edges decides it is ready to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Wait until every parent has fired since the node last ran.
    #[default]
    All,
    /// Run as soon as any parent fires.
    Any,
}

impl Activation {
    fn is_default(&self) -> bool {
        *self == Activation::All
    }
}

/// A directed, optionally conditioned transition to another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Name of the destination node.
    pub target: String,

    /// Keyword that must appear in the source node's reply for the edge to
    /// fire. `None` makes the edge unconditional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl GraphEdge {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            condition: None,
        }
    }

    pub fn conditional(target: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            condition: Some(condition.into()),
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

/// One participant's position in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    /// Participant name; also the node's key in the graph.
    pub name: String,
    /// Outgoing edges in declaration order.
    pub edges: Vec<GraphEdge>,
    /// Readiness policy for nodes with several parents.
    pub activation: Activation,
}

impl GraphNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            edges: Vec::new(),
            activation: Activation::All,
        }
    }

    /// Add an unconditional edge to `target` (builder pattern).
    pub fn with_edge(mut self, target: impl Into<String>) -> Self {
        self.edges.push(GraphEdge::new(target));
        self
    }

    /// Add an edge to `target` that fires when the reply contains `condition`.
    pub fn with_conditional_edge(
        mut self,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        self.edges.push(GraphEdge::conditional(target, condition));
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// A node without outgoing edges.
    pub fn is_leaf(&self) -> bool {
        self.edges.is_empty()
    }

    fn has_mixed_edges(&self) -> bool {
        let conditional = self.edges.iter().filter(|e| e.is_conditional()).count();
        conditional > 0 && conditional < self.edges.len()
    }
}

/// Node body as it appears on the wire (the name is the map key).
#[derive(Serialize, Deserialize)]
struct RawNode {
    #[serde(default)]
    edges: Vec<GraphEdge>,
    #[serde(default, skip_serializing_if = "Activation::is_default")]
    activation: Activation,
}

/// Reasons a graph (or a flat speaker-transition map) is rejected.
///
/// Raised only by validation, before any message is exchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    /// The graph has no nodes.
    NoNodes,
    /// A flat speaker-transition map has no edges at all.
    NoEdges,
    /// Every node has a parent, so the conversation has no entry point.
    NoStartNode,
    /// No leaf exists and no cycle offers a conditioned exit.
    NoLeafNode,
    /// The node mixes conditional and unconditional outgoing edges.
    MixedEdges { node: String },
    /// A cycle with no conditioned edge; `path` ends with its first node.
    UnsafeCycle { path: Vec<String> },
    /// A speaker may follow itself although repeat speaking is disallowed.
    SelfLoop { node: String },
    /// An edge target, start node or transition names a node that does not exist.
    UnknownNode { referenced_by: String, name: String },
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralError::NoNodes => write!(f, "Graph must have at least one node"),
            StructuralError::NoEdges => {
                write!(f, "Speaker transition graph must have at least one edge")
            }
            StructuralError::NoStartNode => {
                write!(f, "Graph must have at least one start node")
            }
            StructuralError::NoLeafNode => write!(
                f,
                "Graph must have at least one leaf node or a cycle with an exit condition"
            ),
            StructuralError::MixedEdges { node } => write!(
                f,
                "Node '{}' has a mix of conditional and unconditional edges",
                node
            ),
            StructuralError::UnsafeCycle { path } => write!(
                f,
                "Cycle detected without exit condition: {}",
                path.join(" -> ")
            ),
            StructuralError::SelfLoop { node } => write!(
                f,
                "Speaker '{}' may not follow itself when repeat speaking is disallowed",
                node
            ),
            StructuralError::UnknownNode {
                referenced_by,
                name,
            } => write!(f, "'{}' references unknown node '{}'", referenced_by, name),
        }
    }
}

impl Error for StructuralError {}

/// Directed execution graph over named participants.
#[derive(Debug, Clone, Default)]
pub struct DirectedGraph {
    /// Nodes in declaration order.
    nodes: Vec<GraphNode>,
    /// Name → position in `nodes`.
    index: HashMap<String, usize>,
    /// Entry point used when no node has spoken yet.
    default_start_node: Option<String>,
    /// Parent lists, computed on first use and dropped on mutation.
    parents: OnceLock<HashMap<String, Vec<String>>>,
}

impl PartialEq for DirectedGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.default_start_node == other.default_start_node
    }
}

impl Eq for DirectedGraph {}

impl DirectedGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node (builder pattern). A node with the same name is replaced in place.
    pub fn with_node(mut self, node: GraphNode) -> Self {
        self.add_node(node);
        self
    }

    /// Set the node that speaks first when no history exists (builder pattern).
    pub fn with_default_start_node(mut self, name: impl Into<String>) -> Self {
        self.default_start_node = Some(name.into());
        self
    }

    /// Add a node, replacing any node of the same name.
    pub fn add_node(&mut self, node: GraphNode) {
        self.parents = OnceLock::new();
        match self.index.get(&node.name) {
            Some(&position) => self.nodes[position] = node,
            None => {
                self.index.insert(node.name.clone(), self.nodes.len());
                self.nodes.push(node);
            }
        }
    }

    /// Borrow a node by name.
    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.index.get(name).map(|&position| &self.nodes[position])
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn default_start_node(&self) -> Option<&str> {
        self.default_start_node.as_deref()
    }

    /// Check every structural invariant, failing fast on the first violation.
    ///
    /// Checks run in this order: at least one node; every edge target and the
    /// default start node exist; no node mixes conditional and unconditional
    /// edges; every cycle has a conditioned exit; at least one start node; a
    /// leaf exists unless a safe cycle provides the way out. The node and cycle
    /// checks come first so a closed loop is reported by its path.
    pub fn validate(&self) -> Result<(), StructuralError> {
        if self.nodes.is_empty() {
            return Err(StructuralError::NoNodes);
        }

        for node in &self.nodes {
            for edge in &node.edges {
                if !self.contains(&edge.target) {
                    return Err(StructuralError::UnknownNode {
                        referenced_by: node.name.clone(),
                        name: edge.target.clone(),
                    });
                }
            }
        }
        if let Some(start) = &self.default_start_node {
            if !self.contains(start) {
                return Err(StructuralError::UnknownNode {
                    referenced_by: "default_start_node".to_string(),
                    name: start.clone(),
                });
            }
        }

        if let Some(node) = self.nodes.iter().find(|n| n.has_mixed_edges()) {
            return Err(StructuralError::MixedEdges {
                node: node.name.clone(),
            });
        }

        let has_safe_cycle = self.has_cycle_with_safe_exit()?;
        if self.start_nodes().is_empty() {
            return Err(StructuralError::NoStartNode);
        }
        if self.leaf_nodes().is_empty() && !has_safe_cycle {
            return Err(StructuralError::NoLeafNode);
        }

        Ok(())
    }

    fn parent_map(&self) -> &HashMap<String, Vec<String>> {
        self.parents.get_or_init(|| {
            let mut parents: HashMap<String, Vec<String>> = self
                .nodes
                .iter()
                .map(|n| (n.name.clone(), Vec::new()))
                .collect();
            for node in &self.nodes {
                for edge in &node.edges {
                    if let Some(list) = parents.get_mut(&edge.target) {
                        if !list.contains(&node.name) {
                            list.push(node.name.clone());
                        }
                    }
                }
            }
            parents
        })
    }

    /// Predecessors of `name`, ordered by the declaration order of the source nodes.
    pub fn parents(&self, name: &str) -> Vec<&str> {
        self.parent_map()
            .get(name)
            .map(|list| list.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Nodes with no incoming edge.
    pub fn start_nodes(&self) -> BTreeSet<&str> {
        let parents = self.parent_map();
        self.nodes
            .iter()
            .filter(|n| parents.get(&n.name).map_or(true, Vec::is_empty))
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Nodes with no outgoing edge.
    pub fn leaf_nodes(&self) -> BTreeSet<&str> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Detect cycles and make sure each one can be left.
    ///
    /// Depth-first traversal with an explicit stack, roots and edges visited in
    /// declaration order. A back edge closes a cycle; the cycle is safe when any
    /// node on it owns a conditioned edge, since that condition is the exit.
    ///
    /// Returns `Ok(true)` if at least one cycle exists and all detected cycles
    /// are safe, `Ok(false)` for an acyclic graph, and
    /// [`StructuralError::UnsafeCycle`] naming the path of the first cycle with
    /// no conditioned edge.
    pub fn has_cycle_with_safe_exit(&self) -> Result<bool, StructuralError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnPath,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut found_cycle = false;

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }

            // (node index, next edge to explore); the stack doubles as the current path
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::OnPath;

            while let Some(frame) = stack.last_mut() {
                let (current, next_edge) = *frame;
                let node = &self.nodes[current];

                let Some(edge) = node.edges.get(next_edge) else {
                    marks[current] = Mark::Done;
                    stack.pop();
                    continue;
                };
                frame.1 += 1;

                let Some(&target) = self.index.get(&edge.target) else {
                    continue;
                };

                match marks[target] {
                    Mark::Unvisited => {
                        marks[target] = Mark::OnPath;
                        stack.push((target, 0));
                    }
                    Mark::OnPath => {
                        found_cycle = true;
                        let start = stack
                            .iter()
                            .position(|&(index, _)| index == target)
                            .unwrap_or(0);
                        let cycle = &stack[start..];
                        let has_exit = cycle.iter().any(|&(index, _)| {
                            self.nodes[index].edges.iter().any(GraphEdge::is_conditional)
                        });
                        if !has_exit {
                            let mut path: Vec<String> = cycle
                                .iter()
                                .map(|&(index, _)| self.nodes[index].name.clone())
                                .collect();
                            path.push(self.nodes[target].name.clone());
                            return Err(StructuralError::UnsafeCycle { path });
                        }
                    }
                    Mark::Done => {}
                }
            }
        }

        Ok(found_cycle)
    }
}

impl Serialize for DirectedGraph {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct Nodes<'a>(&'a [GraphNode]);

        impl Serialize for Nodes<'_> {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for node in self.0 {
                    let raw = RawNode {
                        edges: node.edges.clone(),
                        activation: node.activation,
                    };
                    map.serialize_entry(&node.name, &raw)?;
                }
                map.end()
            }
        }

        let entries = if self.default_start_node.is_some() { 2 } else { 1 };
        let mut map = serializer.serialize_map(Some(entries))?;
        map.serialize_entry("nodes", &Nodes(&self.nodes))?;
        if let Some(start) = &self.default_start_node {
            map.serialize_entry("default_start_node", start)?;
        }
        map.end()
    }
}

/// Node map visitor that keeps document order and injects each key as the node name.
struct NodesInOrder(Vec<GraphNode>);

impl<'de> Deserialize<'de> for NodesInOrder {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NodesVisitor;

        impl<'de> Visitor<'de> for NodesVisitor {
            type Value = NodesInOrder;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of node name to node definition")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut nodes = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, raw)) = access.next_entry::<String, RawNode>()? {
                    nodes.push(GraphNode {
                        name,
                        edges: raw.edges,
                        activation: raw.activation,
                    });
                }
                Ok(NodesInOrder(nodes))
            }
        }

        deserializer.deserialize_map(NodesVisitor)
    }
}

#[derive(Deserialize)]
struct RawGraph {
    nodes: NodesInOrder,
    #[serde(default)]
    default_start_node: Option<String>,
}

impl<'de> Deserialize<'de> for DirectedGraph {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawGraph::deserialize(deserializer)?;
        let mut graph = DirectedGraph::new();
        for node in raw.nodes.0 {
            graph.add_node(node);
        }
        graph.default_start_node = raw.default_start_node;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> DirectedGraph {
        DirectedGraph::new()
            .with_node(GraphNode::new("A").with_edge("B"))
            .with_node(GraphNode::new("B").with_edge("C"))
            .with_node(GraphNode::new("C"))
    }

    #[test]
    fn test_chain_is_valid() {
        let graph = chain();
        assert!(graph.validate().is_ok());
        assert_eq!(graph.start_nodes(), BTreeSet::from(["A"]));
        assert_eq!(graph.leaf_nodes(), BTreeSet::from(["C"]));
        assert!(!graph.has_cycle_with_safe_exit().unwrap());
    }

    #[test]
    fn test_empty_graph_rejected() {
        assert_eq!(DirectedGraph::new().validate(), Err(StructuralError::NoNodes));
    }

    #[test]
    fn test_no_start_node_rejected() {
        let graph = DirectedGraph::new()
            .with_node(GraphNode::new("A").with_conditional_edge("B", "go"))
            .with_node(GraphNode::new("B").with_conditional_edge("A", "back"));
        let err = graph.validate().unwrap_err();
        assert_eq!(err, StructuralError::NoStartNode);
        assert!(err.to_string().contains("start node"));
    }

    #[test]
    fn test_closed_loop_reports_its_path() {
        let graph = DirectedGraph::new()
            .with_node(GraphNode::new("A").with_edge("B"))
            .with_node(GraphNode::new("B").with_edge("A"));
        let err = graph.validate().unwrap_err();
        assert_eq!(
            err,
            StructuralError::UnsafeCycle {
                path: vec!["A".to_string(), "B".to_string(), "A".to_string()]
            }
        );
        assert!(err.to_string().contains("A -> B -> A"));
    }

    #[test]
    fn test_mixed_edges_name_the_node() {
        let graph = DirectedGraph::new()
            .with_node(
                GraphNode::new("A")
                    .with_edge("B")
                    .with_conditional_edge("C", "maybe"),
            )
            .with_node(GraphNode::new("B"))
            .with_node(GraphNode::new("C"));
        let err = graph.validate().unwrap_err();
        assert!(err.to_string().contains("'A'"));
    }

    #[test]
    fn test_parents_follow_declaration_order() {
        let graph = DirectedGraph::new()
            .with_node(GraphNode::new("B").with_edge("C"))
            .with_node(GraphNode::new("A").with_edge("C"))
            .with_node(GraphNode::new("C"));
        assert_eq!(graph.parents("C"), vec!["B", "A"]);
        assert!(graph.parents("A").is_empty());
        assert!(graph.parents("missing").is_empty());
    }

    #[test]
    fn test_parent_cache_refreshes_after_mutation() {
        let mut graph = chain();
        assert_eq!(graph.parents("C"), vec!["B"]);
        graph.add_node(GraphNode::new("A").with_edge("B").with_edge("C"));
        assert_eq!(graph.parents("C"), vec!["A", "B"]);
    }

    #[test]
    fn test_unsafe_cycle_reports_path() {
        let graph = DirectedGraph::new()
            .with_node(GraphNode::new("S").with_edge("A"))
            .with_node(GraphNode::new("A").with_edge("B"))
            .with_node(GraphNode::new("B").with_edge("C"))
            .with_node(GraphNode::new("C").with_edge("A"));
        let err = graph.has_cycle_with_safe_exit().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cycle detected without exit condition: A -> B -> C -> A"
        );
        assert_eq!(graph.validate(), Err(err));
    }

    #[test]
    fn test_unknown_edge_target_rejected() {
        let graph = DirectedGraph::new().with_node(GraphNode::new("A").with_edge("ghost"));
        assert!(matches!(
            graph.validate(),
            Err(StructuralError::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_unknown_default_start_rejected() {
        let graph = chain().with_default_start_node("Z");
        assert!(matches!(
            graph.validate(),
            Err(StructuralError::UnknownNode { .. })
        ));
    }
}
