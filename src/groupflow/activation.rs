//! Per-run bookkeeping of which predecessors have fired.
//!
//! A node with several parents either waits for all of them
//! ([`Activation::All`]) or runs as soon as one fires ([`Activation::Any`]).
//! The [`ActivationTracker`] remembers, for every node, the parents that
//! produced a message for it since it last ran.
//!
//! The tracker belongs to a single run and is only mutated by the group chat
//! between awaits, so it needs no locking of its own.

use crate::graph::{Activation, DirectedGraph};
use std::collections::HashMap;

/// Pending activations for every node of a graph.
#[derive(Debug, Clone)]
pub struct ActivationTracker {
    parents: HashMap<String, Vec<String>>,
    policies: HashMap<String, Activation>,
    pending: HashMap<String, Vec<String>>,
}

impl ActivationTracker {
    /// Create an empty tracker for `graph`, snapshotting its parents and policies.
    pub fn new(graph: &DirectedGraph) -> Self {
        let mut parents = HashMap::new();
        let mut policies = HashMap::new();
        for node in graph.nodes() {
            parents.insert(
                node.name.clone(),
                graph
                    .parents(&node.name)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            );
            policies.insert(node.name.clone(), node.activation);
        }
        Self {
            parents,
            policies,
            pending: HashMap::new(),
        }
    }

    /// Note that `predecessor` produced a message destined for `successor`.
    ///
    /// Duplicates are kept: a predecessor inside a loop may fire several times
    /// before the successor runs.
    pub fn record_fired(&mut self, predecessor: &str, successor: &str) {
        log::debug!("activation: {} fired towards {}", predecessor, successor);
        self.pending
            .entry(successor.to_string())
            .or_default()
            .push(predecessor.to_string());
    }

    /// Whether `node` may run now.
    ///
    /// `All` requires every parent to appear among the pending firings (order and
    /// multiplicity are ignored); `Any` requires at least one firing.
    pub fn is_ready(&self, node: &str) -> bool {
        let Some(policy) = self.policies.get(node) else {
            return false;
        };
        let pending = self.pending(node);
        match policy {
            Activation::Any => !pending.is_empty(),
            Activation::All => self
                .parents
                .get(node)
                .map_or(false, |parents| {
                    parents.iter().all(|p| pending.iter().any(|f| f == p))
                }),
        }
    }

    /// Forget the pending firings of `node`; called once the node is selected.
    pub fn clear(&mut self, node: &str) {
        if let Some(list) = self.pending.get_mut(node) {
            list.clear();
        }
    }

    /// Firings recorded for `node` since it last ran.
    pub fn pending(&self, node: &str) -> &[String] {
        self.pending.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop all pending firings, e.g. before reusing the tracker for a new run.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphNode;

    fn fan_in(activation: Activation) -> DirectedGraph {
        DirectedGraph::new()
            .with_node(GraphNode::new("A").with_edge("C"))
            .with_node(GraphNode::new("B").with_edge("C"))
            .with_node(GraphNode::new("C").with_activation(activation))
    }

    #[test]
    fn test_all_waits_for_every_parent() {
        let mut tracker = ActivationTracker::new(&fan_in(Activation::All));
        tracker.record_fired("A", "C");
        assert!(!tracker.is_ready("C"));
        tracker.record_fired("A", "C");
        assert!(!tracker.is_ready("C"));
        tracker.record_fired("B", "C");
        assert!(tracker.is_ready("C"));
        assert_eq!(tracker.pending("C"), ["A", "A", "B"]);
    }

    #[test]
    fn test_any_fires_on_first_parent() {
        let mut tracker = ActivationTracker::new(&fan_in(Activation::Any));
        assert!(!tracker.is_ready("C"));
        tracker.record_fired("B", "C");
        assert!(tracker.is_ready("C"));
    }

    #[test]
    fn test_clear_resets_one_node() {
        let mut tracker = ActivationTracker::new(&fan_in(Activation::Any));
        tracker.record_fired("A", "C");
        tracker.clear("C");
        assert!(tracker.pending("C").is_empty());
        assert!(!tracker.is_ready("C"));
    }

    #[test]
    fn test_unknown_node_is_never_ready() {
        let mut tracker = ActivationTracker::new(&fan_in(Activation::Any));
        tracker.record_fired("A", "Z");
        assert!(!tracker.is_ready("Z"));
        tracker.reset();
        assert!(tracker.pending("Z").is_empty());
    }
}
