use groupflow::activation::ActivationTracker;
use groupflow::graph::{Activation, DirectedGraph, GraphNode, StructuralError};
use groupflow::group_chat::StopReason;
use groupflow::message::ChatMessage;
use groupflow::selector::{GraphSelector, Selection, SpokenTurn};

fn reply(speaker: &str, content: &str) -> ChatMessage {
    ChatMessage::from_participant(speaker, content)
}

fn next(
    selector: &GraphSelector<'_>,
    tracker: &mut ActivationTracker,
    spoken: &[(&str, &ChatMessage)],
) -> Selection {
    let turns: Vec<SpokenTurn<'_>> = spoken
        .iter()
        .map(|(speaker, message)| SpokenTurn {
            speaker,
            message,
        })
        .collect();
    selector.select(tracker, &turns)
}

fn names(selection: &Selection) -> Vec<&str> {
    selection.speakers().iter().map(String::as_str).collect()
}

#[test]
fn test_chain_walks_to_the_leaf() {
    let graph = DirectedGraph::new()
        .with_node(GraphNode::new("A").with_edge("B"))
        .with_node(GraphNode::new("B").with_edge("C"))
        .with_node(GraphNode::new("C"));
    graph.validate().unwrap();

    let selector = GraphSelector::new(&graph);
    let mut tracker = ActivationTracker::new(&graph);

    assert_eq!(names(&next(&selector, &mut tracker, &[])), vec!["A"]);

    let a = reply("A", "first");
    assert_eq!(names(&next(&selector, &mut tracker, &[("A", &a)])), vec!["B"]);

    let b = reply("B", "second");
    assert_eq!(names(&next(&selector, &mut tracker, &[("B", &b)])), vec!["C"]);

    let c = reply("C", "done");
    assert_eq!(
        next(&selector, &mut tracker, &[("C", &c)]),
        Selection::Terminated(StopReason::NoEligibleSpeaker)
    );
}

#[test]
fn test_fan_out_selects_every_successor() {
    let graph = DirectedGraph::new()
        .with_node(GraphNode::new("A").with_edge("B").with_edge("C"))
        .with_node(GraphNode::new("B"))
        .with_node(GraphNode::new("C"));
    graph.validate().unwrap();

    let selector = GraphSelector::new(&graph);
    let mut tracker = ActivationTracker::new(&graph);
    let a = reply("A", "split the work");

    assert_eq!(
        names(&next(&selector, &mut tracker, &[("A", &a)])),
        vec!["B", "C"]
    );
}

fn fan_in(activation: Activation) -> DirectedGraph {
    DirectedGraph::new()
        .with_node(GraphNode::new("A").with_edge("C"))
        .with_node(GraphNode::new("B").with_edge("C"))
        .with_node(GraphNode::new("C").with_activation(activation))
}

#[test]
fn test_fan_in_all_waits_for_every_parent() {
    let graph = fan_in(Activation::All);
    graph.validate().unwrap();

    let selector = GraphSelector::new(&graph);
    let mut tracker = ActivationTracker::new(&graph);

    // Both parents are start nodes and open the conversation together.
    assert_eq!(names(&next(&selector, &mut tracker, &[])), vec!["A", "B"]);

    let a = reply("A", "left half");
    assert!(next(&selector, &mut tracker, &[("A", &a)]).is_terminated());
    assert_eq!(tracker.pending("C"), ["A".to_string()]);

    let b = reply("B", "right half");
    assert_eq!(names(&next(&selector, &mut tracker, &[("B", &b)])), vec!["C"]);
    assert!(tracker.pending("C").is_empty());
}

#[test]
fn test_fan_in_all_in_a_single_round() {
    let graph = fan_in(Activation::All);
    let selector = GraphSelector::new(&graph);
    let mut tracker = ActivationTracker::new(&graph);

    let a = reply("A", "left half");
    let b = reply("B", "right half");
    assert_eq!(
        names(&next(&selector, &mut tracker, &[("A", &a), ("B", &b)])),
        vec!["C"]
    );
}

#[test]
fn test_fan_in_any_runs_on_first_parent() {
    let graph = fan_in(Activation::Any);
    let selector = GraphSelector::new(&graph);
    let mut tracker = ActivationTracker::new(&graph);

    let a = reply("A", "left half");
    assert_eq!(names(&next(&selector, &mut tracker, &[("A", &a)])), vec!["C"]);
}

#[test]
fn test_conditional_edges_route_on_reply_content() {
    let graph = DirectedGraph::new()
        .with_node(
            GraphNode::new("A")
                .with_conditional_edge("B", "yes")
                .with_conditional_edge("C", "no"),
        )
        .with_node(GraphNode::new("B"))
        .with_node(GraphNode::new("C"));
    graph.validate().unwrap();

    let selector = GraphSelector::new(&graph);

    let mut tracker = ActivationTracker::new(&graph);
    let approve = reply("A", "yes please");
    assert_eq!(
        names(&next(&selector, &mut tracker, &[("A", &approve)])),
        vec!["B"]
    );

    let mut tracker = ActivationTracker::new(&graph);
    let reject = reply("A", "no thanks");
    assert_eq!(
        names(&next(&selector, &mut tracker, &[("A", &reject)])),
        vec!["C"]
    );

    let mut tracker = ActivationTracker::new(&graph);
    let unsure = reply("A", "maybe later");
    assert_eq!(
        next(&selector, &mut tracker, &[("A", &unsure)]),
        Selection::Terminated(StopReason::NoEligibleSpeaker)
    );
}

#[test]
fn test_default_start_node_overrides_start_set() {
    let graph = DirectedGraph::new()
        .with_node(GraphNode::new("A").with_edge("C"))
        .with_node(GraphNode::new("B").with_edge("C"))
        .with_node(GraphNode::new("C").with_activation(Activation::Any))
        .with_default_start_node("B");
    graph.validate().unwrap();

    let selector = GraphSelector::new(&graph);
    assert_eq!(selector.entry_nodes(), vec!["B"]);
}

#[test]
fn test_serde_round_trip_preserves_structure_and_selection() {
    let graph = DirectedGraph::new()
        .with_node(GraphNode::new("planner").with_edge("coder").with_edge("tester"))
        .with_node(GraphNode::new("coder").with_edge("reviewer"))
        .with_node(GraphNode::new("tester").with_edge("reviewer"))
        .with_node(
            GraphNode::new("reviewer")
                .with_activation(Activation::All)
                .with_conditional_edge("release", "SHIP")
                .with_conditional_edge("archive", "DROP"),
        )
        .with_node(GraphNode::new("release"))
        .with_node(GraphNode::new("archive"))
        .with_default_start_node("planner");
    graph.validate().unwrap();

    let json = serde_json::to_string(&graph).unwrap();
    let restored: DirectedGraph = serde_json::from_str(&json).unwrap();

    assert_eq!(restored, graph);
    assert_eq!(restored.start_nodes(), graph.start_nodes());
    assert_eq!(restored.leaf_nodes(), graph.leaf_nodes());
    assert_eq!(restored.parents("reviewer"), vec!["coder", "tester"]);
    restored.validate().unwrap();

    let planner = reply("planner", "plan");
    for g in [&graph, &restored] {
        let selector = GraphSelector::new(g);
        let mut tracker = ActivationTracker::new(g);
        assert_eq!(
            names(&next(&selector, &mut tracker, &[("planner", &planner)])),
            vec!["coder", "tester"]
        );
    }
}

#[test]
fn test_graph_parses_from_document() {
    let graph: DirectedGraph = serde_json::from_str(
        r#"{
            "nodes": {
                "brief":  { "edges": [{ "target": "draft" }] },
                "draft":  { "edges": [{ "target": "review" }] },
                "review": { "edges": [
                    { "target": "draft", "condition": "REVISE" },
                    { "target": "publish", "condition": "APPROVE" }
                ] },
                "publish": {}
            }
        }"#,
    )
    .unwrap();

    let order: Vec<&str> = graph.nodes().iter().map(|n| n.name.as_str()).collect();
    assert_eq!(order, vec!["brief", "draft", "review", "publish"]);
    assert!(graph.validate().is_ok());
    assert!(graph.has_cycle_with_safe_exit().unwrap());
}

#[test]
fn test_cycle_with_conditioned_escape_is_safe_but_mixed() {
    let graph = DirectedGraph::new()
        .with_node(GraphNode::new("A").with_edge("B"))
        .with_node(GraphNode::new("B").with_edge("C"))
        .with_node(
            GraphNode::new("C")
                .with_edge("A")
                .with_conditional_edge("D", "done"),
        )
        .with_node(GraphNode::new("D"));

    assert!(graph.has_cycle_with_safe_exit().unwrap());
    // C is named even though no node is free of parents
    assert_eq!(
        graph.validate(),
        Err(StructuralError::MixedEdges {
            node: "C".to_string()
        })
    );
}

#[test]
fn test_mixed_edges_reported_with_an_entry_node() {
    let graph = DirectedGraph::new()
        .with_node(GraphNode::new("S").with_edge("A"))
        .with_node(GraphNode::new("A").with_edge("B"))
        .with_node(GraphNode::new("B").with_edge("C"))
        .with_node(
            GraphNode::new("C")
                .with_edge("A")
                .with_conditional_edge("D", "done"),
        )
        .with_node(GraphNode::new("D"));

    assert!(graph.has_cycle_with_safe_exit().unwrap());
    assert_eq!(
        graph.validate(),
        Err(StructuralError::MixedEdges {
            node: "C".to_string()
        })
    );
}

#[test]
fn test_unsafe_cycle_rejected() {
    let graph = DirectedGraph::new()
        .with_node(GraphNode::new("S").with_edge("A"))
        .with_node(GraphNode::new("A").with_edge("B"))
        .with_node(GraphNode::new("B").with_edge("A"))
        .with_node(GraphNode::new("Z"));

    let err = graph.validate().unwrap_err();
    assert_eq!(
        err,
        StructuralError::UnsafeCycle {
            path: vec!["A".to_string(), "B".to_string(), "A".to_string()]
        }
    );
}
