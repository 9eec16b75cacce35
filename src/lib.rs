//! # GroupFlow
//!
//! GroupFlow runs conversations between several named participants (language-model
//! agents, function executors, scripted bots, humans behind an adapter) and decides who
//! speaks next.
//!
//! The crate provides layered abstractions for:
//!
//! * **Graph-constrained turn taking**: a [`DirectedGraph`] of participants whose edges may
//!   be guarded by keyword conditions, with fan-out to several successors and fan-in nodes
//!   that wait for all (or any) of their parents
//! * **Flat selection**: round robin, random, manual (operator prompt) and model-driven
//!   (`auto`) policies over the whole roster, optionally constrained by
//!   [`transitions::SpeakerTransitions`]
//! * **Turn execution**: [`GroupChat::run`] appends and broadcasts messages, enforces the
//!   round ceiling and termination keyword, dispatches replies concurrently and hands the
//!   floor to an admin participant on interrupt
//! * **Observability**: [`event::EventHandler`] callbacks plus `log` records at every step
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use groupflow::{DirectedGraph, GraphNode, GroupChat, StopReason};
//! use groupflow::participant::ScriptedParticipant;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     groupflow::init_logger();
//!
//!     let graph = DirectedGraph::new()
//!         .with_node(GraphNode::new("planner").with_edge("coder").with_edge("tester"))
//!         .with_node(GraphNode::new("coder").with_edge("reviewer"))
//!         .with_node(GraphNode::new("tester").with_edge("reviewer"))
//!         .with_node(GraphNode::new("reviewer"));
//!
//!     let mut chat = GroupChat::new("ship-it", "Release crew").with_graph(graph);
//!     for (name, reply) in [
//!         ("planner", "plan ready"),
//!         ("coder", "patch pushed"),
//!         ("tester", "tests green"),
//!         ("reviewer", "LGTM"),
//!     ] {
//!         chat.add_participant(Arc::new(ScriptedParticipant::new(name).with_reply(reply)))?;
//!     }
//!
//!     let response = chat.run(None).await?;
//!     // planner, then coder and tester in parallel, then reviewer once both are done
//!     assert_eq!(response.rounds, 3);
//!     assert_eq!(response.stop_reason, StopReason::NoEligibleSpeaker);
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! Every component logs through the [`log`] facade. Call [`init_logger`] to route records to
//! [`env_logger`] and filter them with `RUST_LOG` (e.g. `RUST_LOG=groupflow=debug`).

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding GroupFlow can opt-in to `RUST_LOG` driven diagnostics without
/// choosing a logging backend upfront.
///
/// ```rust
/// groupflow::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `groupflow` module.
pub mod groupflow;

// Re-exporting key items for easier external access.
pub use groupflow::activation;
pub use groupflow::client_wrapper;
pub use groupflow::client_wrapper::{ClientWrapper, Message, Role};
pub use groupflow::condition;
pub use groupflow::config;
pub use groupflow::config::{GroupChatConfig, SpeakerSelectionMethod};
pub use groupflow::event;
pub use groupflow::event::{ChatEvent, EventHandler};
pub use groupflow::graph;
pub use groupflow::graph::{Activation, DirectedGraph, GraphEdge, GraphNode, StructuralError};
pub use groupflow::group_chat;
pub use groupflow::group_chat::{
    GroupChat, GroupChatError, GroupChatResponse, InterruptSignal, RunState, StopReason,
};
pub use groupflow::message;
pub use groupflow::message::ChatMessage;
pub use groupflow::participant;
pub use groupflow::participant::{
    FunctionParticipant, ModelParticipant, Participant, ScriptedParticipant,
};
pub use groupflow::selector;
pub use groupflow::transitions;
