//! Group chat event system.
//!
//! Provides a callback-based observability layer for group chat runs.
//! Implement [`EventHandler`] to receive real-time notifications about:
//!
//! - **Run lifecycle**: start and completion with the stop reason
//! - **Rounds**: round boundaries and every message appended to the history
//! - **Selection**: which speakers were chosen and why
//! - **Replies**: participants that declined or failed
//! - **Interrupts**: operator interrupts and the admin hand-off
//!
//! The single method has a default no-op implementation, so a handler only
//! overrides what it needs. Handlers are shared as `Arc<dyn EventHandler>`.
//!
//! # Example
//!
//! ```rust,no_run
//! use groupflow::event::{ChatEvent, EventHandler};
//! use async_trait::async_trait;
//!
//! struct PrintHandler;
//!
//! #[async_trait]
//! impl EventHandler for PrintHandler {
//!     async fn on_chat_event(&self, event: &ChatEvent) {
//!         if let ChatEvent::SpeakerSelected { speakers, reason, .. } = event {
//!             println!("next: {:?} ({})", speakers, reason);
//!         }
//!     }
//! }
//! ```

use crate::group_chat::StopReason;
use async_trait::async_trait;

/// Events emitted by a [`GroupChat`](crate::group_chat::GroupChat) during
/// [`run`](crate::group_chat::GroupChat::run).
///
/// Every variant carries the `run_id` (a UUID v4 generated per run).
///
/// # Event Flow
///
/// ```text
/// RunStarted
///   └─ SpeakerSelected            (only when the run starts without a message)
///   └─ RoundStarted { round: 1 }
///       ├─ MessageAppended         (one per pending message)
///       ├─ SpeakerSelected
///       └─ ParticipantDeclined / ParticipantFailed / Interrupted (if any)
///   └─ RoundStarted { round: 2 } ...
/// RunCompleted { stop_reason }
/// ```
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Validation passed and the run is about to exchange messages.
    RunStarted {
        run_id: String,
        chat_name: String,
        /// `"graph"` or the flat selection method (`"round_robin"`, `"auto"`, ...).
        mode: String,
        participant_count: usize,
    },

    /// A new round begins; its pending messages are about to be appended.
    RoundStarted { run_id: String, round: usize },

    /// A message was appended to the history and broadcast.
    MessageAppended {
        run_id: String,
        round: usize,
        source: String,
        content_length: usize,
    },

    /// The selector picked the next speaker(s).
    SpeakerSelected {
        run_id: String,
        round: usize,
        speakers: Vec<String>,
        /// Short description of the policy that decided, including fallbacks
        /// (e.g. `"auto -> round_robin (ambiguous reply)"`).
        reason: String,
    },

    /// A selected participant returned no reply.
    ParticipantDeclined { run_id: String, participant: String },

    /// A selected participant's reply call failed; its branch produces nothing.
    ParticipantFailed {
        run_id: String,
        participant: String,
        error: String,
    },

    /// An interrupt arrived while replies were pending.
    Interrupted {
        run_id: String,
        round: usize,
        /// Admin participant given the floor, if one is configured.
        admin: Option<String>,
    },

    /// The run finished normally.
    RunCompleted {
        run_id: String,
        chat_name: String,
        rounds: usize,
        stop_reason: StopReason,
    },
}

/// Receives [`ChatEvent`]s from a group chat.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_chat_event(&self, _event: &ChatEvent) {}
}
