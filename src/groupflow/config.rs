//! Configuration for a group chat run.
//!
//! [`GroupChatConfig`] is a plain struct: construct it in code, start from
//! [`Default`], or deserialise it from whatever format the host application
//! already uses (it implements serde's traits; missing fields take their
//! defaults).
//!
//! # Example
//!
//! ```rust
//! use groupflow::config::{GroupChatConfig, SpeakerSelectionMethod};
//!
//! let config = GroupChatConfig {
//!     max_rounds: 6,
//!     selection: SpeakerSelectionMethod::RoundRobin,
//!     allow_repeat_speaker: false,
//!     ..GroupChatConfig::default()
//! };
//! assert_eq!(config.max_manual_attempts, 3);
//!
//! let parsed: GroupChatConfig =
//!     serde_json::from_str(r#"{"max_rounds": 4, "selection": "random"}"#).unwrap();
//! assert_eq!(parsed.selection, SpeakerSelectionMethod::Random);
//! assert!(parsed.allow_repeat_speaker);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default prompt for model-driven (`auto`) selection. `{roles}` expands to one
/// `name: description` line per candidate, `{participants}` to the
/// comma-separated candidate names.
pub const DEFAULT_SELECT_SPEAKER_PROMPT: &str = "You are coordinating a group conversation. \
The participants are:\n{roles}\n\nRead the conversation so far, then choose who should speak \
next from {participants}. Reply with the participant's name only.";

/// Flat speaker-selection policies. Graph-constrained selection is enabled by
/// attaching a graph to the group chat instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerSelectionMethod {
    /// Ask the configured speaker proposer (a model) to name the next speaker.
    #[default]
    Auto,
    /// Next participant in roster order after the last speaker.
    RoundRobin,
    /// Uniform choice among the eligible candidates.
    Random,
    /// Ask an operator to type the index of the next speaker.
    Manual,
}

impl SpeakerSelectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakerSelectionMethod::Auto => "auto",
            SpeakerSelectionMethod::RoundRobin => "round_robin",
            SpeakerSelectionMethod::Random => "random",
            SpeakerSelectionMethod::Manual => "manual",
        }
    }
}

impl fmt::Display for SpeakerSelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for a [`GroupChat`](crate::group_chat::GroupChat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupChatConfig {
    /// Hard ceiling on rounds. A round appends the pending message(s); the run
    /// stops after appending the messages of round `max_rounds`.
    pub max_rounds: usize,

    /// Flat selection policy (ignored when a graph is attached).
    pub selection: SpeakerSelectionMethod,

    /// Whether the last speaker may be selected again in flat mode.
    pub allow_repeat_speaker: bool,

    /// A message whose content contains this keyword ends the run with
    /// [`StopReason::ExplicitStopMessage`](crate::group_chat::StopReason::ExplicitStopMessage).
    pub termination_keyword: Option<String>,

    /// Legacy flat-mode behaviour: fail with
    /// [`GroupChatError::NoEligibleSpeaker`](crate::group_chat::GroupChatError::NoEligibleSpeaker)
    /// instead of terminating normally when no candidate remains.
    pub raise_on_no_eligible_speaker: bool,

    /// Invalid operator entries tolerated in manual mode before falling back to auto.
    pub max_manual_attempts: usize,

    /// Participant given the floor when the run is interrupted.
    pub admin_name: Option<String>,

    /// Seed for random selection; `None` seeds from the OS.
    pub random_seed: Option<u64>,

    /// System prompt template for auto selection.
    pub select_speaker_prompt: String,
}

impl Default for GroupChatConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            selection: SpeakerSelectionMethod::Auto,
            allow_repeat_speaker: true,
            termination_keyword: None,
            raise_on_no_eligible_speaker: false,
            max_manual_attempts: 3,
            admin_name: None,
            random_seed: None,
            select_speaker_prompt: DEFAULT_SELECT_SPEAKER_PROMPT.to_string(),
        }
    }
}
