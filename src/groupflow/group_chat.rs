//! Multi-participant conversations driven by a speaker selector.
//!
//! A [`GroupChat`] owns a roster of [`Participant`]s, a shared message history
//! and either a [`DirectedGraph`] (graph mode) or a flat
//! [`SpeakerSelectionMethod`]. Each round of [`GroupChat::run`]:
//!
//! 1. appends the pending message(s) to the history and broadcasts each one to
//!    every participant other than its producer,
//! 2. checks the termination conditions (stop keyword, round ceiling),
//! 3. selects the next speaker(s),
//! 4. asks every selected speaker for a reply, concurrently and against the
//!    same history snapshot; the replies become the next round's messages.
//!
//! A run ends with a [`StopReason`]; structural problems are reported as
//! [`GroupChatError`] before any message is exchanged.
//!
//! # Example
//!
//! ```rust
//! use groupflow::graph::{DirectedGraph, GraphNode};
//! use groupflow::group_chat::{GroupChat, StopReason};
//! use groupflow::participant::ScriptedParticipant;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let graph = DirectedGraph::new()
//!     .with_node(GraphNode::new("writer").with_edge("editor"))
//!     .with_node(GraphNode::new("editor"));
//!
//! let mut chat = GroupChat::new("docs", "Docs pipeline").with_graph(graph);
//! chat.add_participant(Arc::new(ScriptedParticipant::new("writer").with_reply("draft")))?;
//! chat.add_participant(Arc::new(ScriptedParticipant::new("editor").with_reply("edited")))?;
//!
//! let response = chat.run(None).await?;
//! assert_eq!(response.messages.len(), 2);
//! assert_eq!(response.stop_reason, StopReason::NoEligibleSpeaker);
//! # Ok(())
//! # }
//! ```

use crate::activation::ActivationTracker;
use crate::client_wrapper::ClientWrapper;
use crate::config::{GroupChatConfig, SpeakerSelectionMethod};
use crate::event::{ChatEvent, EventHandler};
use crate::graph::{DirectedGraph, StructuralError};
use crate::message::ChatMessage;
use crate::participant::{Participant, ParticipantError};
use crate::selector::{
    ClientProposer, FlatSelector, GraphSelector, OperatorInput, Selection, SpeakerProposer,
    SpokenTurn, StdinOperator,
};
use crate::transitions::SpeakerTransitions;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Why a run ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The round ceiling was reached.
    MaxRoundsReached,
    /// The selector found nobody to speak next.
    NoEligibleSpeaker,
    /// Every selected speaker declined (or failed) in the same round.
    EmptyReply,
    /// A message contained the configured termination keyword.
    ExplicitStopMessage,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::MaxRoundsReached => "max_rounds_reached",
            StopReason::NoEligibleSpeaker => "no_eligible_speaker",
            StopReason::EmptyReply => "empty_reply",
            StopReason::ExplicitStopMessage => "explicit_stop_message",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a [`GroupChat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    AwaitingFirstMessage,
    Running,
    /// Ended by an empty reply, the termination keyword, or a graph walk that
    /// ran out of successors.
    Terminated,
    MaxRoundsReached,
    /// Flat selection found nobody left to speak.
    NoEligibleSpeaker,
}

impl RunState {
    /// Final state for a run that stopped with `reason`.
    ///
    /// Running out of successors is the normal end of a graph walk, so only
    /// flat selection reports [`RunState::NoEligibleSpeaker`].
    pub fn after_stop(reason: StopReason, graph_mode: bool) -> Self {
        match reason {
            StopReason::MaxRoundsReached => RunState::MaxRoundsReached,
            StopReason::NoEligibleSpeaker if graph_mode => RunState::Terminated,
            StopReason::NoEligibleSpeaker => RunState::NoEligibleSpeaker,
            StopReason::EmptyReply | StopReason::ExplicitStopMessage => RunState::Terminated,
        }
    }
}

/// Result of a completed [`GroupChat::run`].
#[derive(Debug, Clone)]
pub struct GroupChatResponse {
    pub run_id: String,
    /// Full history of the run in append order.
    pub messages: Vec<ChatMessage>,
    /// Rounds executed (one per batch of appended messages).
    pub rounds: usize,
    pub stop_reason: StopReason,
    pub state: RunState,
}

/// Errors from building or running a group chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupChatError {
    /// The graph or speaker-transition map is invalid.
    Structural(StructuralError),

    /// Fewer than two participants are registered.
    UnderpopulatedRoster { count: usize },

    /// A participant with this name is already registered.
    DuplicateParticipant(String),

    /// A graph node or transition names someone who is not on the roster.
    UnknownParticipant(String),

    /// Flat mode found no candidate and
    /// [`raise_on_no_eligible_speaker`](GroupChatConfig::raise_on_no_eligible_speaker) is set.
    NoEligibleSpeaker { last_speaker: Option<String> },

    /// The run was interrupted and no admin took over.
    Interrupted { round: usize },
}

impl fmt::Display for GroupChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupChatError::Structural(e) => write!(f, "Invalid graph: {}", e),
            GroupChatError::UnderpopulatedRoster { count } => write!(
                f,
                "A group chat needs at least two participants, found {}",
                count
            ),
            GroupChatError::DuplicateParticipant(name) => {
                write!(f, "Participant '{}' is already registered", name)
            }
            GroupChatError::UnknownParticipant(name) => {
                write!(f, "Participant '{}' is not on the roster", name)
            }
            GroupChatError::NoEligibleSpeaker { last_speaker } => match last_speaker {
                Some(name) => write!(f, "No eligible speaker after '{}'", name),
                None => write!(f, "No eligible speaker"),
            },
            GroupChatError::Interrupted { round } => {
                write!(f, "Run interrupted in round {} with no admin to take over", round)
            }
        }
    }
}

impl Error for GroupChatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GroupChatError::Structural(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StructuralError> for GroupChatError {
    fn from(e: StructuralError) -> Self {
        GroupChatError::Structural(e)
    }
}

/// Cloneable handle that interrupts a running chat.
///
/// Triggering while replies are pending abandons those replies and hands the
/// floor to the admin participant (if configured). The flag is consumed by the
/// run that observes it.
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal {
    inner: Arc<InterruptInner>,
}

#[derive(Debug, Default)]
struct InterruptInner {
    flag: AtomicBool,
    notify: Notify,
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the signal is triggered, consuming it.
    pub async fn triggered(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.inner.flag.swap(false, Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

struct Turn {
    /// `None` for messages from outside the roster.
    speaker: Option<String>,
    message: ChatMessage,
}

enum Dispatch {
    Replies(Vec<(String, ChatMessage)>),
    Interrupted,
}

enum ActiveSelector<'g> {
    Graph {
        selector: GraphSelector<'g>,
        tracker: ActivationTracker,
    },
    Flat(FlatSelector),
}

/// A roster of participants taking turns in a shared conversation.
pub struct GroupChat {
    id: String,
    name: String,
    participants: Vec<Arc<dyn Participant>>,
    config: GroupChatConfig,
    graph: Option<DirectedGraph>,
    transitions: Option<SpeakerTransitions>,
    proposer: Option<Arc<dyn SpeakerProposer>>,
    operator: Option<Arc<dyn OperatorInput>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    interrupt: InterruptSignal,
    history: Vec<ChatMessage>,
    state: RunState,
}

impl GroupChat {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            participants: Vec::new(),
            config: GroupChatConfig::default(),
            graph: None,
            transitions: None,
            proposer: None,
            operator: None,
            event_handler: None,
            interrupt: InterruptSignal::new(),
            history: Vec::new(),
            state: RunState::AwaitingFirstMessage,
        }
    }

    pub fn with_config(mut self, config: GroupChatConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.config.max_rounds = max_rounds;
        self
    }

    pub fn with_selection(mut self, selection: SpeakerSelectionMethod) -> Self {
        self.config.selection = selection;
        self
    }

    pub fn with_termination_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.config.termination_keyword = Some(keyword.into());
        self
    }

    pub fn with_admin(mut self, name: impl Into<String>) -> Self {
        self.config.admin_name = Some(name.into());
        self
    }

    /// Switch to graph mode. The graph is validated when the run starts.
    pub fn with_graph(mut self, graph: DirectedGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Constrain flat-mode transitions.
    pub fn with_transitions(mut self, transitions: SpeakerTransitions) -> Self {
        self.transitions = Some(transitions);
        self
    }

    pub fn with_speaker_proposer(mut self, proposer: Arc<dyn SpeakerProposer>) -> Self {
        self.proposer = Some(proposer);
        self
    }

    /// Use a model for `auto` selection.
    pub fn with_model(self, client: Arc<dyn ClientWrapper>) -> Self {
        self.with_speaker_proposer(Arc::new(ClientProposer::new(client)))
    }

    /// Source of operator choices for `manual` selection (stdin by default).
    pub fn with_operator(mut self, operator: Arc<dyn OperatorInput>) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Register a participant. Names must be unique within the roster.
    pub fn add_participant(&mut self, participant: Arc<dyn Participant>) -> Result<(), GroupChatError> {
        if self.participant(participant.name()).is_some() {
            return Err(GroupChatError::DuplicateParticipant(
                participant.name().to_string(),
            ));
        }
        self.participants.push(participant);
        Ok(())
    }

    pub fn remove_participant(&mut self, name: &str) -> Option<Arc<dyn Participant>> {
        let index = self.participants.iter().position(|p| p.name() == name)?;
        Some(self.participants.remove(index))
    }

    pub fn participant(&self, name: &str) -> Option<&Arc<dyn Participant>> {
        self.participants.iter().find(|p| p.name() == name)
    }

    /// Roster names in registration order.
    pub fn participant_names(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &GroupChatConfig {
        &self.config
    }

    pub fn graph(&self) -> Option<&DirectedGraph> {
        self.graph.as_ref()
    }

    /// Handle for interrupting this chat from another task.
    pub fn interrupt_handle(&self) -> InterruptSignal {
        self.interrupt.clone()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.state = RunState::AwaitingFirstMessage;
    }

    /// Run the conversation until a stop condition is met.
    ///
    /// `initial` seeds round 1. A message whose `source` names a participant
    /// counts as that participant's turn; any other message is treated as coming
    /// from outside the roster. Without an initial message the selector picks
    /// the opening speaker(s).
    ///
    /// The history is reset at the start of every run.
    pub async fn run(
        &mut self,
        initial: Option<ChatMessage>,
    ) -> Result<GroupChatResponse, GroupChatError> {
        let roster = self.participant_names();
        if roster.len() < 2 {
            return Err(GroupChatError::UnderpopulatedRoster {
                count: roster.len(),
            });
        }

        let graph = self.graph.clone();
        let mut selector = match &graph {
            Some(graph) => {
                graph.validate()?;
                if let Some(node) = graph.nodes().iter().find(|n| !roster.contains(&n.name)) {
                    return Err(GroupChatError::UnknownParticipant(node.name.clone()));
                }
                ActiveSelector::Graph {
                    selector: GraphSelector::new(graph),
                    tracker: ActivationTracker::new(graph),
                }
            }
            None => {
                let mut flat = FlatSelector::new(&self.participants, &self.config)
                    .with_proposer(self.proposer.clone())
                    .with_operator(self.operator.clone().or_else(|| {
                        (self.config.selection == SpeakerSelectionMethod::Manual)
                            .then(|| Arc::new(StdinOperator::stdin()) as Arc<dyn OperatorInput>)
                    }));
                if let Some(transitions) = &self.transitions {
                    let allowed =
                        transitions.validate(&roster, self.config.allow_repeat_speaker)?;
                    flat = flat.with_transitions(allowed);
                }
                ActiveSelector::Flat(flat)
            }
        };

        let run_id = uuid::Uuid::new_v4().to_string();
        let mode = match &selector {
            ActiveSelector::Graph { .. } => "graph",
            ActiveSelector::Flat(_) => self.config.selection.as_str(),
        };
        log::info!(
            "Starting group chat '{}' ({} mode, {} participants)",
            self.name,
            mode,
            roster.len()
        );
        self.history.clear();
        self.state = RunState::AwaitingFirstMessage;
        self.emit(ChatEvent::RunStarted {
            run_id: run_id.clone(),
            chat_name: self.name.clone(),
            mode: mode.to_string(),
            participant_count: roster.len(),
        })
        .await;

        if self.config.max_rounds == 0 {
            return Ok(self.finish(run_id, 0, StopReason::MaxRoundsReached).await);
        }

        let mut pending: Vec<Turn> = initial
            .map(|message| Turn {
                speaker: roster.iter().find(|n| **n == message.source).cloned(),
                message,
            })
            .into_iter()
            .collect();
        let mut rounds = 0;
        let mut node_has_spoken = false;
        let mut resume: Vec<String> = Vec::new();

        let stop_reason = loop {
            if !pending.is_empty() {
                rounds += 1;
                self.state = RunState::Running;
                if self.append_round(&mut pending, rounds, &run_id).await {
                    break StopReason::ExplicitStopMessage;
                }
                if rounds >= self.config.max_rounds {
                    break StopReason::MaxRoundsReached;
                }
            }

            let speakers = if !resume.is_empty() {
                std::mem::take(&mut resume)
            } else {
                let selection = match &mut selector {
                    ActiveSelector::Graph { selector, tracker } => {
                        let turns: Vec<SpokenTurn<'_>> = pending
                            .iter()
                            .filter_map(|t| {
                                let speaker = t.speaker.as_deref()?;
                                selector.graph().contains(speaker).then_some(SpokenTurn {
                                    speaker,
                                    message: &t.message,
                                })
                            })
                            .collect();
                        if turns.is_empty() && node_has_spoken {
                            Selection::Terminated(StopReason::NoEligibleSpeaker)
                        } else {
                            selector.select(tracker, &turns)
                        }
                    }
                    ActiveSelector::Flat(flat) => {
                        let last = pending.last().and_then(|t| t.speaker.as_deref());
                        flat.select(last, &self.history).await?
                    }
                };
                match selection {
                    Selection::Terminated(reason) => break reason,
                    Selection::Speakers { names, reason } => {
                        log::debug!("Round {}: selected {:?} ({})", rounds, names, reason);
                        self.emit(ChatEvent::SpeakerSelected {
                            run_id: run_id.clone(),
                            round: rounds,
                            speakers: names.clone(),
                            reason,
                        })
                        .await;
                        names
                    }
                }
            };

            match self.dispatch(&speakers, &run_id).await {
                Dispatch::Replies(replies) => {
                    node_has_spoken = true;
                    if replies.is_empty() {
                        break StopReason::EmptyReply;
                    }
                    pending = replies
                        .into_iter()
                        .map(|(speaker, message)| Turn {
                            speaker: Some(speaker),
                            message,
                        })
                        .collect();
                }
                Dispatch::Interrupted => {
                    let admin = self
                        .config
                        .admin_name
                        .as_deref()
                        .and_then(|name| self.participant(name))
                        .cloned();
                    log::info!(
                        "Group chat '{}' interrupted in round {}; admin: {:?}",
                        self.name,
                        rounds,
                        admin.as_ref().map(|a| a.name())
                    );
                    self.emit(ChatEvent::Interrupted {
                        run_id: run_id.clone(),
                        round: rounds,
                        admin: admin.as_ref().map(|a| a.name().to_string()),
                    })
                    .await;

                    let Some(admin) = admin else {
                        self.state = RunState::Terminated;
                        return Err(GroupChatError::Interrupted { round: rounds });
                    };
                    match admin.generate_reply(&self.history).await {
                        Ok(Some(message)) => {
                            resume = speakers;
                            pending = vec![Turn {
                                speaker: Some(admin.name().to_string()),
                                message,
                            }];
                        }
                        Ok(None) => {
                            self.state = RunState::Terminated;
                            return Err(GroupChatError::Interrupted { round: rounds });
                        }
                        Err(e) => {
                            log::warn!("Admin '{}' failed after interrupt: {}", admin.name(), e);
                            self.state = RunState::Terminated;
                            return Err(GroupChatError::Interrupted { round: rounds });
                        }
                    }
                }
            }
        };

        Ok(self.finish(run_id, rounds, stop_reason).await)
    }

    /// Tag, append and broadcast one round of messages. Returns `true` when a
    /// message contains the termination keyword.
    async fn append_round(&mut self, pending: &mut [Turn], round: usize, run_id: &str) -> bool {
        self.emit(ChatEvent::RoundStarted {
            run_id: run_id.to_string(),
            round,
        })
        .await;

        let mut stop = false;
        for turn in pending.iter_mut() {
            if let Some(speaker) = &turn.speaker {
                // Function results keep the function name; the source still
                // records who executed it.
                if !turn.message.is_function_result() || turn.message.source.is_empty() {
                    turn.message.source = speaker.clone();
                }
            }
            turn.message
                .metadata
                .insert("round".to_string(), round.to_string());

            let message = turn.message.clone();
            self.history.push(message.clone());
            self.emit(ChatEvent::MessageAppended {
                run_id: run_id.to_string(),
                round,
                source: message.source.clone(),
                content_length: message.content.len(),
            })
            .await;

            for participant in &self.participants {
                if Some(participant.name()) != turn.speaker.as_deref() {
                    participant.receive(&message, false).await;
                }
            }

            if let Some(keyword) = &self.config.termination_keyword {
                if message.content.contains(keyword.as_str()) {
                    log::info!("'{}' sent the termination keyword", message.source);
                    stop = true;
                }
            }
        }
        stop
    }

    /// Ask every speaker for a reply against the current history, racing the
    /// interrupt signal. Declines and failures drop only their own branch.
    async fn dispatch(&self, speakers: &[String], run_id: &str) -> Dispatch {
        let history = &self.history[..];
        let calls = speakers.iter().map(|name| async move {
            let reply = match self.participant(name) {
                Some(participant) => participant.generate_reply(history).await,
                None => Err(ParticipantError::from(format!(
                    "participant '{}' is not on the roster",
                    name
                ))),
            };
            (name.clone(), reply)
        });

        let results = tokio::select! {
            results = join_all(calls) => results,
            _ = self.interrupt.triggered() => return Dispatch::Interrupted,
        };

        let mut replies = Vec::with_capacity(results.len());
        for (name, result) in results {
            match result {
                Ok(Some(message)) => replies.push((name, message)),
                Ok(None) => {
                    log::info!("{} declined to reply", name);
                    self.emit(ChatEvent::ParticipantDeclined {
                        run_id: run_id.to_string(),
                        participant: name,
                    })
                    .await;
                }
                Err(e) => {
                    log::warn!("{} failed to reply: {}", name, e);
                    self.emit(ChatEvent::ParticipantFailed {
                        run_id: run_id.to_string(),
                        participant: name,
                        error: e.to_string(),
                    })
                    .await;
                }
            }
        }
        Dispatch::Replies(replies)
    }

    async fn finish(&mut self, run_id: String, rounds: usize, reason: StopReason) -> GroupChatResponse {
        self.state = RunState::after_stop(reason, self.graph.is_some());
        log::info!(
            "Group chat '{}' finished after {} rounds: {}",
            self.name,
            rounds,
            reason
        );
        self.emit(ChatEvent::RunCompleted {
            run_id: run_id.clone(),
            chat_name: self.name.clone(),
            rounds,
            stop_reason: reason,
        })
        .await;
        GroupChatResponse {
            run_id,
            messages: self.history.clone(),
            rounds,
            stop_reason: reason,
            state: self.state,
        }
    }

    async fn emit(&self, event: ChatEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_chat_event(&event).await;
        }
    }
}
