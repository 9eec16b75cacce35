//! Speaker selection.
//!
//! Two modes, chosen by configuration rather than by subclassing:
//!
//! - **Graph mode** ([`GraphSelector`]): the next speakers are the successors of
//!   the last speakers in a [`DirectedGraph`] whose edge conditions match the
//!   reply and whose activation policy is satisfied.
//! - **Flat mode** ([`FlatSelector`]): one speaker per round picked from the
//!   roster by a [`SpeakerSelectionMethod`], after function-call affinity,
//!   repeat-speaker and speaker-transition filters.
//!
//! Both return a tagged [`Selection`]; running out of speakers is a normal
//! [`Selection::Terminated`] outcome, not an error.

use crate::activation::ActivationTracker;
use crate::client_wrapper::{ClientWrapper, Message, Role};
use crate::condition;
use crate::config::{GroupChatConfig, SpeakerSelectionMethod};
use crate::graph::DirectedGraph;
use crate::group_chat::{GroupChatError, StopReason};
use crate::message::ChatMessage;
use crate::participant::{Participant, ParticipantError};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Stdin};
use tokio::sync::Mutex;

/// Outcome of a selection step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Participants that speak next, in dispatch order.
    Speakers {
        names: Vec<String>,
        /// Policy that decided, including any fallback taken.
        reason: String,
    },
    /// Nobody can speak next; the run ends for this reason.
    Terminated(StopReason),
}

impl Selection {
    /// Selected names; empty when terminated.
    pub fn speakers(&self) -> &[String] {
        match self {
            Selection::Speakers { names, .. } => names,
            Selection::Terminated(_) => &[],
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Selection::Terminated(_))
    }
}

/// A message together with the participant that produced it.
#[derive(Debug, Clone, Copy)]
pub struct SpokenTurn<'a> {
    pub speaker: &'a str,
    pub message: &'a ChatMessage,
}

/// Graph-constrained selection over a validated [`DirectedGraph`].
pub struct GraphSelector<'g> {
    graph: &'g DirectedGraph,
}

impl<'g> GraphSelector<'g> {
    pub fn new(graph: &'g DirectedGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &DirectedGraph {
        self.graph
    }

    /// Nodes that open the conversation: the default start node if set, else
    /// every start node in declaration order.
    pub fn entry_nodes(&self) -> Vec<String> {
        if let Some(start) = self.graph.default_start_node() {
            return vec![start.to_string()];
        }
        let starts = self.graph.start_nodes();
        self.graph
            .nodes()
            .iter()
            .filter(|n| starts.contains(n.name.as_str()))
            .map(|n| n.name.clone())
            .collect()
    }

    /// Compute the next speakers from the turns of the last round.
    ///
    /// `turns` must only contain graph nodes; an empty slice means no node has
    /// spoken yet. Each turn is processed in order: every outgoing edge whose
    /// condition matches the reply records a firing, and targets that become
    /// ready are selected once and have their pending firings cleared.
    pub fn select(&self, tracker: &mut ActivationTracker, turns: &[SpokenTurn<'_>]) -> Selection {
        if turns.is_empty() {
            return Selection::Speakers {
                names: self.entry_nodes(),
                reason: "graph entry".to_string(),
            };
        }

        let mut selected: Vec<String> = Vec::new();
        for turn in turns {
            let Some(node) = self.graph.node(turn.speaker) else {
                log::debug!("'{}' is not a graph node, ignoring its turn", turn.speaker);
                continue;
            };
            if node.is_leaf() {
                log::debug!("'{}' is a leaf node", node.name);
                continue;
            }

            let mut fired = false;
            for edge in &node.edges {
                if !condition::matches(edge.condition.as_deref(), turn.message) {
                    continue;
                }
                fired = true;
                tracker.record_fired(&node.name, &edge.target);
                if tracker.is_ready(&edge.target) {
                    tracker.clear(&edge.target);
                    if !selected.contains(&edge.target) {
                        selected.push(edge.target.clone());
                    }
                }
            }

            if !fired {
                log::info!(
                    "No outgoing condition of '{}' matched its reply; the branch ends here",
                    node.name
                );
            }
        }

        if selected.is_empty() {
            Selection::Terminated(StopReason::NoEligibleSpeaker)
        } else {
            Selection::Speakers {
                names: selected,
                reason: "graph".to_string(),
            }
        }
    }
}

/// Asks a model who should speak next (flat `auto` mode).
#[async_trait]
pub trait SpeakerProposer: Send + Sync {
    /// Return the model's raw answer, or `Ok(None)` when no model is configured.
    async fn propose_next_speaker(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> Result<Option<String>, ParticipantError>;
}

/// [`SpeakerProposer`] backed by any [`ClientWrapper`].
pub struct ClientProposer {
    client: Arc<dyn ClientWrapper>,
}

impl ClientProposer {
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SpeakerProposer for ClientProposer {
    async fn propose_next_speaker(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
    ) -> Result<Option<String>, ParticipantError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::new(Role::System, system_prompt));
        messages.extend(history.iter().map(|m| m.to_client_message("")));
        messages.push(Message::new(
            Role::User,
            "Who should speak next? Reply with the participant's name only.",
        ));
        let reply = self.client.send_message(&messages).await?;
        Ok(Some(reply.content.to_string()))
    }
}

/// Source of operator choices for flat `manual` mode.
#[async_trait]
pub trait OperatorInput: Send + Sync {
    /// Show `prompt` and return the operator's raw entry, `None` if input is closed.
    async fn read_choice(&self, prompt: &str) -> Option<String>;
}

/// Reads operator choices line by line from an async reader.
///
/// One buffered reader lives for the whole chat, so lines that arrive
/// together (piped or pasted input) are consumed one attempt at a time.
pub struct LineOperator<R> {
    reader: Mutex<BufReader<R>>,
}

/// Operator on standard input.
pub type StdinOperator = LineOperator<Stdin>;

impl LineOperator<Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin + Send> LineOperator<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> OperatorInput for LineOperator<R> {
    async fn read_choice(&self, prompt: &str) -> Option<String> {
        println!("{}", prompt);
        let mut line = String::new();
        let mut reader = self.reader.lock().await;
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }
}

#[derive(Debug, Clone)]
struct RosterEntry {
    name: String,
    description: Option<String>,
    functions: Vec<String>,
}

/// Roster-based selection for flat mode.
///
/// Filters run in this order: function-call affinity, repeat-speaker
/// exclusion, speaker-transition constraints. An empty candidate list ends the
/// run (or fails with the legacy flag); a single candidate is chosen without
/// consulting the policy.
pub struct FlatSelector {
    method: SpeakerSelectionMethod,
    roster: Vec<RosterEntry>,
    allow_repeat_speaker: bool,
    raise_on_no_eligible_speaker: bool,
    max_manual_attempts: usize,
    prompt_template: String,
    transitions: Option<BTreeMap<String, Vec<String>>>,
    proposer: Option<Arc<dyn SpeakerProposer>>,
    operator: Option<Arc<dyn OperatorInput>>,
    rng: StdRng,
}

impl FlatSelector {
    /// Snapshot the roster (in order) and the selection settings of `config`.
    pub fn new(participants: &[Arc<dyn Participant>], config: &GroupChatConfig) -> Self {
        let roster = participants
            .iter()
            .map(|p| RosterEntry {
                name: p.name().to_string(),
                description: p.description().map(str::to_string),
                functions: p.functions().to_vec(),
            })
            .collect();
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            method: config.selection,
            roster,
            allow_repeat_speaker: config.allow_repeat_speaker,
            raise_on_no_eligible_speaker: config.raise_on_no_eligible_speaker,
            max_manual_attempts: config.max_manual_attempts,
            prompt_template: config.select_speaker_prompt.clone(),
            transitions: None,
            proposer: None,
            operator: None,
            rng,
        }
    }

    /// Constrain transitions with an already-validated allowed-next map.
    pub fn with_transitions(mut self, allowed: BTreeMap<String, Vec<String>>) -> Self {
        self.transitions = Some(allowed);
        self
    }

    pub fn with_proposer(mut self, proposer: Option<Arc<dyn SpeakerProposer>>) -> Self {
        self.proposer = proposer;
        self
    }

    pub fn with_operator(mut self, operator: Option<Arc<dyn OperatorInput>>) -> Self {
        self.operator = operator;
        self
    }

    /// Pick the next speaker after `last_speaker` (`None` when the last message
    /// came from outside the roster).
    pub async fn select(
        &mut self,
        last_speaker: Option<&str>,
        history: &[ChatMessage],
    ) -> Result<Selection, GroupChatError> {
        let mut candidates: Vec<String> = self.roster.iter().map(|e| e.name.clone()).collect();

        if let Some(call) = history.last().and_then(|m| m.function_call.as_ref()) {
            let able: Vec<String> = self
                .roster
                .iter()
                .filter(|e| e.functions.contains(&call.name))
                .map(|e| e.name.clone())
                .collect();
            match able.len() {
                0 => {
                    log::warn!("No participant declares function '{}'", call.name);
                    candidates.clear();
                }
                1 => {
                    return Ok(Selection::Speakers {
                        names: able,
                        reason: format!("function call '{}'", call.name),
                    })
                }
                _ => candidates = able,
            }
        }

        if !self.allow_repeat_speaker {
            if let Some(last) = last_speaker {
                candidates.retain(|c| c != last);
            }
        }

        if let (Some(allowed), Some(last)) = (&self.transitions, last_speaker) {
            let next = allowed.get(last).map(Vec::as_slice).unwrap_or(&[]);
            candidates.retain(|c| next.contains(c));
        }

        if candidates.is_empty() {
            if self.raise_on_no_eligible_speaker {
                return Err(GroupChatError::NoEligibleSpeaker {
                    last_speaker: last_speaker.map(str::to_string),
                });
            }
            log::info!("No eligible speaker after {:?}", last_speaker);
            return Ok(Selection::Terminated(StopReason::NoEligibleSpeaker));
        }

        if candidates.len() == 1 {
            return Ok(Selection::Speakers {
                names: candidates,
                reason: "only eligible candidate".to_string(),
            });
        }

        let (name, reason) = match self.method {
            SpeakerSelectionMethod::RoundRobin => (
                self.round_robin(last_speaker, &candidates),
                "round_robin".to_string(),
            ),
            SpeakerSelectionMethod::Random => {
                let index = self.rng.gen_range(0..candidates.len());
                (candidates[index].clone(), "random".to_string())
            }
            SpeakerSelectionMethod::Manual => {
                self.manual(last_speaker, &candidates, history).await
            }
            SpeakerSelectionMethod::Auto => self.auto(last_speaker, &candidates, history).await,
        };

        Ok(Selection::Speakers {
            names: vec![name],
            reason,
        })
    }

    /// First candidate after `last_speaker` in roster order, wrapping around.
    fn round_robin(&self, last_speaker: Option<&str>, candidates: &[String]) -> String {
        let n = self.roster.len();
        let start = last_speaker
            .and_then(|last| self.roster.iter().position(|e| e.name == last))
            .map_or(0, |i| i + 1);
        (0..n)
            .map(|offset| &self.roster[(start + offset) % n].name)
            .find(|name| candidates.contains(name))
            .unwrap_or(&candidates[0])
            .clone()
    }

    async fn manual(
        &self,
        last_speaker: Option<&str>,
        candidates: &[String],
        history: &[ChatMessage],
    ) -> (String, String) {
        if let Some(operator) = self.operator.clone() {
            let listing = candidates
                .iter()
                .enumerate()
                .map(|(i, name)| format!("{}: {}", i + 1, name))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "Please select the next speaker (1-{}), or press Enter / 'q' to let the model decide:\n{}",
                candidates.len(),
                listing
            );

            for attempt in 1..=self.max_manual_attempts {
                let Some(entry) = operator.read_choice(&prompt).await else {
                    break;
                };
                let entry = entry.trim();
                if entry.is_empty() || entry.eq_ignore_ascii_case("q") {
                    break;
                }
                match entry.parse::<usize>() {
                    Ok(index) if (1..=candidates.len()).contains(&index) => {
                        return (candidates[index - 1].clone(), "manual".to_string());
                    }
                    _ => log::warn!(
                        "Invalid speaker selection '{}' (attempt {}/{})",
                        entry,
                        attempt,
                        self.max_manual_attempts
                    ),
                }
            }
        }

        let (name, reason) = self.auto(last_speaker, candidates, history).await;
        (name, format!("manual -> {}", reason))
    }

    async fn auto(
        &self,
        last_speaker: Option<&str>,
        candidates: &[String],
        history: &[ChatMessage],
    ) -> (String, String) {
        let fallback = |why: &str, selector: &Self| {
            (
                selector.round_robin(last_speaker, candidates),
                format!("auto -> round_robin ({})", why),
            )
        };

        let Some(proposer) = self.proposer.clone() else {
            return fallback("no model configured", self);
        };

        let prompt = self.render_prompt(candidates);
        match proposer.propose_next_speaker(&prompt, history).await {
            Ok(Some(reply)) => {
                let mentioned = mentioned_candidates(&reply, candidates);
                if mentioned.len() == 1 {
                    (mentioned[0].clone(), "auto".to_string())
                } else {
                    log::warn!(
                        "Model reply mentioned {} eligible speakers, falling back to round robin: {:?}",
                        mentioned.len(),
                        reply
                    );
                    fallback("ambiguous reply", self)
                }
            }
            Ok(None) => fallback("no model configured", self),
            Err(e) => {
                log::warn!("Speaker proposal failed, falling back to round robin: {}", e);
                fallback("model error", self)
            }
        }
    }

    fn render_prompt(&self, candidates: &[String]) -> String {
        let roles = self
            .roster
            .iter()
            .filter(|e| candidates.contains(&e.name))
            .map(|e| match &e.description {
                Some(description) => format!("{}: {}", e.name, description),
                None => e.name.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.prompt_template
            .replace("{roles}", &roles)
            .replace("{participants}", &candidates.join(", "))
    }
}

/// Candidates mentioned in `text` as whole words (case-sensitive).
///
/// A name also counts when written with spaces in place of underscores.
///
/// ```
/// use groupflow::selector::mentioned_candidates;
///
/// let names = vec!["Bob".to_string(), "Bob_Smith".to_string(), "Carol".to_string()];
/// assert_eq!(mentioned_candidates("Carol should go next.", &names), vec!["Carol"]);
/// assert_eq!(mentioned_candidates("Bob_Smith, please", &names), vec!["Bob_Smith"]);
/// assert!(mentioned_candidates("bobby or carol", &names).is_empty());
/// ```
pub fn mentioned_candidates(text: &str, candidates: &[String]) -> Vec<String> {
    candidates
        .iter()
        .filter(|name| {
            let spaced = name.replace('_', " ");
            mentions(text, name) || (spaced != **name && mentions(text, &spaced))
        })
        .cloned()
        .collect()
}

fn mentions(text: &str, name: &str) -> bool {
    let pattern = format!(r"(?:^|\W){}(?:\W|$)", regex::escape(name));
    Regex::new(&pattern).map_or(false, |re| re.is_match(text))
}
