//! Participants: anything with a name that can reply to a conversation.
//!
//! The group chat only depends on the narrow [`Participant`] trait. Concrete
//! participants keep whatever private state they need behind their own locks;
//! they never touch the chat's shared history directly, everything flows
//! through [`Participant::receive`] (broadcast) and
//! [`Participant::generate_reply`] (the selected speaker's turn).
//!
//! Three implementations ship with the crate:
//!
//! - [`ModelParticipant`]: replies by calling a language model through a
//!   [`ClientWrapper`], keeping its own transcript of everything broadcast to it.
//! - [`FunctionParticipant`]: executes function-call requests found in the
//!   latest message and answers with a function-role result.
//! - [`ScriptedParticipant`]: replays a fixed script; handy for demos, tests and
//!   deterministic pipelines.
//!
//! # Example
//!
//! ```rust,no_run
//! use groupflow::participant::{ModelParticipant, Participant};
//! use groupflow::ClientWrapper;
//! use std::sync::Arc;
//!
//! # fn example(client: Arc<dyn ClientWrapper>) {
//! let critic = ModelParticipant::new("critic", client)
//!     .with_description("Finds weaknesses in the current plan")
//!     .with_system_prompt("You are a blunt but fair critic.");
//! assert_eq!(critic.name(), "critic");
//! # }
//! ```

use crate::client_wrapper::{ClientWrapper, Message, Role};
use crate::message::ChatMessage;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Error type returned by participants.
pub type ParticipantError = Box<dyn Error + Send + Sync>;

/// A conversational participant.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Unique name of the participant within a roster.
    fn name(&self) -> &str;

    /// What the participant is good at; shown to the model in `auto` selection.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Functions this participant can execute, for function-call affinity.
    fn functions(&self) -> &[String] {
        &[]
    }

    /// Deliver a message produced by someone else.
    ///
    /// The group chat always passes `request_reply = false`: a delivery keeps the
    /// participant's private context in sync, the reply is requested separately.
    async fn receive(&self, _message: &ChatMessage, _request_reply: bool) {}

    /// Produce the next message given the shared history.
    ///
    /// `Ok(None)` means the participant declines to continue, which is distinct
    /// from a reply with empty content.
    async fn generate_reply(
        &self,
        history: &[ChatMessage],
    ) -> Result<Option<ChatMessage>, ParticipantError>;
}

/// A participant backed by a language model.
pub struct ModelParticipant {
    name: String,
    description: Option<String>,
    system_prompt: String,
    client: Arc<dyn ClientWrapper>,
    /// Everything delivered to this participant plus its own replies.
    transcript: Mutex<Vec<ChatMessage>>,
}

impl ModelParticipant {
    pub fn new(name: impl Into<String>, client: Arc<dyn ClientWrapper>) -> Self {
        let name = name.into();
        Self {
            system_prompt: format!("You are {}, taking part in a group conversation.", name),
            name,
            description: None,
            client,
            transcript: Mutex::new(Vec::new()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Number of messages in the private transcript.
    pub async fn transcript_len(&self) -> usize {
        self.transcript.lock().await.len()
    }

    /// Forget the private transcript, e.g. between unrelated conversations.
    pub async fn clear_transcript(&self) {
        self.transcript.lock().await.clear();
    }
}

#[async_trait]
impl Participant for ModelParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn receive(&self, message: &ChatMessage, _request_reply: bool) {
        self.transcript.lock().await.push(message.clone());
    }

    async fn generate_reply(
        &self,
        history: &[ChatMessage],
    ) -> Result<Option<ChatMessage>, ParticipantError> {
        let mut transcript = self.transcript.lock().await;

        // Stateless use (no deliveries yet) falls back to the shared history.
        let context: &[ChatMessage] = if transcript.is_empty() {
            history
        } else {
            &transcript[..]
        };

        let mut messages = Vec::with_capacity(context.len() + 1);
        messages.push(Message::new(Role::System, &self.system_prompt));
        messages.extend(context.iter().map(|m| m.to_client_message(&self.name)));

        log::debug!(
            "{} calling {} with {} messages",
            self.name,
            self.client.model_name(),
            messages.len()
        );
        let reply = self.client.send_message(&messages).await?;

        let message = ChatMessage::from_participant(&self.name, &*reply.content);
        transcript.push(message.clone());
        Ok(Some(message))
    }
}

/// Handler invoked with a function call's JSON arguments.
pub type FunctionHandler =
    Arc<dyn Fn(&serde_json::Value) -> Result<String, String> + Send + Sync>;

/// A participant that executes function calls requested by others.
///
/// It only speaks when the latest message carries a function-call request;
/// otherwise it declines.
pub struct FunctionParticipant {
    name: String,
    description: Option<String>,
    function_names: Vec<String>,
    handlers: HashMap<String, FunctionHandler>,
}

impl FunctionParticipant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            function_names: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Register a function (builder pattern). Re-registering a name replaces its handler.
    pub fn with_function(mut self, name: impl Into<String>, handler: FunctionHandler) -> Self {
        let name = name.into();
        if !self.function_names.contains(&name) {
            self.function_names.push(name.clone());
        }
        self.handlers.insert(name, handler);
        self
    }
}

#[async_trait]
impl Participant for FunctionParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn functions(&self) -> &[String] {
        &self.function_names
    }

    async fn generate_reply(
        &self,
        history: &[ChatMessage],
    ) -> Result<Option<ChatMessage>, ParticipantError> {
        let Some(call) = history.last().and_then(|m| m.function_call.as_ref()) else {
            return Ok(None);
        };

        let output = match self.handlers.get(&call.name) {
            Some(handler) => match handler(&call.arguments) {
                Ok(output) => output,
                Err(e) => {
                    log::warn!("{}: function '{}' failed: {}", self.name, call.name, e);
                    format!("Error: {}", e)
                }
            },
            None => format!("Error: function '{}' not found", call.name),
        };

        let mut result = ChatMessage::function_result(&call.name, output);
        result.source = self.name.clone();
        Ok(Some(result))
    }
}

/// A participant that replays a fixed script.
///
/// Each turn pops the next entry; `None` entries (and an exhausted script)
/// decline the turn. Every delivered message is recorded for inspection.
pub struct ScriptedParticipant {
    name: String,
    description: Option<String>,
    function_names: Vec<String>,
    script: Mutex<VecDeque<Option<ChatMessage>>>,
    received: Mutex<Vec<ChatMessage>>,
    delay: Option<Duration>,
}

impl ScriptedParticipant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            function_names: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            received: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare functions this participant claims to execute.
    pub fn with_functions<I, S>(mut self, functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.function_names = functions.into_iter().map(Into::into).collect();
        self
    }

    /// Queue a plain-text reply.
    pub fn with_reply(self, content: impl AsRef<str>) -> Self {
        let message = ChatMessage::from_participant(self.name.clone(), content);
        self.with_message(message)
    }

    /// Queue several plain-text replies.
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        replies.into_iter().fold(self, |p, r| p.with_reply(r))
    }

    /// Queue a fully-formed message (e.g. one carrying a function call).
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.script.get_mut().push_back(Some(message));
        self
    }

    /// Queue a declined turn.
    pub fn with_decline(mut self) -> Self {
        self.script.get_mut().push_back(None);
        self
    }

    /// Wait this long before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Messages delivered to this participant so far.
    pub async fn received(&self) -> Vec<ChatMessage> {
        self.received.lock().await.clone()
    }

    /// Number of scripted turns not yet played.
    pub async fn remaining(&self) -> usize {
        self.script.lock().await.len()
    }
}

#[async_trait]
impl Participant for ScriptedParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn functions(&self) -> &[String] {
        &self.function_names
    }

    async fn receive(&self, message: &ChatMessage, _request_reply: bool) {
        self.received.lock().await.push(message.clone());
    }

    async fn generate_reply(
        &self,
        _history: &[ChatMessage],
    ) -> Result<Option<ChatMessage>, ParticipantError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.script.lock().await.pop_front().flatten())
    }
}
