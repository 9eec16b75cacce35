//! Conversation messages.
//!
//! Every reply, operator prompt and function result that flows through a
//! [`GroupChat`](crate::group_chat::GroupChat) is captured as a [`ChatMessage`].
//! The struct carries identity and timing information alongside the text, so the
//! conversation history can be replayed or audited after a run.
//!
//! # Examples
//!
//! ```
//! use groupflow::message::ChatMessage;
//! use groupflow::Role;
//!
//! let task = ChatMessage::new(Role::User, "Plan the release");
//! assert!(task.source.is_empty());
//!
//! let reply = ChatMessage::from_participant("planner", "Step 1: freeze the branch")
//!     .with_metadata("round", "1");
//! assert_eq!(reply.source, "planner");
//! assert_eq!(reply.metadata["round"], "1");
//! ```

use crate::client_wrapper::{Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A request, embedded in a message, to execute a named function.
///
/// When the most recent message carries a `FunctionCall`, flat speaker selection
/// narrows the candidates to participants that declare the function (see
/// [`Participant::functions`](crate::participant::Participant::functions)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function to execute.
    pub name: String,
    /// Raw JSON arguments for the function.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// A single message in a group conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// UTC timestamp recorded when the message was created.
    pub timestamp: DateTime<Utc>,

    /// Name of the participant that produced the message. Empty for messages
    /// that originate outside the roster (e.g. the initial task) until the
    /// group chat tags them.
    #[serde(default)]
    pub source: String,

    /// Conversation role.
    pub role: Role,

    /// The message body. Stored as `Arc<str>` so cloning messages is cheap.
    pub content: Arc<str>,

    /// Function-call request carried by the message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,

    /// Function name for [`Role::Function`] results. A function message keeps
    /// this identity when the group chat tags it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Free-form key-value metadata.
    ///
    /// The group chat populates `"round"` with the round the message was
    /// appended in.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ChatMessage {
    /// Create a message with the given role and content and no source.
    pub fn new(role: Role, content: impl AsRef<str>) -> Self {
        Self {
            timestamp: Utc::now(),
            source: String::new(),
            role,
            content: Arc::from(content.as_ref()),
            function_call: None,
            name: None,
            metadata: HashMap::new(),
        }
    }

    /// Create an assistant-role message attributed to a participant.
    pub fn from_participant(source: impl Into<String>, content: impl AsRef<str>) -> Self {
        let mut message = Self::new(Role::Assistant, content);
        message.source = source.into();
        message
    }

    /// Create a user-role message attributed to `source`.
    pub fn user(source: impl Into<String>, content: impl AsRef<str>) -> Self {
        let mut message = Self::new(Role::User, content);
        message.source = source.into();
        message
    }

    /// Create a function-result message identified by the function's name.
    pub fn function_result(function_name: impl Into<String>, content: impl AsRef<str>) -> Self {
        let mut message = Self::new(Role::Function, content);
        message.name = Some(function_name.into());
        message
    }

    /// Attach a function-call request (builder pattern).
    pub fn with_function_call(
        mut self,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        self.function_call = Some(FunctionCall {
            name: name.into(),
            arguments,
        });
        self
    }

    /// Attach a key-value metadata pair (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether this is a function-result message.
    pub fn is_function_result(&self) -> bool {
        self.role == Role::Function
    }

    /// Render the message for a model call made on behalf of `viewer`.
    ///
    /// The viewer's own messages stay assistant turns; everything else is
    /// prefixed with its speaker as `[name]: content`.
    pub fn to_client_message(&self, viewer: &str) -> Message {
        if self.source == viewer && self.role == Role::Assistant {
            return Message::new(Role::Assistant, &*self.content);
        }
        let speaker = self
            .name
            .as_deref()
            .filter(|_| self.is_function_result())
            .unwrap_or(self.source.as_str());
        if speaker.is_empty() {
            Message::new(Role::User, &*self.content)
        } else {
            Message::new(Role::User, format!("[{}]: {}", speaker, self.content))
        }
    }
}
