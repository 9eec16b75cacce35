use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

/// A ClientWrapper is a wrapper around a specific language-model service.
/// It provides the one call the group chat needs from a model: turn a list of
/// messages into a reply. It does not keep track of the conversation; model-backed
/// participants and the `auto` speaker selector own their own context and use a
/// ClientWrapper to talk to the model.
// src/groupflow/client_wrapper

/// Represents the possible roles for a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    // set by the developer to steer the model's responses
    System,
    // a message sent by a human user (or app user)
    User,
    // content generated by a participant
    Assistant,
    // the result of executing a function/tool call
    Function,
}

impl Role {
    /// Lower-case wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
        }
    }
}

/// Represents a generic message to be sent to a language model.
#[derive(Clone, Debug)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: Arc<str>,
}

impl Message {
    pub fn new(role: Role, content: impl AsRef<str>) -> Self {
        Self {
            role,
            content: Arc::from(content.as_ref()),
        }
    }
}

/// Trait defining the interface to a language-model service.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send the messages to the model and get its reply.
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Name of the model behind this client, used in log lines.
    fn model_name(&self) -> &str;
}
