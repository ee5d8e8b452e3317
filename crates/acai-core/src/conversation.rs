use serde::{Deserialize, Serialize};

/// Title used whenever title generation fails or produces nothing usable.
pub const FALLBACK_TITLE: &str = "New Conversation";

/// Author of a [`Message`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single turn in a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A conversation as seen by the orchestration layer.
///
/// `title` stays `None` until the conversation has been through
/// [`Orchestrator::orchestrate`](crate::Orchestrator::orchestrate), which sets
/// it exactly once alongside the first assistant reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Starts a conversation from the user's opening message.
    pub fn new(id: impl Into<String>, first_message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            messages: vec![Message::user(first_message)],
        }
    }

    /// Content of the most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Content of the most recent assistant message, if any.
    pub fn last_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }
}
