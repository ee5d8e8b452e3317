#![doc = include_str!("../README.md")]

mod conversation;
mod error;
mod model;
mod orchestrator;

pub use conversation::{Conversation, FALLBACK_TITLE, Message, Role};
pub use error::{Error, Result, Stage};
pub use model::ConversationModel;
pub use orchestrator::Orchestrator;
