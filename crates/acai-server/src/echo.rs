use acai_core::{Conversation, ConversationModel, Error, Result, Stage};

const TITLE_WORDS: usize = 6;

/// Offline [`ConversationModel`] that derives both outputs from the latest
/// user message.
///
/// Lets the server run locally without a remote model. The title is the first
/// few words of the message and the reply echoes it back.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoModel;

impl ConversationModel for EchoModel {
    async fn title(&self, conversation: &Conversation) -> Result<String> {
        let message = latest(conversation, Stage::Title)?;
        Ok(message
            .split_whitespace()
            .take(TITLE_WORDS)
            .collect::<Vec<_>>()
            .join(" "))
    }

    async fn reply(&self, conversation: &Conversation) -> Result<String> {
        let message = latest(conversation, Stage::Reply)?;
        Ok(format!("You said: {message}"))
    }
}

fn latest(conversation: &Conversation, stage: Stage) -> Result<&str> {
    conversation
        .last_user_message()
        .ok_or_else(|| Error::generation(stage, "conversation has no user message"))
}
