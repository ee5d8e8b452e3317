use acai_core::{Conversation, ConversationModel, Error, Result, Stage};

/// Model whose behavior is steered by keywords in the user message.
///
/// - `no-title`: title generation fails.
/// - `no-reply`: reply generation fails.
pub struct KeywordModel;

impl ConversationModel for KeywordModel {
    async fn title(&self, conversation: &Conversation) -> Result<String> {
        let message = conversation.last_user_message().unwrap_or_default();
        if message.contains("no-title") {
            return Err(Error::generation(Stage::Title, "title model unavailable"));
        }
        Ok(format!("About {}", message.split_whitespace().next().unwrap_or("")))
    }

    async fn reply(&self, conversation: &Conversation) -> Result<String> {
        let message = conversation.last_user_message().unwrap_or_default();
        if message.contains("no-reply") {
            return Err(Error::generation(Stage::Reply, "secret upstream detail"));
        }
        Ok(format!("Reply to {message}"))
    }
}
