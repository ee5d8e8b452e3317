use crate::{Conversation, Result};

/// Remote generation collaborator used by the [`Orchestrator`](crate::Orchestrator).
///
/// Both operations receive the same read-only conversation snapshot and may
/// run concurrently on different tasks, so implementations must be
/// `Send + Sync`. Timeouts and retries belong here, not in the orchestrator.
pub trait ConversationModel: Send + Sync + 'static {
    /// Produces a short title summarising the conversation.
    ///
    /// # Errors
    ///
    /// Any error is non-fatal to the caller: the orchestrator substitutes
    /// [`FALLBACK_TITLE`](crate::FALLBACK_TITLE).
    fn title(&self, conversation: &Conversation) -> impl Future<Output = Result<String>> + Send;

    /// Produces the assistant's reply to the latest user message.
    ///
    /// # Errors
    ///
    /// Any error fails the whole orchestration.
    fn reply(&self, conversation: &Conversation) -> impl Future<Output = Result<String>> + Send;
}
