//! Concurrent title/reply generation for a new conversation.
//!
//! [`Orchestrator::orchestrate`] spawns the title and reply sub-operations as
//! independent Tokio tasks, waits for *both* to finish, and only then looks at
//! either result. The asymmetric policy is applied after the join:
//!
//! - Title: an error, a blank string, or a panicked task all resolve to
//!   [`FALLBACK_TITLE`]. Never surfaced to the caller.
//! - Reply: an error or a panicked task fails the orchestration. No fallback.
//!
//! Neither task is cancelled when the other fails. Dropping the returned future
//! detaches both tasks, which then run to completion on the runtime.

use crate::{Conversation, ConversationModel, Error, FALLBACK_TITLE, Message, Result, Stage};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

/// Runs title and reply generation concurrently against a shared model.
pub struct Orchestrator<M> {
    model: Arc<M>,
}

impl<M> Clone for Orchestrator<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
        }
    }
}

impl<M: ConversationModel> Orchestrator<M> {
    pub fn new(model: M) -> Self {
        Self::from_shared(Arc::new(model))
    }

    /// Builds an orchestrator around a model that is already shared elsewhere.
    pub const fn from_shared(model: Arc<M>) -> Self {
        Self { model }
    }

    /// Generates the title and first reply for `conversation`.
    ///
    /// The conversation is only mutated here, after both sub-operations have
    /// delivered: the title is replaced and the reply is appended as an
    /// assistant message.
    ///
    /// # Errors
    ///
    /// Returns the reply's error ([`Error::Generation`] or
    /// [`Error::TaskFailed`]) if reply generation fails, regardless of how the
    /// title turned out.
    #[tracing::instrument(skip_all, fields(conversation_id = %conversation.id))]
    pub async fn orchestrate(&self, conversation: Conversation) -> Result<Conversation> {
        let snapshot = Arc::new(conversation);

        let title_task = self.spawn(Stage::Title, &snapshot, |model, conv| async move {
            model.title(&conv).await
        });
        let reply_task = self.spawn(Stage::Reply, &snapshot, |model, conv| async move {
            model.reply(&conv).await
        });

        // Rendezvous: both slots must be filled before either is inspected.
        let (title, reply) = tokio::join!(title_task, reply_task);

        let reply = resolve_reply(reply)?;
        let title = resolve_title(title);

        let mut conversation = Arc::unwrap_or_clone(snapshot);
        conversation.title = Some(title);
        conversation.messages.push(Message::assistant(reply));
        Ok(conversation)
    }

    fn spawn<F, Fut>(
        &self,
        stage: Stage,
        snapshot: &Arc<Conversation>,
        op: F,
    ) -> JoinHandle<Result<String>>
    where
        F: FnOnce(Arc<M>, Arc<Conversation>) -> Fut,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let fut = op(Arc::clone(&self.model), Arc::clone(snapshot));
        let span = tracing::info_span!("generate", %stage);
        tokio::spawn(fut.instrument(span))
    }
}

fn resolve_title(outcome: core::result::Result<Result<String>, JoinError>) -> String {
    match outcome {
        Ok(Ok(title)) if !title.trim().is_empty() => title,
        Ok(Ok(_)) => {
            tracing::warn!("Title generation returned a blank title, using fallback");
            FALLBACK_TITLE.to_string()
        }
        Ok(Err(e)) => {
            tracing::warn!("Title generation failed, using fallback: {e}");
            FALLBACK_TITLE.to_string()
        }
        Err(e) => {
            tracing::warn!("Title task did not complete, using fallback: {e}");
            FALLBACK_TITLE.to_string()
        }
    }
}

fn resolve_reply(outcome: core::result::Result<Result<String>, JoinError>) -> Result<String> {
    match outcome {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => {
            tracing::error!("Reply generation failed: {e}");
            Err(e)
        }
        Err(e) => {
            tracing::error!("Reply task did not complete: {e}");
            Err(Error::TaskFailed {
                stage: Stage::Reply,
                reason: e.to_string(),
            })
        }
    }
}
