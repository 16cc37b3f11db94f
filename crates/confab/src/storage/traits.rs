//! Storage trait the broker core depends on.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{ConversationSnapshot, MessagePatch, MessageRole, MessageStatus, StoredMessage};

/// Persistence boundary for conversations and their messages.
///
/// The core only reads through [`get_conversation`](ConversationStore::get_conversation);
/// all writes happen in the request layer after an exchange settles.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch the recorded model and full message history for a conversation.
    ///
    /// Returns `None` when nothing has ever been persisted under the id.
    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<ConversationSnapshot>>;

    /// Append a message to a conversation, creating the conversation row on
    /// first write.
    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        status: MessageStatus,
    ) -> Result<StoredMessage>;

    /// Apply a partial update to a persisted message.
    async fn update_message(&self, message_id: &str, patch: MessagePatch) -> Result<()>;

    /// Record the model a conversation is now using.
    async fn set_conversation_model(&self, conversation_id: &str, model: &str) -> Result<()>;
}
