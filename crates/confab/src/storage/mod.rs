//! Conversation storage collaborator.
//!
//! The broker core never owns persisted records: it borrows history snapshots
//! when reconstructing upstream context, and the API layer writes completed
//! or errored exchanges back through the [`ConversationStore`] trait.

mod models;
mod sqlite;
mod traits;

pub use models::{
    ConversationSnapshot, HistoryMessage, MessagePatch, MessageRole, MessageStatus, StoredMessage,
};
pub use sqlite::SqliteConversationStore;
pub use traits::ConversationStore;
