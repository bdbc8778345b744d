//! Persistence collaborator.
//!
//! The engine writes to the store only at checkpoints: after a user send is
//! accepted, after an assistant message finalizes, after an edit or
//! regenerate truncates the transcript, and for the whole branch copy.

pub mod file;
pub mod memory;

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::core::conversation::{Conversation, Visibility};
use crate::core::ids::{ActorId, ConversationId, MessageId};
use crate::core::message::Message;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug)]
pub enum StoreError {
    ConversationNotFound(ConversationId),
    MessageNotFound(MessageId),
    /// The actor does not own the conversation it tried to modify.
    Unauthorized {
        conversation: ConversationId,
        actor: ActorId,
    },
    /// A record with this id already exists where a fresh one was required.
    Conflict(String),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialization(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConversationNotFound(id) => write!(f, "Conversation not found: {id}"),
            StoreError::MessageNotFound(id) => write!(f, "Message not found: {id}"),
            StoreError::Unauthorized {
                conversation,
                actor,
            } => write!(
                f,
                "Actor {actor} is not allowed to modify conversation {conversation}"
            ),
            StoreError::Conflict(what) => write!(f, "Already exists: {what}"),
            StoreError::Io { path, source } => {
                write!(f, "Store I/O error at {}: {}", path.display(), source)
            }
            StoreError::Serialization(e) => write!(f, "Store serialization error: {e}"),
        }
    }
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Serialization(value)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the conversation, or return the stored one if the id exists.
    async fn create_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, StoreError>;

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Conversations owned by `owner`, newest first.
    async fn list_conversations(&self, owner: &ActorId) -> Result<Vec<Conversation>, StoreError>;

    /// Public conversations of every owner, newest first.
    async fn list_public_conversations(&self) -> Result<Vec<Conversation>, StoreError>;

    /// Direct branches of `parent`, oldest first.
    async fn list_branches(&self, parent: &ConversationId)
        -> Result<Vec<Conversation>, StoreError>;

    async fn append_message(&self, message: Message) -> Result<(), StoreError>;

    async fn update_message_content(
        &self,
        id: &MessageId,
        content: &str,
    ) -> Result<(), StoreError>;

    async fn remove_messages(
        &self,
        conversation: &ConversationId,
        ids: &[MessageId],
    ) -> Result<(), StoreError>;

    /// Messages of a conversation ordered by `created_at`.
    async fn list_messages(&self, conversation: &ConversationId)
        -> Result<Vec<Message>, StoreError>;

    /// Insert a branch conversation together with its copied messages.
    async fn create_branch_conversation(
        &self,
        conversation: Conversation,
        messages: Vec<Message>,
    ) -> Result<(), StoreError>;

    async fn update_title(&self, id: &ConversationId, title: &str) -> Result<(), StoreError>;

    async fn set_pinned(
        &self,
        id: &ConversationId,
        actor: &ActorId,
        pinned: bool,
    ) -> Result<(), StoreError>;

    async fn set_visibility(
        &self,
        id: &ConversationId,
        actor: &ActorId,
        visibility: Visibility,
    ) -> Result<(), StoreError>;

    /// Delete a conversation and all of its messages.
    async fn delete_conversation(
        &self,
        id: &ConversationId,
        actor: &ActorId,
    ) -> Result<(), StoreError>;
}

pub(crate) fn ensure_owner(conversation: &Conversation, actor: &ActorId) -> Result<(), StoreError> {
    if conversation.is_owned_by(actor) {
        Ok(())
    } else {
        Err(StoreError::Unauthorized {
            conversation: conversation.id.clone(),
            actor: actor.clone(),
        })
    }
}
