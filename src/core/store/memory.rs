use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ensure_owner, DocumentStore, StoreError};
use crate::core::conversation::{Conversation, Visibility};
use crate::core::ids::{ActorId, ConversationId, MessageId};
use crate::core::message::Message;
use crate::utils::time::now_millis;

#[derive(Default)]
struct Tables {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
}

impl Tables {
    fn conversation_mut(&mut self, id: &ConversationId) -> Result<&mut Conversation, StoreError> {
        self.conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::ConversationNotFound(id.clone()))
    }
}

/// Process-local store used by tests and one-shot CLI runs.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.conversations.get(&conversation.id) {
            return Ok(existing.clone());
        }
        tables
            .messages
            .entry(conversation.id.clone())
            .or_default();
        tables
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self.tables.read().await.conversations.get(id).cloned())
    }

    async fn list_conversations(&self, owner: &ActorId) -> Result<Vec<Conversation>, StoreError> {
        let tables = self.tables.read().await;
        let mut owned: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| c.is_owned_by(owner))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn list_public_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let tables = self.tables.read().await;
        let mut public: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| c.is_public())
            .cloned()
            .collect();
        public.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(public)
    }

    async fn list_branches(
        &self,
        parent: &ConversationId,
    ) -> Result<Vec<Conversation>, StoreError> {
        let tables = self.tables.read().await;
        let mut branches: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| c.parent_conversation_id() == Some(parent))
            .cloned()
            .collect();
        branches.sort_by_key(|c| c.created_at);
        Ok(branches)
    }

    async fn append_message(&self, message: Message) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let conversation = tables.conversation_mut(&message.conversation_id)?;
        conversation.updated_at = conversation.updated_at.max(message.created_at);
        let list = tables
            .messages
            .entry(message.conversation_id.clone())
            .or_default();
        match list.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => list.push(message),
        }
        Ok(())
    }

    async fn update_message_content(
        &self,
        id: &MessageId,
        content: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let message = tables
            .messages
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|m| &m.id == id)
            .ok_or_else(|| StoreError::MessageNotFound(id.clone()))?;
        message.content = content.to_string();
        Ok(())
    }

    async fn remove_messages(
        &self,
        conversation: &ConversationId,
        ids: &[MessageId],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(list) = tables.messages.get_mut(conversation) {
            list.retain(|m| !ids.contains(&m.id));
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        let mut messages = tables
            .messages
            .get(conversation)
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn create_branch_conversation(
        &self,
        conversation: Conversation,
        messages: Vec<Message>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.conversations.contains_key(&conversation.id) {
            return Err(StoreError::Conflict(conversation.id.to_string()));
        }
        tables
            .messages
            .insert(conversation.id.clone(), messages);
        tables
            .conversations
            .insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn update_title(&self, id: &ConversationId, title: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let conversation = tables.conversation_mut(id)?;
        conversation.title = title.to_string();
        conversation.updated_at = now_millis();
        Ok(())
    }

    async fn set_pinned(
        &self,
        id: &ConversationId,
        actor: &ActorId,
        pinned: bool,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let conversation = tables.conversation_mut(id)?;
        ensure_owner(conversation, actor)?;
        conversation.pinned = pinned;
        Ok(())
    }

    async fn set_visibility(
        &self,
        id: &ConversationId,
        actor: &ActorId,
        visibility: Visibility,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let conversation = tables.conversation_mut(id)?;
        ensure_owner(conversation, actor)?;
        conversation.visibility = visibility;
        Ok(())
    }

    async fn delete_conversation(
        &self,
        id: &ConversationId,
        actor: &ActorId,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let conversation = tables.conversation_mut(id)?;
        ensure_owner(conversation, actor)?;
        tables.conversations.remove(id);
        tables.messages.remove(id);
        Ok(())
    }
}
