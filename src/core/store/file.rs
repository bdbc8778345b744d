use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ensure_owner, DocumentStore, StoreError};
use crate::core::conversation::{Conversation, Visibility};
use crate::core::ids::{ActorId, ConversationId, MessageId};
use crate::core::message::Message;
use crate::utils::time::now_millis;

/// On-disk form: one JSON document per conversation.
#[derive(Debug, Serialize, Deserialize)]
struct ConversationDocument {
    conversation: Conversation,
    #[serde(default)]
    messages: Vec<Message>,
}

/// Store that keeps each conversation in `<root>/<id>.json`.
///
/// Every mutation rewrites the whole document through a temp file and an
/// atomic rename, so a crash leaves either the old or the new document.
/// File I/O goes through `tokio::fs`; the temp-file write runs on the
/// blocking pool.
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, id: &ConversationId) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(id.as_str())))
    }

    async fn read_document(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationDocument>, StoreError> {
        read_document_at(&self.document_path(id)).await
    }

    async fn require_document(
        &self,
        id: &ConversationId,
    ) -> Result<ConversationDocument, StoreError> {
        self.read_document(id)
            .await?
            .ok_or_else(|| StoreError::ConversationNotFound(id.clone()))
    }

    async fn write_document(&self, document: &ConversationDocument) -> Result<(), StoreError> {
        let path = self.document_path(&document.conversation.id);
        let json = serde_json::to_vec_pretty(document)?;
        let root = self.root.clone();
        let target = path.clone();

        let written = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = NamedTempFile::new_in(&root)?;
            temp.write_all(&json)?;
            temp.flush()?;
            temp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)
        .and_then(|result| result);

        written.map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "conversation document written");
        Ok(())
    }

    async fn remove_document(&self, id: &ConversationId) -> Result<(), StoreError> {
        let path = self.document_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    async fn all_documents(&self) -> Result<Vec<ConversationDocument>, StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.root.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(io_err)?;

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_document_at(&path).await {
                Ok(Some(document)) => documents.push(document),
                Ok(None) => {}
                Err(StoreError::Serialization(e)) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable conversation document");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(documents)
    }

    async fn list_matching(
        &self,
        keep: impl Fn(&Conversation) -> bool,
    ) -> Result<Vec<Conversation>, StoreError> {
        Ok(self
            .all_documents()
            .await?
            .into_iter()
            .map(|d| d.conversation)
            .filter(|c| keep(c))
            .collect())
    }
}

async fn read_document_at(path: &Path) -> Result<Option<ConversationDocument>, StoreError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Map an id onto a safe file stem. Bytes outside `[A-Za-z0-9_-]` are
/// written as `%XX` so distinct ids never share a file.
fn file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn create_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, StoreError> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.read_document(&conversation.id).await? {
            return Ok(existing.conversation);
        }
        let document = ConversationDocument {
            conversation,
            messages: Vec::new(),
        };
        self.write_document(&document).await?;
        Ok(document.conversation)
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self.read_document(id).await?.map(|d| d.conversation))
    }

    async fn list_conversations(&self, owner: &ActorId) -> Result<Vec<Conversation>, StoreError> {
        let mut owned = self.list_matching(|c| c.is_owned_by(owner)).await?;
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn list_public_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let mut public = self.list_matching(Conversation::is_public).await?;
        public.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(public)
    }

    async fn list_branches(
        &self,
        parent: &ConversationId,
    ) -> Result<Vec<Conversation>, StoreError> {
        let mut branches = self
            .list_matching(|c| c.parent_conversation_id() == Some(parent))
            .await?;
        branches.sort_by_key(|c| c.created_at);
        Ok(branches)
    }

    async fn append_message(&self, message: Message) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.require_document(&message.conversation_id).await?;
        document.conversation.updated_at = document.conversation.updated_at.max(message.created_at);
        match document.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => document.messages.push(message),
        }
        self.write_document(&document).await
    }

    async fn update_message_content(
        &self,
        id: &MessageId,
        content: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        for mut document in self.all_documents().await? {
            if let Some(message) = document.messages.iter_mut().find(|m| &m.id == id) {
                message.content = content.to_string();
                return self.write_document(&document).await;
            }
        }
        Err(StoreError::MessageNotFound(id.clone()))
    }

    async fn remove_messages(
        &self,
        conversation: &ConversationId,
        ids: &[MessageId],
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut document) = self.read_document(conversation).await? else {
            return Ok(());
        };
        let before = document.messages.len();
        document.messages.retain(|m| !ids.contains(&m.id));
        if document.messages.len() == before {
            return Ok(());
        }
        self.write_document(&document).await
    }

    async fn list_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        let mut messages = self
            .read_document(conversation)
            .await?
            .map(|d| d.messages)
            .unwrap_or_default();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn create_branch_conversation(
        &self,
        conversation: Conversation,
        messages: Vec<Message>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.read_document(&conversation.id).await?.is_some() {
            return Err(StoreError::Conflict(conversation.id.to_string()));
        }
        self.write_document(&ConversationDocument {
            conversation,
            messages,
        })
        .await
    }

    async fn update_title(&self, id: &ConversationId, title: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.require_document(id).await?;
        document.conversation.title = title.to_string();
        document.conversation.updated_at = now_millis();
        self.write_document(&document).await
    }

    async fn set_pinned(
        &self,
        id: &ConversationId,
        actor: &ActorId,
        pinned: bool,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.require_document(id).await?;
        ensure_owner(&document.conversation, actor)?;
        document.conversation.pinned = pinned;
        self.write_document(&document).await
    }

    async fn set_visibility(
        &self,
        id: &ConversationId,
        actor: &ActorId,
        visibility: Visibility,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.require_document(id).await?;
        ensure_owner(&document.conversation, actor)?;
        document.conversation.visibility = visibility;
        self.write_document(&document).await
    }

    async fn delete_conversation(
        &self,
        id: &ConversationId,
        actor: &ActorId,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let document = self.require_document(id).await?;
        ensure_owner(&document.conversation, actor)?;
        self.remove_document(id).await
    }
}
