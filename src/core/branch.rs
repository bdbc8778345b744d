//! Branch derivation: seed a new conversation from a transcript prefix.
//!
//! The copy reads the source transcript once and writes the branch in a
//! single store call. Edits landing on the source between those two steps
//! are not reflected in the branch.

use std::fmt;

use tracing::info;

use crate::core::conversation::{BranchOrigin, Conversation, Visibility};
use crate::core::ids::{ActorId, ConversationId, MessageId};
use crate::core::message::Message;
use crate::core::store::{DocumentStore, StoreError};
use crate::utils::time::now_millis;

#[derive(Debug)]
pub enum BranchError {
    SourceNotFound(ConversationId),
    /// The cut message is not part of the source transcript.
    BranchIntegrity {
        conversation: ConversationId,
        message: MessageId,
    },
    Store(StoreError),
}

impl fmt::Display for BranchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchError::SourceNotFound(id) => write!(f, "Conversation not found: {id}"),
            BranchError::BranchIntegrity {
                conversation,
                message,
            } => write!(
                f,
                "Message {message} is not part of conversation {conversation}"
            ),
            BranchError::Store(e) => write!(f, "Branch store error: {e}"),
        }
    }
}

impl std::error::Error for BranchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BranchError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BranchError {
    fn from(value: StoreError) -> Self {
        BranchError::Store(value)
    }
}

/// Create a branch of `source` holding every message up to and including
/// `cut`.
///
/// The branch is owned by `actor`, keeps the source title and is always
/// private. Copied messages
/// get ids of the form `<original>-branch-<new conversation>` and keep
/// their `created_at`.
pub async fn derive_branch(
    store: &dyn DocumentStore,
    actor: &ActorId,
    source: &ConversationId,
    cut: &MessageId,
) -> Result<Conversation, BranchError> {
    let parent = store
        .get_conversation(source)
        .await?
        .ok_or_else(|| BranchError::SourceNotFound(source.clone()))?;
    let messages = store.list_messages(source).await?;

    let cut_at = messages
        .iter()
        .find(|m| &m.id == cut)
        .map(|m| m.created_at)
        .ok_or_else(|| BranchError::BranchIntegrity {
            conversation: source.clone(),
            message: cut.clone(),
        })?;

    let now = now_millis();
    let branch_id = ConversationId::generate();
    let branch = Conversation {
        id: branch_id.clone(),
        owner_id: actor.clone(),
        title: parent.title.clone(),
        visibility: Visibility::Private,
        pinned: false,
        branch: Some(BranchOrigin {
            parent_conversation_id: parent.id.clone(),
            branch_point_message_id: cut.clone(),
        }),
        branch_depth: parent.branch_depth + 1,
        created_at: now,
        updated_at: now,
    };

    let copied: Vec<Message> = messages
        .into_iter()
        .filter(|m| m.created_at <= cut_at)
        .map(|m| Message {
            id: m.id.branch_copy(&branch_id),
            conversation_id: branch_id.clone(),
            ..m
        })
        .collect();

    let copied_count = copied.len();
    store
        .create_branch_conversation(branch.clone(), copied)
        .await?;
    info!(
        source = %source,
        branch = %branch_id,
        messages = copied_count,
        depth = branch.branch_depth,
        "branch created"
    );
    Ok(branch)
}

/// Where a conversation sits in its branch tree.
#[derive(Debug, Clone)]
pub struct BranchInfo {
    pub conversation: Conversation,
    pub parent: Option<Conversation>,
    pub branches: Vec<Conversation>,
}

impl BranchInfo {
    pub fn depth(&self) -> u32 {
        self.conversation.branch_depth
    }
}

pub async fn branch_info(
    store: &dyn DocumentStore,
    id: &ConversationId,
) -> Result<BranchInfo, BranchError> {
    let conversation = store
        .get_conversation(id)
        .await?
        .ok_or_else(|| BranchError::SourceNotFound(id.clone()))?;
    let parent = match conversation.parent_conversation_id() {
        Some(parent_id) => store.get_conversation(parent_id).await?,
        None => None,
    };
    let branches = store.list_branches(id).await?;
    Ok(BranchInfo {
        conversation,
        parent,
        branches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;
    use crate::utils::test_utils::{seeded_store, test_conversation, test_message};

    #[tokio::test]
    async fn cut_at_first_message_copies_only_that_message() {
        let store = MemoryStore::new();
        let source = store
            .create_conversation(test_conversation("src", "alice", 0))
            .await
            .unwrap();
        store
            .append_message(test_message("src", "q", "user", "hi", 1))
            .await
            .unwrap();
        store
            .append_message(test_message("src", "a", "assistant", "hello", 2))
            .await
            .unwrap();

        let branch = derive_branch(&store, &ActorId::from("alice"), &source.id, &MessageId::from("q"))
            .await
            .unwrap();
        assert_eq!(branch.branch_depth, 1);
        assert_eq!(branch.parent_conversation_id(), Some(&source.id));
        assert_eq!(branch.branch_point_message_id(), Some(&MessageId::from("q")));
        assert_eq!(branch.owner_id, ActorId::from("alice"));

        let copied = store.list_messages(&branch.id).await.unwrap();
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].content, "hi");
        assert_eq!(copied[0].id.as_str(), format!("q-branch-{}", branch.id));
        assert_eq!(copied[0].conversation_id, branch.id);
    }

    #[tokio::test]
    async fn cut_at_index_k_copies_k_plus_one_messages() {
        let store = seeded_store("src", "alice").await;
        let source = store.list_messages(&ConversationId::from("src")).await.unwrap();

        for (k, cut) in source.iter().enumerate() {
            let branch = derive_branch(
                &*store,
                &ActorId::from("bob"),
                &ConversationId::from("src"),
                &cut.id,
            )
            .await
            .unwrap();
            let copied = store.list_messages(&branch.id).await.unwrap();
            assert_eq!(copied.len(), k + 1);
            let expected: Vec<i64> = source[..=k].iter().map(|m| m.created_at).collect();
            let actual: Vec<i64> = copied.iter().map(|m| m.created_at).collect();
            assert_eq!(actual, expected);
            assert_eq!(branch.branch_depth, 1);
            assert_eq!(branch.owner_id, ActorId::from("bob"));
        }
    }

    #[tokio::test]
    async fn missing_cut_creates_nothing() {
        let store = seeded_store("src", "alice").await;
        let err = derive_branch(
            &*store,
            &ActorId::from("alice"),
            &ConversationId::from("src"),
            &MessageId::from("ghost"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BranchError::BranchIntegrity { .. }));
        assert_eq!(
            store
                .list_conversations(&ActorId::from("alice"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn missing_source_is_reported() {
        let store = MemoryStore::new();
        let err = derive_branch(
            &store,
            &ActorId::from("alice"),
            &ConversationId::from("nope"),
            &MessageId::from("m"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BranchError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn nested_branches_are_private_and_deeper() {
        let store = seeded_store("src", "alice").await;
        store
            .set_visibility(
                &ConversationId::from("src"),
                &ActorId::from("alice"),
                Visibility::Public,
            )
            .await
            .unwrap();

        let first = derive_branch(
            &*store,
            &ActorId::from("bob"),
            &ConversationId::from("src"),
            &MessageId::from("m4"),
        )
        .await
        .unwrap();
        assert!(!first.is_public());

        let cut = MessageId::from("m2").branch_copy(&first.id);
        let second = derive_branch(&*store, &ActorId::from("bob"), &first.id, &cut)
            .await
            .unwrap();
        assert_eq!(second.branch_depth, 2);
        assert_eq!(store.list_messages(&second.id).await.unwrap().len(), 2);

        let info = branch_info(&*store, &first.id).await.unwrap();
        assert_eq!(info.depth(), 1);
        assert_eq!(info.parent.unwrap().id, ConversationId::from("src"));
        assert_eq!(info.branches.len(), 1);
        assert_eq!(info.branches[0].id, second.id);
    }
}
