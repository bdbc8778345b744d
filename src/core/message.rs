use serde::{Deserialize, Serialize};

use crate::core::ids::{ConversationId, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AuthorRole {
    User,
    Assistant,
    System,
}

impl AuthorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthorRole::User => "user",
            AuthorRole::Assistant => "assistant",
            AuthorRole::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == AuthorRole::User
    }

    pub fn is_assistant(self) -> bool {
        self == AuthorRole::Assistant
    }
}

impl AsRef<str> for AuthorRole {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for AuthorRole {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(AuthorRole::User),
            "assistant" => Ok(AuthorRole::Assistant),
            "system" => Ok(AuthorRole::System),
            _ => Err(format!("invalid author role: {value}")),
        }
    }
}

impl TryFrom<String> for AuthorRole {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<AuthorRole> for String {
    fn from(value: AuthorRole) -> Self {
        value.as_str().to_string()
    }
}

/// Lifecycle of a message's content.
///
/// Only `Complete` counts as final for cross-tab merging. `Error` marks an
/// assistant message whose stream failed or was aborted; its partial
/// content is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Streaming,
    #[default]
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

impl Attachment {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            content_type: content_type.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: AuthorRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Milliseconds since the Unix epoch; strictly increasing per conversation.
    pub created_at: i64,
    #[serde(default)]
    pub status: MessageStatus,
}

impl Message {
    pub fn user(
        conversation_id: ConversationId,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
        created_at: i64,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            role: AuthorRole::User,
            content: content.into(),
            attachments,
            created_at,
            status: MessageStatus::Complete,
        }
    }

    pub fn assistant_placeholder(conversation_id: ConversationId, created_at: i64) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            role: AuthorRole::Assistant,
            content: String::new(),
            attachments: Vec::new(),
            created_at,
            status: MessageStatus::Streaming,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    pub fn is_final(&self) -> bool {
        self.status == MessageStatus::Complete
    }

    /// Copy of this message with new content and status.
    pub fn with_content(&self, content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            content: content.into(),
            status,
            ..self.clone()
        }
    }

    pub fn with_status(&self, status: MessageStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_role_strings_are_rejected() {
        assert!(AuthorRole::try_from("tool").is_err());
        assert_eq!(AuthorRole::try_from("system"), Ok(AuthorRole::System));
    }

    #[test]
    fn message_wire_shape_uses_camel_case() {
        let message = Message {
            id: MessageId::from("m1"),
            conversation_id: ConversationId::from("c1"),
            role: AuthorRole::User,
            content: "hi".into(),
            attachments: vec![Attachment::new("cat.png", "https://x/cat.png", "image/png")],
            created_at: 42,
            status: MessageStatus::Complete,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["conversationId"], "c1");
        assert_eq!(value["createdAt"], 42);
        assert_eq!(value["role"], "user");
        assert_eq!(value["attachments"][0]["type"], "image/png");
    }

    #[test]
    fn status_defaults_to_complete_for_stored_records() {
        let raw = r#"{"id":"m","conversationId":"c","role":"assistant","content":"x","createdAt":1}"#;
        let message: Message = serde_json::from_str(raw).unwrap();
        assert!(message.is_final());
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn with_content_keeps_identity_fields() {
        let placeholder = Message::assistant_placeholder(ConversationId::from("c"), 7);
        let filled = placeholder.with_content("Hello", MessageStatus::Complete);
        assert_eq!(filled.id, placeholder.id);
        assert_eq!(filled.created_at, 7);
        assert!(filled.is_final());
        assert!(!placeholder.is_final());
    }
}
