//! Payloads sent to the upstream streaming endpoint.

use serde::{Deserialize, Serialize};

use crate::core::message::{AuthorRole, Message};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ApiMessage>,
    pub model: String,
}

/// Body of a one-shot completion, used to name a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub is_title: bool,
}

/// Completion route reply: the generated text, or an error message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: AuthorRole,
    pub content: ApiContent,
}

/// Plain text, or a part array for multimodal turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ApiMessage {
    /// Convert a transcript message into its request form.
    ///
    /// Returns `None` for messages that carry nothing to send (empty text
    /// and no attachments), which providers reject.
    pub fn from_message(message: &Message) -> Option<Self> {
        let has_text = !message.content.trim().is_empty();

        if message.attachments.is_empty() {
            if !has_text {
                return None;
            }
            return Some(Self {
                role: message.role,
                content: ApiContent::Text(message.content.clone()),
            });
        }

        let mut parts = Vec::with_capacity(message.attachments.len() + 1);
        if has_text {
            parts.push(ContentPart::Text {
                text: message.content.clone(),
            });
        }
        for attachment in &message.attachments {
            if attachment.is_image() && message.role.is_user() {
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: attachment.url.clone(),
                    },
                });
            } else {
                parts.push(ContentPart::Text {
                    text: format!(
                        "[Attachment: {} ({})]({})",
                        attachment.name, attachment.content_type, attachment.url
                    ),
                });
            }
        }

        Some(Self {
            role: message.role,
            content: ApiContent::Parts(parts),
        })
    }
}

/// Build the ordered request history from transcript messages.
pub fn build_api_messages<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Vec<ApiMessage> {
    messages
        .into_iter()
        .filter_map(ApiMessage::from_message)
        .collect()
}
