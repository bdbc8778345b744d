//! Model-generated conversation titles.
//!
//! The first message of a new conversation is sent to the completion route
//! with `isTitle` set; the server answers with a short title. Any failure
//! leaves the word-based fallback title in place.

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::api::{CompletionRequest, CompletionResponse};
use crate::core::chat_stream::format_api_error;
use crate::core::ids::ConversationId;
use crate::core::session::SessionContext;

/// Upper bound on one title request.
pub const TITLE_TIMEOUT: Duration = Duration::from_secs(50);

const MAX_TITLE_CHARS: usize = 80;

#[derive(Debug)]
pub enum TitleError {
    Request(reqwest::Error),
    Status { status: u16, body: String },
    /// The route answered with an `error` field.
    Rejected(String),
    Empty,
}

impl fmt::Display for TitleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TitleError::Request(e) => f.write_str(&format_api_error(None, &e.to_string())),
            TitleError::Status { status, body } => {
                f.write_str(&format_api_error(Some(*status), body))
            }
            TitleError::Rejected(reason) => write!(f, "Title generation failed: {reason}"),
            TitleError::Empty => write!(f, "Title generation returned no text"),
        }
    }
}

impl std::error::Error for TitleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TitleError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TitleError {
    fn from(value: reqwest::Error) -> Self {
        TitleError::Request(value)
    }
}

/// One title request, detached from the session so it can run on its own
/// task.
pub struct TitleRequest {
    client: reqwest::Client,
    endpoint: String,
    api_key: (String, String),
    body: CompletionRequest,
}

impl TitleRequest {
    /// Returns `None` when no provider key is configured; titles are only
    /// requested with a key.
    pub fn new(
        session: &SessionContext,
        conversation: &ConversationId,
        first_message: &str,
    ) -> Option<Self> {
        let prompt = first_message.trim();
        if prompt.is_empty() {
            return None;
        }
        let api_key = session.api_key_header()?;
        Some(Self {
            client: session.client.clone(),
            endpoint: session.completion_endpoint.clone(),
            api_key,
            body: CompletionRequest {
                prompt: prompt.to_string(),
                model: session.model.id.clone(),
                thread_id: Some(conversation.to_string()),
                is_title: true,
            },
        })
    }

    pub async fn send(self) -> Result<String, TitleError> {
        let (header, key) = &self.api_key;
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(TITLE_TIMEOUT)
            .header(header.as_str(), key.as_str())
            .json(&self.body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(TitleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: CompletionResponse = response.json().await?;
        if let Some(error) = reply.error {
            return Err(TitleError::Rejected(error));
        }
        let title = reply
            .text
            .as_deref()
            .and_then(clean_title)
            .ok_or(TitleError::Empty)?;
        debug!(%title, "title generated");
        Ok(title)
    }
}

/// Tidy a model answer into a one-line title: first non-blank line, outer
/// quotes removed, whitespace collapsed.
pub fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let unquoted = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”'))
        .trim();
    let title = unquoted.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        return None;
    }
    Some(title.chars().take(MAX_TITLE_CHARS).collect())
}
