use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::core::config::Config;
use crate::core::ids::ActorId;
use crate::core::models::{find_model, ModelInfo};
use crate::core::store::DocumentStore;
use crate::core::sync_bus::SyncBus;
use crate::utils::url::{chat_endpoint, completion_endpoint};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    UnknownModel(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnknownModel(name) => write!(f, "Unknown model: {name}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Everything a conversation needs from its surroundings: transport,
/// model and credentials, identity, persistence and the sync bus.
///
/// Built once at startup and passed down explicitly.
pub struct SessionContext {
    pub client: Client,
    pub endpoint: String,
    /// One-shot completion route used for conversation titles.
    pub completion_endpoint: String,
    pub model: ModelInfo,
    pub api_key: Option<String>,
    pub actor: Option<ActorId>,
    pub store: Arc<dyn DocumentStore>,
    pub bus: SyncBus,
    pub sync_throttle: Duration,
}

/// Per-invocation overrides layered on top of [`Config`].
#[derive(Debug, Default, Clone)]
pub struct SessionOverrides {
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

impl SessionContext {
    pub fn from_config(
        config: &Config,
        overrides: &SessionOverrides,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, SessionError> {
        let model_name = overrides
            .model
            .as_deref()
            .unwrap_or_else(|| config.default_model());
        let model =
            find_model(model_name).ok_or_else(|| SessionError::UnknownModel(model_name.into()))?;
        let endpoint = overrides
            .endpoint
            .as_deref()
            .unwrap_or_else(|| config.endpoint());

        let endpoint = chat_endpoint(endpoint);

        Ok(Self {
            client: Client::new(),
            completion_endpoint: completion_endpoint(&endpoint),
            endpoint,
            api_key: model.api_key_from_env(),
            model,
            actor: config.actor(),
            store,
            bus: SyncBus::new(config.channel_prefix()),
            sync_throttle: config.sync_throttle(),
        })
    }

    /// Header name and value carrying the provider key, when one is set.
    pub fn api_key_header(&self) -> Option<(String, String)> {
        self.api_key
            .as_ref()
            .map(|key| (self.model.header.clone(), key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;

    #[test]
    fn overrides_take_precedence() {
        let config = Config {
            endpoint: Some("https://configured.example".into()),
            default_model: Some("gpt-4o".into()),
            actor_id: Some("alice".into()),
            ..Config::default()
        };
        let overrides = SessionOverrides {
            model: Some("claude-3-haiku".into()),
            endpoint: Some("http://localhost:8080".into()),
        };
        let session =
            SessionContext::from_config(&config, &overrides, Arc::new(MemoryStore::new()))
                .unwrap();
        assert_eq!(session.model.id, "claude-3-haiku");
        assert_eq!(session.endpoint, "http://localhost:8080/api/chat");
        assert_eq!(
            session.completion_endpoint,
            "http://localhost:8080/api/completion/complete"
        );
        assert_eq!(session.actor, Some(ActorId::from("alice")));
    }

    #[test]
    fn unknown_model_is_rejected() {
        let overrides = SessionOverrides {
            model: Some("gpt-2".into()),
            ..SessionOverrides::default()
        };
        let result = SessionContext::from_config(
            &Config::default(),
            &overrides,
            Arc::new(MemoryStore::new()),
        );
        assert_eq!(
            result.err(),
            Some(SessionError::UnknownModel("gpt-2".into()))
        );
    }

    #[test]
    fn api_key_header_uses_model_header() {
        let mut session = SessionContext::from_config(
            &Config::default(),
            &SessionOverrides::default(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        session.api_key = Some("secret".into());
        assert_eq!(
            session.api_key_header(),
            Some(("x-google-api-key".to_string(), "secret".to_string()))
        );
    }
}
