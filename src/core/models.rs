//! Built-in model registry
//!
//! Maps the model identifiers the chat endpoint accepts onto their provider
//! and the request header that carries that provider's API key. The table
//! is embedded from `builtin_models.toml` at build time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    /// Identifier the provider itself uses.
    pub model_id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub header: String,
}

#[derive(Debug, Deserialize)]
struct BuiltinModelsConfig {
    models: Vec<ModelInfo>,
}

impl ModelInfo {
    /// Environment variable holding the key for this model's provider,
    /// e.g. `FORKCHAT_OPENROUTER_API_KEY`.
    pub fn api_key_env_var(&self) -> String {
        format!(
            "FORKCHAT_{}_API_KEY",
            self.provider.to_ascii_uppercase().replace('-', "_")
        )
    }

    /// Read the provider key from the environment.
    pub fn api_key_from_env(&self) -> Option<String> {
        std::env::var(self.api_key_env_var())
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

/// Load the embedded model table. An unparsable table yields no models.
pub fn load_builtin_models() -> Vec<ModelInfo> {
    const CONFIG_CONTENT: &str = include_str!("../builtin_models.toml");

    match toml::from_str::<BuiltinModelsConfig>(CONFIG_CONTENT) {
        Ok(config) => config.models,
        Err(e) => {
            tracing::error!(error = %e, "embedded model table is invalid");
            Vec::new()
        }
    }
}

/// Find a model by id or display name (case-insensitive).
pub fn find_model(name: &str) -> Option<ModelInfo> {
    load_builtin_models().into_iter().find(|m| {
        m.id.eq_ignore_ascii_case(name) || m.display_name.eq_ignore_ascii_case(name)
    })
}

pub const DEFAULT_MODEL: &str = "Gemini 2.5 Flash";
