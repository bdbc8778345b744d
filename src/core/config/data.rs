use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;

use crate::core::ids::ActorId;
use crate::core::models::DEFAULT_MODEL;
use crate::core::sync_bus::DEFAULT_CHANNEL_PREFIX;
use crate::core::throttle::DEFAULT_SYNC_THROTTLE;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api/chat";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Streaming chat endpoint, or a server origin to append `/api/chat` to.
    pub endpoint: Option<String>,
    pub default_model: Option<String>,
    /// Minimum gap between outbound delta broadcasts, in milliseconds.
    pub sync_throttle_ms: Option<u64>,
    pub channel_prefix: Option<String>,
    /// Directory for stored conversations.
    pub data_dir: Option<PathBuf>,
    /// Identity stamped on writes. Unset means anonymous.
    pub actor_id: Option<String>,
}

pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    pub fn default_model(&self) -> &str {
        self.default_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn sync_throttle(&self) -> Duration {
        self.sync_throttle_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SYNC_THROTTLE)
    }

    pub fn channel_prefix(&self) -> &str {
        self.channel_prefix
            .as_deref()
            .unwrap_or(DEFAULT_CHANNEL_PREFIX)
    }

    pub fn actor(&self) -> Option<ActorId> {
        self.actor_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ActorId::from)
    }

    /// Configured data directory, else the platform data dir, else
    /// `./.forkchat/conversations`.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        ProjectDirs::from("org", "forkchat", "forkchat")
            .map(|dirs| dirs.data_dir().join("conversations"))
            .unwrap_or_else(|| PathBuf::from(".forkchat").join("conversations"))
    }
}
