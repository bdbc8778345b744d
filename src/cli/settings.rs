//! "set" and "unset" commands

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use crate::core::config::Config;
use crate::core::models::find_model;

/// Keys accepted by `set` and `unset`.
pub const SETTING_KEYS: [&str; 6] = [
    "endpoint",
    "default-model",
    "sync-throttle-ms",
    "channel-prefix",
    "data-dir",
    "actor-id",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingError {
    UnknownKey(String),
    InvalidValue { key: String, reason: String },
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(
                f,
                "Unknown config key: {key} (expected one of: {})",
                SETTING_KEYS.join(", ")
            ),
            SettingError::InvalidValue { key, reason } => {
                write!(f, "Invalid value for {key}: {reason}")
            }
        }
    }
}

impl std::error::Error for SettingError {}

pub fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<(), SettingError> {
    let invalid = |reason: String| SettingError::InvalidValue {
        key: key.to_string(),
        reason,
    };
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid("value is empty".to_string()));
    }

    match key {
        "endpoint" => config.endpoint = Some(value.to_string()),
        "default-model" => {
            let model = find_model(value).ok_or_else(|| invalid(format!("unknown model {value}")))?;
            config.default_model = Some(model.id);
        }
        "sync-throttle-ms" => {
            let ms = value
                .parse::<u64>()
                .map_err(|e| invalid(e.to_string()))?;
            config.sync_throttle_ms = Some(ms);
        }
        "channel-prefix" => config.channel_prefix = Some(value.to_string()),
        "data-dir" => config.data_dir = Some(PathBuf::from(value)),
        "actor-id" => config.actor_id = Some(value.to_string()),
        _ => return Err(SettingError::UnknownKey(key.to_string())),
    }
    Ok(())
}

pub fn clear_setting(config: &mut Config, key: &str) -> Result<(), SettingError> {
    match key {
        "endpoint" => config.endpoint = None,
        "default-model" => config.default_model = None,
        "sync-throttle-ms" => config.sync_throttle_ms = None,
        "channel-prefix" => config.channel_prefix = None,
        "data-dir" => config.data_dir = None,
        "actor-id" => config.actor_id = None,
        _ => return Err(SettingError::UnknownKey(key.to_string())),
    }
    Ok(())
}

pub fn run_set(key: &str, value: Vec<String>) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load()?;
    if value.is_empty() {
        config.print_all();
        return Ok(());
    }
    let value = value.join(" ");
    if let Err(e) = apply_setting(&mut config, key, &value) {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
    config.save()?;
    println!("✅ Set {key} to: {}", value.trim());
    Ok(())
}

pub fn run_unset(key: &str) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load()?;
    if let Err(e) = clear_setting(&mut config, key) {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
    config.save()?;
    println!("✅ Unset {key}");
    Ok(())
}
