use crate::core::config::data::{path_display, Config};

impl Config {
    /// One `key: value` line per setting, `(unset)` for missing values.
    pub fn setting_lines(&self) -> Vec<String> {
        let show = |value: Option<String>| value.unwrap_or_else(|| "(unset)".to_string());
        vec![
            format!("endpoint: {}", show(self.endpoint.clone())),
            format!("default-model: {}", show(self.default_model.clone())),
            format!(
                "sync-throttle-ms: {}",
                show(self.sync_throttle_ms.map(|ms| ms.to_string()))
            ),
            format!("channel-prefix: {}", show(self.channel_prefix.clone())),
            format!(
                "data-dir: {}",
                show(self.data_dir.as_ref().map(path_display))
            ),
            format!("actor-id: {}", show(self.actor_id.clone())),
        ]
    }

    pub fn print_all(&self) {
        println!("Current configuration:");
        for line in self.setting_lines() {
            println!("  {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_values_are_marked() {
        let config = Config {
            sync_throttle_ms: Some(50),
            actor_id: Some("alice".into()),
            ..Config::default()
        };
        let lines = config.setting_lines();
        assert_eq!(lines[0], "endpoint: (unset)");
        assert_eq!(lines[2], "sync-throttle-ms: 50");
        assert_eq!(lines[5], "actor-id: alice");
    }
}
