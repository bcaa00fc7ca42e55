use std::{collections::HashMap, fs};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    /// Static shared secret for all clients; `None` disables auth.
    pub auth_token: Option<String>,
    /// Upper bound on a single stored value, in bytes.
    pub max_value_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8090".into(),
            auth_token: None,
            max_value_bytes: 64 * 1024,
        }
    }
}

/// Defaults, overridden by `airlink.toml`, overridden by environment.
/// Read once at startup; there is no runtime reconfiguration.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("airlink.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("bind_addr") {
                settings.bind_addr = v.clone();
            }
            if let Some(v) = file_cfg.get("auth_token") {
                settings.auth_token = Some(v.clone());
            }
            if let Some(v) = file_cfg.get("max_value_bytes") {
                if let Ok(parsed) = v.parse::<usize>() {
                    settings.max_value_bytes = parsed;
                }
            }
        }
    }

    if let Ok(v) = std::env::var("AIRLINK__BIND_ADDR") {
        settings.bind_addr = v;
    }
    if let Ok(v) = std::env::var("AIRLINK__AUTH_TOKEN") {
        settings.auth_token = Some(v);
    }
    if let Ok(v) = std::env::var("AIRLINK__MAX_VALUE_BYTES") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.max_value_bytes = parsed;
        }
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
