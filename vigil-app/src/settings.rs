//! Persistent host settings (JSON file in the platform config directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// `free-text` | `tool-call` | `duplex-socket`
    pub mode: String,
    pub preferred_input_device: Option<String>,
    /// Directory replay artifacts are exported into.
    pub replay_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8000/ws".into(),
            api_key: None,
            mode: "free-text".into(),
            preferred_input_device: None,
            replay_dir: None,
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("vigil").join("settings.json"))
        .unwrap_or_else(|| PathBuf::from("vigil.settings.json"))
}

/// Load settings, falling back to defaults on a missing or corrupt file.
pub fn load_settings(path: &Path) -> AppSettings {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "settings file corrupt — using defaults");
                AppSettings::default()
            }
        },
        Err(_) => AppSettings::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(Path::new("/definitely/not/a/real/path.json"));
        assert_eq!(settings.mode, "free-text");
        assert_eq!(settings.endpoint, "ws://127.0.0.1:8000/ws");
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"endpoint":"wss://guardian.example/ws"}"#).unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.endpoint, "wss://guardian.example/ws");
        assert_eq!(settings.mode, "free-text");
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ nope").unwrap();
        assert_eq!(load_settings(&path).mode, "free-text");
    }
}
