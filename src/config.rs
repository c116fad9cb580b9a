//! Board configuration.
//!
//! A JSON config file with defaulted camelCase fields, plus environment
//! overrides so a terminal can be pointed at a different dashboard without
//! touching the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::alerts::DEFAULT_URGENT_THRESHOLD_MINUTES;

/// Default auto-refresh cadence in seconds.
pub const DEFAULT_AUTO_REFRESH_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoardConfig {
    /// Base URL of the admin dashboard holding the order store API.
    pub store_url: String,
    pub api_key: String,
    /// Store whose active orders this board displays.
    pub store_id: String,
    pub auto_refresh_secs: u64,
    pub urgent_threshold_minutes: i64,
    /// When set, a daily-rolling JSON log file is written here.
    pub log_dir: Option<PathBuf>,
    /// Substitute sample orders when the very first load fails.
    pub sample_fallback: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            store_url: "http://localhost:3000".to_string(),
            api_key: String::new(),
            store_id: String::new(),
            auto_refresh_secs: DEFAULT_AUTO_REFRESH_SECS,
            urgent_threshold_minutes: DEFAULT_URGENT_THRESHOLD_MINUTES,
            log_dir: None,
            sample_fallback: false,
        }
    }
}

impl BoardConfig {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("read config {}: {e}", path.display()))?;
        serde_json::from_str(&raw).map_err(|e| format!("parse config {}: {e}", path.display()))
    }

    /// Load from an optional file path, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `BOARD_*` overrides from any key lookup. Split out from the
    /// process environment so tests can drive it without global state.
    pub fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("BOARD_STORE_URL") {
            self.store_url = v;
        }
        if let Some(v) = get("BOARD_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = get("BOARD_STORE_ID") {
            self.store_id = v;
        }
        if let Some(v) = get("BOARD_REFRESH_SECS").and_then(|v| v.parse().ok()) {
            self.auto_refresh_secs = v;
        }
        if let Some(v) = get("BOARD_URGENT_MINUTES").and_then(|v| v.parse().ok()) {
            self.urgent_threshold_minutes = v;
        }
        if let Some(v) = get("BOARD_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("BOARD_SAMPLE_FALLBACK") {
            self.sample_fallback = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BoardConfig::default();
        assert_eq!(config.auto_refresh_secs, 30);
        assert_eq!(config.urgent_threshold_minutes, 20);
        assert!(!config.sample_fallback);
    }

    #[test]
    fn test_parse_partial_json_uses_defaults() {
        let config: BoardConfig =
            serde_json::from_str(r#"{"storeUrl": "https://admin.example.com", "storeId": "s-1"}"#)
                .unwrap();
        assert_eq!(config.store_url, "https://admin.example.com");
        assert_eq!(config.store_id, "s-1");
        assert_eq!(config.urgent_threshold_minutes, 20);
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = BoardConfig::default();
        config.apply_env_from(|key| match key {
            "BOARD_STORE_ID" => Some("s-9".to_string()),
            "BOARD_URGENT_MINUTES" => Some("35".to_string()),
            "BOARD_SAMPLE_FALLBACK" => Some("yes".to_string()),
            _ => None,
        });
        assert_eq!(config.store_id, "s-9");
        assert_eq!(config.urgent_threshold_minutes, 35);
        assert!(config.sample_fallback);
    }

    #[test]
    fn test_unparsable_numeric_override_is_ignored() {
        let mut config = BoardConfig::default();
        config.apply_env_from(|key| match key {
            "BOARD_REFRESH_SECS" => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(config.auto_refresh_secs, DEFAULT_AUTO_REFRESH_SECS);
    }
}
