//! Dashboard configuration

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const BACKEND_URL_ENV: &str = "WA_DASHBOARD_BACKEND_URL";
const SOCKET_URL_ENV: &str = "WA_DASHBOARD_SOCKET_URL";
const TOKEN_ENV: &str = "WA_DASHBOARD_TOKEN";

/// REST backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/whatsapp".to_string(),
            auth_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

/// Realtime socket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3000/realtime".to_string(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Number selected on start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_number: Option<String>,
    /// How long a manually opened chat is kept over messages from synced senders
    #[serde(default = "default_manual_selection_hold_secs")]
    pub manual_selection_hold_secs: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            realtime: RealtimeConfig::default(),
            log_filter: default_log_filter(),
            default_number: None,
            manual_selection_hold_secs: default_manual_selection_hold_secs(),
        }
    }
}

fn default_log_filter() -> String {
    "whatsapp_dashboard=debug,warn".to_string()
}

fn default_manual_selection_hold_secs() -> i64 {
    15
}

impl AppConfig {
    /// Platform config file location
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("org", "whatsapp-dashboard", "WhatsAppDashboard")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Load the config at `path`, writing defaults there if it doesn't
    /// exist yet. Environment overrides are applied on top.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        let config = match Self::load(path)? {
            Some(config) => config,
            None => {
                let config = Self::default();
                config.save(path)?;
                tracing::info!("Wrote default config to {:?}", path);
                config
            }
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = var(BACKEND_URL_ENV) {
            self.backend.base_url = url;
        }
        if let Some(url) = var(SOCKET_URL_ENV) {
            self.realtime.url = url;
        }
        if let Some(token) = var(TOKEN_ENV) {
            self.backend.auth_token = Some(token);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert!(AppConfig::load(&path).unwrap().is_none());
        let config = AppConfig::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.manual_selection_hold_secs, 15);
        assert_eq!(AppConfig::load(&path).unwrap().unwrap().log_filter, config.log_filter);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig {
            default_number: Some("n1".into()),
            manual_selection_hold_secs: 30,
            ..AppConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), Some(config));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"backend":{"base_url":"https://api.example.com"}}"#).unwrap();

        let config = AppConfig::load(&path).unwrap().unwrap();
        assert_eq!(config.backend.base_url, "https://api.example.com");
        assert_eq!(config.backend.timeout_secs, 30);
        assert_eq!(config.realtime, RealtimeConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = AppConfig::default().with_env_overrides(|key| match key {
            BACKEND_URL_ENV => Some("https://prod.example.com/api".into()),
            TOKEN_ENV => Some("secret".into()),
            _ => None,
        });
        assert_eq!(config.backend.base_url, "https://prod.example.com/api");
        assert_eq!(config.backend.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.realtime.url, RealtimeConfig::default().url);
    }
}
