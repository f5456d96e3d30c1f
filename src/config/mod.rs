//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{StoredToken, TokenStore};
use crate::feed::FeedConfig;
use crate::models::{AuthContext, UserRole};

pub const BACKEND_URL_ENV: &str = "MARKETCHAT_BACKEND_URL";
pub const API_KEY_ENV: &str = "MARKETCHAT_API_KEY";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project URL of the backend (REST, auth and realtime live under it)
    pub backend_url: Option<String>,
    /// Public (anon) API key sent with every request
    pub api_key: Option<String>,
    /// Email used at the last login
    pub email: Option<String>,
    /// User id (`sub` claim of the access token)
    pub user_id: Option<String>,
    pub role: Option<UserRole>,
    pub refresh_token: Option<String>,
    pub access_token: Option<StoredToken>,
    pub tables: TableNames,
    pub feed: FeedSettings,
}

/// Backend table names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub messages: String,
    pub conversations: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            messages: "messages".to_string(),
            conversations: "chat_rooms".to_string(),
        }
    }
}

/// `[feed]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub send_timeout_secs: u64,
    pub echo_window_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Ring the terminal bell on incoming messages
    pub notify_bell: bool,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            send_timeout_secs: 15,
            echo_window_ms: 1000,
            max_reconnect_attempts: 5,
            notify_bell: true,
        }
    }
}

impl FeedSettings {
    pub fn to_feed_config(&self) -> FeedConfig {
        FeedConfig {
            send_timeout: Duration::from_secs(self.send_timeout_secs.max(1)),
            echo_window: Duration::from_millis(self.echo_window_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            ..FeedConfig::default()
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "marketchat", "marketchat")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        // Contains tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Backend URL without a trailing slash. The environment wins over the
    /// file.
    pub fn backend_url(&self) -> Result<String> {
        resolve(std::env::var(BACKEND_URL_ENV).ok(), self.backend_url.as_deref())
            .map(|url| url.trim_end_matches('/').to_string())
            .with_context(|| {
                format!(
                    "No backend URL configured. Set {} or backend_url in {}",
                    BACKEND_URL_ENV,
                    display_path()
                )
            })
    }

    pub fn api_key(&self) -> Result<String> {
        resolve(std::env::var(API_KEY_ENV).ok(), self.api_key.as_deref()).with_context(|| {
            format!(
                "No API key configured. Set {} or api_key in {}",
                API_KEY_ENV,
                display_path()
            )
        })
    }

    /// Identity of the logged-in user.
    pub fn auth_context(&self) -> Result<AuthContext> {
        let user_id = self
            .user_id
            .clone()
            .context("Not logged in. Run 'marketchat login' first.")?;
        let role = self
            .role
            .context("No role stored. Run 'marketchat login --force'.")?;
        Ok(AuthContext::new(user_id, role))
    }

    pub fn set_identity(&mut self, me: &AuthContext) {
        self.user_id = Some(me.user_id.clone());
        self.role = Some(me.role);
    }
}

fn resolve(env: Option<String>, configured: Option<&str>) -> Option<String> {
    env.filter(|v| !v.trim().is_empty())
        .or_else(|| configured.filter(|v| !v.trim().is_empty()).map(String::from))
}

fn display_path() -> String {
    Config::config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "config.toml".to_string())
}

impl TokenStore for Config {
    fn get_access_token(&self) -> Option<StoredToken> {
        self.access_token.clone()
    }

    fn set_access_token(&mut self, token: String, expires_in: Option<u64>) {
        self.access_token = Some(StoredToken::new(token, expires_in));
    }

    fn get_refresh_token(&self) -> Option<String> {
        self.refresh_token.clone()
    }

    fn set_refresh_token(&mut self, token: String) {
        self.refresh_token = Some(token);
    }

    fn clear_tokens(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.user_id = None;
        self.role = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("marketchat-test-{}", uuid::Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_from(&temp_path()).unwrap();
        assert!(config.access_token.is_none());
        assert_eq!(config.tables.conversations, "chat_rooms");
        assert_eq!(config.feed.send_timeout_secs, 15);
        assert!(config.feed.notify_bell);
    }

    #[test]
    fn test_round_trip() {
        let path = temp_path();
        let mut config = Config {
            backend_url: Some("https://abc.example.co".to_string()),
            api_key: Some("anon-key".to_string()),
            ..Config::default()
        };
        config.set_access_token("jwt".to_string(), Some(3600));
        config.set_refresh_token("refresh".to_string());
        config.set_identity(&AuthContext::new("user-1", UserRole::Influencer));
        config.feed.max_reconnect_attempts = 8;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.backend_url, config.backend_url);
        assert_eq!(loaded.get_access_token().unwrap().token, "jwt");
        assert_eq!(loaded.get_refresh_token().as_deref(), Some("refresh"));
        assert_eq!(
            loaded.auth_context().unwrap(),
            AuthContext::new("user-1", UserRole::Influencer)
        );
        assert_eq!(loaded.feed.max_reconnect_attempts, 8);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let toml = r#"
            backend_url = "https://abc.example.co/"

            [feed]
            send_timeout_secs = 20
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.feed.send_timeout_secs, 20);
        assert_eq!(config.feed.echo_window_ms, 1000);
        assert_eq!(config.tables, TableNames::default());

        let feed = config.feed.to_feed_config();
        assert_eq!(feed.send_timeout, Duration::from_secs(20));
        assert_eq!(feed.echo_window, Duration::from_secs(1));
        assert_eq!(feed.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_environment_wins_over_file() {
        assert_eq!(
            resolve(Some("https://env".to_string()), Some("https://file")),
            Some("https://env".to_string())
        );
        assert_eq!(
            resolve(Some(" ".to_string()), Some("https://file")),
            Some("https://file".to_string())
        );
        assert_eq!(resolve(None, Some("")), None);
    }

    #[test]
    fn test_clear_tokens_forgets_identity() {
        let mut config = Config::default();
        config.set_access_token("jwt".to_string(), None);
        config.set_identity(&AuthContext::new("user-1", UserRole::Advertiser));
        config.clear_tokens();
        assert!(config.get_access_token().is_none());
        assert!(config.auth_context().is_err());
    }
}
