//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::auth::{Session, TokenStore};

/// Overrides `api_base` from the config file
const API_BASE_ENV: &str = "BMS_API_BASE";

/// `BMS_API_BASE`, when set to something non-empty
fn env_api_base() -> Option<String> {
    std::env::var(API_BASE_ENV).ok().filter(|base| !base.is_empty())
}

fn default_api_base() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_login_route() -> String {
    "/login".to_string()
}

fn default_public_paths() -> Vec<String> {
    [
        "/api/mobile/auth/login",
        "/api/mobile/auth/refresh",
        "/api/mobile/auth/register",
        "/api/mobile/auth/captcha",
        "/api/health",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Backend base URL; request paths are resolved against it
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Per-request timeout, also bounds the token refresh call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Route handed to the navigator when the session ends
    #[serde(default = "default_login_route")]
    pub login_route: String,
    /// Paths that may be called without an access token
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
    /// Remote error-log endpoint; reports go to the log file when unset
    #[serde(default)]
    pub error_log_path: Option<String>,
    /// Stored credentials (contains tokens)
    #[serde(default)]
    pub session: Session,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            login_route: default_login_route(),
            public_paths: default_public_paths(),
            error_log_path: None,
            session: Session::default(),
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "bms-client", "bms-client")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk, applying environment overrides
    pub fn load() -> Result<Self> {
        Ok(Self::load_from(&Self::config_path()?)?.with_api_base(env_api_base()))
    }

    /// Replace `api_base` when an override is given
    pub fn with_api_base(mut self, api_base: Option<String>) -> Self {
        if let Some(base) = api_base {
            self.api_base = base;
        }
        self
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }
}

/// Token store persisted in the config file. Every mutation is written
/// through immediately.
pub struct FileTokenStore {
    path: PathBuf,
    config: Mutex<Config>,
}

impl FileTokenStore {
    pub fn new(path: PathBuf, config: Config) -> Self {
        Self {
            path,
            config: Mutex::new(config),
        }
    }

    /// Open the store at `path` and return the effective config with it.
    /// The `api_base` override only applies to the returned config; the
    /// store keeps the file's own values and writes those back.
    pub fn load(path: PathBuf, api_base: Option<String>) -> Result<(Config, Self)> {
        let stored = Config::load_from(&path)?;
        let effective = stored.clone().with_api_base(api_base);
        Ok((effective, Self::new(path, stored)))
    }

    /// Store backed by the default config file, honouring `BMS_API_BASE`.
    pub fn open() -> Result<(Config, Self)> {
        Self::load(Config::config_path()?, env_api_base())
    }
}

impl TokenStore for FileTokenStore {
    fn session(&self) -> Session {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .session
            .clone()
    }

    fn update_session(&self, apply: &mut dyn FnMut(&mut Session)) -> Result<()> {
        let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut config.session);
        config.save_to(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StoredToken;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("bms-client-test-{}", uuid::Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_from(&scratch_path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timeout_secs, 30);
        assert!(config
            .public_paths
            .iter()
            .any(|p| p == "/api/mobile/auth/refresh"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            api_base = "https://erp.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.api_base, "https://erp.example.com");
        assert_eq!(config.login_route, "/login");
        assert!(config.session.is_empty());
    }

    #[test]
    fn test_file_store_round_trip() {
        let path = scratch_path();
        let store = FileTokenStore::new(path.clone(), Config::default());

        store
            .update_session(&mut |s| {
                s.access_token = Some(StoredToken::new("T1".to_string(), None));
                s.refresh_token = Some("R1".to_string());
                s.tenant_id = Some("7".to_string());
                s.user_id = Some("42".to_string());
                s.user = Some(r#"{"id":42}"#.to_string());
                s.tenant = Some(r#"{"id":7}"#.to_string());
            })
            .unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.session, store.session());
        assert_eq!(reloaded.session.access_token.unwrap().token, "T1");

        store.clear_tokens().unwrap();
        let reloaded = Config::load_from(&path).unwrap();
        assert!(reloaded.session.is_empty());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_api_base_override_is_not_persisted() {
        let path = scratch_path();
        let on_disk = Config {
            api_base: "https://erp.example.com".to_string(),
            ..Config::default()
        };
        on_disk.save_to(&path).unwrap();

        let (effective, store) =
            FileTokenStore::load(path.clone(), Some("http://staging.example:9999".to_string()))
                .unwrap();
        assert_eq!(effective.api_base, "http://staging.example:9999");

        store
            .update_session(&mut |s| {
                s.access_token = Some(StoredToken::new("T1".to_string(), None));
            })
            .unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.api_base, "https://erp.example.com");
        assert_eq!(reloaded.session.access_token.unwrap().token, "T1");

        let (effective, _) = FileTokenStore::load(path.clone(), None).unwrap();
        assert_eq!(effective.api_base, "https://erp.example.com");

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
