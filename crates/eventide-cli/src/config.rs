//! Persistent CLI configuration and effective settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eventide_core::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";

pub const API_URL_ENV: &str = "EVENTIDE_API_URL";
pub const API_TOKEN_ENV: &str = "EVENTIDE_API_TOKEN";
pub const DB_PATH_ENV: &str = "EVENTIDE_DB_PATH";

/// Contents of `config.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("eventide").join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("could not resolve a config directory".to_string()))
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("eventide").join("eventide.db"))
        .ok_or_else(|| CliError::Config("could not resolve a data directory".to_string()))
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl CliConfig {
    pub fn load() -> Result<Self, String> {
        let path = default_config_path().map_err(|error| error.to_string())?;
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.take());
        self.auth_token = normalize_text_option(self.auth_token.take());
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub db_path: Option<PathBuf>,
}

/// Effective settings after layering file < environment < flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub api_base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    pub db_path: PathBuf,
    pub request_timeout_secs: u64,
    pub page_size: u32,
}

impl Settings {
    /// Layer the sources; `env` looks up an environment variable by name
    pub fn resolve(
        file: &CliConfig,
        env: impl Fn(&str) -> Option<String>,
        flags: FlagOverrides,
    ) -> Result<Self, CliError> {
        let defaults = SyncConfig::default();

        let api_base_url = normalize_text_option(flags.api_url)
            .or_else(|| normalize_text_option(env(API_URL_ENV)))
            .or_else(|| file.api_base_url.clone())
            .unwrap_or(defaults.api_base_url);
        let auth_token = normalize_text_option(flags.token)
            .or_else(|| normalize_text_option(env(API_TOKEN_ENV)))
            .or_else(|| file.auth_token.clone());
        let db_path = match flags
            .db_path
            .or_else(|| normalize_text_option(env(DB_PATH_ENV)).map(PathBuf::from))
            .or_else(|| file.db_path.clone())
        {
            Some(path) => path,
            None => default_db_path()?,
        };

        Ok(Self {
            api_base_url,
            auth_token,
            db_path,
            request_timeout_secs: file
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout.as_secs()),
            page_size: file.page_size.unwrap_or(defaults.page_size),
        })
    }

    /// Engine configuration; the CLI drains on demand so auto sync stays off
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::default()
            .with_api_base_url(self.api_base_url.clone())
            .with_auth_token(self.auth_token.clone())
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_page_size(self.page_size)
            .without_auto_sync()
    }
}
