use std::path::{Path, PathBuf};

use crate::config::{CliConfig, Settings};
use crate::error::CliError;

/// Values accepted by `config init`
#[derive(Debug, Default)]
pub struct ConfigUpdate {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub db_path: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub page_size: Option<u32>,
}

pub fn run_config_show(settings: &Settings, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(settings)?);
        return Ok(());
    }

    println!("API URL:          {}", settings.api_base_url);
    println!(
        "Auth token:       {}",
        if settings.auth_token.is_some() { "set" } else { "not set" }
    );
    println!("Database:         {}", settings.db_path.display());
    println!("Request timeout:  {}s", settings.request_timeout_secs);
    println!("Page size:        {}", settings.page_size);
    Ok(())
}

/// Merge `update` into the config file at `path`
pub fn run_config_init(path: &Path, update: ConfigUpdate) -> Result<CliConfig, CliError> {
    let mut config = CliConfig::load_from_path(path).map_err(CliError::Config)?;
    apply_update(&mut config, update)?;
    config.save_to_path(path).map_err(CliError::Config)?;
    println!("{}", path.display());
    Ok(config)
}

pub fn apply_update(config: &mut CliConfig, update: ConfigUpdate) -> Result<(), CliError> {
    if let Some(url) = update.api_url {
        let url = url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(CliError::Config(format!(
                "API URL must include http:// or https:// (got '{url}')"
            )));
        }
        config.api_base_url = Some(url.trim_end_matches('/').to_string());
    }
    if update.token.is_some() {
        config.auth_token = update.token;
    }
    if update.db_path.is_some() {
        config.db_path = update.db_path;
    }
    if let Some(timeout_secs) = update.timeout_secs {
        if timeout_secs == 0 {
            return Err(CliError::Config("timeout must be at least 1 second".to_string()));
        }
        config.request_timeout_secs = Some(timeout_secs);
    }
    if let Some(page_size) = update.page_size {
        if page_size == 0 {
            return Err(CliError::Config("page size must be at least 1".to_string()));
        }
        config.page_size = Some(page_size);
    }
    Ok(())
}
