use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::batcher::DeliveryLimits;
use crate::uploader::cleanup::{CleanupSettings, SweepSettings};
use crate::uploader::dispatcher::{DispatcherSettings, Pacing};
use crate::uploader::telegram_client::ClientSettings;

const MIB: u64 = 1024 * 1024;

/// Environment variable that takes precedence over `bot_token` in the file.
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub bot_token: Option<String>,
    pub api_base_url: String,
    pub downloads_root: PathBuf,
    pub max_group_size: usize,
    pub max_batch_bytes: u64,
    pub max_single_file_bytes: u64,
    pub batch_pacing_ms: u64,
    pub item_pacing_ms: u64,
    pub min_request_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub max_retry_attempts: u32,
    pub cleanup_delay_secs: u64,
    pub cleanup_retry_delay_ms: u64,
    pub sweep_interval_hours: u64,
    pub sweep_max_age_hours: u64,
    pub min_free_disk_gb: f64,
    pub error_text_limit: usize,
    pub notify_skipped: bool,
    pub session_ttl_secs: u64,
    pub session_capacity: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base_url: "https://api.telegram.org".to_string(),
            downloads_root: PathBuf::from("downloads"),
            max_group_size: 10,
            max_batch_bytes: 45 * MIB,
            max_single_file_bytes: 50 * MIB,
            batch_pacing_ms: 2000,
            item_pacing_ms: 1000,
            min_request_interval_ms: 1000,
            request_timeout_secs: 120,
            max_retry_attempts: 3,
            cleanup_delay_secs: 5,
            cleanup_retry_delay_ms: 2000,
            sweep_interval_hours: 6,
            sweep_max_age_hours: 24,
            min_free_disk_gb: 1.0,
            error_text_limit: 200,
            notify_skipped: true,
            session_ttl_secs: 600,
            session_capacity: 1024,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn limits(&self) -> DeliveryLimits {
        DeliveryLimits {
            max_group_size: self.max_group_size,
            max_batch_bytes: self.max_batch_bytes,
            max_single_file_bytes: self.max_single_file_bytes,
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            between_sends: Duration::from_millis(self.batch_pacing_ms),
            between_fallback_items: Duration::from_millis(self.item_pacing_ms),
        }
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            limits: self.limits(),
            pacing: self.pacing(),
            error_text_limit: self.error_text_limit,
            notify_skipped: self.notify_skipped,
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            session_capacity: self.session_capacity,
        }
    }

    pub fn cleanup_settings(&self) -> CleanupSettings {
        CleanupSettings {
            downloads_root: self.downloads_root.clone(),
            delay: Duration::from_secs(self.cleanup_delay_secs),
            permission_retry_delay: Duration::from_millis(self.cleanup_retry_delay_ms),
        }
    }

    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            interval: Duration::from_secs(self.sweep_interval_hours * 3600),
            max_age: Duration::from_secs(self.sweep_max_age_hours * 3600),
            min_free_bytes: (self.min_free_disk_gb * 1024.0 * 1024.0 * 1024.0) as u64,
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            api_base_url: self.api_base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            min_request_interval: Duration::from_millis(self.min_request_interval_ms),
            max_retries: self.max_retry_attempts,
        }
    }

    /// Bot token from the environment, falling back to the config file.
    pub fn resolve_bot_token(&self) -> AppResult<String> {
        std::env::var(BOT_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.bot_token.clone())
            .map(|t| t.trim().to_string())
            .ok_or_else(|| {
                AppError::Config(format!(
                    "No bot token configured (set {} or bot_token in config.json)",
                    BOT_TOKEN_ENV
                ))
            })
    }
}

fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join("media-courier");

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

pub fn load_config() -> AppResult<Config> {
    let config_path = get_config_path()?;
    load_config_from(&config_path)
}

/// Reads a config file, writing defaults when it does not exist yet.
pub fn load_config_from(config_path: &PathBuf) -> AppResult<Config> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            Config::default()
        });

        validate_config(&config)?;

        Ok(config)
    } else {
        let default_config = Config::default();
        save_config_to(&default_config, config_path)?;
        Ok(default_config)
    }
}

pub fn save_config(config: &Config) -> AppResult<()> {
    validate_config(config)?;
    save_config_to(config, &get_config_path()?)
}

fn save_config_to(config: &Config, config_path: &PathBuf) -> AppResult<()> {
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    InputValidator::validate_limits(&config.limits())?;

    if config.cleanup_delay_secs > 3600 {
        return Err(AppError::validation(
            "cleanup_delay_secs",
            "Must be one hour or less",
        ));
    }

    if config.max_retry_attempts > 10 {
        return Err(AppError::validation(
            "max_retry_attempts",
            "Must be 10 or fewer",
        ));
    }

    if config.error_text_limit == 0 {
        return Err(AppError::validation(
            "error_text_limit",
            "Must be greater than 0",
        ));
    }

    if config.session_capacity == 0 {
        return Err(AppError::validation(
            "session_capacity",
            "Must be greater than 0",
        ));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

// Reset configuration to defaults
pub fn reset_config() -> AppResult<()> {
    let config_path = get_config_path()?;

    if config_path.exists() {
        let backup_path = config_path.with_extension("json.reset_backup");
        fs::copy(&config_path, &backup_path)?;
        log::info!("Existing config backed up to {}", backup_path.display());
    }

    save_config_to(&Config::default(), &config_path)?;

    log::info!("Configuration reset to defaults");
    Ok(())
}
