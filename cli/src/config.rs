// Configuration management for the walletlink CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/walletlink/config.json
// - Linux: ~/.config/walletlink/config.json
// - Windows: %APPDATA%\walletlink\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walletlink_core::{ConnectorConfig, LogConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CliConfig {
    /// Session database location; the platform data dir when unset
    pub storage_path: Option<String>,

    pub logging: LogConfig,

    /// Timeouts, recovery schedule, backoff and breaker tuning
    pub connector: ConnectorConfig,
}

impl CliConfig {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("walletlink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("walletlink");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Where the session database lives
    pub fn storage_path(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("sessions")),
        }
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = CliConfig::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: CliConfig =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        config
            .connector
            .validate()
            .context("Config file holds invalid connector settings")?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Set a config value; connector values are validated before they stick
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "storage_path" => {
                updated.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "log_level" => updated.logging.level = value.to_string(),
            "log_json" => updated.logging.json = parse_bool(value)?,
            "log_file" => {
                updated.logging.file = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "primary_timeout_ms" => updated.connector.primary_timeout = parse_ms(value)?,
            "proposal_timeout_ms" => updated.connector.proposal_timeout = parse_ms(value)?,
            "max_retries" => updated.connector.max_retries = parse_number(value)?,
            "session_ttl_hours" => {
                let hours: u64 = parse_number(value)?;
                let secs = hours
                    .checked_mul(3600)
                    .with_context(|| format!("session_ttl_hours is too large: {}", hours))?;
                updated.connector.session_ttl = Duration::from_secs(secs);
            }
            "recovery.pre_poll_delay_ms" => {
                updated.connector.recovery.pre_poll_delay = parse_ms(value)?
            }
            "recovery.reconnect_timeouts_ms" => {
                updated.connector.recovery.reconnect_timeouts = value
                    .split(',')
                    .map(|part| parse_ms(part.trim()))
                    .collect::<Result<_>>()?;
            }
            "recovery.inter_attempt_delay_ms" => {
                updated.connector.recovery.inter_attempt_delay = parse_ms(value)?
            }
            "recovery.settle_delay_ms" => updated.connector.recovery.settle_delay = parse_ms(value)?,
            "recovery.relay_check_timeout_ms" => {
                updated.connector.recovery.relay_check_timeout = parse_ms(value)?
            }
            "recovery.poll_interval_ms" => {
                updated.connector.recovery.poll_interval = parse_ms(value)?
            }
            "recovery.max_polls" => updated.connector.recovery.max_polls = parse_number(value)?,
            "backoff.initial_delay_ms" => updated.connector.backoff.initial_delay = parse_ms(value)?,
            "backoff.max_delay_ms" => updated.connector.backoff.max_delay = parse_ms(value)?,
            "backoff.multiplier" => updated.connector.backoff.multiplier = parse_number(value)?,
            "backoff.jitter_factor" => updated.connector.backoff.jitter_factor = parse_number(value)?,
            "backoff.max_retries" => updated.connector.backoff.max_retries = parse_number(value)?,
            "breaker.failure_threshold" => {
                updated.connector.circuit_breaker.failure_threshold = parse_number(value)?
            }
            "breaker.reset_timeout_ms" => {
                updated.connector.circuit_breaker.reset_timeout = parse_ms(value)?
            }
            "breaker.half_open_success_threshold" => {
                updated.connector.circuit_breaker.half_open_success_threshold = parse_number(value)?
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        updated
            .connector
            .validate()
            .with_context(|| format!("Rejected value for {}", key))?;
        *self = updated;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let connector = &self.connector;
        let recovery = &connector.recovery;
        let backoff = &connector.backoff;
        let breaker = &connector.circuit_breaker;

        vec![
            (
                "storage_path".to_string(),
                self.storage_path.clone().unwrap_or_else(|| "(auto)".to_string()),
            ),
            ("log_level".to_string(), self.logging.level.clone()),
            ("log_json".to_string(), self.logging.json.to_string()),
            (
                "log_file".to_string(),
                self.logging
                    .file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(none)".to_string()),
            ),
            ("primary_timeout_ms".to_string(), ms(connector.primary_timeout)),
            ("proposal_timeout_ms".to_string(), ms(connector.proposal_timeout)),
            ("max_retries".to_string(), connector.max_retries.to_string()),
            (
                "session_ttl_hours".to_string(),
                (connector.session_ttl.as_secs() / 3600).to_string(),
            ),
            ("recovery.pre_poll_delay_ms".to_string(), ms(recovery.pre_poll_delay)),
            (
                "recovery.reconnect_timeouts_ms".to_string(),
                recovery
                    .reconnect_timeouts
                    .iter()
                    .map(|d| ms(*d))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            ("recovery.inter_attempt_delay_ms".to_string(), ms(recovery.inter_attempt_delay)),
            ("recovery.settle_delay_ms".to_string(), ms(recovery.settle_delay)),
            (
                "recovery.relay_check_timeout_ms".to_string(),
                ms(recovery.relay_check_timeout),
            ),
            ("recovery.poll_interval_ms".to_string(), ms(recovery.poll_interval)),
            ("recovery.max_polls".to_string(), recovery.max_polls.to_string()),
            ("backoff.initial_delay_ms".to_string(), ms(backoff.initial_delay)),
            ("backoff.max_delay_ms".to_string(), ms(backoff.max_delay)),
            ("backoff.multiplier".to_string(), backoff.multiplier.to_string()),
            ("backoff.jitter_factor".to_string(), backoff.jitter_factor.to_string()),
            ("backoff.max_retries".to_string(), backoff.max_retries.to_string()),
            ("breaker.failure_threshold".to_string(), breaker.failure_threshold.to_string()),
            ("breaker.reset_timeout_ms".to_string(), ms(breaker.reset_timeout)),
            (
                "breaker.half_open_success_threshold".to_string(),
                breaker.half_open_success_threshold.to_string(),
            ),
        ]
    }
}

fn ms(duration: Duration) -> String {
    duration.as_millis().to_string()
}

fn parse_ms(value: &str) -> Result<Duration> {
    let millis: u64 = value
        .parse()
        .with_context(|| format!("Invalid millisecond value: {}", value))?;
    Ok(Duration::from_millis(millis))
}

fn parse_number<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid number: {}", value))
}

fn parse_bool(value: &str) -> Result<bool> {
    value
        .parse()
        .with_context(|| format!("Invalid boolean value: {}", value))
}
