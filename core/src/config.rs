//! Connector configuration
//!
//! Every tunable of the handshake and its recovery window lives here and is
//! supplied by the caller. Durations are stored as integer milliseconds so
//! the JSON stays hand-editable.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::recovery::RecoveryConfig;
use crate::resilience::{BackoffConfig, CircuitBreakerConfig};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// SERDE HELPERS
// ============================================================================

/// `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `Vec<Duration>` as a list of integer milliseconds
pub(crate) mod duration_ms_vec {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(values: &[Duration], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|d| d.as_millis() as u64))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Duration>, D::Error> {
        Vec::<u64>::deserialize(deserializer)
            .map(|values| values.into_iter().map(Duration::from_millis).collect())
    }
}

// ============================================================================
// CONNECTOR CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectorConfig {
    /// Hard deadline for the wallet to approve a proposal
    #[serde(with = "duration_ms")]
    pub primary_timeout: Duration,
    /// Bound on a single relay `propose` request
    #[serde(with = "duration_ms")]
    pub proposal_timeout: Duration,
    pub recovery: RecoveryConfig,
    /// Retry schedule for relay proposals
    pub backoff: BackoffConfig,
    /// Gate in front of relay proposals and reconnects
    pub circuit_breaker: CircuitBreakerConfig,
    /// Lifetime given to direct-key sessions that carry no expiry of their own
    #[serde(with = "duration_ms")]
    pub session_ttl: Duration,
    /// Fresh attempts allowed per connection after the first
    pub max_retries: u32,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            primary_timeout: Duration::from_secs(60),
            proposal_timeout: Duration::from_secs(10),
            recovery: RecoveryConfig::default(),
            backoff: BackoffConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            session_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            max_retries: 3,
        }
    }
}

impl ConnectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "primaryTimeout must be greater than zero".to_string(),
            ));
        }
        if self.proposal_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "proposalTimeout must be greater than zero".to_string(),
            ));
        }
        if self.session_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "sessionTtl must be greater than zero".to_string(),
            ));
        }

        let recovery = &self.recovery;
        if recovery.reconnect_timeouts.is_empty() {
            return Err(ConfigError::Invalid(
                "recovery.reconnectTimeouts must list at least one timeout".to_string(),
            ));
        }
        if recovery.reconnect_timeouts.iter().any(Duration::is_zero) {
            return Err(ConfigError::Invalid(
                "recovery.reconnectTimeouts entries must be greater than zero".to_string(),
            ));
        }
        if recovery.relay_check_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "recovery.relayCheckTimeout must be greater than zero".to_string(),
            ));
        }
        if recovery.max_polls > 0 && recovery.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "recovery.pollInterval must be greater than zero when polling is enabled"
                    .to_string(),
            ));
        }

        let backoff = &self.backoff;
        if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff.multiplier must be >= 1, got {}",
                backoff.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&backoff.jitter_factor) {
            return Err(ConfigError::Invalid(format!(
                "backoff.jitterFactor must be within [0, 1], got {}",
                backoff.jitter_factor
            )));
        }
        if backoff.initial_delay > backoff.max_delay {
            return Err(ConfigError::Invalid(
                "backoff.initialDelay must not exceed backoff.maxDelay".to_string(),
            ));
        }

        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 || breaker.half_open_success_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuitBreaker thresholds must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Primary timeout plus the full recovery window
    pub fn worst_case_attempt(&self) -> Duration {
        self.primary_timeout + self.recovery.worst_case_window()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_string(&content)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        self.validate()?;
        let content = self.to_json_string()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_string(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
