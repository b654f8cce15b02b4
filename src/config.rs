//! Configuration for crowdbench

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crowdbench")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Window during which a client's vote can be changed in place
    #[serde(default = "default_cooldown_hours")]
    pub vote_cooldown_hours: u64,

    /// Maximum number of items accepted in one batch vote request
    #[serde(default = "default_max_batch_votes")]
    pub max_batch_votes: usize,

    /// Lifetime of newly issued submission API keys
    #[serde(default = "default_api_key_ttl_days")]
    pub api_key_ttl_days: u32,

    /// Bearer token required on `/admin/*` routes; admin routes are open when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,

    #[serde(default)]
    pub rate_limits: RateLimitsConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Admission policy for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimitPolicy {
    /// Refills `rate` tokens per `period_secs`, bursting up to `capacity`
    TokenBucket { rate: u32, period_secs: u64, capacity: u32 },
    /// At most `rate` requests per aligned window of `period_secs`
    FixedWindow { rate: u32, period_secs: u64 },
}

/// Per-client limits on vote endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default = "default_cast_vote_limit")]
    pub cast_vote: LimitPolicy,
    #[serde(default = "default_batch_limit")]
    pub cast_votes_batch: LimitPolicy,
    #[serde(default = "default_cast_vote_limit")]
    pub remove_vote: LimitPolicy,
}

/// Out-of-band maintenance schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u32,
    #[serde(default = "default_sweep_max_batches")]
    pub sweep_max_batches: u32,
}

fn default_http_port() -> u16 {
    8095
}

fn default_cooldown_hours() -> u64 {
    48
}

fn default_max_batch_votes() -> usize {
    100
}

fn default_api_key_ttl_days() -> u32 {
    7
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_sweep_batch_size() -> u32 {
    1000
}

fn default_sweep_max_batches() -> u32 {
    10
}

fn default_cast_vote_limit() -> LimitPolicy {
    LimitPolicy::TokenBucket { rate: 20, period_secs: 60, capacity: 3 }
}

fn default_batch_limit() -> LimitPolicy {
    LimitPolicy::FixedWindow { rate: 10, period_secs: 60 }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            cast_vote: default_cast_vote_limit(),
            cast_votes_batch: default_batch_limit(),
            remove_vote: default_cast_vote_limit(),
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: default_sweep_interval(),
            sweep_batch_size: default_sweep_batch_size(),
            sweep_max_batches: default_sweep_max_batches(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            vote_cooldown_hours: default_cooldown_hours(),
            max_batch_votes: default_max_batch_votes(),
            api_key_ttl_days: default_api_key_ttl_days(),
            admin_token: None,
            rate_limits: RateLimitsConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.vote_cooldown_hours == 0 {
            return Err(StorageError::Config("vote_cooldown_hours must be > 0".into()));
        }
        if self.max_batch_votes == 0 {
            return Err(StorageError::Config("max_batch_votes must be > 0".into()));
        }
        if self.maintenance.sweep_batch_size == 0 {
            return Err(StorageError::Config("maintenance.sweep_batch_size must be > 0".into()));
        }
        if self.maintenance.sweep_max_batches == 0 {
            return Err(StorageError::Config("maintenance.sweep_max_batches must be > 0".into()));
        }
        for policy in [
            &self.rate_limits.cast_vote,
            &self.rate_limits.cast_votes_batch,
            &self.rate_limits.remove_vote,
        ] {
            let (rate, period) = match policy {
                LimitPolicy::TokenBucket { rate, period_secs, .. } => (*rate, *period_secs),
                LimitPolicy::FixedWindow { rate, period_secs } => (*rate, *period_secs),
            };
            if rate == 0 || period == 0 {
                return Err(StorageError::Config("rate limit rate and period must be > 0".into()));
            }
        }
        Ok(())
    }

    /// Cooldown window in milliseconds
    pub fn cooldown_ms(&self) -> i64 {
        (self.vote_cooldown_hours as i64) * 60 * 60 * 1000
    }

    /// Get SQLite database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("crowdbench.db")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.vote_cooldown_hours, 48);
        assert_eq!(config.cooldown_ms(), 48 * 3_600_000);
        assert_eq!(
            config.rate_limits.cast_votes_batch,
            LimitPolicy::FixedWindow { rate: 10, period_secs: 60 }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
http_port = 9000

[rate_limits.cast_vote]
kind = "token_bucket"
rate = 5
period_secs = 10
capacity = 1
"#,
        )
        .unwrap();

        assert_eq!(config.http_port, 9000);
        assert_eq!(config.vote_cooldown_hours, 48);
        assert_eq!(
            config.rate_limits.cast_vote,
            LimitPolicy::TokenBucket { rate: 5, period_secs: 10, capacity: 1 }
        );
        assert_eq!(config.maintenance.sweep_batch_size, 1000);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.vote_cooldown_hours = 24;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.vote_cooldown_hours, 24);
        assert_eq!(loaded.rate_limits.remove_vote, config.rate_limits.remove_vote);
    }

    #[test]
    fn test_zero_cooldown_rejected() {
        let config = Config { vote_cooldown_hours: 0, ..Config::default() };
        assert!(matches!(config.validate(), Err(StorageError::Config(_))));
    }

    #[test]
    fn test_zero_sweep_batches_rejected() {
        let mut config = Config::default();
        config.maintenance.sweep_max_batches = 0;
        assert!(matches!(config.validate(), Err(StorageError::Config(_))));
    }
}
