use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::issuance::{CallTimeouts, ChainId, RetryPolicy, SweeperConfig};

/// Upper bound for any single external call
pub const MAX_TIMEOUT_MS: u64 = 300_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub issuance: IssuanceConfig,
    /// PostgreSQL connection URL; in-memory store when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IssuanceConfig {
    /// Zero waives the payment step
    pub mint_fee: u64,
    /// Primary ledger collection (token id) the simulated ledger mints into
    pub collection: String,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub sweeper: SweeperSettings,
    #[serde(default = "default_chains")]
    pub chains: Vec<ChainConfig>,
    /// Anchoring trigger queue depth
    #[serde(default = "default_trigger_buffer")]
    pub trigger_buffer: usize,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            mint_fee: 1,
            collection: "0.0.4821".to_string(),
            timeouts: TimeoutConfig::default(),
            sweeper: SweeperSettings::default(),
            chains: default_chains(),
            trigger_buffer: default_trigger_buffer(),
        }
    }
}

fn default_chains() -> Vec<ChainConfig> {
    vec![
        ChainConfig {
            id: ChainId::XRP.to_string(),
            network: "testnet".to_string(),
        },
        ChainConfig {
            id: ChainId::ALGORAND.to_string(),
            network: "testnet".to_string(),
        },
    ]
}

fn default_trigger_buffer() -> usize {
    1024
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChainConfig {
    pub id: String,
    pub network: String,
}

/// Per-call deadlines in milliseconds
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub payment_ms: u64,
    pub ledger_ms: u64,
    pub anchor_ms: u64,
    /// Per-statement limit on the PostgreSQL store
    #[serde(default = "default_store_ms")]
    pub store_ms: u64,
}

fn default_store_ms() -> u64 {
    5_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            payment_ms: 15_000,
            ledger_ms: 15_000,
            anchor_ms: 10_000,
            store_ms: default_store_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn to_call_timeouts(&self) -> CallTimeouts {
        CallTimeouts {
            payment: Duration::from_millis(self.payment_ms),
            ledger: Duration::from_millis(self.ledger_ms),
            anchor: Duration::from_millis(self.anchor_ms),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SweeperSettings {
    pub interval_secs: u64,
    pub issue_retry_after_secs: u64,
    pub anchor_retry_after_secs: u64,
    pub max_issue_attempts: u32,
    pub max_anchor_attempts: u32,
    pub batch_size: usize,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub backoff_jitter: f64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            issue_retry_after_secs: 60,
            anchor_retry_after_secs: 120,
            max_issue_attempts: 5,
            max_anchor_attempts: 5,
            batch_size: 100,
            backoff_base_secs: 30,
            backoff_max_secs: 1800,
            backoff_jitter: 0.2,
        }
    }
}

impl SweeperSettings {
    pub fn to_sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.interval_secs),
            issue_retry_after: Duration::from_secs(self.issue_retry_after_secs),
            anchor_retry_after: Duration::from_secs(self.anchor_retry_after_secs),
            max_issue_attempts: self.max_issue_attempts,
            max_anchor_attempts: self.max_anchor_attempts,
            batch_size: self.batch_size,
            backoff: RetryPolicy {
                base: Duration::from_secs(self.backoff_base_secs),
                max: Duration::from_secs(self.backoff_max_secs),
                jitter: self.backoff_jitter,
            },
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`, apply environment overrides, validate
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// `PAYMENT_TIMEOUT_MS`, `HEDERA_TIMEOUT_MS` (ledger), `ANCHOR_TIMEOUT_MS` or `XRPL_TIMEOUT_MS`,
    /// `STORE_TIMEOUT_MS`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeouts = &mut self.issuance.timeouts;
        if let Some(ms) = parse_ms(&lookup, "PAYMENT_TIMEOUT_MS")? {
            timeouts.payment_ms = ms;
        }
        if let Some(ms) = parse_ms(&lookup, "HEDERA_TIMEOUT_MS")? {
            timeouts.ledger_ms = ms;
        }
        if let Some(ms) = parse_ms(&lookup, "XRPL_TIMEOUT_MS")? {
            timeouts.anchor_ms = ms;
        }
        // The generic name wins over the chain-specific one
        if let Some(ms) = parse_ms(&lookup, "ANCHOR_TIMEOUT_MS")? {
            timeouts.anchor_ms = ms;
        }
        if let Some(ms) = parse_ms(&lookup, "STORE_TIMEOUT_MS")? {
            timeouts.store_ms = ms;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.issuance.timeouts;
        for (name, ms) in [
            ("timeouts.payment_ms", t.payment_ms),
            ("timeouts.ledger_ms", t.ledger_ms),
            ("timeouts.anchor_ms", t.anchor_ms),
            ("timeouts.store_ms", t.store_ms),
        ] {
            if ms == 0 || ms > MAX_TIMEOUT_MS {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 1 and {} ms, got {}",
                    name, MAX_TIMEOUT_MS, ms
                )));
            }
        }

        let s = &self.issuance.sweeper;
        if s.interval_secs == 0 {
            return Err(ConfigError::Invalid("sweeper.interval_secs must be > 0".into()));
        }
        if s.max_issue_attempts == 0 || s.max_anchor_attempts == 0 {
            return Err(ConfigError::Invalid("sweeper attempt maxima must be > 0".into()));
        }
        if s.batch_size == 0 {
            return Err(ConfigError::Invalid("sweeper.batch_size must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&s.backoff_jitter) {
            return Err(ConfigError::Invalid(format!(
                "sweeper.backoff_jitter must be within 0.0..=1.0, got {}",
                s.backoff_jitter
            )));
        }

        let mut seen = HashSet::new();
        for chain in &self.issuance.chains {
            let id = ChainId::new(&chain.id);
            if id.as_str().is_empty() {
                return Err(ConfigError::Invalid("chain id must not be empty".into()));
            }
            if !seen.insert(id.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate chain {}", id)));
            }
        }

        if self.issuance.trigger_buffer == 0 {
            return Err(ConfigError::Invalid("issuance.trigger_buffer must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_ms<F>(lookup: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
    }
}
