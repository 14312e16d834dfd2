//! Configuration for the ledger, matching loop and vesting engine.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, TradestreamError, constants};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matching: MatchingConfig,
    pub ledger: LedgerConfig,
    pub vesting: VestingConfig,
    pub log: LogConfig,
}

impl EngineConfig {
    /// Parse a JSON configuration document. Missing fields take defaults.
    ///
    /// # Errors
    /// Returns `Serialization` for malformed JSON and `Configuration` for
    /// values that fail [`EngineConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    ///
    /// # Errors
    /// Returns `Configuration` if the file cannot be read, otherwise as
    /// [`EngineConfig::from_json`].
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            TradestreamError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Load from the file named by `TRADESTREAM_CONFIG`, or defaults if unset.
    ///
    /// # Errors
    /// As [`EngineConfig::load`].
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(constants::CONFIG_ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// # Errors
    /// Returns `Configuration` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.matching.tick_interval_ms == 0 {
            return Err(TradestreamError::Configuration(
                "matching.tick_interval_ms must be > 0".into(),
            ));
        }
        if self.ledger.cas_retries == 0 {
            return Err(TradestreamError::Configuration(
                "ledger.cas_retries must be > 0".into(),
            ));
        }
        if self.vesting.claim_retries == 0 {
            return Err(TradestreamError::Configuration(
                "vesting.claim_retries must be > 0".into(),
            ));
        }
        if self.vesting.max_recipients == 0 {
            return Err(TradestreamError::Configuration(
                "vesting.max_recipients must be > 0".into(),
            ));
        }
        if self.vesting.max_duration_secs == 0
            || self.vesting.max_duration_secs > constants::MAX_STREAM_DURATION_SECS
        {
            return Err(TradestreamError::Configuration(format!(
                "vesting.max_duration_secs must be in 1..={}",
                constants::MAX_STREAM_DURATION_SECS
            )));
        }
        Ok(())
    }
}

/// Matching loop timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub tick_interval_ms: u64,
}

impl MatchingConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: constants::DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

/// Balance ledger tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Compare-and-swap attempts per single-key mutation.
    pub cas_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cas_retries: constants::DEFAULT_BALANCE_CAS_RETRIES,
        }
    }
}

/// Vesting engine limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VestingConfig {
    pub claim_retries: u32,
    pub max_recipients: usize,
    pub max_duration_secs: u64,
}

impl Default for VestingConfig {
    fn default() -> Self {
        Self {
            claim_retries: constants::DEFAULT_CLAIM_CAS_RETRIES,
            max_recipients: constants::MAX_RECIPIENTS_PER_STREAM,
            max_duration_secs: constants::MAX_STREAM_DURATION_SECS,
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: constants::DEFAULT_LOG_FILTER.to_string(),
            json: false,
        }
    }
}
