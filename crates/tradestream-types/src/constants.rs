//! System-wide constants for the Tradestream engines.

/// Default interval between matching ticks in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 5000;

/// Compare-and-swap attempts per balance mutation before giving up.
pub const DEFAULT_BALANCE_CAS_RETRIES: u32 = 16;

/// Compare-and-swap attempts per withdrawal claim before giving up.
pub const DEFAULT_CLAIM_CAS_RETRIES: u32 = 8;

/// Upper bound on a single recipient's vesting duration (10 years).
pub const MAX_STREAM_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Maximum recipients in one stream.
pub const MAX_RECIPIENTS_PER_STREAM: usize = 500;

/// Default `tracing` filter directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "TRADESTREAM_CONFIG";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "Tradestream";
