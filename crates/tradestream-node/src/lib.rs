//! # tradestream-node
//!
//! Process wiring: one [`MemoryStore`] shared by the ledger, the matching
//! engine and the vesting engine, plus the request-layer facades built on
//! them. The binary in `main.rs` adds config loading, logging and the
//! matching loop lifecycle.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tradestream_ledger::BalanceLedger;
use tradestream_matching::{MatchingEngine, MatchingHandle, OrderService, StaticPriceOracle};
use tradestream_store::MemoryStore;
use tradestream_types::{EngineConfig, LogConfig, Result, TradestreamError, constants};
use tradestream_vesting::{StreamService, VestingEngine};

/// Every component of a running process.
pub struct Node {
    pub config: EngineConfig,
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<BalanceLedger>,
    pub oracle: Arc<StaticPriceOracle>,
    pub matching: Arc<MatchingEngine>,
    pub orders: OrderService,
    pub streams: StreamService,
}

impl Node {
    /// Wire components from a validated config.
    ///
    /// # Errors
    /// `Configuration` if the config fails validation.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(BalanceLedger::new(
            store.clone(),
            store.clone(),
            &config.ledger,
        ));
        let oracle = Arc::new(StaticPriceOracle::new());
        let matching = Arc::new(MatchingEngine::new(
            store.clone(),
            ledger.clone(),
            oracle.clone(),
        ));
        let orders = OrderService::new(store.clone(), ledger.clone(), oracle.clone());
        let vesting = Arc::new(VestingEngine::new(
            store.clone(),
            store.clone(),
            ledger.clone(),
            config.vesting.clone(),
        ));
        let streams = StreamService::new(vesting);

        Ok(Self {
            config,
            store,
            ledger,
            oracle,
            matching,
            orders,
            streams,
        })
    }

    /// Start the matching loop at the configured interval.
    pub fn start_matching(&self) -> MatchingHandle {
        self.matching.start(self.config.matching.tick_interval())
    }
}

/// `RUST_LOG` if set, otherwise the configured filter.
///
/// # Errors
/// `Configuration` for an unparseable filter.
pub fn log_filter(log: &LogConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.filter))
        .map_err(|err| TradestreamError::Configuration(format!("log filter {:?}: {err}", log.filter)))
}

/// Install the global `tracing` subscriber.
///
/// # Errors
/// `Configuration` for a bad filter or if a subscriber is already set.
pub fn init_tracing(log: &LogConfig) -> Result<()> {
    let filter = log_filter(log)?;
    let installed = if log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };
    installed.map_err(|err| TradestreamError::Configuration(format!("tracing init: {err}")))?;
    tracing::debug!(filter = %log.filter, json = log.json, "Logging initialised");
    Ok(())
}

/// One-line startup banner.
#[must_use]
pub fn banner(config: &EngineConfig) -> String {
    format!(
        "{} v{} (tick {} ms, cas retries {}, claim retries {})",
        constants::ENGINE_NAME,
        constants::VERSION,
        config.matching.tick_interval_ms,
        config.ledger.cas_retries,
        config.vesting.claim_retries
    )
}
