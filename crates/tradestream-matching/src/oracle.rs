//! Price oracle seam.
//!
//! The matching engine only needs "best current known price" per market key.
//! Third-party market-data APIs sit behind [`PriceOracle`]; the engine never
//! sees their wire format.

use std::{
    collections::HashMap,
    sync::{
        RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tradestream_types::{MarketKey, Result, TradestreamError};

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current price for `market`.
    ///
    /// # Errors
    /// `PriceUnavailable` when no price is known.
    async fn resolve_price(&self, market: &MarketKey) -> Result<Decimal>;
}

/// Oracle backed by a table of prices set by the host process (or tests).
#[derive(Debug, Default)]
pub struct StaticPriceOracle {
    prices: RwLock<HashMap<MarketKey, Decimal>>,
    lookups: AtomicUsize,
}

impl StaticPriceOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, market: MarketKey, price: Decimal) {
        if let Ok(mut prices) = self.prices.write() {
            prices.insert(market, price);
        }
    }

    pub fn clear_price(&self, market: &MarketKey) {
        if let Ok(mut prices) = self.prices.write() {
            prices.remove(market);
        }
    }

    /// Number of `resolve_price` calls served so far.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn resolve_price(&self, market: &MarketKey) -> Result<Decimal> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let price = self
            .prices
            .read()
            .ok()
            .and_then(|prices| prices.get(market).copied());
        match price {
            Some(p) if p > Decimal::ZERO => Ok(p),
            _ => Err(TradestreamError::PriceUnavailable {
                market: market.to_string(),
            }),
        }
    }
}
