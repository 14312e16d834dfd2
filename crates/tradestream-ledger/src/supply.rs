//! Supply conservation tracking.
//!
//! The ledger records every net flow it applies, per `(asset, mode)`:
//! ```text
//! Σ(available + locked) == Σ(deposits) + Σ(credits) - Σ(burns)
//! ```
//! Lock and unlock move value inside a row and never appear here. Comparing
//! [`SupplyTracker::expected`] with the stored rows catches any mutation that
//! bypassed the four ledger primitives.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tradestream_types::{Asset, Result, TradestreamError};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SupplyFlows {
    pub deposits: Decimal,
    pub credits: Decimal,
    pub burns: Decimal,
}

impl SupplyFlows {
    #[must_use]
    pub fn net(&self) -> Decimal {
        self.deposits
            .saturating_add(self.credits)
            .saturating_sub(self.burns)
    }
}

/// Per-asset, per-mode net flow counters.
#[derive(Debug, Default)]
pub struct SupplyTracker {
    flows: HashMap<(Asset, bool), SupplyFlows>,
}

impl SupplyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn flows_mut(&mut self, asset: &str, is_demo: bool) -> &mut SupplyFlows {
        self.flows.entry((asset.to_string(), is_demo)).or_default()
    }

    pub fn record_deposit(&mut self, asset: &str, is_demo: bool, amount: Decimal) {
        let flows = self.flows_mut(asset, is_demo);
        flows.deposits = flows.deposits.saturating_add(amount);
    }

    pub fn record_credit(&mut self, asset: &str, is_demo: bool, amount: Decimal) {
        let flows = self.flows_mut(asset, is_demo);
        flows.credits = flows.credits.saturating_add(amount);
    }

    pub fn record_burn(&mut self, asset: &str, is_demo: bool, amount: Decimal) {
        let flows = self.flows_mut(asset, is_demo);
        flows.burns = flows.burns.saturating_add(amount);
    }

    #[must_use]
    pub fn flows(&self, asset: &str, is_demo: bool) -> SupplyFlows {
        self.flows
            .get(&(asset.to_string(), is_demo))
            .cloned()
            .unwrap_or_default()
    }

    /// Expected `Σ(available + locked)` for an asset.
    #[must_use]
    pub fn expected(&self, asset: &str, is_demo: bool) -> Decimal {
        self.flows(asset, is_demo).net()
    }

    /// # Errors
    /// Returns `Internal` if `actual` differs from the tracked supply.
    pub fn verify(&self, asset: &str, is_demo: bool, actual: Decimal) -> Result<()> {
        let flows = self.flows(asset, is_demo);
        let expected = flows.net();
        if actual != expected {
            return Err(TradestreamError::Internal(format!(
                "supply of {asset} (demo={is_demo}) is {actual}, expected {expected} \
                 (deposits={}, credits={}, burns={})",
                flows.deposits, flows.credits, flows.burns,
            )));
        }
        Ok(())
    }
}
