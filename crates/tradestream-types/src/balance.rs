//! Balance tracking types for the Tradestream ledger.
//!
//! Every `(user, asset, mode)` key has an `available` balance (usable for new
//! orders, streams and withdrawal) and a `locked` balance (reserved against
//! open orders or stream commitments).

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{SettlementId, UserId};

/// Type alias for asset identifiers (e.g., "BCH", "USDT", "ETH").
pub type Asset = String;

/// Ledger key: one row per user, asset and trading mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BalanceKey {
    pub user_id: UserId,
    pub asset: Asset,
    /// Demo balances are a separate ledger and never mix with real funds.
    pub is_demo: bool,
}

impl BalanceKey {
    #[must_use]
    pub fn new(user_id: UserId, asset: impl Into<String>, is_demo: bool) -> Self {
        Self {
            user_id,
            asset: asset.into(),
            is_demo,
        }
    }
}

impl fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_demo { "demo" } else { "live" };
        write!(f, "{}/{}/{mode}", self.user_id, self.asset)
    }
}

/// A single balance row. Both fields are never negative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceEntry {
    /// Free to lock or withdraw.
    pub available: Decimal,
    /// Reserved against open orders or stream commitments.
    pub locked: Decimal,
}

impl BalanceEntry {
    /// Create a zero balance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
        }
    }

    /// Total balance (available + locked), saturating at `Decimal::MAX`.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.available.saturating_add(self.locked)
    }

    /// Whether this entry has no balance at all.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.available.is_zero() && self.locked.is_zero()
    }

    /// Whether both components are non-negative.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.available.is_sign_negative() && !self.locked.is_sign_negative()
    }
}

impl Default for BalanceEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// A balance row as read from the store, with the version used for
/// compare-and-swap writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBalance {
    pub entry: BalanceEntry,
    pub version: u64,
}

/// A credit leg whose matching debit has already been applied but which
/// could not itself be written. Replayed until it lands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingCredit {
    pub id: SettlementId,
    pub key: BalanceKey,
    pub amount: Decimal,
    pub recorded_at: DateTime<Utc>,
}
