//! Vesting stream types.
//!
//! An employer locks the full allocation of a [`Stream`] up front; each
//! [`StreamRecipient`] then accrues linearly from `start_time` to `end_time`
//! and withdraws whatever has accrued.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{RecipientId, StreamId, UserId};

/// Lifecycle status of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Active,
    /// Every recipient has withdrawn their full allocation.
    Completed,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// An employer's funding commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: StreamId,
    pub employer_id: UserId,
    pub name: String,
    pub token_symbol: String,
    pub total_allocation: Decimal,
    /// Tracking only; balances are authoritative.
    pub remaining_allocation: Decimal,
    pub status: StreamStatus,
    pub is_demo: bool,
    pub created_at: DateTime<Utc>,
}

/// One recipient's linear vesting schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecipient {
    pub id: RecipientId,
    pub stream_id: StreamId,
    pub recipient_address: String,
    /// Account the address resolved to at stream creation.
    pub recipient_user_id: UserId,
    pub allocation: Decimal,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// `allocation / duration_seconds`.
    pub rate_per_second: Decimal,
    pub withdrawn_amount: Decimal,
    pub last_claim_time: DateTime<Utc>,
    /// Row version for compare-and-swap claims. Starts at 0.
    pub version: u64,
}

impl StreamRecipient {
    /// Allocation not yet withdrawn.
    #[must_use]
    pub fn unwithdrawn(&self) -> Decimal {
        self.allocation - self.withdrawn_amount
    }

    #[must_use]
    pub fn is_fully_withdrawn(&self) -> bool {
        self.withdrawn_amount >= self.allocation
    }
}

/// Requested recipient at stream creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientSpec {
    pub address: String,
    pub amount: Decimal,
    pub duration_seconds: u64,
}

impl RecipientSpec {
    #[must_use]
    pub fn new(address: impl Into<String>, amount: Decimal, duration_seconds: u64) -> Self {
        Self {
            address: address.into(),
            amount,
            duration_seconds,
        }
    }
}
