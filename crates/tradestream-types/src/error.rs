//! Error types for the Tradestream engines.
//!
//! All errors use the `TS_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Order errors
//! - 2xx: Balance errors
//! - 3xx: Stream / vesting errors
//! - 4xx: Market / price errors
//! - 6xx: Settlement errors
//! - 9xx: Persistence, configuration and internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{OrderId, OrderStatus, RecipientId, StreamId};

/// Central error enum for all Tradestream operations.
#[derive(Debug, Error)]
pub enum TradestreamError {
    // =================================================================
    // Order Errors (1xx)
    // =================================================================
    /// The requested order does not exist (or belongs to someone else).
    #[error("TS_ERR_100: Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order failed validation.
    #[error("TS_ERR_101: Invalid order: {reason}")]
    InvalidOrder { reason: String },

    /// The order is not in `open` or `partial` status.
    #[error("TS_ERR_102: Order {id} cannot be cancelled in status {status}")]
    OrderNotCancellable { id: OrderId, status: OrderStatus },

    // =================================================================
    // Balance Errors (2xx)
    // =================================================================
    /// Not enough available balance to lock.
    #[error("TS_ERR_200: Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    /// A ledger amount was zero or negative where a positive one is required.
    #[error("TS_ERR_201: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    // =================================================================
    // Stream Errors (3xx)
    // =================================================================
    #[error("TS_ERR_300: Stream not found: {0}")]
    StreamNotFound(StreamId),

    #[error("TS_ERR_301: Stream recipient not found: {0}")]
    StreamRecipientNotFound(RecipientId),

    /// The requested withdrawal is larger than what has accrued.
    #[error("TS_ERR_302: Claim of {requested} exceeds claimable {claimable}")]
    ClaimExceedsAvailable {
        requested: Decimal,
        claimable: Decimal,
    },

    /// The stream definition failed validation.
    #[error("TS_ERR_303: Invalid stream: {reason}")]
    InvalidStream { reason: String },

    /// A recipient address does not resolve to any account.
    #[error("TS_ERR_304: No account for address {0}")]
    AccountNotFound(String),

    /// The caller is not the recipient of this schedule.
    #[error("TS_ERR_305: Caller is not the recipient of {0}")]
    NotRecipient(RecipientId),

    // =================================================================
    // Market Errors (4xx)
    // =================================================================
    /// The oracle has no price for this market right now.
    #[error("TS_ERR_400: Price unavailable for market {market}")]
    PriceUnavailable { market: String },

    // =================================================================
    // Settlement Errors (6xx)
    // =================================================================
    /// A debit leg was applied but its credit leg could be neither written
    /// nor journalled. Needs operator attention.
    #[error("TS_ERR_600: Settlement incomplete: {reason}")]
    SettlementIncomplete { reason: String },

    // =================================================================
    // Persistence / General (9xx)
    // =================================================================
    /// The store is unreachable or rejected the write.
    #[error("TS_ERR_900: Persistence failure: {0}")]
    PersistenceFailure(String),

    /// A compare-and-swap lost against a concurrent writer.
    #[error("TS_ERR_901: Version conflict on {record}")]
    VersionConflict { record: String },

    #[error("TS_ERR_902: Configuration error: {0}")]
    Configuration(String),

    #[error("TS_ERR_903: Serialization error: {0}")]
    Serialization(String),

    #[error("TS_ERR_999: Internal error: {0}")]
    Internal(String),
}

impl TradestreamError {
    /// Errors that should be retried on the next matching tick rather than
    /// reported to a caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PriceUnavailable { .. }
                | Self::PersistenceFailure(_)
                | Self::VersionConflict { .. }
        )
    }

    /// Errors that represent a rejected request.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. }
                | Self::OrderNotCancellable { .. }
                | Self::ClaimExceedsAvailable { .. }
                | Self::InvalidOrder { .. }
                | Self::InvalidAmount { .. }
                | Self::InvalidStream { .. }
                | Self::AccountNotFound(_)
                | Self::NotRecipient(_)
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, TradestreamError>;

impl From<std::io::Error> for TradestreamError {
    fn from(err: std::io::Error) -> Self {
        Self::PersistenceFailure(err.to_string())
    }
}

impl From<serde_json::Error> for TradestreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
