//! Repository traits, one per entity, exposing only the query shapes the
//! engines use.
//!
//! Every write that the engines rely on for mutual exclusion is a conditional
//! write: balances and stream recipients carry a row version, orders move
//! between statuses with a compare-and-set.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tradestream_types::{
    Account, BalanceEntry, BalanceKey, Order, OrderId, OrderStatus, PendingCredit, RecipientId,
    Result, SettlementId, Stream, StreamId, StreamRecipient, UserId, VersionedBalance,
};

/// Balance rows keyed by `(user, asset, mode)`.
#[async_trait]
pub trait BalanceRepository: Send + Sync {
    /// Read a row with its version, `None` if it was never created.
    async fn load_balance(&self, key: &BalanceKey) -> Result<Option<VersionedBalance>>;

    /// Conditional write.
    ///
    /// - `expected_version == None`: create the row; fails if it exists.
    /// - `expected_version == Some(v)`: update only if the stored version is `v`.
    ///
    /// Returns `Ok(false)` when the condition does not hold. A successful
    /// write bumps the version by one (new rows start at 1).
    async fn write_balance(
        &self,
        key: &BalanceKey,
        expected_version: Option<u64>,
        entry: &BalanceEntry,
    ) -> Result<bool>;

    /// All rows of a user in one mode.
    async fn balances_for_user(
        &self,
        user_id: UserId,
        is_demo: bool,
    ) -> Result<Vec<(BalanceKey, BalanceEntry)>>;
}

/// Credits whose debit leg already landed.
#[async_trait]
pub trait CreditJournal: Send + Sync {
    /// Record a credit for replay. Recording the same id twice is a no-op.
    async fn record_pending_credit(&self, credit: &PendingCredit) -> Result<()>;

    async fn pending_credits(&self) -> Result<Vec<PendingCredit>>;

    async fn clear_pending_credit(&self, id: SettlementId) -> Result<()>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Fails if an order with the same id exists.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>>;

    async fn orders_for_user(
        &self,
        user_id: UserId,
        status: OrderStatus,
        is_demo: bool,
    ) -> Result<Vec<Order>>;

    /// Compare-and-set status transition.
    ///
    /// Moves the order to `to` and sets `filled` only if its current status
    /// is one of `from`. Returns the updated order, or `None` when the status
    /// did not match (another writer got there first).
    ///
    /// # Errors
    /// `OrderNotFound` if the order does not exist.
    async fn transition_order(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
        filled: Decimal,
    ) -> Result<Option<Order>>;
}

#[async_trait]
pub trait StreamRepository: Send + Sync {
    /// Persist a stream together with all of its recipient schedules.
    async fn insert_stream(&self, stream: &Stream, recipients: &[StreamRecipient]) -> Result<()>;

    async fn get_stream(&self, id: StreamId) -> Result<Option<Stream>>;

    async fn streams_for_employer(&self, employer_id: UserId) -> Result<Vec<Stream>>;

    async fn get_recipient(&self, id: RecipientId) -> Result<Option<StreamRecipient>>;

    async fn recipients_for_stream(&self, stream_id: StreamId) -> Result<Vec<StreamRecipient>>;

    async fn recipients_for_user(&self, user_id: UserId) -> Result<Vec<StreamRecipient>>;

    /// Write `withdrawn_amount` and `last_claim_time` if the stored row is
    /// still at `expected_version`. Bumps the version on success.
    async fn update_recipient_claim(
        &self,
        updated: &StreamRecipient,
        expected_version: u64,
    ) -> Result<bool>;

    /// Atomically add `delta` to `remaining_allocation`, clamped to
    /// `[0, total_allocation]`. Marks the stream completed at zero.
    ///
    /// # Errors
    /// `StreamNotFound` if the stream does not exist.
    async fn adjust_remaining_allocation(&self, id: StreamId, delta: Decimal) -> Result<Stream>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Fails if the address is already registered.
    async fn insert_account(&self, account: &Account) -> Result<()>;

    async fn get_account(&self, id: UserId) -> Result<Option<Account>>;

    async fn account_by_address(&self, address: &str) -> Result<Option<Account>>;
}

/// Everything the engines need from durable storage.
pub trait DurableStore:
    BalanceRepository + CreditJournal + OrderRepository + StreamRepository + AccountRepository
{
}

impl<T> DurableStore for T where
    T: BalanceRepository + CreditJournal + OrderRepository + StreamRepository + AccountRepository
{
}
