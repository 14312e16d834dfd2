//! In-memory implementation of every repository trait.
//!
//! All tables live behind one `RwLock`, so each trait method is atomic on its
//! own. Conditional writes check versions / statuses under the write guard,
//! which gives the same guarantees a versioned SQL row would.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tradestream_types::{
    Account, BalanceEntry, BalanceKey, Order, OrderId, OrderStatus, PendingCredit, RecipientId,
    Result, SettlementId, Stream, StreamId, StreamRecipient, StreamStatus, TradestreamError,
    UserId, VersionedBalance,
};

use crate::faults::FaultPlan;
use crate::repository::{
    AccountRepository, BalanceRepository, CreditJournal, OrderRepository, StreamRepository,
};

#[derive(Debug, Default)]
struct Tables {
    balances: HashMap<BalanceKey, VersionedBalance>,
    journal: BTreeMap<SettlementId, PendingCredit>,
    orders: HashMap<OrderId, Order>,
    streams: HashMap<StreamId, Stream>,
    recipients: HashMap<RecipientId, StreamRecipient>,
    accounts: HashMap<UserId, Account>,
    addresses: HashMap<String, UserId>,
}

/// Reference [`DurableStore`](crate::DurableStore) kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    faults: FaultPlan,
}

fn injected(what: &str) -> TradestreamError {
    TradestreamError::PersistenceFailure(format!("injected fault: {what}"))
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| TradestreamError::PersistenceFailure("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| TradestreamError::PersistenceFailure("memory store lock poisoned".into()))
    }

    /// Sum of `available + locked` over every row of `asset` in one mode.
    ///
    /// # Errors
    /// `PersistenceFailure` if the store lock is poisoned.
    pub fn total_supply(&self, asset: &str, is_demo: bool) -> Result<Decimal> {
        let tables = self.read()?;
        Ok(tables
            .balances
            .iter()
            .filter(|(key, _)| key.asset == asset && key.is_demo == is_demo)
            .fold(Decimal::ZERO, |sum, (_, row)| sum.saturating_add(row.entry.total())))
    }
}

/// Fault injection (tests only).
#[cfg(any(test, feature = "test-helpers"))]
impl MemoryStore {
    /// Fail the next `n` order inserts.
    pub fn fail_order_inserts(&self, n: u32) {
        FaultPlan::arm(&self.faults.order_inserts, n);
    }

    /// Fail the next `n` order status transitions.
    pub fn fail_order_transitions(&self, n: u32) {
        FaultPlan::arm(&self.faults.order_transitions, n);
    }

    /// Fail the next `n` stream inserts.
    pub fn fail_stream_inserts(&self, n: u32) {
        FaultPlan::arm(&self.faults.stream_inserts, n);
    }

    /// Fail the next `n` recipient claim updates.
    pub fn fail_claim_updates(&self, n: u32) {
        FaultPlan::arm(&self.faults.claim_updates, n);
    }

    /// Fail the next `n` journal writes.
    pub fn fail_journal_writes(&self, n: u32) {
        FaultPlan::arm(&self.faults.journal_writes, n);
    }

    /// Fail the next `n` journal clears.
    pub fn fail_journal_clears(&self, n: u32) {
        FaultPlan::arm(&self.faults.journal_clears, n);
    }

    /// Report a version conflict on the next `n` balance writes.
    pub fn conflict_balance_writes(&self, n: u32) {
        FaultPlan::arm(&self.faults.balance_conflicts, n);
    }

    /// Fail the next `n` writes to one balance row.
    pub fn fail_balance_writes_for(&self, key: &BalanceKey, n: u32) {
        if let Ok(mut armed) = self.faults.balance_writes.lock() {
            armed.insert(key.clone(), n);
        }
    }
}

#[async_trait]
impl BalanceRepository for MemoryStore {
    async fn load_balance(&self, key: &BalanceKey) -> Result<Option<VersionedBalance>> {
        Ok(self.read()?.balances.get(key).cloned())
    }

    async fn write_balance(
        &self,
        key: &BalanceKey,
        expected_version: Option<u64>,
        entry: &BalanceEntry,
    ) -> Result<bool> {
        if self.faults.take_balance_write(key) {
            return Err(injected("balance write"));
        }
        if FaultPlan::take(&self.faults.balance_conflicts) {
            return Ok(false);
        }
        if !entry.is_valid() {
            return Err(TradestreamError::Internal(format!(
                "refusing negative balance for {key}"
            )));
        }

        let mut tables = self.write()?;
        let current = tables.balances.get(key).map(|row| row.version);
        if current != expected_version {
            return Ok(false);
        }
        let version = current.map_or(1, |v| v + 1);
        tables.balances.insert(
            key.clone(),
            VersionedBalance {
                entry: entry.clone(),
                version,
            },
        );
        Ok(true)
    }

    async fn balances_for_user(
        &self,
        user_id: UserId,
        is_demo: bool,
    ) -> Result<Vec<(BalanceKey, BalanceEntry)>> {
        let tables = self.read()?;
        let mut rows: Vec<_> = tables
            .balances
            .iter()
            .filter(|(key, _)| key.user_id == user_id && key.is_demo == is_demo)
            .map(|(key, row)| (key.clone(), row.entry.clone()))
            .collect();
        rows.sort_by(|a, b| a.0.asset.cmp(&b.0.asset));
        Ok(rows)
    }
}

#[async_trait]
impl CreditJournal for MemoryStore {
    async fn record_pending_credit(&self, credit: &PendingCredit) -> Result<()> {
        if FaultPlan::take(&self.faults.journal_writes) {
            return Err(injected("journal write"));
        }
        self.write()?
            .journal
            .entry(credit.id)
            .or_insert_with(|| credit.clone());
        Ok(())
    }

    async fn pending_credits(&self) -> Result<Vec<PendingCredit>> {
        let mut credits: Vec<_> = self.read()?.journal.values().cloned().collect();
        credits.sort_by_key(|c| c.recorded_at);
        Ok(credits)
    }

    async fn clear_pending_credit(&self, id: SettlementId) -> Result<()> {
        if FaultPlan::take(&self.faults.journal_clears) {
            return Err(injected("journal clear"));
        }
        self.write()?.journal.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        if FaultPlan::take(&self.faults.order_inserts) {
            return Err(injected("order insert"));
        }
        let mut tables = self.write()?;
        if tables.orders.contains_key(&order.id) {
            return Err(TradestreamError::PersistenceFailure(format!(
                "duplicate order {}",
                order.id
            )));
        }
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let tables = self.read()?;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    async fn orders_for_user(
        &self,
        user_id: UserId,
        status: OrderStatus,
        is_demo: bool,
    ) -> Result<Vec<Order>> {
        let tables = self.read()?;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id && o.status == status && o.is_demo == is_demo)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    async fn transition_order(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
        filled: Decimal,
    ) -> Result<Option<Order>> {
        if FaultPlan::take(&self.faults.order_transitions) {
            return Err(injected("order transition"));
        }
        let mut tables = self.write()?;
        let order = tables
            .orders
            .get_mut(&id)
            .ok_or(TradestreamError::OrderNotFound(id))?;
        if !from.contains(&order.status) {
            return Ok(None);
        }
        order.status = to;
        order.filled = filled;
        Ok(Some(order.clone()))
    }
}

#[async_trait]
impl StreamRepository for MemoryStore {
    async fn insert_stream(&self, stream: &Stream, recipients: &[StreamRecipient]) -> Result<()> {
        if FaultPlan::take(&self.faults.stream_inserts) {
            return Err(injected("stream insert"));
        }
        let mut tables = self.write()?;
        if tables.streams.contains_key(&stream.id) {
            return Err(TradestreamError::PersistenceFailure(format!(
                "duplicate stream {}",
                stream.id
            )));
        }
        tables.streams.insert(stream.id, stream.clone());
        for recipient in recipients {
            tables.recipients.insert(recipient.id, recipient.clone());
        }
        Ok(())
    }

    async fn get_stream(&self, id: StreamId) -> Result<Option<Stream>> {
        Ok(self.read()?.streams.get(&id).cloned())
    }

    async fn streams_for_employer(&self, employer_id: UserId) -> Result<Vec<Stream>> {
        let tables = self.read()?;
        let mut streams: Vec<_> = tables
            .streams
            .values()
            .filter(|s| s.employer_id == employer_id)
            .cloned()
            .collect();
        streams.sort_by_key(|s| s.id);
        Ok(streams)
    }

    async fn get_recipient(&self, id: RecipientId) -> Result<Option<StreamRecipient>> {
        Ok(self.read()?.recipients.get(&id).cloned())
    }

    async fn recipients_for_stream(&self, stream_id: StreamId) -> Result<Vec<StreamRecipient>> {
        let tables = self.read()?;
        let mut recipients: Vec<_> = tables
            .recipients
            .values()
            .filter(|r| r.stream_id == stream_id)
            .cloned()
            .collect();
        recipients.sort_by_key(|r| r.id);
        Ok(recipients)
    }

    async fn recipients_for_user(&self, user_id: UserId) -> Result<Vec<StreamRecipient>> {
        let tables = self.read()?;
        let mut recipients: Vec<_> = tables
            .recipients
            .values()
            .filter(|r| r.recipient_user_id == user_id)
            .cloned()
            .collect();
        recipients.sort_by_key(|r| r.id);
        Ok(recipients)
    }

    async fn update_recipient_claim(
        &self,
        updated: &StreamRecipient,
        expected_version: u64,
    ) -> Result<bool> {
        if FaultPlan::take(&self.faults.claim_updates) {
            return Err(injected("recipient claim update"));
        }
        let mut tables = self.write()?;
        let row = tables
            .recipients
            .get_mut(&updated.id)
            .ok_or(TradestreamError::StreamRecipientNotFound(updated.id))?;
        if row.version != expected_version {
            return Ok(false);
        }
        row.withdrawn_amount = updated.withdrawn_amount;
        row.last_claim_time = updated.last_claim_time;
        row.version = expected_version + 1;
        Ok(true)
    }

    async fn adjust_remaining_allocation(&self, id: StreamId, delta: Decimal) -> Result<Stream> {
        let mut tables = self.write()?;
        let stream = tables
            .streams
            .get_mut(&id)
            .ok_or(TradestreamError::StreamNotFound(id))?;
        stream.remaining_allocation = (stream.remaining_allocation + delta)
            .max(Decimal::ZERO)
            .min(stream.total_allocation);
        stream.status = if stream.remaining_allocation.is_zero() {
            StreamStatus::Completed
        } else {
            StreamStatus::Active
        };
        Ok(stream.clone())
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<()> {
        let mut tables = self.write()?;
        if tables.addresses.contains_key(&account.address) {
            return Err(TradestreamError::PersistenceFailure(format!(
                "address {} already registered",
                account.address
            )));
        }
        tables
            .addresses
            .insert(account.address.clone(), account.id);
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, id: UserId) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn account_by_address(&self, address: &str) -> Result<Option<Account>> {
        let tables = self.read()?;
        Ok(tables
            .addresses
            .get(address)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }
}
