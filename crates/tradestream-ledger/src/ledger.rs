//! Balance ledger over versioned balance rows.
//!
//! The [`BalanceLedger`] owns every balance mutation. Each primitive is a
//! read-modify-write on a single `(user, asset, mode)` row, committed with a
//! compare-and-swap on the row version and retried on conflict, so concurrent
//! callers on the same key observe a total order.
//!
//! The lifecycle of funds:
//! 1. `deposit` → external funding (available increases)
//! 2. `lock_funds` → order placed / stream created (available → locked)
//! 3. `process_trade` / `transfer_locked_to_available` → locked funds burned,
//!    counter-asset or counterparty credited
//! 4. `unlock_funds` → order cancelled (locked → available)

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use tradestream_store::{BalanceRepository, CreditJournal};
use tradestream_types::{
    BalanceEntry, BalanceKey, LedgerConfig, PendingCredit, Result, SettlementId, TradestreamError,
    UserId,
};

use crate::supply::SupplyTracker;

/// How the credit leg of a settlement landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    /// Credited to the receiver's available balance.
    Applied,
    /// The write failed after the debit landed; journalled for replay.
    Deferred,
    /// Nothing to credit.
    Skipped,
}

/// Per-(user, asset, mode) balance ledger.
pub struct BalanceLedger {
    balances: Arc<dyn BalanceRepository>,
    journal: Arc<dyn CreditJournal>,
    cas_retries: u32,
    supply: Mutex<SupplyTracker>,
}

fn require_positive(amount: Decimal, op: &str) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(TradestreamError::InvalidAmount {
            reason: format!("{op} amount must be positive, got {amount}"),
        });
    }
    Ok(())
}

fn checked_credit(balance: Decimal, amount: Decimal) -> Result<Decimal> {
    balance
        .checked_add(amount)
        .ok_or_else(|| TradestreamError::InvalidAmount {
            reason: format!("balance {balance} + {amount} overflows"),
        })
}

impl BalanceLedger {
    #[must_use]
    pub fn new(
        balances: Arc<dyn BalanceRepository>,
        journal: Arc<dyn CreditJournal>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            balances,
            journal,
            cas_retries: config.cas_retries.max(1),
            supply: Mutex::new(SupplyTracker::new()),
        }
    }

    // =================================================================
    // Queries
    // =================================================================

    /// Current balance. A key with no row is a zero balance, not an error.
    pub async fn get_balance(&self, key: &BalanceKey) -> Result<BalanceEntry> {
        Ok(self
            .balances
            .load_balance(key)
            .await?
            .map(|row| row.entry)
            .unwrap_or_default())
    }

    /// All of a user's balances in one mode, sorted by asset.
    pub async fn balances_for_user(
        &self,
        user_id: UserId,
        is_demo: bool,
    ) -> Result<Vec<(BalanceKey, BalanceEntry)>> {
        self.balances.balances_for_user(user_id, is_demo).await
    }

    /// Net supply this ledger has applied for an asset since start-up.
    #[must_use]
    pub fn expected_supply(&self, asset: &str, is_demo: bool) -> Decimal {
        self.supply
            .lock()
            .map(|s| s.expected(asset, is_demo))
            .unwrap_or_default()
    }

    // =================================================================
    // Core operations
    // =================================================================

    /// Credit external funds to the available balance.
    pub async fn deposit(&self, key: &BalanceKey, amount: Decimal) -> Result<()> {
        require_positive(amount, "deposit")?;
        self.mutate(key, "deposit", |entry| {
            Ok(BalanceEntry {
                available: checked_credit(entry.available, amount)?,
                locked: entry.locked,
            })
        })
        .await?;
        self.track(|s| s.record_deposit(&key.asset, key.is_demo, amount));
        tracing::info!(%key, %amount, "Deposit credited");
        Ok(())
    }

    /// Lock: move `amount` from available to locked.
    ///
    /// # Errors
    /// `InsufficientFunds` if `available < amount`; the row is untouched.
    pub async fn lock_funds(&self, key: &BalanceKey, amount: Decimal) -> Result<()> {
        require_positive(amount, "lock")?;
        self.mutate(key, "lock", |entry| {
            if entry.available < amount {
                return Err(TradestreamError::InsufficientFunds {
                    needed: amount,
                    available: entry.available,
                });
            }
            Ok(BalanceEntry {
                available: entry.available - amount,
                locked: checked_credit(entry.locked, amount)?,
            })
        })
        .await?;
        tracing::debug!(%key, %amount, "Funds locked");
        Ok(())
    }

    /// Unlock: move `min(locked, amount)` from locked back to available.
    ///
    /// Asking for more than is locked is not an error; the excess is ignored
    /// and a warning is logged.
    pub async fn unlock_funds(&self, key: &BalanceKey, amount: Decimal) -> Result<()> {
        require_positive(amount, "unlock")?;
        let (before, _) = self
            .mutate(key, "unlock", |entry| {
                let released = entry.locked.min(amount);
                Ok(BalanceEntry {
                    available: checked_credit(entry.available, released)?,
                    locked: entry.locked - released,
                })
            })
            .await?;
        if amount > before.locked {
            tracing::warn!(
                %key,
                requested = %amount,
                locked = %before.locked,
                "Unlock clamped: requested more than is locked"
            );
        } else {
            tracing::debug!(%key, %amount, "Funds unlocked");
        }
        Ok(())
    }

    /// Move locked funds of one user to another user's available balance.
    ///
    /// The sender's locked balance is decremented (clamped at zero); the
    /// receiver's row is created if absent.
    pub async fn transfer_locked_to_available(
        &self,
        from: &BalanceKey,
        to: &BalanceKey,
        amount: Decimal,
        settlement: SettlementId,
    ) -> Result<CreditOutcome> {
        require_positive(amount, "transfer")?;
        if from.asset != to.asset || from.is_demo != to.is_demo {
            return Err(TradestreamError::InvalidAmount {
                reason: format!("cannot transfer between {from} and {to}"),
            });
        }
        self.burn_locked(from, amount).await?;
        let outcome = self.credit_or_defer(to, amount, settlement).await?;
        tracing::info!(%from, %to, %amount, ?outcome, "Locked funds transferred");
        Ok(outcome)
    }

    /// Settle one side of a trade: burn `debit_amount` from the debit row's
    /// locked balance (clamped at zero), then credit `credit_amount` to the
    /// credit row's available balance.
    ///
    /// A zero debit with a positive credit is a pure credit (surplus refund).
    /// If the debit fails nothing has changed. If the credit fails after the
    /// debit landed, it is journalled under `settlement` and replayed later.
    ///
    /// # Errors
    /// - `InvalidAmount` for negative amounts or an all-zero trade
    /// - `SettlementIncomplete` if the credit could be neither written nor journalled
    pub async fn process_trade(
        &self,
        debit: &BalanceKey,
        debit_amount: Decimal,
        credit: &BalanceKey,
        credit_amount: Decimal,
        settlement: SettlementId,
    ) -> Result<CreditOutcome> {
        if debit_amount.is_sign_negative() || credit_amount.is_sign_negative() {
            return Err(TradestreamError::InvalidAmount {
                reason: format!("trade legs must be non-negative: {debit_amount} / {credit_amount}"),
            });
        }
        if debit_amount.is_zero() && credit_amount.is_zero() {
            return Err(TradestreamError::InvalidAmount {
                reason: "trade moves nothing".into(),
            });
        }

        if !debit_amount.is_zero() {
            self.burn_locked(debit, debit_amount).await?;
        }
        if credit_amount.is_zero() {
            return Ok(CreditOutcome::Skipped);
        }
        self.credit_or_defer(credit, credit_amount, settlement).await
    }

    /// Retry every journalled credit. Returns how many landed.
    pub async fn replay_pending_credits(&self) -> Result<usize> {
        let pending = self.journal.pending_credits().await?;
        let mut applied = 0;
        for credit in pending {
            match self.credit_available(&credit.key, credit.amount).await {
                Ok(()) => {
                    if let Err(err) = self.journal.clear_pending_credit(credit.id).await {
                        tracing::error!(
                            settlement = %credit.id,
                            key = %credit.key,
                            amount = %credit.amount,
                            error = %err,
                            "Deferred credit applied but journal entry kept"
                        );
                    }
                    tracing::info!(
                        settlement = %credit.id,
                        key = %credit.key,
                        amount = %credit.amount,
                        "Deferred credit applied"
                    );
                    applied += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        settlement = %credit.id,
                        key = %credit.key,
                        error = %err,
                        "Deferred credit still failing"
                    );
                }
            }
        }
        Ok(applied)
    }

    // =================================================================
    // Internals
    // =================================================================

    async fn burn_locked(&self, key: &BalanceKey, amount: Decimal) -> Result<()> {
        let (before, after) = self
            .mutate(key, "burn", |entry| {
                Ok(BalanceEntry {
                    available: entry.available,
                    locked: (entry.locked - amount).max(Decimal::ZERO),
                })
            })
            .await?;
        let burned = before.locked - after.locked;
        if burned < amount {
            tracing::warn!(
                %key,
                requested = %amount,
                locked = %before.locked,
                "Debit clamped: burned less than requested"
            );
        }
        self.track(|s| s.record_burn(&key.asset, key.is_demo, burned));
        Ok(())
    }

    async fn credit_available(&self, key: &BalanceKey, amount: Decimal) -> Result<()> {
        self.mutate(key, "credit", |entry| {
            Ok(BalanceEntry {
                available: checked_credit(entry.available, amount)?,
                locked: entry.locked,
            })
        })
        .await?;
        self.track(|s| s.record_credit(&key.asset, key.is_demo, amount));
        Ok(())
    }

    async fn credit_or_defer(
        &self,
        key: &BalanceKey,
        amount: Decimal,
        settlement: SettlementId,
    ) -> Result<CreditOutcome> {
        let Err(err) = self.credit_available(key, amount).await else {
            return Ok(CreditOutcome::Applied);
        };

        let pending = PendingCredit {
            id: settlement,
            key: key.clone(),
            amount,
            recorded_at: Utc::now(),
        };
        match self.journal.record_pending_credit(&pending).await {
            Ok(()) => {
                tracing::warn!(
                    %settlement,
                    %key,
                    %amount,
                    error = %err,
                    "Credit deferred to journal"
                );
                Ok(CreditOutcome::Deferred)
            }
            Err(journal_err) => {
                tracing::error!(
                    %settlement,
                    %key,
                    %amount,
                    error = %err,
                    journal_error = %journal_err,
                    "Credit lost: debit applied but credit neither written nor journalled"
                );
                Err(TradestreamError::SettlementIncomplete {
                    reason: format!("{settlement}: credit of {amount} to {key} not recorded: {err}"),
                })
            }
        }
    }

    /// Compare-and-swap loop on one row. `apply` must be pure; it may run
    /// once per attempt. Returns the row before and after the committed write.
    async fn mutate<F>(
        &self,
        key: &BalanceKey,
        op: &'static str,
        apply: F,
    ) -> Result<(BalanceEntry, BalanceEntry)>
    where
        F: Fn(&BalanceEntry) -> Result<BalanceEntry> + Send + Sync,
    {
        for attempt in 1..=self.cas_retries {
            let (current, version) = match self.balances.load_balance(key).await? {
                Some(row) => (row.entry, Some(row.version)),
                None => (BalanceEntry::new(), None),
            };
            let next = apply(&current)?;
            if next == current {
                return Ok((current, next));
            }
            if self.balances.write_balance(key, version, &next).await? {
                return Ok((current, next));
            }
            tracing::debug!(%key, op, attempt, "Balance version conflict, retrying");
        }
        Err(TradestreamError::PersistenceFailure(format!(
            "{op} on {key}: gave up after {} version conflicts",
            self.cas_retries
        )))
    }

    fn track(&self, f: impl FnOnce(&mut SupplyTracker)) {
        if let Ok(mut supply) = self.supply.lock() {
            f(&mut supply);
        }
    }
}
