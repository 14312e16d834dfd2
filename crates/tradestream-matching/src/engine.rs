//! Matching engine: periodic oracle-priced settlement of open orders.
//!
//! Each tick runs **Idle → Running → Idle**:
//! 1. Replay journalled credits from earlier ticks
//! 2. Load every `open` order and group it by market key
//! 3. Ask the oracle once per market; skip markets without a price
//! 4. Fill every triggered order in full (claim, then settle)
//!
//! A tick never starts while another is running. Failures are isolated to
//! the market or order that produced them and retried next tick.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rust_decimal::Decimal;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tradestream_ledger::{BalanceLedger, CreditOutcome};
use tradestream_store::OrderRepository;
use tradestream_types::{
    MarketKey, Order, OrderStatus, Result, SettlementId, TradestreamError,
};

use crate::oracle::PriceOracle;
use crate::settlement::SettlementPlan;

/// Counters for one completed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Open orders loaded.
    pub scanned: usize,
    /// Orders without a full market key.
    pub skipped_no_market: usize,
    pub markets_priced: usize,
    pub markets_unavailable: usize,
    pub filled: usize,
    /// Triggered orders whose settlement failed; left open unless the debit
    /// already landed.
    pub failed: usize,
    /// Triggered orders that were cancelled before they could be claimed.
    pub lost_races: usize,
    pub credits_replayed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another tick was still running.
    Skipped,
}

enum Fill {
    Settled,
    LostRace,
}

/// Clears the running flag when a tick ends, including on panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct MatchingEngine {
    orders: Arc<dyn OrderRepository>,
    ledger: Arc<BalanceLedger>,
    oracle: Arc<dyn PriceOracle>,
    running: AtomicBool,
}

impl MatchingEngine {
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        ledger: Arc<BalanceLedger>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            orders,
            ledger,
            oracle,
            running: AtomicBool::new(false),
        }
    }

    /// Whether a tick is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one tick unless one is already running.
    ///
    /// # Errors
    /// Only if the open orders cannot be loaded; everything past that point
    /// is isolated per market / order and reported in the [`TickReport`].
    pub async fn tick(&self) -> Result<TickOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Matching tick skipped: previous tick still running");
            return Ok(TickOutcome::Skipped);
        }
        let _guard = RunningGuard(&self.running);
        self.run_tick().await.map(TickOutcome::Completed)
    }

    async fn run_tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        match self.ledger.replay_pending_credits().await {
            Ok(n) => report.credits_replayed = n,
            Err(err) => tracing::warn!(error = %err, "Could not read credit journal"),
        }

        let open = self.orders.orders_with_status(OrderStatus::Open).await?;
        report.scanned = open.len();

        let mut by_market: BTreeMap<MarketKey, Vec<Order>> = BTreeMap::new();
        for order in open {
            match order.market_key() {
                Some(market) => by_market.entry(market).or_default().push(order),
                None => report.skipped_no_market += 1,
            }
        }

        for (market, orders) in by_market {
            let price = match self.oracle.resolve_price(&market).await {
                Ok(price) => price,
                Err(err) => {
                    report.markets_unavailable += 1;
                    tracing::warn!(%market, error = %err, "Skipping market this tick");
                    continue;
                }
            };
            report.markets_priced += 1;

            for order in orders.iter().filter(|o| o.is_triggered_at(price)) {
                match self.fill(order, price).await {
                    Ok(Fill::Settled) => report.filled += 1,
                    Ok(Fill::LostRace) => report.lost_races += 1,
                    Err(err @ TradestreamError::SettlementIncomplete { .. }) => {
                        report.failed += 1;
                        tracing::error!(
                            order = %order.id,
                            %market,
                            %price,
                            error = %err,
                            "Settlement incomplete; order marked filled, credit lost"
                        );
                    }
                    Err(err) => {
                        report.failed += 1;
                        tracing::error!(
                            order = %order.id,
                            %market,
                            %price,
                            error = %err,
                            "Settlement failed; order stays open"
                        );
                    }
                }
            }
        }

        tracing::debug!(
            scanned = report.scanned,
            filled = report.filled,
            failed = report.failed,
            unavailable = report.markets_unavailable,
            "Matching tick complete"
        );
        Ok(report)
    }

    /// Claim the order (`open → filled`), then move balances. If the debit
    /// leg fails the claim is reverted so the order is retried next tick.
    async fn fill(&self, order: &Order, price: Decimal) -> Result<Fill> {
        let plan = SettlementPlan::for_fill(order, price)?;

        let claimed = self
            .orders
            .transition_order(order.id, &[OrderStatus::Open], OrderStatus::Filled, order.amount)
            .await?;
        if claimed.is_none() {
            tracing::info!(order = %order.id, "Order left open state before fill; skipping");
            return Ok(Fill::LostRace);
        }

        let settled = self
            .ledger
            .process_trade(
                &plan.debit,
                plan.debit_amount,
                &plan.credit,
                plan.credit_amount,
                SettlementId::for_order(order.id, "fill"),
            )
            .await;
        match settled {
            Ok(CreditOutcome::Deferred) => {
                tracing::warn!(order = %order.id, "Fill credit deferred to journal");
            }
            Ok(_) => {}
            Err(err @ TradestreamError::SettlementIncomplete { .. }) => return Err(err),
            Err(err) => {
                self.release_claim(order).await;
                return Err(err);
            }
        }

        if let Some((refund_key, surplus)) = &plan.refund {
            if let Err(err) = self
                .ledger
                .process_trade(
                    refund_key,
                    Decimal::ZERO,
                    refund_key,
                    *surplus,
                    SettlementId::for_order(order.id, "refund"),
                )
                .await
            {
                tracing::error!(
                    order = %order.id,
                    %surplus,
                    error = %err,
                    "Surplus refund not recorded"
                );
            }
        }

        tracing::info!(
            order = %order.id,
            user = %order.user_id,
            side = %order.side,
            symbol = %order.symbol,
            amount = %order.amount,
            limit = ?order.price,
            %price,
            "Order filled"
        );
        Ok(Fill::Settled)
    }

    async fn release_claim(&self, order: &Order) {
        match self
            .orders
            .transition_order(order.id, &[OrderStatus::Filled], OrderStatus::Open, order.filled)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => tracing::error!(order = %order.id, "Claim vanished before release"),
            Err(err) => tracing::error!(
                order = %order.id,
                error = %err,
                "Could not release claim: order marked filled without settlement"
            ),
        }
    }

    /// Spawn the recurring tick loop.
    pub fn start(self: &Arc<Self>, interval: Duration) -> MatchingHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(?interval, "Matching loop started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = engine.tick().await {
                            tracing::error!(error = %err, "Matching tick aborted");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Matching loop stopped");
        });
        MatchingHandle { shutdown, task }
    }
}

/// Handle to a running matching loop.
pub struct MatchingHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MatchingHandle {
    /// Signal shutdown and wait for the in-flight tick (if any) to finish.
    ///
    /// # Errors
    /// `Internal` if the loop task panicked.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|err| TradestreamError::Internal(format!("matching loop panicked: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use tradestream_store::MemoryStore;
    use tradestream_types::{BalanceKey, LedgerConfig, OrderSide, UserId};

    use super::*;
    use crate::oracle::StaticPriceOracle;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    struct Harness {
        store: Arc<MemoryStore>,
        ledger: Arc<BalanceLedger>,
        oracle: Arc<StaticPriceOracle>,
        engine: Arc<MatchingEngine>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(BalanceLedger::new(
            store.clone(),
            store.clone(),
            &LedgerConfig::default(),
        ));
        let oracle = Arc::new(StaticPriceOracle::new());
        let engine = Arc::new(MatchingEngine::new(
            store.clone(),
            ledger.clone(),
            oracle.clone(),
        ));
        Harness {
            store,
            ledger,
            oracle,
            engine,
        }
    }

    async fn place(h: &Harness, side: OrderSide, price: i64, amount: i64) -> Order {
        let order = Order::dummy_limit_for_user(UserId::new(), side, dec(price), dec(amount));
        let (asset, lock) = order.unfilled_lock().unwrap();
        let key = BalanceKey::new(order.user_id, asset, false);
        h.ledger.deposit(&key, lock).await.unwrap();
        h.ledger.lock_funds(&key, lock).await.unwrap();
        h.store.insert_order(&order).await.unwrap();
        order
    }

    fn report(outcome: TickOutcome) -> TickReport {
        match outcome {
            TickOutcome::Completed(report) => report,
            TickOutcome::Skipped => panic!("tick unexpectedly skipped"),
        }
    }

    #[tokio::test]
    async fn untriggered_order_stays_open() {
        let h = harness();
        let order = place(&h, OrderSide::Buy, 5, 10).await;
        h.oracle.set_price(order.market_key().unwrap(), dec(6));

        let r = report(h.engine.tick().await.unwrap());
        assert_eq!(r.scanned, 1);
        assert_eq!(r.filled, 0);
        let stored = h.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn sell_fills_at_oracle_price() {
        let h = harness();
        let order = place(&h, OrderSide::Sell, 5, 10).await;
        h.oracle.set_price(order.market_key().unwrap(), dec(7));

        let r = report(h.engine.tick().await.unwrap());
        assert_eq!(r.filled, 1);

        let stored = h.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);
        assert_eq!(stored.filled, dec(10));
        let usdt = BalanceKey::new(order.user_id, "USDT", false);
        let bch = BalanceKey::new(order.user_id, "BCH", false);
        assert_eq!(h.ledger.get_balance(&usdt).await.unwrap().available, dec(70));
        assert!(h.ledger.get_balance(&bch).await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn orders_without_market_key_are_skipped() {
        let h = harness();
        let mut order = Order::dummy_limit(OrderSide::Sell, dec(5), dec(1));
        order.chain_id = None;
        h.store.insert_order(&order).await.unwrap();

        let r = report(h.engine.tick().await.unwrap());
        assert_eq!(r.skipped_no_market, 1);
        assert_eq!(h.oracle.lookups(), 0);
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let h = harness();
        h.engine.running.store(true, Ordering::Release);
        assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::Skipped);
        h.engine.running.store(false, Ordering::Release);
        assert!(matches!(
            h.engine.tick().await.unwrap(),
            TickOutcome::Completed(_)
        ));
        assert!(!h.engine.is_running());
    }

    #[tokio::test]
    async fn failed_debit_releases_claim() {
        let h = harness();
        let order = place(&h, OrderSide::Sell, 5, 10).await;
        h.oracle.set_price(order.market_key().unwrap(), dec(5));

        let bch = BalanceKey::new(order.user_id, "BCH", false);
        h.store.fail_balance_writes_for(&bch, 1);
        let r = report(h.engine.tick().await.unwrap());
        assert_eq!(r.failed, 1);
        let stored = h.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Open);
        assert_eq!(h.ledger.get_balance(&bch).await.unwrap().locked, dec(10));

        let r = report(h.engine.tick().await.unwrap());
        assert_eq!(r.filled, 1);
    }

    #[tokio::test]
    async fn failed_claim_leaves_balances_untouched() {
        let h = harness();
        let order = place(&h, OrderSide::Buy, 5, 10).await;
        h.oracle.set_price(order.market_key().unwrap(), dec(5));

        h.store.fail_order_transitions(1);
        let r = report(h.engine.tick().await.unwrap());
        assert_eq!(r.failed, 1);
        let usdt = BalanceKey::new(order.user_id, "USDT", false);
        assert_eq!(h.ledger.get_balance(&usdt).await.unwrap().locked, dec(50));
    }

    #[tokio::test]
    async fn incomplete_settlement_keeps_claim() {
        let h = harness();
        let order = place(&h, OrderSide::Sell, 5, 10).await;
        h.oracle.set_price(order.market_key().unwrap(), dec(5));

        let usdt = BalanceKey::new(order.user_id, "USDT", false);
        h.store.fail_balance_writes_for(&usdt, 1);
        h.store.fail_journal_writes(1);
        let r = report(h.engine.tick().await.unwrap());
        assert_eq!(r.failed, 1);
        assert_eq!(r.filled, 0);
        let stored = h.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);

        let r = report(h.engine.tick().await.unwrap());
        assert_eq!(r.scanned, 0);
    }

    #[tokio::test]
    async fn overflowing_order_does_not_block_other_markets() {
        let h = harness();
        let whale = UserId::new();
        let huge = Decimal::from_i128_with_scale(100_000_000_000_000_000_000, 0);
        let bch = BalanceKey::new(whale, "BCH", false);
        h.ledger.deposit(&bch, huge).await.unwrap();
        h.ledger.lock_funds(&bch, huge).await.unwrap();
        let big = Order::dummy_limit_for_user(whale, OrderSide::Sell, dec(1), huge);
        h.store.insert_order(&big).await.unwrap();
        h.oracle
            .set_price(big.market_key().unwrap(), Decimal::from(10_000_000_000_u64));

        let mut normal = Order::dummy_limit(OrderSide::Sell, dec(5), dec(2));
        normal.pair_address = Some("0xother".into());
        let normal_bch = BalanceKey::new(normal.user_id, "BCH", false);
        h.ledger.deposit(&normal_bch, dec(2)).await.unwrap();
        h.ledger.lock_funds(&normal_bch, dec(2)).await.unwrap();
        h.store.insert_order(&normal).await.unwrap();
        h.oracle.set_price(normal.market_key().unwrap(), dec(6));

        let r = report(h.engine.tick().await.unwrap());
        assert_eq!(r.filled, 1);
        assert_eq!(r.failed, 1);
        let stored = h.store.get_order(normal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);
        let stored = h.store.get_order(big.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Open);
        assert_eq!(h.ledger.get_balance(&bch).await.unwrap().locked, huge);

        let handle = h.engine.start(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_and_stop_loop() {
        let h = harness();
        let order = place(&h, OrderSide::Sell, 5, 1).await;
        h.oracle.set_price(order.market_key().unwrap(), dec(5));

        let handle = h.engine.start(Duration::from_millis(10));
        for _ in 0..100 {
            let stored = h.store.get_order(order.id).await.unwrap().unwrap();
            if stored.status == OrderStatus::Filled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.stop().await.unwrap();

        let stored = h.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);
        assert!(!h.engine.is_running());
    }
}
