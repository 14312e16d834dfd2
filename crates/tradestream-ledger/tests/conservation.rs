//! Integration tests: conservation and atomicity of the ledger primitives.
//!
//! Random sequences of lock / unlock / trade / transfer are applied and the
//! stored rows are checked against the net flows the ledger recorded. A
//! concurrent section hammers a single key from many tasks.

use std::sync::Arc;

use rand::{Rng, SeedableRng, rngs::StdRng};
use rust_decimal::Decimal;
use tradestream_ledger::BalanceLedger;
use tradestream_store::MemoryStore;
use tradestream_types::{BalanceKey, LedgerConfig, OrderId, SettlementId, TradestreamError, UserId};

fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

fn setup() -> (Arc<MemoryStore>, Arc<BalanceLedger>) {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(BalanceLedger::new(
        store.clone(),
        store.clone(),
        &LedgerConfig::default(),
    ));
    (store, ledger)
}

// =============================================================================
// Test: random single-threaded sequences conserve supply
// =============================================================================
#[tokio::test]
async fn random_sequences_conserve_supply() {
    let (store, ledger) = setup();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let users: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();
    for user in &users {
        ledger
            .deposit(&BalanceKey::new(*user, "USDT", false), dec(1_000))
            .await
            .unwrap();
        ledger
            .deposit(&BalanceKey::new(*user, "BCH", false), dec(100))
            .await
            .unwrap();
    }

    for step in 0..400 {
        let user = users[rng.gen_range(0..users.len())];
        let other = users[rng.gen_range(0..users.len())];
        let asset = if rng.gen_bool(0.5) { "USDT" } else { "BCH" };
        let key = BalanceKey::new(user, asset, false);
        let amount = dec(rng.gen_range(1..60));

        match rng.gen_range(0..4) {
            0 => match ledger.lock_funds(&key, amount).await {
                Ok(()) | Err(TradestreamError::InsufficientFunds { .. }) => {}
                Err(err) => panic!("step {step}: unexpected lock error {err}"),
            },
            1 => ledger.unlock_funds(&key, amount).await.unwrap(),
            2 => {
                let counter = if asset == "USDT" { "BCH" } else { "USDT" };
                ledger
                    .process_trade(
                        &key,
                        amount,
                        &BalanceKey::new(user, counter, false),
                        amount,
                        SettlementId::for_order(OrderId::new(), "credit"),
                    )
                    .await
                    .unwrap();
            }
            _ => {
                ledger
                    .transfer_locked_to_available(
                        &key,
                        &BalanceKey::new(other, asset, false),
                        amount,
                        SettlementId::for_order(OrderId::new(), "transfer"),
                    )
                    .await
                    .unwrap();
            }
        }

        for asset in ["USDT", "BCH"] {
            assert_eq!(
                store.total_supply(asset, false).unwrap(),
                ledger.expected_supply(asset, false),
                "step {step}: {asset} supply drifted"
            );
        }
    }

    for user in &users {
        for (_, entry) in ledger.balances_for_user(*user, false).await.unwrap() {
            assert!(entry.is_valid(), "negative balance: {entry:?}");
        }
    }
}

// =============================================================================
// Test: lock/unlock keep available + locked constant
// =============================================================================
#[tokio::test]
async fn lock_unlock_preserve_row_total() {
    let (_, ledger) = setup();
    let key = BalanceKey::new(UserId::new(), "USDT", false);
    ledger.deposit(&key, dec(500)).await.unwrap();

    for amount in [10, 200, 50, 1_000, 5] {
        let _ = ledger.lock_funds(&key, dec(amount)).await;
        ledger.unlock_funds(&key, dec(amount / 2 + 1)).await.unwrap();
        assert_eq!(ledger.get_balance(&key).await.unwrap().total(), dec(500));
    }
}

// =============================================================================
// Test: concurrent locks on one key never overdraw
// =============================================================================
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_locks_never_overdraw() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(BalanceLedger::new(
        store.clone(),
        store.clone(),
        &LedgerConfig { cas_retries: 1_000 },
    ));
    let key = BalanceKey::new(UserId::new(), "USDT", false);
    ledger.deposit(&key, dec(100)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let ledger = ledger.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            ledger.lock_funds(&key, dec(3)).await.is_ok()
        }));
    }
    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap() {
            succeeded += 1;
        }
    }

    // 100 / 3 = 33 locks fit, the rest must fail with no side effect.
    assert_eq!(succeeded, 33);
    let bal = ledger.get_balance(&key).await.unwrap();
    assert_eq!(bal.locked, dec(99));
    assert_eq!(bal.available, dec(1));
}

// =============================================================================
// Test: concurrent unlocks and trades on one key stay consistent
// =============================================================================
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_burns_and_unlocks_are_serialized() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(BalanceLedger::new(
        store.clone(),
        store.clone(),
        &LedgerConfig { cas_retries: 1_000 },
    ));
    let user = UserId::new();
    let quote = BalanceKey::new(user, "USDT", false);
    let base = BalanceKey::new(user, "BCH", false);
    ledger.deposit(&quote, dec(1_000)).await.unwrap();
    ledger.lock_funds(&quote, dec(1_000)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..40 {
        let ledger = ledger.clone();
        let quote = quote.clone();
        let base = base.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                ledger.unlock_funds(&quote, dec(10)).await.unwrap();
            } else {
                ledger
                    .process_trade(
                        &quote,
                        dec(10),
                        &base,
                        dec(1),
                        SettlementId::for_order(OrderId::new(), "credit"),
                    )
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let q = ledger.get_balance(&quote).await.unwrap();
    assert_eq!(q.locked, dec(600));
    assert_eq!(q.available, dec(200));
    assert_eq!(ledger.get_balance(&base).await.unwrap().available, dec(20));
    assert_eq!(store.total_supply("USDT", false).unwrap(), dec(800));
}
