//! Fault injection for [`MemoryStore`](crate::MemoryStore).
//!
//! Each counter makes the next `n` matching calls fail. Production code never
//! arms them; they exist so tests can drive persistence-failure paths.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use tradestream_types::BalanceKey;

#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    pub(crate) order_inserts: AtomicU32,
    pub(crate) order_transitions: AtomicU32,
    pub(crate) stream_inserts: AtomicU32,
    pub(crate) claim_updates: AtomicU32,
    pub(crate) journal_writes: AtomicU32,
    pub(crate) journal_clears: AtomicU32,
    /// Writes that report a version conflict instead of failing.
    pub(crate) balance_conflicts: AtomicU32,
    pub(crate) balance_writes: Mutex<HashMap<BalanceKey, u32>>,
}

impl FaultPlan {
    /// Consume one armed fault from `counter`.
    pub(crate) fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub(crate) fn take_balance_write(&self, key: &BalanceKey) -> bool {
        let Ok(mut armed) = self.balance_writes.lock() else {
            return false;
        };
        match armed.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    #[cfg_attr(not(any(test, feature = "test-helpers")), allow(dead_code))]
    pub(crate) fn arm(counter: &AtomicU32, n: u32) {
        counter.store(n, Ordering::SeqCst);
    }
}
