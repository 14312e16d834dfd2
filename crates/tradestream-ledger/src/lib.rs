//! # tradestream-ledger
//!
//! **Balance Ledger**: the only code allowed to mutate balances.
//!
//! ## Architecture
//!
//! Every higher-level flow composes four primitives on [`BalanceLedger`]:
//! 1. **lock_funds**: available → locked (order placement, stream creation)
//! 2. **unlock_funds**: locked → available, clamped (cancellation)
//! 3. **process_trade**: burn locked debit asset, credit counter asset (settlement)
//! 4. **transfer_locked_to_available**: sender locked → receiver available (stream payout)
//!
//! Each primitive is atomic on its `(user, asset, mode)` row via a versioned
//! compare-and-swap. Cross-row operations credit after they debit; a credit
//! that cannot be written is journalled and replayed, never dropped.
//!
//! [`SupplyTracker`] keeps the net flows applied so conservation can be
//! checked against the stored rows.

pub mod ledger;
pub mod supply;

pub use ledger::{BalanceLedger, CreditOutcome};
pub use supply::{SupplyFlows, SupplyTracker};
