//! # tradestream-vesting
//!
//! **Linear vesting streams** funded from an employer's locked balance.
//!
//! - [`accrual`]: elapsed-time arithmetic, partial-claim clock advance
//! - [`VestingEngine`]: create streams, withdraw accrued funds
//! - [`StreamService`]: request-layer facade (wall clock, caller checks)
//!
//! A recipient with `allocation A` over `d` seconds accrues `A / d` per second
//! from creation until `end_time`. Withdrawing less than has accrued moves the
//! claim clock forward only by the time the withdrawn amount represents.

pub mod accrual;
pub mod engine;
pub mod service;

pub use accrual::Accrual;
pub use engine::{NewStream, RecipientSummary, StreamSummary, VestingEngine, Withdrawal};
pub use service::StreamService;
