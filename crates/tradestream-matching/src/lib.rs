//! # tradestream-matching
//!
//! **Order matching and settlement** against an external price oracle.
//!
//! There is no order book: every open order waits for the oracle price of
//! its market to cross its limit, then fills in full.
//!
//! ## Components
//!
//! - [`PriceOracle`]: "best current known price" per market key
//! - [`SettlementPlan`]: the balance legs that settle one fill
//! - [`MatchingEngine`]: the single-flight recurring tick
//! - [`OrderService`]: placement and cancellation for the request layer
//!
//! ## Exclusivity
//!
//! Fills and cancellations both leave `open` through a status
//! compare-and-set before touching balances, so for any order at most one of
//! them succeeds.

pub mod engine;
pub mod oracle;
pub mod service;
pub mod settlement;

pub use engine::{MatchingEngine, MatchingHandle, TickOutcome, TickReport};
pub use oracle::{PriceOracle, StaticPriceOracle};
pub use service::{NewOrder, OrderService};
pub use settlement::SettlementPlan;
