//! # tradestream-types
//!
//! Shared types, errors, and configuration for **Tradestream**.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`UserId`], [`OrderId`], [`StreamId`], [`RecipientId`], [`SettlementId`]
//! - **Balance model**: [`BalanceKey`], [`BalanceEntry`], [`VersionedBalance`], [`PendingCredit`]
//! - **Order model**: [`Order`], [`OrderSide`], [`OrderType`], [`OrderVariant`], [`OrderStatus`], [`MarketKey`], [`TradingPair`]
//! - **Vesting model**: [`Stream`], [`StreamRecipient`], [`StreamStatus`], [`RecipientSpec`]
//! - **Accounts**: [`Account`]
//! - **Configuration**: [`EngineConfig`] and its sections
//! - **Errors**: [`TradestreamError`] with `TS_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod account;
pub mod balance;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod order;
pub mod stream;

pub use account::*;
pub use balance::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use order::*;
pub use stream::*;

// Constants are accessed via `tradestream_types::constants::FOO`
// (not re-exported to avoid name collisions).
