//! # tradestream-store
//!
//! Durable record storage as seen by the engines: one repository trait per
//! entity ([`BalanceRepository`], [`CreditJournal`], [`OrderRepository`],
//! [`StreamRepository`], [`AccountRepository`]) and [`MemoryStore`], an
//! in-memory implementation with the same conditional-write semantics a
//! versioned database table provides.
//!
//! The engines never cache records beyond a single operation; every
//! read-modify-write goes through a version or status compare-and-set.

mod faults;
pub mod memory;
pub mod repository;

pub use memory::MemoryStore;
pub use repository::{
    AccountRepository, BalanceRepository, CreditJournal, DurableStore, OrderRepository,
    StreamRepository,
};
