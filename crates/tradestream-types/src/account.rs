//! Account records: the mapping from an on-chain address to a [`UserId`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    /// Wallet address streams are paid to.
    pub address: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            address: address.into(),
            created_at: Utc::now(),
        }
    }
}
