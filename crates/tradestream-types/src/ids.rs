//! Globally unique identifiers used throughout Tradestream.
//!
//! Entity IDs use UUIDv7 for time-ordered lexicographic sorting, except
//! [`SettlementId`] which is derived deterministically from the entity it
//! settles so that replays map onto the same journal entry.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

/// Unique identifier for a user / trading account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// OrderId
// ---------------------------------------------------------------------------

/// Globally unique order identifier. Uses UUIDv7 for time-ordered sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OrderId(pub Uuid);

impl OrderId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Extract the embedded timestamp (milliseconds since UNIX epoch) from UUIDv7.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        let bytes = self.0.as_bytes();
        u64::from_be_bytes([
            0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
        ])
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StreamId / RecipientId
// ---------------------------------------------------------------------------

/// Identifier of a vesting stream (one employer commitment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream:{}", self.0)
    }
}

/// Identifier of one recipient schedule inside a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RecipientId(pub Uuid);

impl RecipientId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RecipientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recipient:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SettlementId
// ---------------------------------------------------------------------------

/// Deterministic identifier for one credit leg of a settlement.
///
/// The same `(domain, entity, leg)` triple always hashes to the same id, so a
/// credit that is journalled twice collapses into a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SettlementId(pub [u8; 16]);

impl SettlementId {
    /// Credit leg of an order fill (`leg` distinguishes base credit from refund).
    #[must_use]
    pub fn for_order(order_id: OrderId, leg: &str) -> Self {
        Self::derive(b"order", order_id.0.as_bytes(), leg.as_bytes())
    }

    /// Credit leg of a stream withdrawal. `claim_seq` is the recipient row
    /// version the withdrawal was claimed against.
    #[must_use]
    pub fn for_withdrawal(recipient_id: RecipientId, claim_seq: u64) -> Self {
        Self::derive(
            b"withdrawal",
            recipient_id.0.as_bytes(),
            &claim_seq.to_le_bytes(),
        )
    }

    fn derive(domain: &[u8], entity: &[u8], leg: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(b"tradestream:settlement:v1:");
        hasher.update(domain);
        hasher.update(entity);
        hasher.update(leg);
        let hash = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        Self(bytes)
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stl:{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_ordering() {
        let a = OrderId::new();
        let b = OrderId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn order_id_timestamp_is_recent() {
        let id = OrderId::new();
        let now_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap();
        let ts = id.timestamp_ms();
        assert!(ts <= now_ms && now_ms - ts < 10_000, "ts={ts}, now={now_ms}");
    }

    #[test]
    fn settlement_id_is_deterministic_per_leg() {
        let order = OrderId::new();
        assert_eq!(
            SettlementId::for_order(order, "credit"),
            SettlementId::for_order(order, "credit")
        );
        assert_ne!(
            SettlementId::for_order(order, "credit"),
            SettlementId::for_order(order, "refund")
        );
    }

    #[test]
    fn withdrawal_ids_differ_by_claim_sequence() {
        let r = RecipientId::new();
        assert_ne!(
            SettlementId::for_withdrawal(r, 1),
            SettlementId::for_withdrawal(r, 2)
        );
    }

    #[test]
    fn display_prefixes() {
        assert!(StreamId::new().to_string().starts_with("stream:"));
        assert!(RecipientId::new().to_string().starts_with("recipient:"));
        assert!(SettlementId::for_order(OrderId::new(), "x")
            .to_string()
            .starts_with("stl:"));
    }
}
