//! Order types for price-triggered settlement.
//!
//! Orders rest in the store until the matching engine observes an oracle
//! price that crosses their limit, at which point they are filled in full.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{OrderId, Result, TradestreamError, UserId};

/// Which side of the market this order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// How the order price was set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    /// Priced from an oracle quote taken at placement time.
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "LIMIT"),
            Self::Market => write!(f, "MARKET"),
        }
    }
}

/// Product the order trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderVariant {
    Spot,
    Futures,
}

impl fmt::Display for OrderVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spot => write!(f, "SPOT"),
            Self::Futures => write!(f, "FUTURES"),
        }
    }
}

/// Lifecycle status of an order.
///
/// `Filled` and `Cancelled` are terminal. `Partial` is accepted from the store
/// but never produced by the matching engine, which only fills in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Partial,
    Filled,
    Cancelled,
}

impl OrderStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled)
    }

    #[must_use]
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Open | Self::Partial)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A tradable venue: `(chain_id, pair_address)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MarketKey {
    pub chain_id: String,
    pub pair_address: String,
}

impl MarketKey {
    #[must_use]
    pub fn new(chain_id: impl Into<String>, pair_address: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            pair_address: pair_address.into(),
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.pair_address)
    }
}

/// Base and quote assets parsed from an order symbol such as `BCH/USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    #[must_use]
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Parse a `BASE/QUOTE` symbol.
    ///
    /// # Errors
    /// Returns `InvalidOrder` if either side is missing.
    pub fn parse(symbol: &str) -> Result<Self> {
        match symbol.split_once('/') {
            Some((base, quote))
                if !base.trim().is_empty() && !quote.trim().is_empty() && !quote.contains('/') =>
            {
                Ok(Self::new(base.trim(), quote.trim()))
            }
            _ => Err(TradestreamError::InvalidOrder {
                reason: format!("symbol {symbol:?} is not of the form BASE/QUOTE"),
            }),
        }
    }

    #[must_use]
    pub fn symbol(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub variant: OrderVariant,
    /// Limit price, or the placement quote for market orders.
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub filled: Decimal,
    pub status: OrderStatus,
    pub chain_id: Option<String>,
    pub pair_address: Option<String>,
    pub is_demo: bool,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// The venue this order is priced against, if both halves are present.
    #[must_use]
    pub fn market_key(&self) -> Option<MarketKey> {
        match (&self.chain_id, &self.pair_address) {
            (Some(chain), Some(pair)) => Some(MarketKey::new(chain.clone(), pair.clone())),
            _ => None,
        }
    }

    /// # Errors
    /// Returns `InvalidOrder` if the symbol is malformed.
    pub fn pair(&self) -> Result<TradingPair> {
        TradingPair::parse(&self.symbol)
    }

    #[must_use]
    pub fn remaining(&self) -> Decimal {
        self.amount - self.filled
    }

    /// Whether an oracle price `p` triggers this order.
    ///
    /// Buy executes iff `p <= price`, sell iff `p >= price`.
    #[must_use]
    pub fn is_triggered_at(&self, p: Decimal) -> bool {
        match (self.side, self.price) {
            (OrderSide::Buy, Some(limit)) => p <= limit,
            (OrderSide::Sell, Some(limit)) => p >= limit,
            (_, None) => false,
        }
    }

    /// Asset and amount held locked for the unfilled part of this order.
    ///
    /// Buys hold quote notional at the order price, sells hold base amount.
    ///
    /// # Errors
    /// Returns `InvalidOrder` for a malformed symbol or a buy without price.
    pub fn unfilled_lock(&self) -> Result<(String, Decimal)> {
        let pair = self.pair()?;
        let remaining = self.remaining();
        match self.side {
            OrderSide::Buy => {
                let price = self.price.ok_or_else(|| TradestreamError::InvalidOrder {
                    reason: format!("order {} has no price", self.id),
                })?;
                Ok((pair.quote, notional(remaining, price)?))
            }
            OrderSide::Sell => Ok((pair.base, remaining)),
        }
    }
}

/// `amount × price` in quote units.
///
/// # Errors
/// `InvalidOrder` if the product does not fit in a `Decimal`.
pub fn notional(amount: Decimal, price: Decimal) -> Result<Decimal> {
    amount
        .checked_mul(price)
        .ok_or_else(|| TradestreamError::InvalidOrder {
            reason: format!("notional {amount} x {price} overflows"),
        })
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    pub fn dummy_limit(side: OrderSide, price: Decimal, amount: Decimal) -> Self {
        Self::dummy_limit_for_user(UserId::new(), side, price, amount)
    }

    pub fn dummy_limit_for_user(
        user_id: UserId,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
    ) -> Self {
        Self {
            id: OrderId::new(),
            user_id,
            symbol: "BCH/USDT".to_string(),
            side,
            order_type: OrderType::Limit,
            variant: OrderVariant::Spot,
            price: Some(price),
            amount,
            filled: Decimal::ZERO,
            status: OrderStatus::Open,
            chain_id: Some("bch".to_string()),
            pair_address: Some("0xpair".to_string()),
            is_demo: false,
            created_at: Utc::now(),
        }
    }
}
