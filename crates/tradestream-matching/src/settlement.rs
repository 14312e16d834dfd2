//! Settlement planning for a full fill at an oracle price.
//!
//! Pure computation, no I/O. For a `BCH/USDT` order of `amount` at limit
//! `price`, filled at oracle price `p`:
//!
//! - **Buy**: burn `amount × price` locked USDT (the notional locked at
//!   placement), credit `amount` BCH. If `p < price`, refund
//!   `(price − p) × amount` USDT to available.
//! - **Sell**: burn `amount` locked BCH, credit `amount × p` USDT.

use rust_decimal::Decimal;
use tradestream_types::{BalanceKey, Order, OrderSide, Result, TradestreamError, notional};

/// Balance movements that settle one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub debit: BalanceKey,
    pub debit_amount: Decimal,
    pub credit: BalanceKey,
    pub credit_amount: Decimal,
    /// Surplus returned to the buyer's quote balance.
    pub refund: Option<(BalanceKey, Decimal)>,
    pub execution_price: Decimal,
}

impl SettlementPlan {
    /// Plan the full fill of `order` at `price`.
    ///
    /// # Errors
    /// `InvalidOrder` if the order has no limit price, a malformed symbol,
    /// or a quote amount too large for a `Decimal`.
    pub fn for_fill(order: &Order, price: Decimal) -> Result<Self> {
        let pair = order.pair()?;
        let limit = order.price.ok_or_else(|| TradestreamError::InvalidOrder {
            reason: format!("order {} has no price", order.id),
        })?;
        let quote = BalanceKey::new(order.user_id, pair.quote, order.is_demo);
        let base = BalanceKey::new(order.user_id, pair.base, order.is_demo);

        let plan = match order.side {
            OrderSide::Buy => {
                let spread = limit.checked_sub(price).ok_or_else(|| TradestreamError::InvalidOrder {
                    reason: format!("spread {limit} - {price} overflows"),
                })?;
                let surplus = notional(order.amount, spread)?;
                Self {
                    debit: quote.clone(),
                    debit_amount: notional(order.amount, limit)?,
                    credit: base,
                    credit_amount: order.amount,
                    refund: (surplus > Decimal::ZERO).then_some((quote, surplus)),
                    execution_price: price,
                }
            }
            OrderSide::Sell => Self {
                debit: base,
                debit_amount: order.amount,
                credit: quote,
                credit_amount: notional(order.amount, price)?,
                refund: None,
                execution_price: price,
            },
        };
        Ok(plan)
    }
}
