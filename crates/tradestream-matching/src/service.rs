//! Order placement and cancellation facade used by the request layer.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tradestream_ledger::BalanceLedger;
use tradestream_store::OrderRepository;
use tradestream_types::{
    BalanceKey, MarketKey, Order, OrderId, OrderSide, OrderStatus, OrderType, OrderVariant,
    Result, TradestreamError, TradingPair, UserId,
};

use crate::oracle::PriceOracle;

/// A validated-on-submit order request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub variant: OrderVariant,
    /// Required for limit orders, must be absent for market orders.
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub chain_id: Option<String>,
    pub pair_address: Option<String>,
    pub is_demo: bool,
}

impl NewOrder {
    /// Spot limit order on a market.
    #[must_use]
    pub fn limit(
        user_id: UserId,
        symbol: impl Into<String>,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
        chain_id: impl Into<String>,
        pair_address: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            variant: OrderVariant::Spot,
            price: Some(price),
            amount,
            chain_id: Some(chain_id.into()),
            pair_address: Some(pair_address.into()),
            is_demo: false,
        }
    }
}

pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    ledger: Arc<BalanceLedger>,
    oracle: Arc<dyn PriceOracle>,
}

impl OrderService {
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        ledger: Arc<BalanceLedger>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            orders,
            ledger,
            oracle,
        }
    }

    /// Validate, lock the order's funds, then persist it.
    ///
    /// Buys lock `amount × price` of the quote asset, sells lock `amount` of
    /// the base asset. If the insert fails the lock is released before the
    /// error is returned.
    ///
    /// # Errors
    /// - `InvalidOrder` for a malformed request or a notional too large to lock
    /// - `PriceUnavailable` for a market order the oracle cannot quote
    /// - `InsufficientFunds` if the lock fails
    /// - `PersistenceFailure` if the order cannot be stored
    pub async fn create_order(&self, request: NewOrder) -> Result<Order> {
        TradingPair::parse(&request.symbol)?;
        if request.amount <= Decimal::ZERO {
            return Err(TradestreamError::InvalidOrder {
                reason: format!("amount must be positive, got {}", request.amount),
            });
        }
        let price = self.placement_price(&request).await?;

        let order = Order {
            id: OrderId::new(),
            user_id: request.user_id,
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            variant: request.variant,
            price: Some(price),
            amount: request.amount,
            filled: Decimal::ZERO,
            status: OrderStatus::Open,
            chain_id: request.chain_id,
            pair_address: request.pair_address,
            is_demo: request.is_demo,
            created_at: Utc::now(),
        };

        let (asset, lock) = order.unfilled_lock()?;
        let key = BalanceKey::new(order.user_id, asset, order.is_demo);
        self.ledger.lock_funds(&key, lock).await?;

        if let Err(err) = self.orders.insert_order(&order).await {
            tracing::warn!(order = %order.id, error = %err, "Order insert failed, releasing lock");
            if let Err(unlock_err) = self.ledger.unlock_funds(&key, lock).await {
                tracing::error!(
                    order = %order.id,
                    %key,
                    amount = %lock,
                    error = %unlock_err,
                    "Compensating unlock failed: funds remain locked"
                );
            }
            return Err(err);
        }

        tracing::info!(
            order = %order.id,
            user = %order.user_id,
            side = %order.side,
            kind = %order.order_type,
            variant = %order.variant,
            symbol = %order.symbol,
            %price,
            amount = %order.amount,
            "Order placed"
        );
        Ok(order)
    }

    async fn placement_price(&self, request: &NewOrder) -> Result<Decimal> {
        match request.order_type {
            OrderType::Limit => match request.price {
                Some(price) if price > Decimal::ZERO => Ok(price),
                Some(price) => Err(TradestreamError::InvalidOrder {
                    reason: format!("limit price must be positive, got {price}"),
                }),
                None => Err(TradestreamError::InvalidOrder {
                    reason: "limit order requires a price".into(),
                }),
            },
            OrderType::Market => {
                if request.price.is_some() {
                    return Err(TradestreamError::InvalidOrder {
                        reason: "market order must not carry a price".into(),
                    });
                }
                let market = match (&request.chain_id, &request.pair_address) {
                    (Some(chain), Some(pair)) => MarketKey::new(chain.clone(), pair.clone()),
                    _ => {
                        return Err(TradestreamError::InvalidOrder {
                            reason: "market order requires chain_id and pair_address".into(),
                        });
                    }
                };
                self.oracle.resolve_price(&market).await
            }
        }
    }

    /// Cancel an order owned by `user_id` and release its unfilled lock.
    ///
    /// The status change is a compare-and-set from `open | partial`, so a
    /// concurrent fill and a cancel cannot both succeed.
    ///
    /// # Errors
    /// - `OrderNotFound` if the order is absent or owned by someone else
    /// - `OrderNotCancellable` if it is filled or already cancelled
    pub async fn cancel_order(&self, user_id: UserId, id: OrderId) -> Result<Order> {
        let order = self
            .orders
            .get_order(id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or(TradestreamError::OrderNotFound(id))?;
        if !order.status.is_cancellable() {
            return Err(TradestreamError::OrderNotCancellable {
                id,
                status: order.status,
            });
        }

        let cancelled = self
            .orders
            .transition_order(
                id,
                &[OrderStatus::Open, OrderStatus::Partial],
                OrderStatus::Cancelled,
                order.filled,
            )
            .await?;
        let Some(cancelled) = cancelled else {
            let status = self
                .orders
                .get_order(id)
                .await?
                .map_or(OrderStatus::Filled, |o| o.status);
            tracing::warn!(order = %id, %status, "Cancel lost race with settlement");
            return Err(TradestreamError::OrderNotCancellable { id, status });
        };

        let (asset, lock) = order.unfilled_lock()?;
        let key = BalanceKey::new(order.user_id, asset, order.is_demo);
        if lock > Decimal::ZERO {
            if let Err(err) = self.ledger.unlock_funds(&key, lock).await {
                self.restore_status(&order).await;
                return Err(err);
            }
        }

        tracing::info!(order = %id, user = %user_id, %key, released = %lock, "Order cancelled");
        Ok(cancelled)
    }

    async fn restore_status(&self, order: &Order) {
        match self
            .orders
            .transition_order(order.id, &[OrderStatus::Cancelled], order.status, order.filled)
            .await
        {
            Ok(Some(_)) => {
                tracing::warn!(order = %order.id, status = %order.status, "Cancel reverted");
            }
            Ok(None) => tracing::error!(order = %order.id, "Cancel revert found unexpected status"),
            Err(err) => tracing::error!(
                order = %order.id,
                error = %err,
                "Cancel revert failed: order cancelled with funds still locked"
            ),
        }
    }

    /// A user's `open` and `partial` orders in one mode, oldest first.
    pub async fn list_open_orders(&self, user_id: UserId, is_demo: bool) -> Result<Vec<Order>> {
        let mut orders = self
            .orders
            .orders_for_user(user_id, OrderStatus::Open, is_demo)
            .await?;
        orders.extend(
            self.orders
                .orders_for_user(user_id, OrderStatus::Partial, is_demo)
                .await?,
        );
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    /// # Errors
    /// `OrderNotFound` if absent or owned by another user.
    pub async fn get_order(&self, user_id: UserId, id: OrderId) -> Result<Order> {
        self.orders
            .get_order(id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or(TradestreamError::OrderNotFound(id))
    }
}
