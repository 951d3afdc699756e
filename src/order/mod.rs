//! Order entity: an immutable identifying core plus a mutable state machine.
//!
//! The shared core fields are fixed at construction; everything mutable
//! (state, fill progress, broker references, the append-only event history)
//! changes only through [`Order::apply`], which runs the transition table in
//! [`fsm`] before touching any field.

pub mod bracket;
pub mod fsm;

use crate::decimal::{Decimal64, Price, Quantity};
use crate::error::{require, EngineError, EngineResult};
use crate::identifiers::{AccountId, ExecutionId, OrderId, OrderIdBroker, PositionIdBroker, Symbol};
use chrono::{DateTime, Utc};
use fsm::{OrderEventKind, OrderStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for Buy, -1 for Sell — used by slippage and realized-PnL sign math.
    pub fn sign(&self) -> i32 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Foc,
    Gtd,
}

/// A single applied event in an order's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEventRecord {
    pub kind: OrderEventKind,
    pub applied_timestamp: DateTime<Utc>,
}

/// One tagged-variant order entity: immutable core attributes set at
/// construction, plus mutable fields updated only through [`Order::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // --- immutable common attributes ---
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Quantity,
    pub time_in_force: TimeInForce,
    pub init_id: String,
    pub timestamp: DateTime<Utc>,

    // --- PassiveOrder extension (None for Market) ---
    pub price: Option<Price>,
    pub expire_time: Option<DateTime<Utc>>,

    // --- mutable ---
    pub state: OrderStatus,
    pub id_broker: Option<OrderIdBroker>,
    pub account_id: Option<AccountId>,
    pub position_id_broker: Option<PositionIdBroker>,
    pub execution_id: Option<ExecutionId>,
    pub filled_quantity: Quantity,
    pub filled_timestamp: Option<DateTime<Utc>>,
    pub average_price: Option<Price>,
    pub slippage: Option<Decimal64>,
    pub events: Vec<OrderEventRecord>,
}

impl Order {
    /// Construct a new order in the `Initialized` state. MARKET orders carry
    /// no price and must be DAY, IOC or FOC; GTD requires `expire_time` and
    /// every other time-in-force forbids it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OrderId,
        symbol: Symbol,
        side: OrderSide,
        order_type: OrderType,
        quantity: Quantity,
        time_in_force: TimeInForce,
        init_id: String,
        timestamp: DateTime<Utc>,
        price: Option<Price>,
        expire_time: Option<DateTime<Utc>>,
    ) -> EngineResult<Self> {
        require(!quantity.is_zero(), "order quantity must be > 0")?;

        match order_type {
            OrderType::Market => {
                require(price.is_none(), "MARKET orders must not carry a price")?;
                require(
                    matches!(time_in_force, TimeInForce::Day | TimeInForce::Ioc | TimeInForce::Foc),
                    "MARKET orders require TIF in {DAY, IOC, FOC}",
                )?;
            }
            OrderType::Limit | OrderType::Stop => {
                require(price.is_some(), "LIMIT/STOP orders require a price")?;
            }
        }

        match time_in_force {
            TimeInForce::Gtd => require(expire_time.is_some(), "GTD requires expire_time")?,
            _ => require(expire_time.is_none(), "only GTD may carry expire_time")?,
        }

        Ok(Self {
            id,
            symbol,
            side,
            order_type,
            quantity,
            time_in_force,
            init_id,
            timestamp,
            price,
            expire_time,
            state: OrderStatus::Initialized,
            id_broker: None,
            account_id: None,
            position_id_broker: None,
            execution_id: None,
            filled_quantity: Quantity::zero(quantity.raw().precision()),
            filled_timestamp: None,
            average_price: None,
            slippage: None,
            events: Vec::new(),
        })
    }

    /// Resting at the venue and eligible to fill.
    pub fn is_working(&self) -> bool {
        self.state == OrderStatus::Working || self.state == OrderStatus::PartiallyFilled
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn leaves_quantity(&self) -> Decimal64 {
        self.quantity.raw().checked_sub(&self.filled_quantity.raw())
    }

    /// Apply an event to this order: pushes it to history, runs the FSM
    /// transition, then updates mutable fields per event semantics.
    ///
    /// Fails with `InvalidStateTrigger` for any (state, event) pair not in
    /// the transition table. The one idempotent case is `Rejected` applied
    /// to an already rejected order (venues re-send rejects).
    pub fn apply(&mut self, event: OrderEventKind, now: DateTime<Utc>) -> EngineResult<()> {
        if self.state == OrderStatus::Rejected && matches!(event, OrderEventKind::Rejected { .. }) {
            self.events.push(OrderEventRecord {
                kind: event,
                applied_timestamp: now,
            });
            return Ok(());
        }

        let next = fsm::transition(self.state, &event).ok_or_else(|| EngineError::InvalidStateTrigger {
            from: format!("{:?}", self.state),
            event: event.kind_name().to_string(),
        })?;

        self.events.push(OrderEventRecord {
            kind: event.clone(),
            applied_timestamp: now,
        });
        self.state = next;
        self.apply_field_updates(event, now)?;
        Ok(())
    }

    fn apply_field_updates(&mut self, event: OrderEventKind, now: DateTime<Utc>) -> EngineResult<()> {
        match event {
            OrderEventKind::Accepted { id_broker } => {
                self.id_broker = Some(id_broker);
            }
            OrderEventKind::Modified { price, quantity } => {
                if let Some(price) = price {
                    self.price = Some(price);
                }
                if let Some(quantity) = quantity {
                    self.quantity = quantity;
                }
            }
            OrderEventKind::PartiallyFilled {
                fill_quantity,
                fill_price,
                execution_id,
                ..
            }
            | OrderEventKind::Filled {
                fill_quantity,
                fill_price,
                execution_id,
                ..
            } => {
                let new_filled = self.filled_quantity.raw().checked_add(&fill_quantity.raw());
                require(
                    new_filled <= self.quantity.raw(),
                    "filled_quantity must not exceed quantity",
                )?;
                self.filled_quantity = Quantity::new(new_filled)?;
                self.filled_timestamp = Some(now);
                self.execution_id = Some(execution_id);

                // Volume-weighted average fill price across all fills so far.
                let average_price = compute_average_price(self, fill_price, fill_quantity)?;
                self.average_price = Some(average_price);

                let avg = average_price.raw();
                let signed = match self.side {
                    OrderSide::Buy => avg.checked_sub(&self.price.map(|p| p.raw()).unwrap_or(avg)),
                    OrderSide::Sell => self.price.map(|p| p.raw()).unwrap_or(avg).checked_sub(&avg),
                };
                self.slippage = Some(signed);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Running volume-weighted average price across all fills applied so far,
/// including the fill currently being applied (whose quantity has not yet
/// been folded into `order.filled_quantity` when this is called).
fn compute_average_price(order: &Order, fill_price: Price, fill_quantity: Quantity) -> EngineResult<Price> {
    let prior_qty = order.filled_quantity.raw().checked_sub(&fill_quantity.raw());
    let prior_avg = order.average_price.map(|p| p.raw()).unwrap_or(fill_price.raw());

    if prior_qty.is_zero() {
        return Ok(fill_price);
    }

    let prior_notional = prior_avg.checked_mul(&prior_qty);
    let fill_notional = fill_price.raw().checked_mul(&fill_quantity.raw());
    let total_notional = prior_notional.checked_add(&fill_notional);
    let total_qty = order.filled_quantity.raw();

    let avg = if total_qty.is_zero() {
        fill_price.raw()
    } else {
        Decimal64::from_decimal(
            total_notional.raw() / total_qty.raw(),
            fill_price.raw().precision(),
        )
    };
    Price::new(avg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Decimal64;

    fn qty(v: &str) -> Quantity {
        Quantity::new_positive(Decimal64::from_str_with_precision(v, 8).unwrap()).unwrap()
    }

    fn price(v: &str) -> Price {
        Price::new(Decimal64::from_str_with_precision(v, 4).unwrap()).unwrap()
    }

    fn mk_limit() -> Order {
        Order::new(
            OrderId::new_unchecked("O-1"),
            Symbol::new_unchecked("EUR/USD"),
            OrderSide::Buy,
            OrderType::Limit,
            qty("100"),
            TimeInForce::Gtc,
            "init-1".into(),
            Utc::now(),
            Some(price("1.2000")),
            None,
        )
        .unwrap()
    }

    #[test]
    fn market_order_with_gtc_is_rejected() {
        let result = Order::new(
            OrderId::new_unchecked("O-2"),
            Symbol::new_unchecked("EUR/USD"),
            OrderSide::Buy,
            OrderType::Market,
            qty("10"),
            TimeInForce::Gtc,
            "init-2".into(),
            Utc::now(),
            None,
            None,
        );
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn limit_order_gtd_without_expiry_is_rejected() {
        let result = Order::new(
            OrderId::new_unchecked("O-3"),
            Symbol::new_unchecked("EUR/USD"),
            OrderSide::Buy,
            OrderType::Limit,
            qty("10"),
            TimeInForce::Gtd,
            "init-3".into(),
            Utc::now(),
            Some(price("1.0")),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn full_lifecycle_to_fill_computes_slippage() {
        let mut order = mk_limit();
        let now = Utc::now();
        order.apply(OrderEventKind::Submitted, now).unwrap();
        order
            .apply(
                OrderEventKind::Accepted {
                    id_broker: OrderIdBroker::new_unchecked("B-1"),
                },
                now,
            )
            .unwrap();
        order.apply(OrderEventKind::Working, now).unwrap();
        order
            .apply(
                OrderEventKind::Filled {
                    fill_quantity: qty("100"),
                    fill_price: price("1.2000"),
                    execution_id: ExecutionId::new_unchecked("E-1"),
                    timestamp: now,
                },
                now,
            )
            .unwrap();

        assert_eq!(order.state, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, qty("100"));
        assert_eq!(order.slippage.unwrap(), Decimal64::from_str_with_precision("0", 4).unwrap());
    }

    #[test]
    fn illegal_transition_is_rejected_and_state_unchanged() {
        let mut order = mk_limit();
        let now = Utc::now();
        order.apply(OrderEventKind::Submitted, now).unwrap();
        order
            .apply(
                OrderEventKind::Accepted {
                    id_broker: OrderIdBroker::new_unchecked("B-1"),
                },
                now,
            )
            .unwrap();
        order.apply(OrderEventKind::Working, now).unwrap();

        // A second Accepted on a WORKING order is illegal.
        let result = order.apply(
            OrderEventKind::Accepted {
                id_broker: OrderIdBroker::new_unchecked("B-1"),
            },
            now,
        );
        assert!(matches!(result, Err(EngineError::InvalidStateTrigger { .. })));
        assert_eq!(order.state, OrderStatus::Working);
    }

    #[test]
    fn duplicate_reject_is_idempotent() {
        let mut order = mk_limit();
        let now = Utc::now();
        order.apply(OrderEventKind::Submitted, now).unwrap();
        order
            .apply(OrderEventKind::Rejected { reason: "no liquidity".into() }, now)
            .unwrap();
        // Second reject on an already-rejected order must not error.
        order
            .apply(OrderEventKind::Rejected { reason: "no liquidity".into() }, now)
            .unwrap();
        assert_eq!(order.state, OrderStatus::Rejected);
    }
}
