//! Bracket order: a parent entry order plus one-cancels-other children
//! (stop-loss, and optionally take-profit).

use crate::error::{require, EngineResult};
use crate::identifiers::OrderId;
use crate::order::{Order, OrderType};
use serde::{Deserialize, Serialize};

/// Triple of (entry, stop_loss, take_profit?) with `id = "B" + entry.id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOrder {
    pub id: String,
    pub entry: Order,
    pub stop_loss: Order,
    pub take_profit: Option<Order>,
}

impl BracketOrder {
    pub fn new(entry: Order, stop_loss: Order, take_profit: Option<Order>) -> EngineResult<Self> {
        require(stop_loss.order_type == OrderType::Stop, "stop_loss must be a STOP order")?;
        if let Some(tp) = &take_profit {
            require(tp.order_type == OrderType::Limit, "take_profit must be a LIMIT order")?;
        }

        let id = format!("B{}", entry.id.as_str());
        Ok(Self {
            id,
            entry,
            stop_loss,
            take_profit,
        })
    }

    /// The one-cancels-other pairs among the children: when one of
    /// `stop_loss`/`take_profit` fills or is cancelled, the other is
    /// cancelled.
    pub fn oco_pairs(&self) -> Vec<(OrderId, OrderId)> {
        match &self.take_profit {
            Some(tp) => vec![(self.stop_loss.id.clone(), tp.id.clone())],
            None => Vec::new(),
        }
    }

    pub fn order_ids(&self) -> Vec<OrderId> {
        let mut ids = vec![self.entry.id.clone(), self.stop_loss.id.clone()];
        if let Some(tp) = &self.take_profit {
            ids.push(tp.id.clone());
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::{Decimal64, Price, Quantity};
    use crate::identifiers::Symbol;
    use crate::order::{OrderSide, TimeInForce};
    use chrono::Utc;

    fn qty(v: &str) -> Quantity {
        Quantity::new_positive(Decimal64::from_str_with_precision(v, 8).unwrap()).unwrap()
    }
    fn price(v: &str) -> Price {
        Price::new(Decimal64::from_str_with_precision(v, 4).unwrap()).unwrap()
    }

    #[test]
    fn bracket_id_is_prefixed_entry_id() {
        let entry = Order::new(
            OrderId::new_unchecked("O-1"),
            Symbol::new_unchecked("BTC/USD"),
            OrderSide::Buy,
            OrderType::Market,
            qty("10"),
            TimeInForce::Day,
            "i1".into(),
            Utc::now(),
            None,
            None,
        )
        .unwrap();
        let stop = Order::new(
            OrderId::new_unchecked("O-2"),
            Symbol::new_unchecked("BTC/USD"),
            OrderSide::Sell,
            OrderType::Stop,
            qty("10"),
            TimeInForce::Gtc,
            "i2".into(),
            Utc::now(),
            Some(price("0.99")),
            None,
        )
        .unwrap();
        let bracket = BracketOrder::new(entry, stop, None).unwrap();
        assert_eq!(bracket.id, "BO-1");
    }

    #[test]
    fn non_stop_stop_loss_is_rejected() {
        let entry = Order::new(
            OrderId::new_unchecked("O-1"),
            Symbol::new_unchecked("BTC/USD"),
            OrderSide::Buy,
            OrderType::Market,
            qty("10"),
            TimeInForce::Day,
            "i1".into(),
            Utc::now(),
            None,
            None,
        )
        .unwrap();
        let not_a_stop = Order::new(
            OrderId::new_unchecked("O-2"),
            Symbol::new_unchecked("BTC/USD"),
            OrderSide::Sell,
            OrderType::Limit,
            qty("10"),
            TimeInForce::Gtc,
            "i2".into(),
            Utc::now(),
            Some(price("0.99")),
            None,
        )
        .unwrap();
        assert!(BracketOrder::new(entry, not_a_stop, None).is_err());
    }
}
