//! In-memory `ExecutionDatabase` back-end: everything process-resident,
//! `HashMap`s keyed by identifier, kept in lockstep with the shared
//! [`IndexSet`].

use super::{duplicate_key, ExecutionDatabase, IndexSet};
use crate::account::Account;
use crate::error::{EngineError, EngineResult};
use crate::identifiers::{AccountId, OrderId, PositionId, StrategyId};
use crate::order::Order;
use crate::order::fsm::OrderStatus;
use crate::position::Position;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct InMemoryExecutionDatabase {
    accounts: HashMap<AccountId, Account>,
    orders: HashMap<OrderId, Order>,
    positions: HashMap<PositionId, Position>,
    strategy_states: HashMap<StrategyId, Vec<u8>>,
    index: IndexSet,
}

impl InMemoryExecutionDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionDatabase for InMemoryExecutionDatabase {
    fn add_account(&mut self, account: Account) -> EngineResult<()> {
        if self.accounts.contains_key(&account.id) {
            return Err(duplicate_key("account", account.id.as_str()));
        }
        self.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    fn get_account(&mut self, id: &AccountId) -> Option<Account> {
        self.accounts.get(id).cloned()
    }

    fn update_account(&mut self, account: Account) -> EngineResult<()> {
        if !self.accounts.contains_key(&account.id) {
            return Err(EngineError::NotFound(format!("account {}", account.id.as_str())));
        }
        self.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    fn add_order(&mut self, order: Order, strategy: StrategyId, position: PositionId) -> EngineResult<()> {
        if self.orders.contains_key(&order.id) {
            return Err(duplicate_key("order", order.id.as_str()));
        }
        self.index.check_position_owner(&position, &strategy)?;
        self.index.index_order(order.id.clone(), position, strategy);
        self.orders.insert(order.id.clone(), order);
        Ok(())
    }

    fn get_order(&mut self, id: &OrderId) -> Option<Order> {
        self.orders.get(id).cloned()
    }

    fn update_order(&mut self, order: Order) -> EngineResult<()> {
        if !self.orders.contains_key(&order.id) {
            return Err(EngineError::NotFound(format!("order {}", order.id.as_str())));
        }
        if order.state == OrderStatus::Working || order.state == OrderStatus::PartiallyFilled {
            self.index.mark_order_working(&order.id);
        } else if order.is_completed() {
            self.index.mark_order_completed(&order.id);
        }
        self.orders.insert(order.id.clone(), order);
        Ok(())
    }

    fn add_position(&mut self, position: Position, strategy: StrategyId) -> EngineResult<()> {
        if self.positions.contains_key(&position.id) {
            return Err(duplicate_key("position", position.id.as_str()));
        }
        self.index.index_position(position.id.clone(), strategy);
        self.positions.insert(position.id.clone(), position);
        Ok(())
    }

    fn get_position(&mut self, id: &PositionId) -> Option<Position> {
        self.positions.get(id).cloned()
    }

    fn update_position(&mut self, position: Position) -> EngineResult<()> {
        if !self.positions.contains_key(&position.id) {
            return Err(EngineError::NotFound(format!("position {}", position.id.as_str())));
        }
        if position.is_closed() {
            self.index.mark_position_closed(&position.id);
        }
        self.positions.insert(position.id.clone(), position);
        Ok(())
    }

    fn update_strategy_state(&mut self, strategy: StrategyId, state: Vec<u8>) -> EngineResult<()> {
        self.strategy_states.insert(strategy, state);
        Ok(())
    }

    fn delete_strategy(&mut self, strategy: &StrategyId) -> EngineResult<()> {
        self.strategy_states.remove(strategy);
        if let Some(orders) = self.index.strategy_to_orders.remove(strategy) {
            for order_id in orders {
                self.orders.remove(&order_id);
            }
        }
        if let Some(positions) = self.index.strategy_to_positions.remove(strategy) {
            for position_id in positions {
                self.positions.remove(&position_id);
            }
        }
        Ok(())
    }

    fn order_count(&mut self) -> usize {
        self.orders.len()
    }

    fn position_count(&mut self) -> usize {
        self.positions.len()
    }

    fn working_order_ids(&self) -> Vec<OrderId> {
        self.index.working_orders.iter().cloned().collect()
    }

    fn open_position_ids(&self) -> Vec<PositionId> {
        self.index.open_positions.iter().cloned().collect()
    }

    fn orders_for_strategy(&self, strategy: &StrategyId) -> Vec<OrderId> {
        self.index
            .strategy_to_orders
            .get(strategy)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn positions_for_strategy(&self, strategy: &StrategyId) -> Vec<PositionId> {
        self.index
            .strategy_to_positions
            .get(strategy)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn position_for_order(&self, order: &OrderId) -> Option<PositionId> {
        self.index.order_to_position.get(order).cloned()
    }

    fn strategy_for_order(&self, order: &OrderId) -> Option<StrategyId> {
        self.index.order_to_strategy.get(order).cloned()
    }

    fn strategy_for_position(&self, position: &PositionId) -> Option<StrategyId> {
        self.index.position_to_strategy.get(position).cloned()
    }

    fn position_for_broker_id(&self, broker: &crate::identifiers::PositionIdBroker) -> Option<PositionId> {
        self.index.broker_position_to_position.get(broker).cloned()
    }

    fn link_broker_position(&mut self, broker: crate::identifiers::PositionIdBroker, position: PositionId) {
        self.index.link_broker_position(broker, position);
    }

    fn reset(&mut self) -> EngineResult<()> {
        *self = Self::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::{Currency, Money};
    use crate::identifiers::Symbol;
    use crate::position::Fill;

    fn account(id: &str) -> Account {
        Account::new(
            AccountId::new_unchecked(id),
            Currency::usd(),
            Money::from_string("10000.00", Currency::usd()).unwrap(),
        )
    }

    #[test]
    fn duplicate_account_is_rejected() {
        let mut db = InMemoryExecutionDatabase::new();
        db.add_account(account("A-1")).unwrap();
        let result = db.add_account(account("A-1"));
        assert!(matches!(result, Err(EngineError::DuplicateKey(_))));
    }

    #[test]
    fn add_order_indexes_everything_atomically() {
        use crate::decimal::{Decimal64, Quantity};
        use crate::order::{Order, OrderSide, OrderType, TimeInForce};
        use chrono::Utc;

        let mut db = InMemoryExecutionDatabase::new();
        let order = Order::new(
            OrderId::new_unchecked("O-1"),
            Symbol::new_unchecked("EUR/USD"),
            OrderSide::Buy,
            OrderType::Market,
            Quantity::new_positive(Decimal64::from_str_with_precision("10", 2).unwrap()).unwrap(),
            TimeInForce::Day,
            "i1".into(),
            Utc::now(),
            None,
            None,
        )
        .unwrap();

        db.add_order(
            order.clone(),
            StrategyId::new_unchecked("S-1"),
            PositionId::new_unchecked("P-1"),
        )
        .unwrap();

        assert_eq!(db.position_for_order(&order.id), Some(PositionId::new_unchecked("P-1")));
        assert_eq!(db.strategy_for_order(&order.id), Some(StrategyId::new_unchecked("S-1")));
        assert_eq!(db.orders_for_strategy(&StrategyId::new_unchecked("S-1")), vec![order.id.clone()]);
        // Not yet acknowledged by the venue, so not in the working set.
        assert!(!db.working_order_ids().contains(&order.id));
    }

    #[test]
    fn order_moves_between_working_and_completed_sets_with_its_state() {
        use crate::decimal::{Decimal64, Quantity};
        use crate::order::fsm::OrderEventKind;
        use crate::order::{Order, OrderSide, OrderType, TimeInForce};
        use crate::identifiers::OrderIdBroker;
        use chrono::Utc;

        let mut db = InMemoryExecutionDatabase::new();
        let mut order = Order::new(
            OrderId::new_unchecked("O-1"),
            Symbol::new_unchecked("EUR/USD"),
            OrderSide::Buy,
            OrderType::Limit,
            Quantity::new_positive(Decimal64::from_str_with_precision("10", 2).unwrap()).unwrap(),
            TimeInForce::Gtc,
            "i1".into(),
            Utc::now(),
            Some(crate::decimal::Price::new(Decimal64::from_str_with_precision("1.10", 4).unwrap()).unwrap()),
            None,
        )
        .unwrap();
        db.add_order(order.clone(), StrategyId::new_unchecked("S-1"), PositionId::new_unchecked("P-1"))
            .unwrap();

        let now = Utc::now();
        order.apply(OrderEventKind::Submitted, now).unwrap();
        order
            .apply(OrderEventKind::Accepted { id_broker: OrderIdBroker::new_unchecked("B-1") }, now)
            .unwrap();
        order.apply(OrderEventKind::Working, now).unwrap();
        db.update_order(order.clone()).unwrap();
        assert!(db.working_order_ids().contains(&order.id));

        order.apply(OrderEventKind::Cancelled, now).unwrap();
        db.update_order(order.clone()).unwrap();
        assert!(!db.working_order_ids().contains(&order.id));
    }

    #[test]
    fn order_for_another_strategys_position_is_rejected() {
        use crate::decimal::{Decimal64, Quantity};
        use crate::order::{Order, OrderSide, OrderType, TimeInForce};
        use chrono::Utc;

        let mut db = InMemoryExecutionDatabase::new();
        let mk = |id: &str| {
            Order::new(
                OrderId::new_unchecked(id),
                Symbol::new_unchecked("EUR/USD"),
                OrderSide::Buy,
                OrderType::Market,
                Quantity::new_positive(Decimal64::from_str_with_precision("10", 2).unwrap()).unwrap(),
                TimeInForce::Day,
                "i".into(),
                Utc::now(),
                None,
                None,
            )
            .unwrap()
        };
        db.add_order(mk("O-1"), StrategyId::new_unchecked("S-1"), PositionId::new_unchecked("P-1"))
            .unwrap();
        let result = db.add_order(mk("O-2"), StrategyId::new_unchecked("S-2"), PositionId::new_unchecked("P-1"));
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn position_moves_to_closed_index_on_update() {
        let mut db = InMemoryExecutionDatabase::new();
        let pos = Position::open(
            PositionId::new_unchecked("P-1"),
            Symbol::new_unchecked("EUR/USD"),
            OrderId::new_unchecked("O-1"),
            Fill {
                order_id_side: crate::order::OrderSide::Buy,
                quantity: crate::decimal::Quantity::new_positive(
                    crate::decimal::Decimal64::from_str_with_precision("10", 2).unwrap(),
                )
                .unwrap(),
                price: crate::decimal::Price::new(
                    crate::decimal::Decimal64::from_str_with_precision("1.10", 4).unwrap(),
                )
                .unwrap(),
                timestamp: chrono::Utc::now(),
            },
            Currency::usd(),
            Currency::usd(),
        );
        db.add_position(pos.clone(), StrategyId::new_unchecked("S-1")).unwrap();
        assert!(db.open_position_ids().contains(&pos.id));

        let mut closed = pos.clone();
        closed.quantity = crate::decimal::Quantity::new(crate::decimal::Decimal64::zero(2)).unwrap();
        closed.close_time = Some(chrono::Utc::now());
        db.update_position(closed).unwrap();

        assert!(!db.open_position_ids().contains(&pos.id));
    }
}
