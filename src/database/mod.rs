//! Indexed execution database: the cache of accounts, orders and positions
//! plus the cross-reference indexes that tie them together.
//!
//! Defines the `ExecutionDatabase` contract shared by both back-ends and the
//! `IndexSet` bookkeeping struct they both reuse, so index maintenance is
//! written once regardless of where the entities themselves are persisted.

pub mod kv;
pub mod memory;

use crate::account::Account;
use crate::error::{EngineError, EngineResult};
use crate::identifiers::{AccountId, OrderId, PositionId, PositionIdBroker, StrategyId};
use crate::order::Order;
use crate::position::Position;
use fnv::FnvHashMap;
use indexmap::IndexSet as OrderedSet;
use tracing::warn;

/// Cross-reference indexes shared by both back-ends. The membership sets are
/// insertion-ordered so queries over them (working orders, residual reports)
/// iterate deterministically across runs.
#[derive(Debug, Default, Clone)]
pub struct IndexSet {
    pub order_to_position: FnvHashMap<OrderId, PositionId>,
    pub order_to_strategy: FnvHashMap<OrderId, StrategyId>,
    pub position_to_strategy: FnvHashMap<PositionId, StrategyId>,
    pub position_to_orders: FnvHashMap<PositionId, OrderedSet<OrderId>>,
    pub strategy_to_orders: FnvHashMap<StrategyId, OrderedSet<OrderId>>,
    pub strategy_to_positions: FnvHashMap<StrategyId, OrderedSet<PositionId>>,
    pub broker_position_to_position: FnvHashMap<PositionIdBroker, PositionId>,

    pub all_orders: OrderedSet<OrderId>,
    pub working_orders: OrderedSet<OrderId>,
    pub completed_orders: OrderedSet<OrderId>,
    pub all_positions: OrderedSet<PositionId>,
    pub open_positions: OrderedSet<PositionId>,
    pub closed_positions: OrderedSet<PositionId>,
}

impl IndexSet {
    /// An order may only be indexed to a position owned by the same
    /// strategy.
    pub fn check_position_owner(&self, position_id: &PositionId, strategy_id: &StrategyId) -> EngineResult<()> {
        match self.position_to_strategy.get(position_id) {
            Some(owner) if owner != strategy_id => Err(EngineError::InvalidArgument(format!(
                "position {position_id} is owned by strategy {owner}, not {strategy_id}"
            ))),
            _ => Ok(()),
        }
    }

    /// Wire up every index entry an `add_order` touches. A single in-process
    /// call with no intermediate yield point: once the duplicate-key
    /// precondition has passed, nothing can fail, so no partial index state
    /// is ever observable.
    pub fn index_order(&mut self, order_id: OrderId, position_id: PositionId, strategy_id: StrategyId) {
        self.order_to_position.insert(order_id.clone(), position_id.clone());
        self.order_to_strategy.insert(order_id.clone(), strategy_id.clone());
        self.position_to_orders
            .entry(position_id.clone())
            .or_default()
            .insert(order_id.clone());
        self.strategy_to_orders
            .entry(strategy_id.clone())
            .or_default()
            .insert(order_id.clone());
        self.position_to_strategy
            .entry(position_id)
            .or_insert(strategy_id.clone());
        self.strategy_to_positions.entry(strategy_id).or_default();
        self.all_orders.insert(order_id);
    }

    pub fn index_position(&mut self, position_id: PositionId, strategy_id: StrategyId) {
        self.position_to_strategy.insert(position_id.clone(), strategy_id.clone());
        self.strategy_to_positions.entry(strategy_id).or_default().insert(position_id.clone());
        self.all_positions.insert(position_id.clone());
        self.open_positions.insert(position_id);
    }

    pub fn mark_order_working(&mut self, order_id: &OrderId) {
        self.completed_orders.shift_remove(order_id);
        self.working_orders.insert(order_id.clone());
    }

    pub fn mark_order_completed(&mut self, order_id: &OrderId) {
        self.working_orders.shift_remove(order_id);
        self.completed_orders.insert(order_id.clone());
    }

    pub fn mark_position_closed(&mut self, position_id: &PositionId) {
        self.open_positions.shift_remove(position_id);
        self.closed_positions.insert(position_id.clone());
    }

    pub fn link_broker_position(&mut self, broker: PositionIdBroker, position_id: PositionId) {
        self.broker_position_to_position.insert(broker, position_id);
    }
}

/// A report of still-working orders and still-open positions at teardown.
#[derive(Debug, Default, Clone)]
pub struct ResidualReport {
    pub working_orders: Vec<OrderId>,
    pub open_positions: Vec<PositionId>,
}

impl ResidualReport {
    pub fn is_clean(&self) -> bool {
        self.working_orders.is_empty() && self.open_positions.is_empty()
    }
}

/// The indexed cache of accounts, orders and positions.
///
/// Both back-ends honor identical pre/post-conditions. Mutations check
/// duplicate-key preconditions and fail with `EngineError::DuplicateKey`.
pub trait ExecutionDatabase {
    fn add_account(&mut self, account: Account) -> EngineResult<()>;
    fn get_account(&mut self, id: &AccountId) -> Option<Account>;
    fn update_account(&mut self, account: Account) -> EngineResult<()>;

    fn add_order(&mut self, order: Order, strategy: StrategyId, position: PositionId) -> EngineResult<()>;
    fn get_order(&mut self, id: &OrderId) -> Option<Order>;
    fn update_order(&mut self, order: Order) -> EngineResult<()>;

    fn add_position(&mut self, position: Position, strategy: StrategyId) -> EngineResult<()>;
    fn get_position(&mut self, id: &PositionId) -> Option<Position>;
    fn update_position(&mut self, position: Position) -> EngineResult<()>;

    fn update_strategy_state(&mut self, strategy: StrategyId, state: Vec<u8>) -> EngineResult<()>;
    fn delete_strategy(&mut self, strategy: &StrategyId) -> EngineResult<()>;

    fn order_count(&mut self) -> usize;
    fn position_count(&mut self) -> usize;
    fn working_order_ids(&self) -> Vec<OrderId>;
    fn open_position_ids(&self) -> Vec<PositionId>;
    fn orders_for_strategy(&self, strategy: &StrategyId) -> Vec<OrderId>;
    fn positions_for_strategy(&self, strategy: &StrategyId) -> Vec<PositionId>;
    fn position_for_order(&self, order: &OrderId) -> Option<PositionId>;
    fn strategy_for_order(&self, order: &OrderId) -> Option<StrategyId>;
    fn strategy_for_position(&self, position: &PositionId) -> Option<StrategyId>;
    fn position_for_broker_id(&self, broker: &PositionIdBroker) -> Option<PositionId>;
    fn link_broker_position(&mut self, broker: PositionIdBroker, position: PositionId);

    /// Clear every account, order, position and index entry for a fresh run.
    fn reset(&mut self) -> EngineResult<()>;

    /// Reports any still-working orders and still-open positions. Never
    /// fails; logs a WARN for each residual found.
    fn check_residuals(&self) -> ResidualReport {
        let report = ResidualReport {
            working_orders: self.working_order_ids(),
            open_positions: self.open_position_ids(),
        };
        for order_id in &report.working_orders {
            warn!(%order_id, "residual working order at teardown");
        }
        for position_id in &report.open_positions {
            warn!(%position_id, "residual open position at teardown");
        }
        report
    }
}

pub(crate) fn duplicate_key(kind: &str, key: impl std::fmt::Display) -> EngineError {
    EngineError::DuplicateKey(format!("{kind} {key} already exists"))
}
