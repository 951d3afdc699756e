//! External key-value `ExecutionDatabase` back-end.
//!
//! Entities are `serde_json`-encoded into a pluggable [`KeyValueStore`]
//! under a stable string-keyed namespace per trader; a
//! `redis::Connection`-backed store is the production implementation.
//!
//! Reads for a single trader are immediately consistent after a write
//! returns (nothing is buffered or batched); only cross-trader reads are
//! allowed to be eventual, which this single-trader-per-database type
//! trivially satisfies by construction.

use super::{duplicate_key, ExecutionDatabase, IndexSet};
use crate::account::Account;
use crate::error::{EngineError, EngineResult};
use crate::identifiers::{AccountId, OrderId, PositionId, StrategyId, TraderId};
use crate::order::Order;
use crate::order::fsm::OrderStatus;
use crate::position::Position;
use serde::{de::DeserializeOwned, Serialize};

/// Minimal synchronous key-value contract an external-kv backend needs.
/// A `redis::Connection`-backed implementation is the reference instance;
/// tests use an in-process `HashMap` store that implements the same trait.
pub trait KeyValueStore {
    fn put(&mut self, key: &str, value: Vec<u8>) -> EngineResult<()>;
    fn get(&mut self, key: &str) -> EngineResult<Option<Vec<u8>>>;
    fn delete(&mut self, key: &str) -> EngineResult<()>;
    fn scan_prefix(&mut self, prefix: &str) -> EngineResult<Vec<String>>;
}

/// Stable string-keyed namespace per trader, e.g. `trader:{id}:order:{id}`.
fn namespaced(trader: &TraderId, kind: &str, id: &str) -> String {
    format!("trader:{}:{kind}:{id}", trader.as_str())
}

fn encode<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| EngineError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> EngineResult<T> {
    serde_json::from_slice(bytes).map_err(|e| EngineError::Serialization(e.to_string()))
}

pub struct ExternalKvExecutionDatabase<S: KeyValueStore> {
    trader: TraderId,
    store: S,
    index: IndexSet,
}

impl<S: KeyValueStore> ExternalKvExecutionDatabase<S> {
    pub fn new(trader: TraderId, store: S) -> Self {
        Self {
            trader,
            store,
            index: IndexSet::default(),
        }
    }

    fn key(&self, kind: &str, id: &str) -> String {
        namespaced(&self.trader, kind, id)
    }
}

impl<S: KeyValueStore> ExecutionDatabase for ExternalKvExecutionDatabase<S> {
    fn add_account(&mut self, account: Account) -> EngineResult<()> {
        let key = self.key("account", account.id.as_str());
        if self.store.get(&key)?.is_some() {
            return Err(duplicate_key("account", account.id.as_str()));
        }
        self.store.put(&key, encode(&account)?)
    }

    fn get_account(&mut self, id: &AccountId) -> Option<Account> {
        let key = self.key("account", id.as_str());
        self.store.get(&key).ok().flatten().and_then(|b| decode(&b).ok())
    }

    fn update_account(&mut self, account: Account) -> EngineResult<()> {
        let key = self.key("account", account.id.as_str());
        if self.store.get(&key)?.is_none() {
            return Err(EngineError::NotFound(format!("account {}", account.id.as_str())));
        }
        self.store.put(&key, encode(&account)?)
    }

    fn add_order(&mut self, order: Order, strategy: StrategyId, position: PositionId) -> EngineResult<()> {
        let key = self.key("order", order.id.as_str());
        if self.store.get(&key)?.is_some() {
            return Err(duplicate_key("order", order.id.as_str()));
        }
        self.index.check_position_owner(&position, &strategy)?;
        self.index.index_order(order.id.clone(), position, strategy);
        self.store.put(&key, encode(&order)?)
    }

    fn get_order(&mut self, id: &OrderId) -> Option<Order> {
        let key = self.key("order", id.as_str());
        self.store.get(&key).ok().flatten().and_then(|b| decode(&b).ok())
    }

    fn update_order(&mut self, order: Order) -> EngineResult<()> {
        let key = self.key("order", order.id.as_str());
        if self.store.get(&key)?.is_none() {
            return Err(EngineError::NotFound(format!("order {}", order.id.as_str())));
        }
        if order.state == OrderStatus::Working || order.state == OrderStatus::PartiallyFilled {
            self.index.mark_order_working(&order.id);
        } else if order.is_completed() {
            self.index.mark_order_completed(&order.id);
        }
        self.store.put(&key, encode(&order)?)
    }

    fn add_position(&mut self, position: Position, strategy: StrategyId) -> EngineResult<()> {
        let key = self.key("position", position.id.as_str());
        if self.store.get(&key)?.is_some() {
            return Err(duplicate_key("position", position.id.as_str()));
        }
        self.index.index_position(position.id.clone(), strategy);
        self.store.put(&key, encode(&position)?)
    }

    fn get_position(&mut self, id: &PositionId) -> Option<Position> {
        let key = self.key("position", id.as_str());
        self.store.get(&key).ok().flatten().and_then(|b| decode(&b).ok())
    }

    fn update_position(&mut self, position: Position) -> EngineResult<()> {
        let key = self.key("position", position.id.as_str());
        if self.store.get(&key)?.is_none() {
            return Err(EngineError::NotFound(format!("position {}", position.id.as_str())));
        }
        if position.is_closed() {
            self.index.mark_position_closed(&position.id);
        }
        self.store.put(&key, encode(&position)?)
    }

    fn update_strategy_state(&mut self, strategy: StrategyId, state: Vec<u8>) -> EngineResult<()> {
        let key = self.key("strategy_state", strategy.as_str());
        self.store.put(&key, state)
    }

    fn delete_strategy(&mut self, strategy: &StrategyId) -> EngineResult<()> {
        let key = self.key("strategy_state", strategy.as_str());
        self.store.delete(&key)?;
        if let Some(orders) = self.index.strategy_to_orders.remove(strategy) {
            for order_id in orders {
                self.store.delete(&self.key("order", order_id.as_str()))?;
            }
        }
        if let Some(positions) = self.index.strategy_to_positions.remove(strategy) {
            for position_id in positions {
                self.store.delete(&self.key("position", position_id.as_str()))?;
            }
        }
        Ok(())
    }

    fn order_count(&mut self) -> usize {
        let prefix = format!("trader:{}:order:", self.trader.as_str());
        self.store.scan_prefix(&prefix).map(|v| v.len()).unwrap_or(0)
    }

    fn position_count(&mut self) -> usize {
        let prefix = format!("trader:{}:position:", self.trader.as_str());
        self.store.scan_prefix(&prefix).map(|v| v.len()).unwrap_or(0)
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
        let prefix = format!("trader:{}:", self.trader.as_str());
        for key in self.store.scan_prefix(&prefix)? {
            self.store.delete(&key)?;
        }
        self.index = IndexSet::default();
        Ok(())
    }
}

/// `redis::Connection`-backed [`KeyValueStore`], the production external-kv
/// implementation.
pub struct RedisKvStore {
    conn: redis::Connection,
}

impl RedisKvStore {
    pub fn connect(uri: &str) -> EngineResult<Self> {
        let client = redis::Client::open(uri).map_err(|e| EngineError::Transport(e.to_string()))?;
        let conn = client
            .get_connection()
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(Self { conn })
    }
}

impl KeyValueStore for RedisKvStore {
    fn put(&mut self, key: &str, value: Vec<u8>) -> EngineResult<()> {
        redis::Commands::set(&mut self.conn, key, value).map_err(|e| EngineError::Transport(e.to_string()))
    }

    fn get(&mut self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        redis::Commands::get(&mut self.conn, key).map_err(|e| EngineError::Transport(e.to_string()))
    }

    fn delete(&mut self, key: &str) -> EngineResult<()> {
        redis::Commands::del(&mut self.conn, key).map_err(|e| EngineError::Transport(e.to_string()))
    }

    fn scan_prefix(&mut self, prefix: &str) -> EngineResult<Vec<String>> {
        redis::Commands::keys(&mut self.conn, format!("{prefix}*")).map_err(|e| EngineError::Transport(e.to_string()))
    }
}

/// In-process [`KeyValueStore`] backed by a plain `HashMap`. Used by tests
/// and ephemeral runs that want the external-kv code path without a running
/// store.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    map: std::collections::HashMap<String, Vec<u8>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKvStore {
    fn put(&mut self, key: &str, value: Vec<u8>) -> EngineResult<()> {
        self.map.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&mut self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.map.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> EngineResult<()> {
        self.map.remove(key);
        Ok(())
    }

    fn scan_prefix(&mut self, prefix: &str) -> EngineResult<Vec<String>> {
        Ok(self.map.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}
