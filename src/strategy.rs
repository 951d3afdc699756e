//! Strategy contract: the abstract lifecycle and handler surface the engine
//! and backtest driver call into.
//!
//! A strategy receives ticks, order/position/account events, timer firings
//! and start/stop calls, and acts by returning [`Command`]s. It owns a clock
//! handle given to it at registration rather than reading any global clock.

use crate::account::AccountEventKind;
use crate::clock::Clock;
use crate::engine::{Command, Event};
use crate::identifiers::{AccountId, StrategyId};
use crate::order::fsm::OrderEventKind;
use crate::position::Position;
use chrono::{DateTime, Utc};

/// A market data tick delivered to strategies: a top-of-book snapshot for a
/// symbol at a timestamp.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tick {
    pub symbol: crate::identifiers::Symbol,
    pub bid: crate::decimal::Price,
    pub ask: crate::decimal::Price,
    pub timestamp: DateTime<Utc>,
}

/// Options a strategy declares at registration governing teardown behavior:
/// working orders may be auto-cancelled and open positions may be
/// auto-flattened when the run loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    pub cancel_all_orders_on_stop: bool,
    pub flatten_on_stop: bool,
}

/// One strategy's view of an order-lifecycle event, narrowed from the
/// engine's internal [`OrderEventKind`] plus the order id it belongs to.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OrderEvent {
    pub order_id: crate::identifiers::OrderId,
    pub kind: OrderEventKind,
    pub timestamp: DateTime<Utc>,
}

/// One strategy's view of a position-lifecycle transition.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum PositionEvent {
    Opened(Position),
    Modified(Position),
    Closed(Position),
}

/// Account-level event narrowed the same way as [`OrderEvent`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AccountEvent {
    pub account_id: AccountId,
    pub kind: AccountEventKind,
    pub timestamp: DateTime<Utc>,
}

/// Abstract lifecycle and handler surface a strategy implements; the
/// backtest driver (live driver, symmetrically) is the only caller. A
/// strategy never mutates the database directly: it observes through the
/// events delivered here and acts by returning [`Command`]s.
///
/// This crate does not constrain strategy *content*, only this contract.
pub trait Strategy {
    /// Stable identity this strategy registers under.
    fn id(&self) -> StrategyId;

    /// Auto-cancel/auto-flatten options consulted when the run loop stops.
    fn stop_options(&self) -> StopOptions {
        StopOptions::default()
    }

    /// Called once before the run loop begins, with the per-strategy clock
    /// handle it owns for the remainder of the run.
    fn on_start(&mut self, clock: &mut dyn Clock) {
        let _ = clock;
    }

    /// Called once a new tick for a symbol this strategy tracks arrives,
    /// after the matching/venue events for that tick have already been
    /// routed.
    fn on_tick(&mut self, tick: &Tick, clock: &mut dyn Clock) -> Vec<Command> {
        let _ = (tick, clock);
        Vec::new()
    }

    /// Called for every order-lifecycle event delivered to this strategy.
    fn on_order_event(&mut self, event: &OrderEvent, clock: &mut dyn Clock) -> Vec<Command> {
        let _ = (event, clock);
        Vec::new()
    }

    /// Called when a `CancelOrder`/`ModifyOrder` command this strategy sent
    /// is rejected by the venue. Distinct from `on_order_event` since the
    /// order's own state machine is untouched by a reject.
    fn on_cancel_reject(
        &mut self,
        order_id: &crate::identifiers::OrderId,
        reason: &str,
        timestamp: DateTime<Utc>,
        clock: &mut dyn Clock,
    ) -> Vec<Command> {
        let _ = (order_id, reason, timestamp, clock);
        Vec::new()
    }

    /// Called for every position-lifecycle event delivered to this strategy.
    fn on_position_event(&mut self, event: &PositionEvent, clock: &mut dyn Clock) -> Vec<Command> {
        let _ = (event, clock);
        Vec::new()
    }

    /// Called for every account-state event delivered to this strategy.
    fn on_account_event(&mut self, event: &AccountEvent, clock: &mut dyn Clock) -> Vec<Command> {
        let _ = (event, clock);
        Vec::new()
    }

    /// Called when a named timer or time alert registered on this
    /// strategy's clock fires.
    fn on_timer(&mut self, name: &str, fire_time: DateTime<Utc>, clock: &mut dyn Clock) -> Vec<Command> {
        let _ = (name, fire_time, clock);
        Vec::new()
    }

    /// Called once at teardown, before `stop_options` is consulted for
    /// auto-cancel/auto-flatten.
    fn on_stop(&mut self, clock: &mut dyn Clock) {
        let _ = clock;
    }

    /// Reset internal state for a fresh run. The default no-op is correct
    /// for strategies with no carried-forward state.
    fn reset(&mut self) {}
}

/// Routes one engine [`Event`] to the narrowed callback a [`Strategy`]
/// implements, returning the commands it produces. This turns an
/// already-routed [`crate::engine::Delivery`]'s event into a strategy
/// callback instead of a database mutation.
pub fn dispatch_event(strategy: &mut dyn Strategy, event: Event, clock: &mut dyn Clock) -> Vec<Command> {
    match event {
        Event::Order { order_id, kind, timestamp } => {
            strategy.on_order_event(&OrderEvent { order_id, kind, timestamp }, clock)
        }
        Event::OrderCancelReject { order_id, reason, timestamp } => {
            strategy.on_cancel_reject(&order_id, &reason, timestamp, clock)
        }
        Event::AccountState { account_id, kind, timestamp } => {
            strategy.on_account_event(&AccountEvent { account_id, kind, timestamp }, clock)
        }
        Event::PositionOpened(p) => strategy.on_position_event(&PositionEvent::Opened(p), clock),
        Event::PositionModified(p) => strategy.on_position_event(&PositionEvent::Modified(p), clock),
        Event::PositionClosed(p) => strategy.on_position_event(&PositionEvent::Closed(p), clock),
    }
}
