//! Backtest driver: a virtual-clock scheduler interleaving tick delivery
//! with timer callbacks across all strategies.
//!
//! The driver pulls ticks from a data source in timestamp order, fires any
//! per-strategy timer events due at or before each tick, routes the tick
//! through the bound venue and execution engine, then hands it to the
//! strategies. Everything runs on one logical thread, so a run is a pure
//! function of its inputs.

use crate::clock::{Clock, LiveClock, TestClock};
use crate::database::{ExecutionDatabase, ResidualReport};
use crate::decimal::Decimal64;
use crate::engine::{Command, ExecutionEngine};
use crate::identifiers::{AccountId, StrategyId, Symbol};
use crate::order::{Order, OrderType, TimeInForce};
use crate::strategy::{dispatch_event, Strategy, Tick};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::{info, warn};

/// Source of ticks for a backtest, in non-decreasing timestamp order.
/// `None` signals data exhaustion.
pub trait DataSource {
    fn next(&mut self) -> Option<Tick>;
}

/// Bounded cache of the most recent ticks per symbol, refreshed before
/// strategy handlers run so a strategy can look back without owning its own
/// history buffer.
#[derive(Debug)]
pub struct TickCache {
    capacity: usize,
    ticks: HashMap<Symbol, VecDeque<Tick>>,
}

impl TickCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ticks: HashMap::new(),
        }
    }

    fn push(&mut self, tick: Tick) {
        let buffer = self.ticks.entry(tick.symbol.clone()).or_default();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(tick);
    }

    fn clear(&mut self) {
        self.ticks.clear();
    }

    pub fn latest(&self, symbol: &Symbol) -> Option<&Tick> {
        self.ticks.get(symbol).and_then(|buffer| buffer.back())
    }

    /// Cached ticks for `symbol`, oldest first.
    pub fn recent(&self, symbol: &Symbol) -> impl Iterator<Item = &Tick> {
        self.ticks.get(symbol).into_iter().flatten()
    }
}

/// Diagnostics emitted at teardown.
#[derive(Debug, Clone, Default)]
pub struct RunDiagnostics {
    pub ticks_processed: u64,
    pub residual: ResidualReport,
}

struct RegisteredStrategy {
    strategy: Box<dyn Strategy>,
    clock: TestClock,
}

/// Owns the live wall clock (diagnostics only), the global test clock, the
/// tick cache, strategies (each with its own test clock), and the execution
/// engine, which in turn owns the database and the bound venue (simulated
/// matching engine or live adapter).
pub struct BacktestDriver<D: ExecutionDatabase> {
    wall_clock: LiveClock,
    clock: TestClock,
    strategies: Vec<RegisteredStrategy>,
    engine: ExecutionEngine<D>,
    account_id: AccountId,
    rollover_rate_bp: Decimal64,
    tick_cache: TickCache,
    next_flatten_id: u64,
}

impl<D: ExecutionDatabase> BacktestDriver<D> {
    pub fn new(
        engine: ExecutionEngine<D>,
        account_id: AccountId,
        rollover_rate_bp: Decimal64,
        tick_capacity: usize,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            wall_clock: LiveClock::new(),
            clock: TestClock::new(start),
            strategies: Vec::new(),
            engine,
            account_id,
            rollover_rate_bp,
            tick_cache: TickCache::new(tick_capacity),
            next_flatten_id: 0,
        }
    }

    pub fn tick_cache(&self) -> &TickCache {
        &self.tick_cache
    }

    pub fn engine(&self) -> &ExecutionEngine<D> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ExecutionEngine<D> {
        &mut self.engine
    }

    /// Register a strategy with its own test clock starting at the driver's
    /// current time.
    pub fn register_strategy(&mut self, strategy: Box<dyn Strategy>) -> crate::error::EngineResult<()> {
        let id = strategy.id();
        self.engine.register_strategy(id)?;
        self.strategies.push(RegisteredStrategy { strategy, clock: TestClock::new(self.clock.time_now()) });
        Ok(())
    }

    /// Reset the engine, database, bound venue, tick cache and every
    /// strategy for a fresh run, setting all test clocks to `start`.
    pub fn reset(&mut self, start: DateTime<Utc>) -> crate::error::EngineResult<()> {
        self.engine.reset()?;
        self.clock = TestClock::new(start);
        self.tick_cache.clear();
        for registered in &mut self.strategies {
            registered.strategy.reset();
            registered.clock = TestClock::new(start);
        }
        Ok(())
    }

    /// Run the loop for `[clock.time_now(), stop]`. Consumes `data` until it
    /// is exhausted or the next tick's timestamp exceeds `stop`.
    pub fn run(&mut self, data: &mut dyn DataSource, stop: DateTime<Utc>) -> RunDiagnostics {
        let run_started = self.wall_clock.time_now();
        for registered in &mut self.strategies {
            registered.strategy.on_start(&mut registered.clock);
        }

        let mut ticks_processed = 0u64;
        while let Some(tick) = data.next() {
            if tick.timestamp > stop {
                break;
            }

            for idx in 0..self.strategies.len() {
                self.run_due_timers(idx, tick.timestamp);
            }
            self.clock.advance_time(tick.timestamp);

            let venue_events = self.engine.process_venue_tick(&tick.symbol, tick.timestamp, tick.bid, tick.ask);
            for event in venue_events {
                self.route_event(event, tick.timestamp);
            }

            self.deliver_tick(&tick);
            ticks_processed += 1;
        }

        self.stop(ticks_processed, run_started)
    }

    /// Drain and invoke every timer on one strategy's clock due at or before
    /// `until`, one fire-time at a time so `clock.time_now()` reflects the
    /// event's own timestamp while its handler runs.
    fn run_due_timers(&mut self, idx: usize, until: DateTime<Utc>) {
        loop {
            let registered = &mut self.strategies[idx];
            let Some(next) = registered.clock.peek_next_due() else {
                break;
            };
            if next > until {
                break;
            }
            let fired = registered.clock.advance_time(next);
            let mut commands = Vec::new();
            for event in fired {
                commands.extend(registered.strategy.on_timer(&event.name, event.fire_time, &mut registered.clock));
            }
            self.dispatch(commands);
        }
    }

    /// Route one venue-originated (or derived) event through the engine and
    /// on to the owning strategy.
    fn route_event(&mut self, event: crate::engine::Event, now: DateTime<Utc>) {
        let deliveries = self.engine.handle_event(event, now);
        for delivery in deliveries {
            if let Some(registered) = self.strategies.iter_mut().find(|s| s.strategy.id() == delivery.strategy) {
                let commands = dispatch_event(registered.strategy.as_mut(), delivery.event, &mut registered.clock);
                self.dispatch(commands);
            } else {
                warn!(strategy_id = %delivery.strategy, "delivery for unregistered strategy dropped");
            }
        }
    }

    fn deliver_tick(&mut self, tick: &Tick) {
        self.tick_cache.push(tick.clone());
        let mut all_commands = Vec::new();
        for registered in &mut self.strategies {
            all_commands.extend(registered.strategy.on_tick(tick, &mut registered.clock));
        }
        self.dispatch(all_commands);
    }

    fn dispatch(&mut self, commands: Vec<Command>) {
        let now = self.clock.time_now();
        for command in commands {
            match self.engine.execute_command(command, now) {
                Ok(events) => {
                    for event in events {
                        self.route_event(event, now);
                    }
                }
                Err(err) => warn!(%err, "strategy command failed, dropped"),
            }
        }
    }

    /// Accrue nightly rollover interest against the engine's account,
    /// feeding the resulting `AccountState` event back through the engine.
    /// The caller (a daily timer on the driver's own global clock, or an
    /// explicit test call) decides when "nightly" is.
    pub fn accrue_rollover(&mut self, now: DateTime<Utc>) {
        let Some(account) = self.engine.db_mut().get_account(&self.account_id) else {
            return;
        };
        if let Some(event) = self.engine.accrue_venue_rollover(&self.account_id, account.balance, self.rollover_rate_bp, now) {
            self.route_event(event, now);
        }
    }

    /// Teardown: stop every strategy, auto-cancel/auto-flatten per its
    /// declared options, and report residuals.
    fn stop(&mut self, ticks_processed: u64, run_started: DateTime<Utc>) -> RunDiagnostics {
        let now = self.clock.time_now();
        let mut stop_options = Vec::new();
        for registered in &mut self.strategies {
            registered.strategy.on_stop(&mut registered.clock);
            stop_options.push((registered.strategy.id(), registered.strategy.stop_options()));
        }

        for (strategy_id, options) in stop_options {
            if options.cancel_all_orders_on_stop {
                self.cancel_all_orders(&strategy_id);
            }
            if options.flatten_on_stop {
                self.flatten_all_positions(&strategy_id, now);
            }
        }

        let residual = self.engine.db().check_residuals();
        let elapsed = self.wall_clock.time_now() - run_started;
        info!(
            ticks_processed,
            elapsed_ms = elapsed.num_milliseconds(),
            working = residual.working_orders.len(),
            open = residual.open_positions.len(),
            "backtest run complete"
        );
        RunDiagnostics { ticks_processed, residual }
    }

    fn cancel_all_orders(&mut self, strategy_id: &StrategyId) {
        let order_ids = self.engine.db().orders_for_strategy(strategy_id);
        for order_id in order_ids {
            let Some(order) = self.engine.db_mut().get_order(&order_id) else { continue };
            if !order.is_completed() {
                self.dispatch(vec![Command::CancelOrder { order_id }]);
            }
        }
    }

    fn flatten_all_positions(&mut self, strategy_id: &StrategyId, now: DateTime<Utc>) {
        let position_ids = self.engine.db().positions_for_strategy(strategy_id);
        for position_id in position_ids {
            let Some(position) = self.engine.db_mut().get_position(&position_id) else { continue };
            if position.is_closed() {
                continue;
            }
            self.next_flatten_id += 1;
            let flatten_id = crate::identifiers::OrderId::new_unchecked(format!("FLAT-{}-{}", position.id.as_str(), self.next_flatten_id));
            let order = match Order::new(
                flatten_id,
                position.symbol.clone(),
                position.side_from_first_fill.opposite(),
                OrderType::Market,
                position.quantity,
                TimeInForce::Day,
                "flatten_on_stop".into(),
                now,
                None,
                None,
            ) {
                Ok(order) => order,
                Err(err) => {
                    warn!(%err, %position_id, "failed to build flatten order, position left open");
                    continue;
                }
            };
            self.dispatch(vec![Command::SubmitOrder { order, strategy: strategy_id.clone(), position: position_id }]);
        }
    }
}
