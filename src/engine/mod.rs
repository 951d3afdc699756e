//! Execution engine: the command router and event dispatcher sitting between
//! strategies and the bound venue adapter.
//!
//! The engine is the single point that enforces order state transitions,
//! folds fills into positions, and emits the derived position events
//! strategies observe. The API is synchronous call/return: the whole core
//! runs on one logical thread so a backtest is a pure function of its
//! inputs.

use crate::account::{Account, AccountEventKind};
use crate::database::ExecutionDatabase;
use crate::decimal::{Currency, Decimal64, Money, Price, Quantity};
use crate::error::{EngineError, EngineResult};
use crate::identifiers::{AccountId, OrderId, PositionId, PositionIdBroker, StrategyId, Symbol};
use crate::order::bracket::BracketOrder;
use crate::order::fsm::OrderEventKind;
use crate::order::Order;
use crate::position::{Fill, Position};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use tracing::{error, warn};

/// Commands a strategy issues to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    AccountInquiry { account_id: AccountId },
    SubmitOrder { order: Order, strategy: StrategyId, position: PositionId },
    SubmitBracketOrder { bracket: BracketOrder, strategy: StrategyId, position: PositionId },
    ModifyOrder { order_id: OrderId, price: Option<Price>, quantity: Option<Quantity> },
    CancelOrder { order_id: OrderId },
}

/// Events the venue (or the engine itself, for derived position events) feed
/// back through [`ExecutionEngine::handle_event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Order { order_id: OrderId, kind: OrderEventKind, timestamp: DateTime<Utc> },
    OrderCancelReject { order_id: OrderId, reason: String, timestamp: DateTime<Utc> },
    AccountState { account_id: AccountId, kind: AccountEventKind, timestamp: DateTime<Utc> },
    PositionOpened(Position),
    PositionModified(Position),
    PositionClosed(Position),
}

/// One event routed to a specific strategy, produced by [`ExecutionEngine::handle_event`].
#[derive(Debug, Clone)]
pub struct Delivery {
    pub strategy: StrategyId,
    pub event: Event,
}

/// Minimal synchronous venue contract the engine forwards commands to. The
/// simulated [`crate::matching::MatchingEngine`] and a live broker adapter
/// both implement this. Newly submitted/modified/cancelled orders surface
/// their acknowledging events on the adapter's own schedule (e.g. the next
/// tick), not synchronously from these calls; only `account_inquiry` answers
/// inline since it is a pure read.
pub trait VenueAdapter {
    fn submit_order(&mut self, order: Order) -> EngineResult<()>;
    fn modify_order(&mut self, order_id: &OrderId, price: Option<Price>, quantity: Option<Quantity>) -> EngineResult<()>;
    fn cancel_order(&mut self, order_id: &OrderId) -> EngineResult<()>;
    fn account_inquiry(&mut self, account_id: &AccountId, now: DateTime<Utc>) -> Vec<Event>;

    /// Consulted once per incoming tick. Only the simulated
    /// [`crate::matching::MatchingEngine`] overrides this; a live venue's
    /// events arrive asynchronously off the network instead, so the default
    /// is a no-op.
    fn process_tick(&mut self, symbol: &Symbol, now: DateTime<Utc>, bid: Price, ask: Price) -> Vec<Event> {
        let _ = (symbol, now, bid, ask);
        Vec::new()
    }

    /// Clear simulation-local state for a fresh backtest run. A no-op for a
    /// live venue, which has nothing to reset.
    fn reset(&mut self) {}

    /// Accrue nightly rollover interest. Only the simulated venue does
    /// anything; a live broker applies interest on its own side, so the
    /// default is a no-op that produces nothing to apply.
    fn accrue_rollover(&mut self, account_id: &AccountId, balance: Money, rate_bp: Decimal64, now: DateTime<Utc>) -> Option<Event> {
        let _ = (account_id, balance, rate_bp, now);
        None
    }
}

/// Command router, order state-machine enforcer and derived-event emitter
/// sitting between strategies and a single bound venue adapter.
pub struct ExecutionEngine<D: ExecutionDatabase> {
    db: D,
    venue: Option<Box<dyn VenueAdapter>>,
    account_id: AccountId,
    strategies: BTreeSet<StrategyId>,
    commands_processed: u64,
    events_processed: u64,
    /// OCO sibling lookup populated from `SubmitBracketOrder`: entries are
    /// symmetric, one per side of each pair in `BracketOrder::oco_pairs`.
    oco_sibling: std::collections::HashMap<OrderId, OrderId>,
    /// Quote currency per registered symbol. Fills on symbols with no entry
    /// are treated as quoted in the account currency.
    quote_currencies: std::collections::HashMap<Symbol, Currency>,
    /// Conversion rate from a quote currency into the account currency,
    /// keyed by quote currency.
    fx_rates: std::collections::HashMap<Currency, Decimal64>,
}

impl<D: ExecutionDatabase> ExecutionEngine<D> {
    pub fn new(db: D, account_id: AccountId) -> Self {
        Self {
            db,
            venue: None,
            account_id,
            strategies: BTreeSet::new(),
            commands_processed: 0,
            events_processed: 0,
            oco_sibling: std::collections::HashMap::new(),
            quote_currencies: std::collections::HashMap::new(),
            fx_rates: std::collections::HashMap::new(),
        }
    }

    /// Record the quote currency of a symbol's instrument, consulted when
    /// realizing PnL on its positions.
    pub fn register_symbol_currency(&mut self, symbol: Symbol, quote: Currency) {
        self.quote_currencies.insert(symbol, quote);
    }

    /// Update the conversion rate from `quote` into the account currency.
    /// Realized PnL on instruments not quoted in the account currency cannot
    /// be booked without a current rate; fills arriving before one is set
    /// are dropped with an error.
    pub fn update_fx_rate(&mut self, quote: Currency, rate: Decimal64) {
        self.fx_rates.insert(quote, rate);
    }

    pub fn db(&self) -> &D {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut D {
        &mut self.db
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn register_venue(&mut self, client: Box<dyn VenueAdapter>) {
        self.venue = Some(client);
    }

    /// Forward one tick to the bound venue. Returns an empty list if no
    /// venue is registered.
    pub fn process_venue_tick(&mut self, symbol: &Symbol, now: DateTime<Utc>, bid: Price, ask: Price) -> Vec<Event> {
        match self.venue.as_mut() {
            Some(venue) => venue.process_tick(symbol, now, bid, ask),
            None => Vec::new(),
        }
    }

    /// Forward a nightly rollover accrual to the bound venue, returning the
    /// resulting account event, if any, for the caller to feed through
    /// [`Self::handle_event`].
    pub fn accrue_venue_rollover(&mut self, account_id: &AccountId, balance: Money, rate_bp: Decimal64, now: DateTime<Utc>) -> Option<Event> {
        self.venue.as_mut().and_then(|venue| venue.accrue_rollover(account_id, balance, rate_bp, now))
    }

    pub fn register_strategy(&mut self, strategy: StrategyId) -> EngineResult<()> {
        if !self.strategies.insert(strategy.clone()) {
            return Err(crate::database::duplicate_key("strategy", strategy.as_str()));
        }
        Ok(())
    }

    /// Reset the database and counters for a fresh run, keeping registered
    /// strategies and the bound venue in place.
    pub fn reset(&mut self) -> EngineResult<()> {
        self.db.reset()?;
        self.commands_processed = 0;
        self.events_processed = 0;
        self.oco_sibling.clear();
        if let Some(venue) = self.venue.as_mut() {
            venue.reset();
        }
        Ok(())
    }

    pub fn deregister_strategy(&mut self, strategy: &StrategyId) -> EngineResult<()> {
        if !self.strategies.remove(strategy) {
            return Err(EngineError::NotFound(format!("strategy {}", strategy.as_str())));
        }
        self.db.delete_strategy(strategy)
    }

    /// Route one command to the bound venue. `SubmitOrder` and
    /// `SubmitBracketOrder` write the order(s) to the database *before*
    /// forwarding, so a reply event can never find a missing order;
    /// `ModifyOrder`/`CancelOrder` mutate nothing before the acknowledging
    /// event arrives.
    pub fn execute_command(&mut self, cmd: Command, now: DateTime<Utc>) -> EngineResult<Vec<Event>> {
        self.commands_processed += 1;
        let venue = self
            .venue
            .as_mut()
            .ok_or_else(|| EngineError::NotFound("no venue registered".into()))?;

        match cmd {
            Command::AccountInquiry { account_id } => Ok(venue.account_inquiry(&account_id, now)),
            Command::SubmitOrder { order, strategy, position } => {
                self.db.add_order(order.clone(), strategy, position)?;
                venue.submit_order(order)?;
                Ok(Vec::new())
            }
            Command::SubmitBracketOrder { bracket, strategy, position } => {
                for (a, b) in bracket.oco_pairs() {
                    self.oco_sibling.insert(a.clone(), b.clone());
                    self.oco_sibling.insert(b, a);
                }
                self.db.add_order(bracket.entry.clone(), strategy.clone(), position.clone())?;
                self.db.add_order(bracket.stop_loss.clone(), strategy.clone(), position.clone())?;
                if let Some(tp) = bracket.take_profit.clone() {
                    self.db.add_order(tp, strategy, position)?;
                }
                venue.submit_order(bracket.entry.clone())?;
                venue.submit_order(bracket.stop_loss.clone())?;
                if let Some(tp) = bracket.take_profit {
                    venue.submit_order(tp)?;
                }
                Ok(Vec::new())
            }
            Command::ModifyOrder { order_id, price, quantity } => {
                venue.modify_order(&order_id, price, quantity)?;
                Ok(Vec::new())
            }
            Command::CancelOrder { order_id } => {
                venue.cancel_order(&order_id)?;
                Ok(Vec::new())
            }
        }
    }

    /// Dispatch one venue (or derived) event: apply order/position updates
    /// and return the flat list of per-strategy deliveries produced. Derived
    /// position events are queued and run back through this same dispatch so
    /// strategies receive everything uniformly. Never panics: any event this
    /// can't route is logged and dropped.
    pub fn handle_event(&mut self, event: Event, now: DateTime<Utc>) -> Vec<Delivery> {
        let mut queue = VecDeque::from([event]);
        let mut deliveries = Vec::new();

        while let Some(event) = queue.pop_front() {
            self.events_processed += 1;
            match event {
                Event::OrderCancelReject { order_id, reason, timestamp } => {
                    match self.db.strategy_for_order(&order_id) {
                        Some(strategy) => deliveries.push(Delivery {
                            strategy,
                            event: Event::OrderCancelReject { order_id, reason, timestamp },
                        }),
                        None => warn!(%order_id, "cancel reject for unrouteable order dropped"),
                    }
                }
                Event::Order { order_id, kind, timestamp } => {
                    self.handle_order_event(order_id, kind, timestamp, &mut queue, &mut deliveries);
                }
                Event::AccountState { account_id, kind, timestamp } => {
                    // Applied account events are broadcast: account state is
                    // not owned by any single strategy.
                    if self.handle_account_event(account_id.clone(), kind.clone(), timestamp) {
                        for strategy in &self.strategies {
                            deliveries.push(Delivery {
                                strategy: strategy.clone(),
                                event: Event::AccountState {
                                    account_id: account_id.clone(),
                                    kind: kind.clone(),
                                    timestamp,
                                },
                            });
                        }
                    }
                }
                Event::PositionOpened(_) | Event::PositionModified(_) | Event::PositionClosed(_) => {
                    let position = match &event {
                        Event::PositionOpened(p) | Event::PositionModified(p) | Event::PositionClosed(p) => p.clone(),
                        _ => unreachable!(),
                    };
                    match self.db.strategy_for_position(&position.id) {
                        Some(strategy) => deliveries.push(Delivery { strategy, event }),
                        None => warn!(position_id = %position.id, "derived position event has no owning strategy"),
                    }
                }
            }
        }
        deliveries
    }

    fn handle_order_event(
        &mut self,
        order_id: OrderId,
        kind: OrderEventKind,
        timestamp: DateTime<Utc>,
        queue: &mut VecDeque<Event>,
        deliveries: &mut Vec<Delivery>,
    ) {
        let Some(mut order) = self.db.get_order(&order_id) else {
            warn!(%order_id, "event for unknown order dropped");
            return;
        };

        let fill_payload = match &kind {
            OrderEventKind::PartiallyFilled { fill_quantity, fill_price, timestamp, .. }
            | OrderEventKind::Filled { fill_quantity, fill_price, timestamp, .. } => {
                Some((*fill_quantity, *fill_price, *timestamp))
            }
            _ => None,
        };

        if let Err(err) = order.apply(kind.clone(), timestamp) {
            error!(%order_id, %err, "invalid state trigger, event dropped");
            return;
        }
        if let Err(err) = self.db.update_order(order.clone()) {
            error!(%order_id, %err, "failed to persist order update, event dropped");
            return;
        }

        match self.db.strategy_for_order(&order_id) {
            Some(strategy) => deliveries.push(Delivery {
                strategy,
                event: Event::Order { order_id: order_id.clone(), kind: kind.clone(), timestamp },
            }),
            None => warn!(%order_id, "order has no owning strategy, delivery dropped"),
        }

        if matches!(kind, OrderEventKind::Filled { .. } | OrderEventKind::Cancelled) {
            self.cancel_oco_sibling(&order_id);
        }

        if let Some((fill_quantity, fill_price, fill_timestamp)) = fill_payload {
            self.apply_fill(&order, fill_quantity, fill_price, fill_timestamp, queue);
        }
    }

    /// When one leg of a bracket's OCO pair reaches a terminal fill or
    /// cancel, cancel the other leg if it is still live. Silently does
    /// nothing if the order was never part of a bracket, its sibling is
    /// already terminal, or no venue is registered to carry the cancel.
    fn cancel_oco_sibling(&mut self, order_id: &OrderId) {
        let Some(sibling_id) = self.oco_sibling.remove(order_id) else {
            return;
        };
        self.oco_sibling.remove(&sibling_id);

        let Some(sibling) = self.db.get_order(&sibling_id) else {
            return;
        };
        if sibling.is_completed() {
            return;
        }
        if let Some(venue) = self.venue.as_mut() {
            if let Err(err) = venue.cancel_order(&sibling_id) {
                warn!(%sibling_id, %err, "failed to cancel OCO sibling");
            }
        }
    }

    /// Fill-to-position flow: resolve `position_id` via the order index,
    /// falling back to the broker position index; create a new [`Position`]
    /// on first fill (emits `PositionOpened`), otherwise fold the fill into
    /// the existing one (emits `PositionModified` or `PositionClosed`).
    fn apply_fill(
        &mut self,
        order: &Order,
        fill_quantity: Quantity,
        fill_price: Price,
        timestamp: DateTime<Utc>,
        queue: &mut VecDeque<Event>,
    ) {
        let position_id = match self.db.position_for_order(&order.id).or_else(|| {
            order
                .position_id_broker
                .as_ref()
                .and_then(|broker| self.db.position_for_broker_id(broker))
        }) {
            Some(id) => id,
            None => {
                error!(order_id = %order.id, "fill unprocessable: no position_id resolvable, event dropped");
                return;
            }
        };

        let Some(strategy) = self.db.strategy_for_position(&position_id) else {
            error!(%position_id, "fill unprocessable: no strategy for position, event dropped");
            return;
        };

        let fill = Fill {
            order_id_side: order.side,
            quantity: fill_quantity,
            price: fill_price,
            timestamp,
        };

        let account_currency = self
            .db
            .get_account(&self.account_id)
            .map(|a| a.currency)
            .unwrap_or_else(Currency::usd);
        let quote_currency = self
            .quote_currencies
            .get(&order.symbol)
            .cloned()
            .unwrap_or_else(|| account_currency.clone());
        let fx_rate = if quote_currency != account_currency {
            self.fx_rates.get(&quote_currency).copied()
        } else {
            None
        };

        match self.db.get_position(&position_id) {
            Some(position) if position.is_closed() => {
                error!(%position_id, order_id = %order.id, "fill for an already-closed position dropped");
            }
            None => {
                let position = Position::open(
                    position_id,
                    order.symbol.clone(),
                    order.id.clone(),
                    fill,
                    quote_currency,
                    account_currency,
                );
                if let Err(err) = self.db.add_position(position.clone(), strategy) {
                    error!(%err, "failed to persist newly opened position, event dropped");
                    return;
                }
                queue.push_back(Event::PositionOpened(position));
            }
            Some(mut position) => {
                if let Err(err) = position.apply_fill(order.id.clone(), fill, fx_rate) {
                    error!(%position_id, %err, "fill not applicable to position, event dropped");
                    return;
                }
                let closed = position.is_closed();
                if let Err(err) = self.db.update_position(position.clone()) {
                    error!(%err, "failed to persist position update, event dropped");
                    return;
                }
                queue.push_back(if closed {
                    Event::PositionClosed(position)
                } else {
                    Event::PositionModified(position)
                });
            }
        }
    }

    /// Create the engine's own account on first sight (requires an
    /// `Initialized` event carrying base currency and starting balance),
    /// apply subsequent events to an existing account, or warn and drop
    /// anything else. Returns whether the event was applied.
    fn handle_account_event(&mut self, account_id: AccountId, kind: AccountEventKind, timestamp: DateTime<Utc>) -> bool {
        match self.db.get_account(&account_id) {
            Some(mut account) => {
                if let Err(err) = account.apply(kind, timestamp) {
                    error!(%account_id, %err, "account event rejected, dropped");
                    return false;
                }
                if let Err(err) = self.db.update_account(account) {
                    error!(%account_id, %err, "failed to persist account update");
                    return false;
                }
                true
            }
            None if account_id == self.account_id => match kind {
                AccountEventKind::Initialized { currency, starting_balance } => {
                    let account = Account::new(account_id, currency, starting_balance);
                    match self.db.add_account(account) {
                        Ok(()) => true,
                        Err(err) => {
                            error!(%err, "failed to persist newly created account");
                            false
                        }
                    }
                }
                _ => {
                    warn!(%account_id, "cannot create account from a non-Initialized event");
                    false
                }
            },
            None => {
                warn!(%account_id, "account event for unknown account dropped");
                false
            }
        }
    }

    /// Link a venue-reported broker position id to our internal
    /// `position_id`, enabling the fallback resolution path in
    /// [`Self::apply_fill`] for fills that only carry the broker's id.
    pub fn link_broker_position(&mut self, broker: PositionIdBroker, position: PositionId) {
        self.db.link_broker_position(broker, position);
    }
}
