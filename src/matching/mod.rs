//! Simulated matching engine: the deterministic venue adapter for backtests.
//!
//! Converts incoming quote ticks into order acknowledgements, fills,
//! expiries, modifications and rejects. Working passive orders rest per
//! symbol and are scanned in FIFO order against each new best bid/ask
//! snapshot; triggered orders consult a [`FillPolicy`] for the executed
//! price and size, so replays with the same policy, tick stream and command
//! stream produce identical event streams.

mod fill_model;

pub use fill_model::{FillDecision, FillPolicy, ScriptedFillModel, SeededFillModel};

use crate::account::AccountEventKind;
use crate::decimal::{Currency, Decimal64, Money, Price, Quantity};
use crate::engine::{Event, VenueAdapter};
use crate::error::EngineResult;
use crate::identifiers::{AccountId, ExecutionId, OrderId, OrderIdBroker, Symbol};
use crate::order::fsm::OrderEventKind;
use crate::order::{Order, OrderSide, OrderType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

/// Per-symbol book state the matching engine tracks.
#[derive(Debug, Default)]
struct SymbolBook {
    best_bid: Option<Price>,
    best_ask: Option<Price>,
    working: Vec<Order>,
}

enum PendingRequest {
    New(Order),
    Modify { order_id: OrderId, price: Option<Price>, quantity: Option<Quantity> },
    Cancel(OrderId),
}

/// Static configuration for the simulated venue's account and fill
/// behaviour.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub account_id: AccountId,
    pub account_currency: Currency,
    pub starting_capital: Money,
    pub tick_size: Decimal64,
    pub commission_rate_bp: Decimal64,
    pub partial_fills_enabled: bool,
}

/// Deterministic simulated venue: converts quote ticks into order
/// acknowledgements, fills, expiries and rejects.
pub struct MatchingEngine<F: FillPolicy> {
    books: HashMap<Symbol, SymbolBook>,
    fill_model: F,
    config: MatchingConfig,
    commission_accrued: Money,
    rollover_accrued: Money,
    frozen_account: bool,
    pending: Vec<PendingRequest>,
    execution_counter: u64,
    broker_order_counter: u64,
    basis_point_scale: Decimal64,
}

impl<F: FillPolicy> MatchingEngine<F> {
    pub fn new(fill_model: F, config: MatchingConfig) -> Self {
        let currency = config.account_currency.clone();
        Self {
            books: HashMap::new(),
            fill_model,
            config,
            commission_accrued: Money::zero(currency.clone()),
            rollover_accrued: Money::zero(currency),
            frozen_account: false,
            pending: Vec::new(),
            execution_counter: 0,
            broker_order_counter: 0,
            basis_point_scale: Decimal64::from_decimal(Decimal::new(1, 4), 8),
        }
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen_account = frozen;
    }

    /// Latest book snapshot for `symbol`, if any tick has arrived.
    pub fn best_quote(&self, symbol: &Symbol) -> Option<(Price, Price)> {
        let book = self.books.get(symbol)?;
        Some((book.best_bid?, book.best_ask?))
    }

    pub fn commission_accrued(&self) -> &Money {
        &self.commission_accrued
    }

    pub fn rollover_accrued(&self) -> &Money {
        &self.rollover_accrued
    }

    /// Clear books, pending requests and accruals for a fresh run. The
    /// configuration and the fill model itself are untouched.
    pub fn reset(&mut self) {
        self.books.clear();
        self.pending.clear();
        self.commission_accrued = Money::zero(self.config.account_currency.clone());
        self.rollover_accrued = Money::zero(self.config.account_currency.clone());
        self.execution_counter = 0;
        self.broker_order_counter = 0;
    }

    /// Accrue nightly rollover interest on the account's cash balance at the
    /// given short-term rate, returning the `AccountState` event for the
    /// engine to apply. The backtest driver's daily timer is the caller.
    /// Returns `None` when the account is frozen, which disables all PnL
    /// application, rollover included.
    pub fn accrue_rollover(&mut self, account_id: AccountId, balance: Money, rate_bp: Decimal64, now: DateTime<Utc>) -> Option<Event> {
        if self.frozen_account {
            return None;
        }
        let amount = Money::new(
            balance.amount().checked_mul(&rate_bp).checked_mul(&self.basis_point_scale),
            self.config.account_currency.clone(),
        );
        if let Ok(sum) = self.rollover_accrued.checked_add(&amount) {
            self.rollover_accrued = sum;
        }
        Some(Event::AccountState {
            account_id,
            kind: AccountEventKind::Rollover(amount),
            timestamp: now,
        })
    }

    fn next_execution_id(&mut self) -> ExecutionId {
        self.execution_counter += 1;
        ExecutionId::new_unchecked(format!("E-{}", self.execution_counter))
    }

    fn next_broker_order_id(&mut self) -> OrderIdBroker {
        self.broker_order_counter += 1;
        OrderIdBroker::new_unchecked(format!("B-{}", self.broker_order_counter))
    }

    /// Trigger price condition for a resting LIMIT/STOP order against the
    /// current book: LIMIT BUY triggers at `ask <= limit`, STOP BUY at
    /// `ask >= stop`, each with the SELL mirror.
    fn is_triggered(order: &Order, bid: Price, ask: Price) -> bool {
        let Some(price) = order.price else {
            return true; // MARKET
        };
        match (order.order_type, order.side) {
            (OrderType::Limit, OrderSide::Buy) => ask.raw() <= price.raw(),
            (OrderType::Limit, OrderSide::Sell) => bid.raw() >= price.raw(),
            (OrderType::Stop, OrderSide::Buy) => ask.raw() >= price.raw(),
            (OrderType::Stop, OrderSide::Sell) => bid.raw() <= price.raw(),
            (OrderType::Market, _) => true,
        }
    }

    fn trigger_reference_price(order: &Order, bid: Price, ask: Price) -> Decimal64 {
        match order.order_type {
            OrderType::Market => match order.side {
                OrderSide::Buy => ask.raw(),
                OrderSide::Sell => bid.raw(),
            },
            _ => order.price.map(|p| p.raw()).unwrap_or(ask.raw()),
        }
    }

    /// Consult the fill model for a triggered order and apply the resulting
    /// fill to the matching engine's own copy of the order, appending the
    /// emitted order and commission events in order.
    fn fill_triggered_order(&mut self, order: &mut Order, bid: Price, ask: Price, now: DateTime<Utc>, events: &mut Vec<Event>) {
        let leaves = order.leaves_quantity();
        let trigger_price = Self::trigger_reference_price(order, bid, ask);
        let decision = self.fill_model.decide(order.side, trigger_price, self.config.tick_size, leaves);

        if !decision.quantity.is_sign_positive() {
            debug!(order_id = %order.id, "fill model declined to fill on this trigger");
            return;
        }

        let clamped = decision.quantity.min(leaves);
        if !self.config.partial_fills_enabled && clamped != leaves {
            debug!(order_id = %order.id, "partial fills disabled for this venue, decision declined");
            return;
        }

        let fill_price = Price::new(decision.price).unwrap_or_else(|_| order.price.unwrap_or(ask));
        let Ok(fill_quantity) = Quantity::new_positive(clamped) else {
            debug!(order_id = %order.id, "fill model decision clamped to zero, no fill applied");
            return;
        };
        let execution_id = self.next_execution_id();
        let is_full = fill_quantity.raw() == leaves;

        let kind = if is_full {
            OrderEventKind::Filled { fill_quantity, fill_price, execution_id, timestamp: now }
        } else {
            OrderEventKind::PartiallyFilled { fill_quantity, fill_price, execution_id, timestamp: now }
        };

        if order.apply(kind.clone(), now).is_err() {
            debug!(order_id = %order.id, state = ?order.state, "fill not applicable in current state, skipped");
            return;
        }
        events.push(Event::Order { order_id: order.id.clone(), kind, timestamp: now });

        // Commission debits the account per fill unless the account is
        // frozen, which disables all PnL application.
        if !self.frozen_account {
            let notional = fill_price.raw().checked_mul(&fill_quantity.raw());
            let commission = Money::new(
                notional.checked_mul(&self.config.commission_rate_bp).checked_mul(&self.basis_point_scale),
                self.config.account_currency.clone(),
            );
            if !commission.amount().is_zero() {
                if let Ok(sum) = self.commission_accrued.checked_add(&commission) {
                    self.commission_accrued = sum;
                }
                events.push(Event::AccountState {
                    account_id: self.config.account_id.clone(),
                    kind: AccountEventKind::Commission(commission),
                    timestamp: now,
                });
            }
        }
    }

    /// Process one incoming quote tick for `symbol`: resolve pending
    /// requests, refresh the book snapshot, then scan working orders in FIFO
    /// order for expiry and triggers.
    pub fn process_tick(&mut self, symbol: &Symbol, now: DateTime<Utc>, bid: Price, ask: Price) -> Vec<Event> {
        let mut events = Vec::new();

        self.apply_pending(symbol, bid, ask, now, &mut events);

        let book = self.books.entry(symbol.clone()).or_default();
        book.best_bid = Some(bid);
        book.best_ask = Some(ask);
        let working = std::mem::take(&mut book.working);

        let mut still_working = Vec::with_capacity(working.len());
        for mut order in working {
            if let Some(expire_time) = order.expire_time {
                if now >= expire_time {
                    let kind = OrderEventKind::Expired;
                    if order.apply(kind.clone(), now).is_ok() {
                        events.push(Event::Order { order_id: order.id.clone(), kind, timestamp: now });
                        continue;
                    }
                }
            }

            if Self::is_triggered(&order, bid, ask) {
                self.fill_triggered_order(&mut order, bid, ask, now, &mut events);
                if order.state.is_terminal() {
                    continue;
                }
            }
            still_working.push(order);
        }

        self.books.entry(symbol.clone()).or_default().working = still_working;
        events
    }

    fn apply_pending(&mut self, symbol: &Symbol, bid: Price, ask: Price, now: DateTime<Utc>, events: &mut Vec<Event>) {
        let pending = std::mem::take(&mut self.pending);
        // A cancel/modify for an order this engine cannot locate in any book
        // is resolved against whichever symbol ticks next, so it is rejected
        // promptly instead of sitting in the pending queue forever.
        let (mine, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|r| match r {
            PendingRequest::New(o) => &o.symbol == symbol,
            PendingRequest::Modify { order_id, .. } => self.order_symbol(order_id).map(|s| &s == symbol).unwrap_or(true),
            PendingRequest::Cancel(order_id) => self.order_symbol(order_id).map(|s| &s == symbol).unwrap_or(true),
        });
        self.pending = rest;

        for request in mine {
            match request {
                PendingRequest::Cancel(order_id) => self.apply_cancel(symbol, &order_id, now, events),
                PendingRequest::Modify { order_id, price, quantity } => self.apply_modify(symbol, &order_id, price, quantity, now, events),
                PendingRequest::New(mut order) => {
                    let submitted = OrderEventKind::Submitted;
                    if order.apply(submitted.clone(), now).is_ok() {
                        events.push(Event::Order { order_id: order.id.clone(), kind: submitted, timestamp: now });
                    }

                    let id_broker = self.next_broker_order_id();
                    let accepted = OrderEventKind::Accepted { id_broker };
                    if order.apply(accepted.clone(), now).is_ok() {
                        events.push(Event::Order { order_id: order.id.clone(), kind: accepted, timestamp: now });
                    }

                    if Self::is_triggered(&order, bid, ask) {
                        self.fill_triggered_order(&mut order, bid, ask, now, events);
                    }
                    if !order.state.is_terminal() {
                        // A partial fill at accept time leaves the order in
                        // PARTIALLY_FILLED, which has no transition to
                        // WORKING; it rests on the book in that state.
                        if order.state == crate::order::fsm::OrderStatus::Accepted {
                            let working = OrderEventKind::Working;
                            if order.apply(working.clone(), now).is_ok() {
                                events.push(Event::Order { order_id: order.id.clone(), kind: working, timestamp: now });
                            }
                        }
                        self.books.entry(symbol.clone()).or_default().working.push(order);
                    }
                }
            }
        }
    }

    fn order_symbol(&self, order_id: &OrderId) -> Option<Symbol> {
        self.books.iter().find_map(|(symbol, book)| {
            book.working.iter().any(|o| &o.id == order_id).then(|| symbol.clone())
        })
    }

    fn apply_cancel(&mut self, symbol: &Symbol, order_id: &OrderId, now: DateTime<Utc>, events: &mut Vec<Event>) {
        let book = self.books.entry(symbol.clone()).or_default();
        if let Some(pos) = book.working.iter().position(|o| &o.id == order_id) {
            let mut order = book.working.remove(pos);
            let kind = OrderEventKind::Cancelled;
            match order.apply(kind.clone(), now) {
                Ok(()) => events.push(Event::Order { order_id: order.id.clone(), kind, timestamp: now }),
                Err(_) => events.push(Event::OrderCancelReject {
                    order_id: order.id.clone(),
                    reason: "order already in a non-cancellable state".into(),
                    timestamp: now,
                }),
            }
        } else {
            events.push(Event::OrderCancelReject {
                order_id: order_id.clone(),
                reason: "order not found at venue".into(),
                timestamp: now,
            });
        }
    }

    fn apply_modify(&mut self, symbol: &Symbol, order_id: &OrderId, price: Option<Price>, quantity: Option<Quantity>, now: DateTime<Utc>, events: &mut Vec<Event>) {
        let book = self.books.entry(symbol.clone()).or_default();
        if let Some(order) = book.working.iter_mut().find(|o| &o.id == order_id) {
            let kind = OrderEventKind::Modified { price, quantity };
            match order.apply(kind.clone(), now) {
                Ok(()) => events.push(Event::Order { order_id: order.id.clone(), kind, timestamp: now }),
                Err(_) => events.push(Event::OrderCancelReject {
                    order_id: order.id.clone(),
                    reason: "order not modifiable in its current state".into(),
                    timestamp: now,
                }),
            }
        } else {
            events.push(Event::OrderCancelReject {
                order_id: order_id.clone(),
                reason: "order not found at venue".into(),
                timestamp: now,
            });
        }
    }
}

impl<F: FillPolicy> VenueAdapter for MatchingEngine<F> {
    fn submit_order(&mut self, order: Order) -> EngineResult<()> {
        self.pending.push(PendingRequest::New(order));
        Ok(())
    }

    fn modify_order(&mut self, order_id: &OrderId, price: Option<Price>, quantity: Option<Quantity>) -> EngineResult<()> {
        self.pending.push(PendingRequest::Modify { order_id: order_id.clone(), price, quantity });
        Ok(())
    }

    fn cancel_order(&mut self, order_id: &OrderId) -> EngineResult<()> {
        self.pending.push(PendingRequest::Cancel(order_id.clone()));
        Ok(())
    }

    fn account_inquiry(&mut self, account_id: &AccountId, now: DateTime<Utc>) -> Vec<Event> {
        if account_id != &self.config.account_id {
            return Vec::new();
        }
        vec![Event::AccountState {
            account_id: account_id.clone(),
            kind: AccountEventKind::Initialized {
                currency: self.config.account_currency.clone(),
                starting_balance: self.config.starting_capital.clone(),
            },
            timestamp: now,
        }]
    }

    fn process_tick(&mut self, symbol: &Symbol, now: DateTime<Utc>, bid: Price, ask: Price) -> Vec<Event> {
        self.process_tick(symbol, now, bid, ask)
    }

    fn reset(&mut self) {
        self.reset()
    }

    fn accrue_rollover(
        &mut self,
        account_id: &AccountId,
        balance: Money,
        rate_bp: Decimal64,
        now: DateTime<Utc>,
    ) -> Option<Event> {
        MatchingEngine::accrue_rollover(self, account_id.clone(), balance, rate_bp, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Decimal64;
    use crate::order::TimeInForce;

    fn qty(v: &str) -> Quantity {
        Quantity::new_positive(Decimal64::from_str_with_precision(v, 8).unwrap()).unwrap()
    }
    fn price(v: &str) -> Price {
        Price::new(Decimal64::from_str_with_precision(v, 4).unwrap()).unwrap()
    }

    fn test_config() -> MatchingConfig {
        MatchingConfig {
            account_id: AccountId::new_unchecked("A-1"),
            account_currency: Currency::usd(),
            starting_capital: Money::from_string("100000.00", Currency::usd()).unwrap(),
            tick_size: Decimal64::from_str_with_precision("0.0001", 4).unwrap(),
            commission_rate_bp: Decimal64::zero(4),
            partial_fills_enabled: true,
        }
    }

    fn engine_with_script(prices: Vec<&str>, quantities: Vec<&str>) -> MatchingEngine<ScriptedFillModel> {
        let steps = prices
            .into_iter()
            .zip(quantities)
            .map(|(p, q)| (Decimal64::from_str_with_precision(p, 4).unwrap(), Decimal64::from_str_with_precision(q, 8).unwrap()))
            .collect();
        MatchingEngine::new(ScriptedFillModel::new(steps), test_config())
    }

    fn limit_buy(id: &str, px: &str) -> Order {
        Order::new(
            OrderId::new_unchecked(id),
            Symbol::new_unchecked("EUR/USD"),
            OrderSide::Buy,
            OrderType::Limit,
            qty("100"),
            TimeInForce::Gtc,
            "i".into(),
            Utc::now(),
            Some(price(px)),
            None,
        )
        .unwrap()
    }

    #[test]
    fn accepted_limit_fills_on_trigger_tick() {
        let symbol = Symbol::new_unchecked("EUR/USD");
        let mut engine = engine_with_script(vec!["1.2000"], vec!["100"]);
        engine.submit_order(limit_buy("O-1", "1.2000")).unwrap();

        let t0 = Utc::now();
        let first = engine.process_tick(&symbol, t0, price("1.2005"), price("1.2010"));
        assert!(first.iter().any(|e| matches!(e, Event::Order { kind: OrderEventKind::Working, .. })));
        assert_eq!(engine.best_quote(&symbol), Some((price("1.2005"), price("1.2010"))));

        let second = engine.process_tick(&symbol, t0, price("1.1995"), price("1.2000"));
        assert!(second.iter().any(|e| matches!(e, Event::Order { kind: OrderEventKind::Filled { .. }, .. })));
    }

    #[test]
    fn gtd_order_expires_on_first_tick_past_expiry() {
        let symbol = Symbol::new_unchecked("EUR/USD");
        let mut engine = engine_with_script(vec![], vec![]);
        let now = Utc::now();
        let order = Order::new(
            OrderId::new_unchecked("O-1"),
            symbol.clone(),
            OrderSide::Buy,
            OrderType::Limit,
            qty("10"),
            TimeInForce::Gtd,
            "i".into(),
            now,
            Some(price("1.10")),
            Some(now - chrono::Duration::seconds(1)),
        )
        .unwrap();
        engine.submit_order(order).unwrap();

        let events = engine.process_tick(&symbol, now, price("1.2005"), price("1.2010"));
        assert!(events.iter().any(|e| matches!(e, Event::Order { kind: OrderEventKind::Expired, .. })));
    }

    #[test]
    fn cancel_of_unknown_order_is_rejected() {
        let symbol = Symbol::new_unchecked("EUR/USD");
        let mut engine = engine_with_script(vec![], vec![]);
        engine.cancel_order(&OrderId::new_unchecked("ghost")).unwrap();
        let events = engine.process_tick(&symbol, Utc::now(), price("1.0"), price("1.0"));
        assert!(events.iter().any(|e| matches!(e, Event::OrderCancelReject { .. })));
    }

    #[test]
    fn fill_emits_commission_debit_at_the_configured_rate() {
        let symbol = Symbol::new_unchecked("EUR/USD");
        let mut config = test_config();
        config.commission_rate_bp = Decimal64::from_str_with_precision("0.20", 4).unwrap();
        let mut engine = MatchingEngine::new(
            ScriptedFillModel::new(vec![(
                Decimal64::from_str_with_precision("1.2000", 4).unwrap(),
                Decimal64::from_str_with_precision("100", 8).unwrap(),
            )]),
            config,
        );
        engine.submit_order(limit_buy("O-1", "1.2000")).unwrap();

        let events = engine.process_tick(&symbol, Utc::now(), price("1.1995"), price("1.2000"));
        assert!(events.iter().any(|e| matches!(
            e,
            Event::AccountState { kind: AccountEventKind::Commission(_), .. }
        )));
        // 120 notional x 0.20bp = 0.0024
        assert_eq!(
            engine.commission_accrued().amount(),
            Decimal64::from_str_with_precision("0.0024", 8).unwrap()
        );
    }

    #[test]
    fn frozen_account_suppresses_commission() {
        let symbol = Symbol::new_unchecked("EUR/USD");
        let mut config = test_config();
        config.commission_rate_bp = Decimal64::from_str_with_precision("0.20", 4).unwrap();
        let mut engine = MatchingEngine::new(
            ScriptedFillModel::new(vec![(
                Decimal64::from_str_with_precision("1.2000", 4).unwrap(),
                Decimal64::from_str_with_precision("100", 8).unwrap(),
            )]),
            config,
        );
        engine.set_frozen(true);
        engine.submit_order(limit_buy("O-1", "1.2000")).unwrap();

        let events = engine.process_tick(&symbol, Utc::now(), price("1.1995"), price("1.2000"));
        assert!(events.iter().any(|e| matches!(e, Event::Order { kind: OrderEventKind::Filled { .. }, .. })));
        assert!(!events.iter().any(|e| matches!(e, Event::AccountState { .. })));
        assert!(engine.commission_accrued().amount().is_zero());
    }

    #[test]
    fn rollover_accrues_interest_on_the_account_balance() {
        let mut engine = engine_with_script(vec![], vec![]);
        let event = engine
            .accrue_rollover(
                AccountId::new_unchecked("A-1"),
                Money::from_string("10000.00", Currency::usd()).unwrap(),
                Decimal64::from_str_with_precision("5", 0).unwrap(),
                Utc::now(),
            )
            .unwrap();

        // 10000 balance x 5bp = 5.
        let expected = Decimal64::from_str_with_precision("5", 8).unwrap();
        match event {
            Event::AccountState { kind: AccountEventKind::Rollover(amount), .. } => {
                assert_eq!(amount.amount(), expected);
            }
            other => panic!("expected a rollover account event, got {other:?}"),
        }
        assert_eq!(engine.rollover_accrued().amount(), expected);
    }

    #[test]
    fn frozen_account_suppresses_rollover() {
        let mut engine = engine_with_script(vec![], vec![]);
        engine.set_frozen(true);

        let event = engine.accrue_rollover(
            AccountId::new_unchecked("A-1"),
            Money::from_string("10000.00", Currency::usd()).unwrap(),
            Decimal64::from_str_with_precision("5", 0).unwrap(),
            Utc::now(),
        );
        assert!(event.is_none());
        assert!(engine.rollover_accrued().amount().is_zero());
    }

    #[test]
    fn account_inquiry_answers_only_for_the_configured_account() {
        let mut engine = engine_with_script(vec![], vec![]);
        let now = Utc::now();

        let events = engine.account_inquiry(&AccountId::new_unchecked("A-1"), now);
        assert!(matches!(
            events.as_slice(),
            [Event::AccountState { kind: AccountEventKind::Initialized { .. }, .. }]
        ));

        assert!(engine.account_inquiry(&AccountId::new_unchecked("other"), now).is_empty());
    }
}
