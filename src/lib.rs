//! # Vela Engine
//! Deterministic simulation and execution core for event-driven algorithmic
//! trading: it drives strategies through a stream of market ticks, tracks
//! every order through a strict state machine, matches orders against a
//! simulated venue (or a live venue adapter behind the same trait), and
//! folds fills into positions and account state that feed back into
//! strategies.
//!
//! ## Overview
//! The crate is organised around four tightly coupled subsystems, each a
//! top-level module:
//!
//! * **Order & position lifecycle** ([`order`], [`position`], [`database`]):
//!   an order is an immutable core plus a mutable state machine driven by
//!   applied events; fills fold into net positions; the indexed execution
//!   database cross-references accounts, orders and positions behind two
//!   interchangeable back-ends (in-memory and external key-value).
//! * **Execution engine** ([`engine`]): the command router and event
//!   dispatcher between strategies and the bound venue adapter, the single
//!   point enforcing state transitions and emitting derived position events.
//! * **Simulated matching engine** ([`matching`]): a deterministic venue
//!   that converts quote ticks into acknowledgements, fills, expiries,
//!   modifications and rejects, optionally perturbed by a seeded
//!   probabilistic fill model.
//! * **Backtest driver** ([`backtest`]): a virtual-clock scheduler that
//!   interleaves tick delivery with timer callbacks across all strategies,
//!   making a run a pure function of its inputs.
//!
//! The whole core runs single-threaded by design: commands dispatch in
//! submission order, events route in emission order, and timer events due
//! within `(prev_tick, next_tick]` are delivered before the next tick, so
//! two runs with identical inputs and fill-model seed emit byte-identical
//! event streams.
//!
//! ## Example
//! ```
//! use chrono::{TimeZone, Utc};
//! use vela_engine::backtest::{BacktestDriver, DataSource};
//! use vela_engine::database::memory::InMemoryExecutionDatabase;
//! use vela_engine::decimal::{Currency, Decimal64, Money};
//! use vela_engine::engine::{ExecutionEngine, VenueAdapter};
//! use vela_engine::identifiers::AccountId;
//! use vela_engine::matching::{MatchingConfig, MatchingEngine, SeededFillModel};
//! use vela_engine::strategy::Tick;
//!
//! struct NoData;
//! impl DataSource for NoData {
//!     fn next(&mut self) -> Option<Tick> {
//!         None
//!     }
//! }
//!
//! let mut engine = ExecutionEngine::new(
//!     InMemoryExecutionDatabase::new(),
//!     AccountId::new("SIM-001").unwrap(),
//! );
//! let matching = MatchingEngine::new(
//!     SeededFillModel::new(42, 1.0, 0.0, 0.0, Decimal64::from_str_with_precision("0.5", 8).unwrap()),
//!     MatchingConfig {
//!         account_id: AccountId::new("SIM-001").unwrap(),
//!         account_currency: Currency::usd(),
//!         starting_capital: Money::from_string("100000.00", Currency::usd()).unwrap(),
//!         tick_size: Decimal64::from_str_with_precision("0.0001", 4).unwrap(),
//!         commission_rate_bp: Decimal64::zero(4),
//!         partial_fills_enabled: false,
//!     },
//! );
//! engine.register_venue(Box::new(matching) as Box<dyn VenueAdapter>);
//!
//! let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
//! let mut driver = BacktestDriver::new(
//!     engine,
//!     AccountId::new("SIM-001").unwrap(),
//!     Decimal64::zero(8),
//!     1000,
//!     start,
//! );
//! let diagnostics = driver.run(&mut NoData, start + chrono::Duration::days(1));
//! assert_eq!(diagnostics.ticks_processed, 0);
//! ```

/// Account state: cash balances, margin block and applied event history.
pub mod account;

/// Backtest driver: owns the virtual clock, feeds ticks in timestamp order,
/// runs due timer callbacks, and invokes strategies.
pub mod backtest;

/// Wall-clock and virtual clocks exposing named one-shot alerts and
/// repeating timers.
pub mod clock;

/// Runtime configuration surface and its validation preconditions.
pub mod config;

/// Indexed execution database: accounts, orders and positions with
/// cross-reference indexes, behind in-memory and external key-value
/// back-ends.
pub mod database;

/// Fixed-precision decimals, prices, quantities and currency-tagged money.
pub mod decimal;

/// Execution engine: routes strategy commands to the venue and dispatches
/// venue events into order, position and account state.
pub mod engine;

/// Crate-wide error taxonomy and the `require` precondition helper.
pub mod error;

/// Typed identifier newtypes and the monotonic identifier generator.
pub mod identifiers;

/// Simulated matching engine and its pluggable fill models.
pub mod matching;

/// Wire envelope codec, session handshake and transport-side policies.
pub mod messaging;

/// Order entity, order events and the order state machine.
pub mod order;

/// Position aggregator folded from fills.
pub mod position;

/// Strategy contract: the lifecycle and handler surface the driver calls
/// into.
pub mod strategy;
