//! Fill models consulted by the matching engine on each triggered order:
//! whether a triggered order fills at all this tick, whether it fills at the
//! resting price or with one tick of slippage, and whether the fill is
//! partial.

use crate::decimal::Decimal64;
use crate::order::OrderSide;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Outcome of consulting a [`FillPolicy`] for one triggered order: the price
/// and quantity to fill at. A zero `quantity` means "no fill this tick".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillDecision {
    pub price: Decimal64,
    pub quantity: Decimal64,
}

/// Strategy for deciding how a triggered order fills. The matching engine is
/// generic over this so tests can swap in deterministic behaviour.
pub trait FillPolicy {
    fn decide(&mut self, side: OrderSide, trigger_price: Decimal64, tick_size: Decimal64, leaves: Decimal64) -> FillDecision;
}

/// Probabilistic fill model: independent Bernoulli draws from a seeded RNG
/// decide whether the order fills at its resting price this tick, whether
/// one tick of slippage is applied in the worst direction, and whether the
/// fill is partial. Seeding makes a run fully reproducible given the same
/// seed, tick stream and command stream.
pub struct SeededFillModel {
    rng: StdRng,
    prob_fill_at_limit: f64,
    prob_slippage: f64,
    prob_partial: f64,
    partial_fraction: Decimal64,
}

impl SeededFillModel {
    pub fn new(seed: u64, prob_fill_at_limit: f64, prob_slippage: f64, prob_partial: f64, partial_fraction: Decimal64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            prob_fill_at_limit,
            prob_slippage,
            prob_partial,
            partial_fraction,
        }
    }

    fn draw(&mut self, p: f64) -> bool {
        self.rng.random_bool(p.clamp(0.0, 1.0))
    }
}

impl FillPolicy for SeededFillModel {
    fn decide(&mut self, side: OrderSide, trigger_price: Decimal64, tick_size: Decimal64, leaves: Decimal64) -> FillDecision {
        if !self.draw(self.prob_fill_at_limit) {
            return FillDecision { price: trigger_price, quantity: Decimal64::zero(leaves.precision()) };
        }

        let price = if self.draw(self.prob_slippage) {
            match side {
                OrderSide::Buy => trigger_price.checked_add(&tick_size),
                OrderSide::Sell => trigger_price.checked_sub(&tick_size),
            }
        } else {
            trigger_price
        };

        let quantity = if self.draw(self.prob_partial) {
            Decimal64::from_decimal(leaves.raw() * self.partial_fraction.raw(), leaves.precision())
        } else {
            leaves
        };

        FillDecision { price, quantity }
    }
}

/// Deterministic test double: pops one pre-seeded `(price, quantity)` pair
/// per call, in order. An empty queue means "decline to fill".
pub struct ScriptedFillModel {
    script: VecDeque<(Decimal64, Decimal64)>,
}

impl ScriptedFillModel {
    pub fn new(steps: Vec<(Decimal64, Decimal64)>) -> Self {
        Self { script: steps.into() }
    }
}

impl FillPolicy for ScriptedFillModel {
    fn decide(&mut self, _side: OrderSide, _trigger_price: Decimal64, _tick_size: Decimal64, leaves: Decimal64) -> FillDecision {
        match self.script.pop_front() {
            Some((price, quantity)) => FillDecision { price, quantity: quantity.min(leaves) },
            None => FillDecision { price: Decimal64::zero(leaves.precision()), quantity: Decimal64::zero(leaves.precision()) },
        }
    }
}
