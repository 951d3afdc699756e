//! Position aggregator: net inventory folded from fills.
//!
//! Once `quantity` returns to zero the `Position` is closed for good; a
//! fresh fill on the same strategy+symbol opens a new `Position` under a new
//! `PositionId` instead of reusing this one.

use crate::decimal::{Currency, Decimal64, Price, Quantity};
use crate::error::{require, EngineError, EngineResult};
use crate::identifiers::{OrderId, PositionId, Symbol};
use crate::order::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: Symbol,
    pub side_from_first_fill: OrderSide,
    pub quantity: Quantity,
    pub peak_quantity: Quantity,
    /// Total traded volume through this position: the sum of every applied
    /// fill's quantity, increasing and reducing alike.
    pub cumulative_volume: Quantity,
    pub entry_price: Price,
    pub exit_price: Option<Price>,
    pub realized_pnl: Decimal64,
    pub average_open_price: Price,
    pub open_time: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
    pub order_ids: Vec<OrderId>,
    quote_currency: Currency,
    account_currency: Currency,
}

/// A single fill applied to the position aggregator. Mirrors the subset of
/// `OrderEventKind::{PartiallyFilled,Filled}` payload the position cares
/// about, plus the order/side it came from.
#[derive(Debug, Clone, Copy)]
pub struct Fill {
    pub order_id_side: OrderSide,
    pub quantity: Quantity,
    pub price: Price,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    /// Open a new position from the first fill on a fresh `position_id`.
    pub fn open(
        id: PositionId,
        symbol: Symbol,
        order_id: OrderId,
        fill: Fill,
        quote_currency: Currency,
        account_currency: Currency,
    ) -> Self {
        Self {
            id,
            symbol,
            side_from_first_fill: fill.order_id_side,
            quantity: fill.quantity,
            peak_quantity: fill.quantity,
            cumulative_volume: fill.quantity,
            entry_price: fill.price,
            exit_price: None,
            realized_pnl: Decimal64::zero(fill.price.raw().precision()),
            average_open_price: fill.price,
            open_time: fill.timestamp,
            close_time: None,
            order_ids: vec![order_id],
            quote_currency,
            account_currency,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.close_time.is_some()
    }

    /// Apply a subsequent fill on the same `position_id`. Increasing fills
    /// (same side as `side_from_first_fill`) grow the position and roll the
    /// average open price; reducing fills (opposite side) shrink it and
    /// accrue realized PnL. When net quantity returns to zero the position
    /// closes and is timestamped; it never re-opens afterward, so a fill
    /// applied to an already-closed position is rejected.
    pub fn apply_fill(&mut self, order_id: OrderId, fill: Fill, fx_rate_quote_to_account: Option<Decimal64>) -> EngineResult<()> {
        require(!self.is_closed(), "position never re-opens after closing")?;

        if !self.order_ids.contains(&order_id) {
            self.order_ids.push(order_id);
        }
        self.cumulative_volume = Quantity::new(self.cumulative_volume.raw().checked_add(&fill.quantity.raw()))?;

        if fill.order_id_side == self.side_from_first_fill {
            // Increasing fill: rolls the volume-weighted average open price.
            let prior_notional = self.average_open_price.raw().checked_mul(&self.quantity.raw());
            let fill_notional = fill.price.raw().checked_mul(&fill.quantity.raw());
            let new_quantity = self.quantity.raw().checked_add(&fill.quantity.raw());
            let new_avg = if new_quantity.is_zero() {
                fill.price.raw()
            } else {
                Decimal64::from_decimal(
                    (prior_notional.checked_add(&fill_notional)).raw() / new_quantity.raw(),
                    fill.price.raw().precision(),
                )
            };
            self.quantity = Quantity::new(new_quantity)?;
            self.average_open_price = Price::new(new_avg)?;
            if self.quantity.raw() > self.peak_quantity.raw() {
                self.peak_quantity = self.quantity;
            }
            return Ok(());
        }

        // Reducing fill: accrue realized PnL on the reduced quantity only.
        let reduced_qty = fill.quantity.raw().min(self.quantity.raw());
        let price_delta = fill.price.raw().checked_sub(&self.average_open_price.raw());
        let side_sign = Decimal64::from_decimal(Decimal::from(self.side_from_first_fill.sign()), 0);
        let mut pnl_quote = price_delta.checked_mul(&reduced_qty).checked_mul(&side_sign);

        if self.quote_currency != self.account_currency {
            let rate = fx_rate_quote_to_account.ok_or_else(|| {
                EngineError::InvalidArgument(
                    "fx rate required when quote currency differs from account currency".into(),
                )
            })?;
            pnl_quote = pnl_quote.checked_mul(&rate);
        }
        self.realized_pnl = self.realized_pnl.checked_add(&pnl_quote);

        let remaining = self.quantity.raw().checked_sub(&reduced_qty);
        self.quantity = Quantity::new(remaining)?;
        self.exit_price = Some(fill.price);

        if self.quantity.is_zero() {
            self.close_time = Some(fill.timestamp);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Decimal64;

    fn qty(v: &str) -> Quantity {
        Quantity::new_positive(Decimal64::from_str_with_precision(v, 8).unwrap()).unwrap()
    }
    fn price(v: &str) -> Price {
        Price::new(Decimal64::from_str_with_precision(v, 4).unwrap()).unwrap()
    }

    #[test]
    fn opens_then_closes_on_full_reduction_with_realized_pnl() {
        let now = Utc::now();
        let mut pos = Position::open(
            PositionId::new_unchecked("P-1"),
            Symbol::new_unchecked("EUR/USD"),
            OrderId::new_unchecked("O-1"),
            Fill {
                order_id_side: OrderSide::Buy,
                quantity: qty("10"),
                price: price("1.0000"),
                timestamp: now,
            },
            Currency::usd(),
            Currency::usd(),
        );

        pos.apply_fill(
            OrderId::new_unchecked("O-2"),
            Fill {
                order_id_side: OrderSide::Sell,
                quantity: qty("10"),
                price: price("1.0500"),
                timestamp: now,
            },
            None,
        )
        .unwrap();

        assert!(pos.is_closed());
        assert!(pos.quantity.is_zero());
        // price delta carries the price precision, the reduced quantity the
        // quantity precision, so the realized figure lands at the wider one.
        assert_eq!(pos.realized_pnl, Decimal64::from_str_with_precision("0.5", 8).unwrap());
    }

    #[test]
    fn cumulative_volume_sums_every_fill_across_grow_and_reduce_cycles() {
        let now = Utc::now();
        let mut pos = Position::open(
            PositionId::new_unchecked("P-1"),
            Symbol::new_unchecked("EUR/USD"),
            OrderId::new_unchecked("O-1"),
            Fill {
                order_id_side: OrderSide::Buy,
                quantity: qty("10"),
                price: price("1.0000"),
                timestamp: now,
            },
            Currency::usd(),
            Currency::usd(),
        );

        let fills = [
            (OrderSide::Sell, "6", "1.0100"),
            (OrderSide::Buy, "8", "1.0050"),
            (OrderSide::Sell, "12", "1.0200"),
        ];
        for (idx, (side, quantity, px)) in fills.into_iter().enumerate() {
            pos.apply_fill(
                OrderId::new_unchecked(format!("O-{}", idx + 2)),
                Fill {
                    order_id_side: side,
                    quantity: qty(quantity),
                    price: price(px),
                    timestamp: now,
                },
                None,
            )
            .unwrap();
        }

        assert!(pos.is_closed());
        // 10 + 6 + 8 + 12 traded; net held never exceeded 12.
        assert_eq!(pos.cumulative_volume, qty("36"));
        assert_eq!(pos.peak_quantity, qty("12"));
    }

    #[test]
    fn reducing_fill_converts_pnl_into_the_account_currency() {
        let now = Utc::now();
        let mut pos = Position::open(
            PositionId::new_unchecked("P-1"),
            Symbol::new_unchecked("EUR/GBP"),
            OrderId::new_unchecked("O-1"),
            Fill {
                order_id_side: OrderSide::Buy,
                quantity: qty("10"),
                price: price("1.0000"),
                timestamp: now,
            },
            Currency::new("GBP", 2),
            Currency::usd(),
        );

        pos.apply_fill(
            OrderId::new_unchecked("O-2"),
            Fill {
                order_id_side: OrderSide::Sell,
                quantity: qty("10"),
                price: price("1.0500"),
                timestamp: now,
            },
            Some(Decimal64::from_str_with_precision("1.25", 2).unwrap()),
        )
        .unwrap();

        assert!(pos.is_closed());
        // 0.05 GBP/unit x 10 units x 1.25 GBP->USD
        assert_eq!(pos.realized_pnl, Decimal64::from_str_with_precision("0.625", 8).unwrap());
    }

    #[test]
    fn reducing_fill_without_a_required_fx_rate_is_rejected() {
        let now = Utc::now();
        let mut pos = Position::open(
            PositionId::new_unchecked("P-1"),
            Symbol::new_unchecked("EUR/GBP"),
            OrderId::new_unchecked("O-1"),
            Fill {
                order_id_side: OrderSide::Buy,
                quantity: qty("10"),
                price: price("1.0000"),
                timestamp: now,
            },
            Currency::new("GBP", 2),
            Currency::usd(),
        );

        let result = pos.apply_fill(
            OrderId::new_unchecked("O-2"),
            Fill {
                order_id_side: OrderSide::Sell,
                quantity: qty("10"),
                price: price("1.0500"),
                timestamp: now,
            },
            None,
        );
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn partial_reduction_keeps_position_open() {
        let now = Utc::now();
        let mut pos = Position::open(
            PositionId::new_unchecked("P-1"),
            Symbol::new_unchecked("EUR/USD"),
            OrderId::new_unchecked("O-1"),
            Fill {
                order_id_side: OrderSide::Buy,
                quantity: qty("10"),
                price: price("1.0000"),
                timestamp: now,
            },
            Currency::usd(),
            Currency::usd(),
        );
        pos.apply_fill(
            OrderId::new_unchecked("O-2"),
            Fill {
                order_id_side: OrderSide::Sell,
                quantity: qty("4"),
                price: price("1.1000"),
                timestamp: now,
            },
            None,
        )
        .unwrap();
        assert!(!pos.is_closed());
        assert_eq!(pos.quantity, qty("6"));
    }
}
