//! Fixed-precision decimal and money types.
//!
//! `Decimal64` is a thin wrapper around [`rust_decimal::Decimal`] carrying an
//! explicit `precision` tag alongside the value: equality and hashing are
//! exact on `(value, precision)` rather than numeric, and construction from
//! string banker-rounds to the target precision.

use crate::error::{require, EngineError, EngineResult};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

pub const MAX_PRECISION: u8 = 15;

/// Fixed-point decimal with an explicit precision tag.
///
/// Equality and hashing are exact on `(value, precision)`: two
/// `Decimal64`s that are numerically equal but carry different precisions
/// (`1.50` @ precision 2 vs `1.500` @ precision 3) are **not** equal, so
/// reformatting at the same precision always reproduces the original string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Decimal64 {
    value: Decimal,
    precision: u8,
}

impl Decimal64 {
    /// Parse `s` into a `Decimal64` at `precision`, banker-rounding any
    /// excess fractional digits.
    pub fn from_str_with_precision(s: &str, precision: u8) -> EngineResult<Self> {
        require(
            precision <= MAX_PRECISION,
            format!("precision {precision} exceeds max {MAX_PRECISION}"),
        )?;
        let parsed = Decimal::from_str(s)
            .map_err(|e| EngineError::InvalidArgument(format!("invalid decimal '{s}': {e}")))?;
        Ok(Self::from_decimal(parsed, precision))
    }

    /// Wrap an already-parsed [`Decimal`], rounding to `precision` using
    /// banker's rounding (round-half-to-even).
    pub fn from_decimal(value: Decimal, precision: u8) -> Self {
        let rounded = value.round_dp_with_strategy(
            precision as u32,
            RoundingStrategy::MidpointNearestEven,
        );
        Self {
            value: rounded,
            precision,
        }
    }

    pub fn zero(precision: u8) -> Self {
        Self {
            value: Decimal::ZERO,
            precision,
        }
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn raw(&self) -> Decimal {
        self.value
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn is_sign_positive(&self) -> bool {
        self.value.is_sign_positive() && !self.value.is_zero()
    }

    pub fn is_sign_negative(&self) -> bool {
        self.value.is_sign_negative() && !self.value.is_zero()
    }

    /// Lossless add: result precision is the max of the two operand
    /// precisions, no rounding is applied.
    pub fn checked_add(&self, other: &Self) -> Self {
        Self {
            value: self.value + other.value,
            precision: self.precision.max(other.precision),
        }
    }

    pub fn checked_sub(&self, other: &Self) -> Self {
        Self {
            value: self.value - other.value,
            precision: self.precision.max(other.precision),
        }
    }

    pub fn checked_mul(&self, other: &Self) -> Self {
        Self {
            value: self.value * other.value,
            precision: self.precision.max(other.precision),
        }
    }

    pub fn neg(&self) -> Self {
        Self {
            value: -self.value,
            precision: self.precision,
        }
    }

    /// Render the value trimmed to exactly `precision` fractional digits,
    /// the canonical wire/display form used by round-trip tests.
    pub fn to_precise_string(&self) -> String {
        format!("{:.*}", self.precision as usize, self.value)
    }
}

impl fmt::Display for Decimal64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_precise_string())
    }
}

impl PartialEq for Decimal64 {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.precision == other.precision
    }
}
impl Eq for Decimal64 {}

impl PartialOrd for Decimal64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Decimal64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl std::hash::Hash for Decimal64 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
        self.precision.hash(state);
    }
}

impl Add for Decimal64 {
    type Output = Decimal64;
    fn add(self, rhs: Self) -> Self::Output {
        self.checked_add(&rhs)
    }
}

impl Sub for Decimal64 {
    type Output = Decimal64;
    fn sub(self, rhs: Self) -> Self::Output {
        self.checked_sub(&rhs)
    }
}

impl Neg for Decimal64 {
    type Output = Decimal64;
    fn neg(self) -> Self::Output {
        Decimal64::neg(&self)
    }
}

/// Non-negative decimal. Construction enforces `value >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(Decimal64);

impl Price {
    pub fn new(value: Decimal64) -> EngineResult<Self> {
        require(!value.is_sign_negative(), "Price must be non-negative")?;
        Ok(Self(value))
    }

    pub fn raw(&self) -> Decimal64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-negative decimal; submission requires `quantity > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quantity(Decimal64);

impl Quantity {
    pub fn new(value: Decimal64) -> EngineResult<Self> {
        require(!value.is_sign_negative(), "Quantity must be non-negative")?;
        Ok(Self(value))
    }

    pub fn new_positive(value: Decimal64) -> EngineResult<Self> {
        require(value.is_sign_positive(), "Quantity must be > 0 for order submission")?;
        Ok(Self(value))
    }

    pub fn zero(precision: u8) -> Self {
        Self(Decimal64::zero(precision))
    }

    pub fn raw(&self) -> Decimal64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Currency {
    code: smol_str::SmolStr,
    precision: u8,
}

impl Currency {
    pub fn new(code: &str, precision: u8) -> Self {
        Self {
            code: smol_str::SmolStr::new(code.to_ascii_uppercase()),
            precision,
        }
    }

    pub fn usd() -> Self {
        Self::new("USD", 2)
    }

    pub fn code(&self) -> &str {
        self.code.as_str()
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// A monetary amount tagged with a [`Currency`]. Arithmetic between two
/// `Money` values asserts matching currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal64,
    currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn from_string(s: &str, currency: Currency) -> EngineResult<Self> {
        let amount = Decimal64::from_str_with_precision(s, currency.precision())?;
        Ok(Self { amount, currency })
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal64::zero(currency.precision()),
            currency,
        }
    }

    pub fn amount(&self) -> Decimal64 {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn checked_add(&self, other: &Self) -> EngineResult<Self> {
        require(
            self.currency == other.currency,
            format!(
                "currency mismatch: {} vs {}",
                self.currency.code(),
                other.currency.code()
            ),
        )?;
        Ok(Self {
            amount: self.amount.checked_add(&other.amount),
            currency: self.currency.clone(),
        })
    }

    pub fn checked_sub(&self, other: &Self) -> EngineResult<Self> {
        require(
            self.currency == other.currency,
            format!(
                "currency mismatch: {} vs {}",
                self.currency.code(),
                other.currency.code()
            ),
        )?;
        Ok(Self {
            amount: self.amount.checked_sub(&other.amount),
            currency: self.currency.clone(),
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
