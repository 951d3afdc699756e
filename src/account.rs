//! Account: cash balances, margin state and event history.
//!
//! Single-currency model: one cash ledger (balance, start-of-day, activity)
//! plus a margin block, mutated only through applied [`AccountEventKind`]s.

use crate::decimal::{Currency, Decimal64, Money};
use crate::identifiers::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarginCallStatus {
    None,
    Warning,
    Called,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginState {
    pub used_liquidation: Decimal64,
    pub used_maintenance: Decimal64,
    pub ratio: Decimal64,
    pub call_status: MarginCallStatus,
}

impl MarginState {
    pub fn flat(precision: u8) -> Self {
        Self {
            used_liquidation: Decimal64::zero(precision),
            used_maintenance: Decimal64::zero(precision),
            ratio: Decimal64::zero(precision),
            call_status: MarginCallStatus::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccountEventKind {
    /// Sets the base currency and starting balance the first time the
    /// engine's own account comes into existence. A no-op if applied to an
    /// account that already exists.
    Initialized { currency: Currency, starting_balance: Money },
    Deposit(Money),
    Withdrawal(Money),
    Commission(Money),
    Rollover(Money),
    MarginUpdated(MarginState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEventRecord {
    pub kind: AccountEventKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub currency: Currency,
    pub balance: Money,
    pub start_of_day_balance: Money,
    pub activity_balance: Money,
    pub margin: MarginState,
    pub events: Vec<AccountEventRecord>,
}

impl Account {
    pub fn new(id: AccountId, currency: Currency, starting_capital: Money) -> Self {
        Self {
            id,
            margin: MarginState::flat(currency.precision()),
            activity_balance: Money::zero(currency.clone()),
            balance: starting_capital.clone(),
            start_of_day_balance: starting_capital,
            currency,
            events: Vec::new(),
        }
    }

    pub fn apply(&mut self, kind: AccountEventKind, timestamp: DateTime<Utc>) -> Result<(), crate::error::EngineError> {
        match &kind {
            AccountEventKind::Initialized { .. } => {}
            AccountEventKind::Deposit(m) | AccountEventKind::Rollover(m) => {
                self.balance = self.balance.checked_add(m)?;
                self.activity_balance = self.activity_balance.checked_add(m)?;
            }
            AccountEventKind::Withdrawal(m) | AccountEventKind::Commission(m) => {
                self.balance = self.balance.checked_sub(m)?;
                self.activity_balance = self.activity_balance.checked_sub(m)?;
            }
            AccountEventKind::MarginUpdated(state) => {
                self.margin = state.clone();
            }
        }
        self.events.push(AccountEventRecord { kind, timestamp });
        Ok(())
    }

    pub fn reset_start_of_day(&mut self) {
        self.start_of_day_balance = self.balance.clone();
        self.activity_balance = Money::zero(self.currency.clone());
    }
}
