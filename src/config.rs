//! Runtime configuration consumed by the engine, the simulated venue and the
//! backtest driver.
//!
//! Loading from file is left to the embedding application; this module only
//! defines the deserialisable shape and its preconditions.

use crate::decimal::{Currency, Decimal64, Money};
use crate::error::{require, EngineResult};
use serde::{Deserialize, Serialize};

/// Which `ExecutionDatabase` back-end to construct.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecDbType {
    InMemory,
    ExternalKv,
}

/// Minimum severity a log sink lets through.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub tick_capacity: usize,
    pub bar_capacity: usize,
    pub exec_db_type: ExecDbType,
    pub starting_capital: f64,
    pub account_currency: String,
    pub commission_rate_bp: f64,

    pub bypass_logging: bool,
    pub log_level_console: LogLevel,
    pub log_level_file: LogLevel,
    pub log_level_store: LogLevel,
    pub log_level_data: LogLevel,
    pub log_level_execution: LogLevel,
    pub log_to_file: bool,
    pub log_file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_capacity: 1000,
            bar_capacity: 1000,
            exec_db_type: ExecDbType::InMemory,
            starting_capital: 1_000_000.0,
            account_currency: "USD".to_string(),
            commission_rate_bp: 0.20,
            bypass_logging: false,
            log_level_console: LogLevel::Info,
            log_level_file: LogLevel::Debug,
            log_level_store: LogLevel::Warn,
            log_level_data: LogLevel::Info,
            log_level_execution: LogLevel::Info,
            log_to_file: false,
            log_file_path: String::new(),
        }
    }
}

impl Config {
    /// Check every precondition, failing with `InvalidArgument` on the first
    /// violation.
    pub fn validate(&self) -> EngineResult<()> {
        require(self.tick_capacity > 0, "tick_capacity must be > 0")?;
        require(self.bar_capacity > 0, "bar_capacity must be > 0")?;
        require(self.starting_capital > 0.0, "starting_capital must be > 0")?;
        require(!self.account_currency.is_empty(), "account_currency must not be empty")?;
        require(self.commission_rate_bp >= 0.0, "commission_rate_bp must be >= 0")?;
        if self.log_to_file {
            require(!self.log_file_path.is_empty(), "log_file_path required when log_to_file is set")?;
        }
        Ok(())
    }

    pub fn account_currency(&self) -> Currency {
        Currency::new(&self.account_currency, 2)
    }

    pub fn starting_capital_money(&self) -> EngineResult<Money> {
        let currency = self.account_currency();
        Money::from_string(&format!("{:.2}", self.starting_capital), currency)
    }

    pub fn commission_rate(&self) -> EngineResult<Decimal64> {
        Decimal64::from_str_with_precision(&format!("{:.4}", self.commission_rate_bp), 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_tick_capacity_is_rejected() {
        let config = Config { tick_capacity: 0, ..Config::default() };
        assert!(matches!(config.validate(), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn log_to_file_requires_a_path() {
        let config = Config { log_to_file: true, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn exec_db_type_round_trips_kebab_case() {
        let json = serde_json::to_string(&ExecDbType::ExternalKv).unwrap();
        assert_eq!(json, "\"external-kv\"");
        assert_eq!(serde_json::from_str::<ExecDbType>(&json).unwrap(), ExecDbType::ExternalKv);
    }

    #[test]
    fn starting_capital_converts_at_currency_precision() {
        let config = Config::default();
        let money = config.starting_capital_money().unwrap();
        assert_eq!(money, Money::from_string("1000000.00", Currency::usd()).unwrap());
    }
}
