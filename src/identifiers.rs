use crate::error::{require, EngineResult};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::hash::Hash;

/// Generates a value-compared, hashable, ordered identifier newtype that
/// preserves the insertion-time string for round-trip serialization. Each
/// identifier kind wraps its own `SmolStr` so ids of different kinds cannot
/// be confused at the type level.
macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(SmolStr);

        impl $name {
            /// Construct from any string-like value. Fails with
            /// `InvalidArgument` if empty.
            pub fn new(value: impl Into<SmolStr>) -> EngineResult<Self> {
                let value = value.into();
                require(!value.is_empty(), concat!(stringify!($name), " must not be empty"))?;
                Ok(Self(value))
            }

            /// Infallible construction for literals known to be non-empty at
            /// the call site (tests, internally generated ids).
            pub fn new_unchecked(value: impl Into<SmolStr>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.0.as_str()
            }
        }
    };
}

string_id!(TraderId, "Uniquely identifies a trader instance.");
string_id!(StrategyId, "Uniquely identifies a strategy within a trader.");
string_id!(AccountId, "Uniquely identifies a trading account.");
string_id!(OrderId, "System-internal order identifier.");
string_id!(OrderIdBroker, "Venue/broker-assigned order identifier.");
string_id!(PositionId, "System-internal position identifier.");
string_id!(PositionIdBroker, "Venue/broker-assigned position identifier.");
string_id!(ExecutionId, "Identifies an individual execution/fill.");
string_id!(Symbol, "Instrument/trading symbol.");
string_id!(ClientId, "Identifies a messaging client session endpoint.");
string_id!(ServerId, "Identifies a messaging server session endpoint.");
string_id!(SessionId, "Identifies a connected session.");

/// Generates identifiers of the form
/// `<prefix>-<YYYYMMDD>-<HHMMSS>-<trader_tag>-<strategy_tag>-<n>`, where `n`
/// is a monotonic per-generator counter. [`IdentifierGenerator::reset`]
/// brings `n` back to 0.
#[derive(Debug, Clone)]
pub struct IdentifierGenerator {
    prefix: SmolStr,
    trader_tag: SmolStr,
    strategy_tag: SmolStr,
    count: u64,
}

impl IdentifierGenerator {
    pub fn new(prefix: &str, trader_tag: &str, strategy_tag: &str) -> EngineResult<Self> {
        require(!prefix.is_empty(), "identifier prefix must not be empty")?;
        require(!trader_tag.is_empty(), "trader tag must not be empty")?;
        require(!strategy_tag.is_empty(), "strategy tag must not be empty")?;
        Ok(Self {
            prefix: SmolStr::new(prefix),
            trader_tag: SmolStr::new(trader_tag),
            strategy_tag: SmolStr::new(strategy_tag),
            count: 0,
        })
    }

    pub fn generate(&mut self, now: chrono::DateTime<chrono::Utc>) -> SmolStr {
        self.count += 1;
        SmolStr::new(format!(
            "{}-{}-{}-{}-{}-{}",
            self.prefix,
            now.format("%Y%m%d"),
            now.format("%H%M%S"),
            self.trader_tag,
            self.strategy_tag,
            self.count,
        ))
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rejects_empty_identifier() {
        assert!(OrderId::new("").is_err());
    }

    #[test]
    fn preserves_insertion_string() {
        let id = TraderId::new("TRADER-001").unwrap();
        assert_eq!(id.as_str(), "TRADER-001");
        assert_eq!(id.to_string(), "TRADER-001");
    }

    #[test]
    fn ordering_is_value_based() {
        let a = OrderId::new("O-1").unwrap();
        let b = OrderId::new("O-2").unwrap();
        assert!(a < b);
    }

    #[test]
    fn generator_counts_monotonically_and_resets_to_zero() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 59).unwrap();
        let mut generator = IdentifierGenerator::new("O", "TRADER-001", "SCALPER-01").unwrap();

        assert_eq!(generator.generate(now), "O-20240305-143059-TRADER-001-SCALPER-01-1");
        assert_eq!(generator.generate(now), "O-20240305-143059-TRADER-001-SCALPER-01-2");

        generator.reset();
        assert_eq!(generator.count(), 0);
        assert_eq!(generator.generate(now), "O-20240305-143059-TRADER-001-SCALPER-01-1");
    }
}
