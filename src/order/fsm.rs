//! Order finite state machine.
//!
//! A tagged-variant event enum with exhaustive pattern matching drives a
//! transition table keyed by `(state, event kind)`. Transitions not listed
//! in the table surface as a runtime `InvalidStateTrigger` so a misbehaving
//! venue can never push an order into an impossible state.

use crate::decimal::{Price, Quantity};
use crate::identifiers::{ExecutionId, OrderIdBroker};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Initialized,
    Invalid,
    Denied,
    Submitted,
    Accepted,
    Rejected,
    Working,
    Cancelled,
    Expired,
    PartiallyFilled,
    Filled,
}

impl OrderStatus {
    /// Terminal states: once reached, no further event applies.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Invalid
                | OrderStatus::Denied
                | OrderStatus::Rejected
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Filled
        )
    }
}

/// Tagged-variant order event. Each variant both selects a transition-table
/// row and carries the payload needed to update mutable order fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEventKind {
    Invalid { reason: String },
    Denied { reason: String },
    Submitted,
    Rejected { reason: String },
    Accepted { id_broker: OrderIdBroker },
    Working,
    Modified { price: Option<Price>, quantity: Option<Quantity> },
    Cancelled,
    Expired,
    PartiallyFilled {
        fill_quantity: Quantity,
        fill_price: Price,
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    Filled {
        fill_quantity: Quantity,
        fill_price: Price,
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
}

impl OrderEventKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            OrderEventKind::Invalid { .. } => "Invalid",
            OrderEventKind::Denied { .. } => "Denied",
            OrderEventKind::Submitted => "Submitted",
            OrderEventKind::Rejected { .. } => "Rejected",
            OrderEventKind::Accepted { .. } => "Accepted",
            OrderEventKind::Working => "Working",
            OrderEventKind::Modified { .. } => "Modified",
            OrderEventKind::Cancelled => "Cancelled",
            OrderEventKind::Expired => "Expired",
            OrderEventKind::PartiallyFilled { .. } => "PartiallyFilled",
            OrderEventKind::Filled { .. } => "Filled",
        }
    }
}

/// The static `(state, event) -> state` transition table. Returns `None`
/// for any pair not explicitly listed, which the caller (`Order::apply`)
/// turns into `InvalidStateTrigger`.
pub fn transition(from: OrderStatus, event: &OrderEventKind) -> Option<OrderStatus> {
    use OrderEventKind as E;
    use OrderStatus as S;

    match (from, event) {
        (S::Initialized, E::Invalid { .. }) => Some(S::Invalid),
        (S::Initialized, E::Denied { .. }) => Some(S::Denied),
        (S::Initialized, E::Cancelled) => Some(S::Cancelled),
        (S::Initialized, E::Submitted) => Some(S::Submitted),

        (S::Submitted, E::Rejected { .. }) => Some(S::Rejected),
        (S::Submitted, E::Accepted { .. }) => Some(S::Accepted),
        (S::Submitted, E::Working) => Some(S::Working),
        (S::Submitted, E::Cancelled) => Some(S::Cancelled),

        (S::Accepted, E::Working) => Some(S::Working),
        (S::Accepted, E::Cancelled) => Some(S::Cancelled),
        (S::Accepted, E::PartiallyFilled { .. }) => Some(S::PartiallyFilled),
        (S::Accepted, E::Filled { .. }) => Some(S::Filled),

        (S::Working, E::Modified { .. }) => Some(S::Working),
        (S::Working, E::Cancelled) => Some(S::Cancelled),
        (S::Working, E::Expired) => Some(S::Expired),
        (S::Working, E::PartiallyFilled { .. }) => Some(S::PartiallyFilled),
        (S::Working, E::Filled { .. }) => Some(S::Filled),

        (S::PartiallyFilled, E::PartiallyFilled { .. }) => Some(S::PartiallyFilled),
        (S::PartiallyFilled, E::Filled { .. }) => Some(S::Filled),
        (S::PartiallyFilled, E::Cancelled) => Some(S::PartiallyFilled),
        // A GTD order that partially filled before its expiry still expires.
        (S::PartiallyFilled, E::Expired) => Some(S::Expired),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partially_filled_cancel_stays_partially_filled() {
        let next = transition(OrderStatus::PartiallyFilled, &OrderEventKind::Cancelled);
        assert_eq!(next, Some(OrderStatus::PartiallyFilled));
    }

    #[test]
    fn partially_filled_order_can_expire() {
        let next = transition(OrderStatus::PartiallyFilled, &OrderEventKind::Expired);
        assert_eq!(next, Some(OrderStatus::Expired));
    }

    #[test]
    fn unlisted_pair_is_none() {
        let next = transition(OrderStatus::Filled, &OrderEventKind::Working);
        assert!(next.is_none());
    }

    #[test]
    fn terminal_set_is_exactly_the_completed_states() {
        for s in [
            OrderStatus::Invalid,
            OrderStatus::Denied,
            OrderStatus::Rejected,
            OrderStatus::Cancelled,
            OrderStatus::Expired,
            OrderStatus::Filled,
        ] {
            assert!(s.is_terminal());
        }
        assert!(!OrderStatus::Working.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }
}
