//! Preorder lifecycle status and billing plan mode.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a preorder.
///
/// State machine: `pending -> active -> ordered`, with `cancelled`
/// reachable from any non-terminal state. `cancelled` is terminal: no
/// mutation may move an order back out of it, and readers must treat a
/// cancelled order as gone regardless of what payment-method state
/// still exists on the customer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreorderStatus {
    #[default]
    Pending,
    Active,
    Ordered,
    Cancelled,
}

impl PreorderStatus {
    /// Metadata-bag representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Ordered => "ordered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a metadata value. Unknown values yield `None` rather than
    /// a default, so callers can distinguish "absent" from "pending".
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "ordered" => Some(Self::Ordered),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether a transition to `next` is allowed.
    ///
    /// All transitions out of `cancelled` are forbidden; re-asserting
    /// the current state is allowed (mutations are idempotent).
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        !self.is_terminal() || matches!(next, Self::Cancelled)
    }
}

/// Billing intent chosen by the customer: one-off vs. recurring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    Payment,
    Subscription,
}

impl PlanMode {
    /// Metadata-bag / gateway mode string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Subscription => "subscription",
        }
    }

    /// Parse a metadata value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "payment" => Some(Self::Payment),
            "subscription" => Some(Self::Subscription),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            PreorderStatus::Pending,
            PreorderStatus::Active,
            PreorderStatus::Ordered,
            PreorderStatus::Cancelled,
        ] {
            assert_eq!(PreorderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PreorderStatus::parse("done"), None);
        assert_eq!(PreorderStatus::parse(""), None);
    }

    #[test]
    fn test_cancelled_is_terminal() {
        assert!(PreorderStatus::Cancelled.is_terminal());
        assert!(!PreorderStatus::Active.is_terminal());

        // No way out of cancelled.
        assert!(!PreorderStatus::Cancelled.can_transition_to(PreorderStatus::Active));
        assert!(!PreorderStatus::Cancelled.can_transition_to(PreorderStatus::Ordered));
        assert!(!PreorderStatus::Cancelled.can_transition_to(PreorderStatus::Pending));

        // Re-cancelling is a no-op, not an error.
        assert!(PreorderStatus::Cancelled.can_transition_to(PreorderStatus::Cancelled));
    }

    #[test]
    fn test_non_terminal_transitions_allowed() {
        assert!(PreorderStatus::Pending.can_transition_to(PreorderStatus::Active));
        assert!(PreorderStatus::Active.can_transition_to(PreorderStatus::Ordered));
        assert!(PreorderStatus::Active.can_transition_to(PreorderStatus::Cancelled));
    }

    #[test]
    fn test_plan_mode_parse() {
        assert_eq!(PlanMode::parse("payment"), Some(PlanMode::Payment));
        assert_eq!(PlanMode::parse("subscription"), Some(PlanMode::Subscription));
        assert_eq!(PlanMode::parse("one-off"), None);
    }
}
