//! Subscription lifecycle.

use serde::{Deserialize, Serialize};

/// The state of a subscription in its lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► Active
/// ```
///
/// A subscription is only ever persisted once active; `Created` exists while
/// the commit unit is being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    #[default]
    Created,
    Active,
}

impl SubscriptionState {
    pub fn can_activate(&self) -> bool {
        matches!(self, SubscriptionState::Created)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Created => "created",
            SubscriptionState::Active => "active",
        }
    }

    /// Parses the stored representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(SubscriptionState::Created),
            "active" => Some(SubscriptionState::Active),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_created() {
        assert_eq!(SubscriptionState::default(), SubscriptionState::Created);
    }

    #[test]
    fn test_can_activate() {
        assert!(SubscriptionState::Created.can_activate());
        assert!(!SubscriptionState::Active.can_activate());
    }

    #[test]
    fn test_parse_matches_as_str() {
        for state in [SubscriptionState::Created, SubscriptionState::Active] {
            assert_eq!(SubscriptionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SubscriptionState::parse("cancelled"), None);
    }
}
