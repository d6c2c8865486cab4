//! Domain error types.

use common::{CategoryId, LocationId, PriceComponentId};
use thiserror::Error;

use crate::subscription::SubscriptionState;

/// Validation failures raised by domain rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// A charge amount must be strictly positive.
    #[error("Invalid amount: {cents} cents (must be greater than 0)")]
    InvalidAmount { cents: i64 },

    /// A price component carries a negative amount.
    #[error("Price component {price_component_id} has negative amount {cents} cents")]
    NegativePrice {
        price_component_id: PriceComponentId,
        cents: i64,
    },

    /// A catalog component was returned for a pair outside the business's
    /// categories and locations.
    #[error(
        "Price component {price_component_id} for category {category_id} at location {location_id} does not apply to this business"
    )]
    UnexpectedPriceComponent {
        price_component_id: PriceComponentId,
        category_id: CategoryId,
        location_id: LocationId,
    },

    /// Two snapshots target the same (category, location) pair.
    #[error("Duplicate price component for category {category_id} at location {location_id}")]
    DuplicatePriceComponent {
        category_id: CategoryId,
        location_id: LocationId,
    },

    /// A snapshot references an archived category.
    #[error("Category {0} is archived")]
    ArchivedCategory(CategoryId),

    /// The gateway reference of a confirmed charge is missing.
    #[error("Gateway reference is required")]
    MissingGatewayReference,

    /// Subscription is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: SubscriptionState,
        action: &'static str,
    },
}
