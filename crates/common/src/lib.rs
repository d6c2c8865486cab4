//! Shared identifier types.

mod types;

pub use types::{
    BusinessId, CategoryId, CreditCardId, LocationId, PaymentId, PlanId, PriceComponentId,
    SagaId, SubscriptionId,
};
