//! Domain layer for subscription purchases.
//!
//! This crate holds the pure rules the purchase saga relies on:
//! - Businesses, categories and stored cards
//! - The append-only price catalog and latest-wins selection
//! - Subscriptions, their price snapshots and payments
//! - Validation of the atomic commit unit

pub mod business;
pub mod catalog;
pub mod error;
pub mod money;
pub mod plan;
pub mod pricing;
pub mod subscription;

pub use business::{Business, CardDetails, Category, CreditCard, TokenizedCard};
pub use catalog::{PriceComponent, PriceHistory, PriceKey};
pub use error::DomainError;
pub use money::Money;
pub use plan::{BillingInterval, Plan};
pub use pricing::{Quote, select_price_components};
pub use subscription::{
    CommitRecords, CommitRequest, CommittedSubscription, Payment, PaymentState, Subscription,
    SubscriptionPriceComponent, SubscriptionPriceComponentInput, SubscriptionState,
};
