//! Saga error types.
//!
//! [`SagaError`] covers requests the saga refuses to start and infrastructure
//! faults outside a run. Failures *inside* a run are not errors: they end the
//! saga in one of the failure outcomes (see [`crate::PurchaseOutcome`]).

use std::time::Duration;

use common::{BusinessId, PlanId, SubscriptionId};
use domain::DomainError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by saga and renewal operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The business does not exist.
    #[error("Business not found: {0}")]
    BusinessNotFound(BusinessId),

    /// The plan does not exist.
    #[error("Plan not found: {0}")]
    PlanNotFound(PlanId),

    /// Card on file was requested but none is stored.
    #[error("Business {0} has no card on file")]
    NoCardOnFile(BusinessId),

    /// The amount to charge must be strictly positive.
    #[error("Invalid amount: {cents} cents (must be greater than 0)")]
    InvalidAmount { cents: i64 },

    /// The subscription does not exist.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    /// Domain rule violated.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

/// The location service could not answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location service unavailable: {0}")]
    Unavailable(String),

    #[error("location service timed out after {0:?}")]
    Timeout(Duration),
}

/// Pricing could not be resolved.
#[derive(Debug, Error)]
pub enum PricingError {
    /// The location lookup failed. Distinct from an empty location set.
    #[error(transparent)]
    LocationServiceUnavailable(#[from] LocationError),

    /// Category or price data is malformed.
    #[error("invalid pricing data: {0}")]
    Validation(#[from] DomainError),

    /// Category or price data could not be read.
    #[error("pricing data unavailable: {0}")]
    Catalog(#[from] StoreError),
}

/// The gateway could not be reached or gave no usable answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("payment gateway timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected payment gateway response: {0}")]
    InvalidResponse(String),
}

/// A charge failed without a gateway answer, tagged with the call that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChargeError {
    /// Tokenizing the new card failed. No purchase was sent.
    #[error("card tokenization failed: {0}")]
    Tokenize(GatewayError),

    /// The purchase call failed. The business may have been charged.
    #[error("{0}")]
    Purchase(GatewayError),
}

impl ChargeError {
    /// True once a purchase request may have reached the gateway.
    pub fn charge_attempted(&self) -> bool {
        matches!(self, ChargeError::Purchase(_))
    }
}

/// A CRM sync request could not be handed off.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrmError {
    #[error("CRM sync unavailable: {0}")]
    Unavailable(String),
}
