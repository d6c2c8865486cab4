//! Saga results handed back to the caller.

use common::SagaId;
use domain::CommittedSubscription;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::SagaStage;

/// Appended to every failure message shown to the user.
pub const ABORT_NOTICE: &str = "Subscription has not been created, payment has not been recorded, and business has not been charged.";

/// Why a purchase did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PurchaseFailure {
    /// The location service was down while resolving pricing.
    #[error("location service unavailable: {reason}")]
    LocationServiceUnavailable { reason: String },

    /// Category or price data was malformed or unreadable.
    #[error("pricing validation failed: {reason}")]
    PricingValidation { reason: String },

    /// The gateway refused the charge.
    #[error("payment declined: {reason}")]
    PaymentDeclined {
        reason: String,
        transaction_number: Option<String>,
    },

    /// The gateway could not be reached. When the purchase call was sent,
    /// the charge state is unknown.
    #[error("payment gateway unavailable: {reason}")]
    GatewayUnavailable {
        reason: String,
        charge_attempted: bool,
    },

    /// The charge went through but the records could not be written.
    #[error("commit failed after charge {gateway_reference}: {reason}")]
    CommitFailure {
        gateway_reference: String,
        reason: String,
    },
}

impl PurchaseFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseFailure::LocationServiceUnavailable { .. } => "location_service_unavailable",
            PurchaseFailure::PricingValidation { .. } => "pricing_validation",
            PurchaseFailure::PaymentDeclined { .. } => "payment_declined",
            PurchaseFailure::GatewayUnavailable { .. } => "gateway_unavailable",
            PurchaseFailure::CommitFailure { .. } => "commit_failure",
        }
    }

    /// True when money may have moved without a matching record.
    pub fn needs_reconciliation(&self) -> bool {
        match self {
            PurchaseFailure::GatewayUnavailable {
                charge_attempted, ..
            } => *charge_attempted,
            PurchaseFailure::CommitFailure { .. } => true,
            _ => false,
        }
    }

    /// The message shown to the user.
    ///
    /// Commit failures read the same as a gateway outage; only the alert
    /// tells the two apart.
    pub fn user_message(&self) -> String {
        match self {
            PurchaseFailure::LocationServiceUnavailable { .. }
            | PurchaseFailure::PricingValidation { .. } => {
                format!("Error calculating subscription price. {ABORT_NOTICE}")
            }
            PurchaseFailure::PaymentDeclined { reason, .. } => {
                format!("Payment declined: {reason}. {ABORT_NOTICE}")
            }
            PurchaseFailure::GatewayUnavailable { .. } | PurchaseFailure::CommitFailure { .. } => {
                format!("Something went wrong while processing the payment. {ABORT_NOTICE}")
            }
        }
    }
}

/// How a purchase saga ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail")]
pub enum PurchaseOutcome {
    Succeeded(CommittedSubscription),
    AbortedBeforeCharge(PurchaseFailure),
    AbortedOnDecline(PurchaseFailure),
    FailedAfterCharge(PurchaseFailure),
}

impl PurchaseOutcome {
    /// The terminal stage this outcome corresponds to.
    pub fn stage(&self) -> SagaStage {
        match self {
            PurchaseOutcome::Succeeded(_) => SagaStage::Succeeded,
            PurchaseOutcome::AbortedBeforeCharge(_) => SagaStage::AbortedBeforeCharge,
            PurchaseOutcome::AbortedOnDecline(_) => SagaStage::AbortedOnDecline,
            PurchaseOutcome::FailedAfterCharge(_) => SagaStage::FailedAfterCharge,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.stage().as_str()
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PurchaseOutcome::Succeeded(_))
    }

    pub fn committed(&self) -> Option<&CommittedSubscription> {
        match self {
            PurchaseOutcome::Succeeded(committed) => Some(committed),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&PurchaseFailure> {
        match self {
            PurchaseOutcome::Succeeded(_) => None,
            PurchaseOutcome::AbortedBeforeCharge(failure)
            | PurchaseOutcome::AbortedOnDecline(failure)
            | PurchaseOutcome::FailedAfterCharge(failure) => Some(failure),
        }
    }

    pub fn message(&self) -> String {
        match self {
            PurchaseOutcome::Succeeded(committed) => format!(
                "Subscription has been created and a payment of {} has been recorded.",
                committed.payment.amount
            ),
            _ => self
                .failure()
                .map(PurchaseFailure::user_message)
                .unwrap_or_default(),
        }
    }
}

/// The result of one saga run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseResult {
    pub saga_id: SagaId,
    pub outcome: PurchaseOutcome,
}

impl PurchaseResult {
    pub fn message(&self) -> String {
        self.outcome.message()
    }
}
