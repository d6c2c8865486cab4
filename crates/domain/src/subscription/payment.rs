//! Payment records.

use chrono::{DateTime, Utc};
use common::{BusinessId, PaymentId, SubscriptionId};
use serde::{Deserialize, Serialize};

use crate::Money;

/// Outcome recorded on a payment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Success,
    Failed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Success => "success",
            PaymentState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(PaymentState::Success),
            "failed" => Some(PaymentState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded charge against a business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub business_id: BusinessId,
    pub subscription_id: Option<SubscriptionId>,
    pub amount: Money,
    pub current_state: PaymentState,
    /// Transaction reference returned by the gateway.
    pub gateway_reference: String,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// A successful payment for a subscription.
    pub fn success(
        business_id: BusinessId,
        subscription_id: SubscriptionId,
        amount: Money,
        gateway_reference: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            business_id,
            subscription_id: Some(subscription_id),
            amount,
            current_state: PaymentState::Success,
            gateway_reference: gateway_reference.into(),
            created_at: now,
        }
    }
}
