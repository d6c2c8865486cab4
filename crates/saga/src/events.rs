//! Saga journal events.

use chrono::{DateTime, Utc};
use common::{BusinessId, PaymentId, PlanId, SagaId, SubscriptionId};
use domain::Money;
use serde::{Deserialize, Serialize};

use crate::state::SagaStage;

/// Events recorded while a purchase saga runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga execution started.
    SagaStarted(SagaStartedData),

    /// A saga step started execution.
    StepStarted(StepData),

    /// A saga step completed successfully.
    StepCompleted(StepCompletedData),

    /// A saga step failed.
    StepFailed(StepFailedData),

    /// Subscription committed.
    SagaSucceeded(SagaSucceededData),

    /// Saga ended in one of the failure stages.
    SagaAborted(SagaAbortedData),
}

impl SagaEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::SagaSucceeded(_) => "SagaSucceeded",
            SagaEvent::SagaAborted(_) => "SagaAborted",
        }
    }
}

/// Data for SagaStarted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_id: SagaId,
    pub business_id: BusinessId,
    pub plan_id: PlanId,
    /// Amount the saga will charge.
    pub amount: Money,
    /// "new_card" or "card_on_file".
    pub payment_method: String,
    pub saga_type: String,
    pub started_at: DateTime<Utc>,
}

/// Data for StepStarted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepData {
    pub step_name: String,
}

/// Data for StepCompleted event.
///
/// Each step fills in only the fields it produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub step_name: String,
    /// Number of snapshots selected (resolve_pricing).
    pub price_component_count: Option<usize>,
    /// Gateway transaction reference (charge_payment).
    pub gateway_reference: Option<String>,
    /// Committed subscription (commit_subscription).
    pub subscription_id: Option<SubscriptionId>,
    /// Committed payment (commit_subscription).
    pub payment_id: Option<PaymentId>,
}

/// Data for StepFailed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step_name: String,
    pub error: String,
}

/// Data for SagaSucceeded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaSucceededData {
    pub subscription_id: SubscriptionId,
    pub completed_at: DateTime<Utc>,
}

/// Data for SagaAborted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaAbortedData {
    /// The terminal failure stage.
    pub stage: SagaStage,
    pub reason: String,
    /// Money may have moved without a matching record.
    pub needs_reconciliation: bool,
    pub aborted_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(
        saga_id: SagaId,
        business_id: BusinessId,
        plan_id: PlanId,
        amount: Money,
        payment_method: impl Into<String>,
        saga_type: impl Into<String>,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_id,
            business_id,
            plan_id,
            amount,
            payment_method: payment_method.into(),
            saga_type: saga_type.into(),
            started_at: Utc::now(),
        })
    }

    pub fn step_started(step_name: impl Into<String>) -> Self {
        SagaEvent::StepStarted(StepData {
            step_name: step_name.into(),
        })
    }

    /// Creates a StepCompleted event for the pricing step.
    pub fn pricing_resolved(step_name: impl Into<String>, price_component_count: usize) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            price_component_count: Some(price_component_count),
            ..Default::default()
        })
    }

    /// Creates a StepCompleted event for the charge step.
    pub fn payment_charged(step_name: impl Into<String>, gateway_reference: impl Into<String>) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            gateway_reference: Some(gateway_reference.into()),
            ..Default::default()
        })
    }

    /// Creates a StepCompleted event for the commit step.
    pub fn subscription_committed(
        step_name: impl Into<String>,
        subscription_id: SubscriptionId,
        payment_id: PaymentId,
    ) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            subscription_id: Some(subscription_id),
            payment_id: Some(payment_id),
            ..Default::default()
        })
    }

    pub fn step_failed(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
        })
    }

    pub fn saga_succeeded(subscription_id: SubscriptionId) -> Self {
        SagaEvent::SagaSucceeded(SagaSucceededData {
            subscription_id,
            completed_at: Utc::now(),
        })
    }

    pub fn saga_aborted(
        stage: SagaStage,
        reason: impl Into<String>,
        needs_reconciliation: bool,
    ) -> Self {
        SagaEvent::SagaAborted(SagaAbortedData {
            stage,
            reason: reason.into(),
            needs_reconciliation,
            aborted_at: Utc::now(),
        })
    }
}
