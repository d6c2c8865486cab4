//! Saga instance rebuilt from the journal.

use common::{BusinessId, PaymentId, PlanId, SagaId, SubscriptionId};
use domain::Money;
use serde::{Deserialize, Serialize};
use store::Version;

use crate::events::SagaEvent;
use crate::state::SagaStage;
use crate::subscription_purchase;

/// An event-sourced purchase saga.
///
/// Tracks the stage of a run and the context it accumulated (selected
/// snapshot count, gateway reference, committed ids) so an operator can tell
/// whether money moved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SagaInstance {
    id: Option<SagaId>,
    version: Version,
    saga_type: String,
    business_id: Option<BusinessId>,
    plan_id: Option<PlanId>,
    amount: Money,
    payment_method: String,
    stage: SagaStage,
    completed_steps: Vec<String>,
    price_component_count: Option<usize>,
    gateway_reference: Option<String>,
    subscription_id: Option<SubscriptionId>,
    payment_id: Option<PaymentId>,
    failure_reason: Option<String>,
    needs_reconciliation: bool,
}

impl SagaInstance {
    /// Rebuilds an instance by replaying events in order.
    pub fn replay(events: impl IntoIterator<Item = SagaEvent>) -> Self {
        let mut saga = Self::default();
        for event in events {
            saga.apply(event);
        }
        saga
    }

    pub fn apply(&mut self, event: SagaEvent) {
        match event {
            SagaEvent::SagaStarted(data) => {
                self.id = Some(data.saga_id);
                self.business_id = Some(data.business_id);
                self.plan_id = Some(data.plan_id);
                self.amount = data.amount;
                self.payment_method = data.payment_method;
                self.saga_type = data.saga_type;
            }
            SagaEvent::StepStarted(data) => {
                self.stage = match data.step_name.as_str() {
                    subscription_purchase::STEP_RESOLVE_PRICING => SagaStage::Resolving,
                    subscription_purchase::STEP_CHARGE_PAYMENT => SagaStage::Charging,
                    subscription_purchase::STEP_COMMIT_SUBSCRIPTION => SagaStage::Committing,
                    _ => self.stage,
                };
            }
            SagaEvent::StepCompleted(data) => {
                self.completed_steps.push(data.step_name);
                if let Some(count) = data.price_component_count {
                    self.price_component_count = Some(count);
                }
                if let Some(reference) = data.gateway_reference {
                    self.gateway_reference = Some(reference);
                }
                if let Some(id) = data.subscription_id {
                    self.subscription_id = Some(id);
                }
                if let Some(id) = data.payment_id {
                    self.payment_id = Some(id);
                }
            }
            SagaEvent::StepFailed(data) => {
                self.failure_reason = Some(data.error);
            }
            SagaEvent::SagaSucceeded(data) => {
                self.stage = SagaStage::Succeeded;
                self.subscription_id = Some(data.subscription_id);
            }
            SagaEvent::SagaAborted(data) => {
                self.stage = data.stage;
                self.failure_reason = Some(data.reason);
                self.needs_reconciliation = data.needs_reconciliation;
            }
        }
    }

    pub fn id(&self) -> Option<SagaId> {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn business_id(&self) -> Option<BusinessId> {
        self.business_id
    }

    pub fn plan_id(&self) -> Option<PlanId> {
        self.plan_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn stage(&self) -> SagaStage {
        self.stage
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    pub fn price_component_count(&self) -> Option<usize> {
        self.price_component_count
    }

    /// Returns the gateway transaction reference once a charge was approved.
    pub fn gateway_reference(&self) -> Option<&str> {
        self.gateway_reference.as_deref()
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription_id
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        self.payment_id
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// True when the run ended with a charge state that needs manual checking.
    pub fn needs_reconciliation(&self) -> bool {
        self.needs_reconciliation
    }
}
