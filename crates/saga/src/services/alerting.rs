//! Operator alerts for failed purchases.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{BusinessId, SagaId};
use serde::{Deserialize, Serialize};

use crate::outcome::PurchaseFailure;
use crate::state::SagaStage;

/// What an operator has to look at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The saga stopped before money moved.
    NothingCharged,
    /// The gateway could not be reached; the charge may or may not exist.
    ChargeStateUnknown,
    /// The business was charged but no records were written.
    ChargedButUnrecorded,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NothingCharged => "nothing_charged",
            Self::ChargeStateUnknown => "charge_state_unknown",
            Self::ChargedButUnrecorded => "charged_but_unrecorded",
        }
    }
}

/// Alert severity level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One alert about a failed purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub saga_id: SagaId,
    pub business_id: BusinessId,
    pub kind: AlertKind,
    pub severity: Severity,
    pub stage: SagaStage,
    pub message: String,
    /// Set when the gateway approved a charge.
    pub gateway_reference: Option<String>,
}

impl AlertEvent {
    /// Builds the alert for a failed saga run.
    pub fn for_failure(
        saga_id: SagaId,
        business_id: BusinessId,
        stage: SagaStage,
        failure: &PurchaseFailure,
    ) -> Self {
        let (kind, severity, gateway_reference) = match failure {
            PurchaseFailure::LocationServiceUnavailable { .. } => {
                (AlertKind::NothingCharged, Severity::High, None)
            }
            PurchaseFailure::PricingValidation { .. } => {
                (AlertKind::NothingCharged, Severity::High, None)
            }
            PurchaseFailure::PaymentDeclined { .. } => {
                (AlertKind::NothingCharged, Severity::Low, None)
            }
            PurchaseFailure::GatewayUnavailable {
                charge_attempted: false,
                ..
            } => (AlertKind::NothingCharged, Severity::Medium, None),
            PurchaseFailure::GatewayUnavailable {
                charge_attempted: true,
                ..
            } => (AlertKind::ChargeStateUnknown, Severity::Critical, None),
            PurchaseFailure::CommitFailure {
                gateway_reference, ..
            } => (
                AlertKind::ChargedButUnrecorded,
                Severity::Critical,
                Some(gateway_reference.clone()),
            ),
        };

        Self {
            saga_id,
            business_id,
            kind,
            severity,
            stage,
            message: failure.to_string(),
            gateway_reference,
        }
    }
}

/// Receives alerts. Delivery is at-least-once; duplicates are tolerated.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, event: AlertEvent);
}

#[async_trait]
impl<T: AlertSink + ?Sized> AlertSink for Arc<T> {
    async fn emit(&self, event: AlertEvent) {
        (**self).emit(event).await
    }
}

/// Writes alerts to the structured log at their severity.
#[derive(Debug, Clone, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn emit(&self, event: AlertEvent) {
        let reference = event.gateway_reference.as_deref().unwrap_or("-");
        match event.severity {
            Severity::Low => tracing::info!(
                saga_id = %event.saga_id,
                business_id = %event.business_id,
                kind = event.kind.as_str(),
                stage = %event.stage,
                "purchase alert: {}",
                event.message
            ),
            Severity::Medium => tracing::warn!(
                saga_id = %event.saga_id,
                business_id = %event.business_id,
                kind = event.kind.as_str(),
                stage = %event.stage,
                "purchase alert: {}",
                event.message
            ),
            Severity::High | Severity::Critical => tracing::error!(
                saga_id = %event.saga_id,
                business_id = %event.business_id,
                kind = event.kind.as_str(),
                severity = event.severity.as_str(),
                stage = %event.stage,
                gateway_reference = reference,
                "purchase alert: {}",
                event.message
            ),
        }
    }
}

/// Collects alerts for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAlertSink {
    events: Arc<RwLock<Vec<AlertEvent>>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl AlertSink for InMemoryAlertSink {
    async fn emit(&self, event: AlertEvent) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
