//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The stage of a subscription purchase saga.
///
/// Stage transitions:
/// ```text
/// NotStarted ──► Resolving ──► Charging ──► Committing ──► Succeeded
///                    │             │             │
///                    ▼             ▼             ▼
///          AbortedBeforeCharge  AbortedOnDecline  FailedAfterCharge
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStage {
    #[default]
    NotStarted,

    /// Pricing is being resolved. Nothing has been charged.
    Resolving,

    /// The gateway call is in flight.
    Charging,

    /// The charge was approved and the records are being written.
    Committing,

    /// Subscription, snapshots and payment were committed (terminal).
    Succeeded,

    /// Pricing failed, no charge was attempted (terminal).
    AbortedBeforeCharge,

    /// The gateway declined or could not be reached (terminal).
    AbortedOnDecline,

    /// The charge went through but the commit failed (terminal).
    FailedAfterCharge,
}

impl SagaStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStage::Succeeded
                | SagaStage::AbortedBeforeCharge
                | SagaStage::AbortedOnDecline
                | SagaStage::FailedAfterCharge
        )
    }

    /// Returns true for the terminal stages other than `Succeeded`.
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != SagaStage::Succeeded
    }

    /// Returns true once the gateway has been asked to charge.
    pub fn charge_attempted(&self) -> bool {
        matches!(
            self,
            SagaStage::Charging
                | SagaStage::Committing
                | SagaStage::Succeeded
                | SagaStage::AbortedOnDecline
                | SagaStage::FailedAfterCharge
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStage::NotStarted => "NotStarted",
            SagaStage::Resolving => "Resolving",
            SagaStage::Charging => "Charging",
            SagaStage::Committing => "Committing",
            SagaStage::Succeeded => "Succeeded",
            SagaStage::AbortedBeforeCharge => "AbortedBeforeCharge",
            SagaStage::AbortedOnDecline => "AbortedOnDecline",
            SagaStage::FailedAfterCharge => "FailedAfterCharge",
        }
    }
}

impl std::fmt::Display for SagaStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
