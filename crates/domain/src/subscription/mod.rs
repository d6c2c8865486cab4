//! Subscriptions and the records created alongside them.

mod commit;
mod payment;
mod state;

pub use commit::{CommitRecords, CommitRequest, CommittedSubscription};
pub use payment::{Payment, PaymentState};
pub use state::SubscriptionState;

use chrono::{DateTime, Utc};
use common::{BusinessId, CategoryId, LocationId, PlanId, PriceComponentId, SubscriptionId};
use serde::{Deserialize, Serialize};

use crate::catalog::{PriceComponent, PriceKey};
use crate::error::DomainError;
use crate::{Money, Plan};

/// A business's subscription to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub business_id: BusinessId,
    pub plan_id: PlanId,
    pub state: SubscriptionState,
    /// Amount charged per billing interval.
    pub amount: Money,
    pub next_renewal_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Creates a subscription in the `Created` state, renewing one plan
    /// interval after `now`.
    pub fn new(business_id: BusinessId, plan: &Plan, amount: Money, now: DateTime<Utc>) -> Self {
        Self {
            id: SubscriptionId::new(),
            business_id,
            plan_id: plan.id,
            state: SubscriptionState::Created,
            amount,
            next_renewal_at: plan.interval.next_renewal_from(now),
            created_at: now,
            activated_at: None,
        }
    }

    /// Marks the subscription as active.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.state.can_activate() {
            return Err(DomainError::InvalidStateTransition {
                current_state: self.state,
                action: "activate",
            });
        }
        self.state = SubscriptionState::Active;
        self.activated_at = Some(now);
        Ok(())
    }

    /// Moves the renewal date. Only active subscriptions renew.
    pub fn reschedule_renewal(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if self.state != SubscriptionState::Active {
            return Err(DomainError::InvalidStateTransition {
                current_state: self.state,
                action: "reschedule renewal",
            });
        }
        self.next_renewal_at = at;
        Ok(())
    }
}

/// A price snapshot selected for one (category, location) pair, not yet
/// attached to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPriceComponentInput {
    pub category_id: CategoryId,
    pub location_id: LocationId,
    pub price_component_id: PriceComponentId,
    pub amount: Money,
}

impl SubscriptionPriceComponentInput {
    /// Snapshots the given active component.
    pub fn snapshot(component: &PriceComponent) -> Self {
        Self {
            category_id: component.category_id,
            location_id: component.location_id,
            price_component_id: component.id,
            amount: component.amount,
        }
    }

    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.category_id, self.location_id)
    }

    /// Checks the snapshot is well formed on its own.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.amount.is_negative() {
            return Err(DomainError::NegativePrice {
                price_component_id: self.price_component_id,
                cents: self.amount.cents(),
            });
        }
        Ok(())
    }
}

/// The price component applied to a subscription for one pair, frozen at
/// purchase time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPriceComponent {
    pub subscription_id: SubscriptionId,
    pub category_id: CategoryId,
    pub location_id: LocationId,
    pub price_component_id: PriceComponentId,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionPriceComponent {
    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.category_id, self.location_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BillingInterval;

    fn plan() -> Plan {
        Plan {
            id: PlanId::new(1),
            name: "HCP yearly".to_string(),
            price: Money::from_dollars(100),
            interval: BillingInterval::Yearly,
        }
    }

    #[test]
    fn test_new_subscription_is_created_with_renewal_date() {
        let now = Utc::now();
        let subscription = Subscription::new(BusinessId::new(1), &plan(), Money::from_dollars(100), now);
        assert_eq!(subscription.state, SubscriptionState::Created);
        assert_eq!(
            subscription.next_renewal_at,
            BillingInterval::Yearly.next_renewal_from(now)
        );
        assert!(subscription.activated_at.is_none());
    }

    #[test]
    fn test_activate_once() {
        let now = Utc::now();
        let mut subscription =
            Subscription::new(BusinessId::new(1), &plan(), Money::from_dollars(100), now);
        subscription.activate(now).unwrap();
        assert_eq!(subscription.state, SubscriptionState::Active);

        let err = subscription.activate(now).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_reschedule_requires_active() {
        let now = Utc::now();
        let mut subscription =
            Subscription::new(BusinessId::new(1), &plan(), Money::from_dollars(100), now);
        assert!(subscription.reschedule_renewal(now).is_err());

        subscription.activate(now).unwrap();
        let later = now + chrono::Duration::days(400);
        subscription.reschedule_renewal(later).unwrap();
        assert_eq!(subscription.next_renewal_at, later);
    }

    #[test]
    fn test_negative_snapshot_is_invalid() {
        let input = SubscriptionPriceComponentInput {
            category_id: CategoryId::new(1),
            location_id: LocationId::new(2),
            price_component_id: PriceComponentId::new(3),
            amount: Money::from_cents(-1),
        };
        assert!(matches!(
            input.validate(),
            Err(DomainError::NegativePrice { cents: -1, .. })
        ));
    }
}
