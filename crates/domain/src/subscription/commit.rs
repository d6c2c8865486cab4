//! The unit of records written when a charged purchase is committed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::BusinessId;
use serde::{Deserialize, Serialize};

use super::{Payment, Subscription, SubscriptionPriceComponent, SubscriptionPriceComponentInput};
use crate::business::TokenizedCard;
use crate::error::DomainError;
use crate::{Money, Plan};

/// Everything needed to persist a purchase the gateway has already approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub business_id: BusinessId,
    pub plan: Plan,
    pub amount: Money,
    pub price_components: Vec<SubscriptionPriceComponentInput>,
    pub gateway_reference: String,
    /// Card tokenized during this purchase, to be kept on file.
    pub card_to_store: Option<TokenizedCard>,
}

impl CommitRequest {
    /// Validates the whole unit. Any violation rejects every record in it.
    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.amount.is_positive() {
            return Err(DomainError::InvalidAmount {
                cents: self.amount.cents(),
            });
        }
        if self.gateway_reference.trim().is_empty() {
            return Err(DomainError::MissingGatewayReference);
        }

        let mut seen = HashSet::with_capacity(self.price_components.len());
        for input in &self.price_components {
            input.validate()?;
            if !seen.insert(input.key()) {
                return Err(DomainError::DuplicatePriceComponent {
                    category_id: input.category_id,
                    location_id: input.location_id,
                });
            }
        }
        Ok(())
    }

    /// Validates the request and builds the rows to persist.
    pub fn into_records(self, now: DateTime<Utc>) -> Result<CommitRecords, DomainError> {
        self.validate()?;

        let mut subscription = Subscription::new(self.business_id, &self.plan, self.amount, now);
        subscription.activate(now)?;

        let price_components = self
            .price_components
            .into_iter()
            .map(|input| SubscriptionPriceComponent {
                subscription_id: subscription.id,
                category_id: input.category_id,
                location_id: input.location_id,
                price_component_id: input.price_component_id,
                amount: input.amount,
                created_at: now,
            })
            .collect();

        let payment = Payment::success(
            self.business_id,
            subscription.id,
            self.amount,
            self.gateway_reference,
            now,
        );

        Ok(CommitRecords {
            subscription,
            price_components,
            payment,
            card_to_store: self.card_to_store,
        })
    }
}

/// Validated rows, ready to be written in one transaction.
#[derive(Debug, Clone)]
pub struct CommitRecords {
    pub subscription: Subscription,
    pub price_components: Vec<SubscriptionPriceComponent>,
    pub payment: Payment,
    pub card_to_store: Option<TokenizedCard>,
}

/// The persisted result of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedSubscription {
    pub subscription: Subscription,
    pub price_components: Vec<SubscriptionPriceComponent>,
    pub payment: Payment,
    /// True when this commit flipped the host-program flag.
    pub enrolled_host_program: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{PaymentState, SubscriptionState};
    use crate::BillingInterval;
    use common::{CategoryId, LocationId, PlanId, PriceComponentId};

    fn input(category: i64, location: i64, cents: i64) -> SubscriptionPriceComponentInput {
        SubscriptionPriceComponentInput {
            category_id: CategoryId::new(category),
            location_id: LocationId::new(location),
            price_component_id: PriceComponentId::new(category * 1000 + location),
            amount: Money::from_cents(cents),
        }
    }

    fn request(inputs: Vec<SubscriptionPriceComponentInput>) -> CommitRequest {
        CommitRequest {
            business_id: BusinessId::new(7),
            plan: Plan {
                id: PlanId::new(1),
                name: "HCP yearly".to_string(),
                price: Money::from_dollars(100),
                interval: BillingInterval::Yearly,
            },
            amount: Money::from_dollars(100),
            price_components: inputs,
            gateway_reference: "TXN-1".to_string(),
            card_to_store: None,
        }
    }

    #[test]
    fn test_into_records_builds_active_subscription_and_success_payment() {
        let now = Utc::now();
        let records = request(vec![input(1, 10, 500), input(2, 10, 700)])
            .into_records(now)
            .unwrap();

        assert_eq!(records.subscription.state, SubscriptionState::Active);
        assert_eq!(records.price_components.len(), 2);
        assert!(records
            .price_components
            .iter()
            .all(|pc| pc.subscription_id == records.subscription.id));
        assert_eq!(records.payment.current_state, PaymentState::Success);
        assert_eq!(records.payment.subscription_id, Some(records.subscription.id));
        assert_eq!(records.payment.amount, Money::from_dollars(100));
    }

    #[test]
    fn test_empty_price_components_are_allowed() {
        let records = request(vec![]).into_records(Utc::now()).unwrap();
        assert!(records.price_components.is_empty());
    }

    #[test]
    fn test_duplicate_pair_is_rejected() {
        let err = request(vec![input(1, 10, 500), input(1, 10, 600)])
            .validate()
            .unwrap_err();
        assert!(matches!(err, DomainError::DuplicatePriceComponent { .. }));
    }

    #[test]
    fn test_non_positive_amount_is_rejected() {
        let mut req = request(vec![]);
        req.amount = Money::zero();
        assert!(matches!(
            req.validate(),
            Err(DomainError::InvalidAmount { cents: 0 })
        ));
    }

    #[test]
    fn test_blank_gateway_reference_is_rejected() {
        let mut req = request(vec![]);
        req.gateway_reference = "  ".to_string();
        assert_eq!(req.validate(), Err(DomainError::MissingGatewayReference));
    }

    #[test]
    fn test_malformed_snapshot_is_rejected() {
        let err = request(vec![input(1, 10, -5)]).validate().unwrap_err();
        assert!(matches!(err, DomainError::NegativePrice { .. }));
    }
}
