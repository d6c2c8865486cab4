//! Renewal date changes for existing subscriptions.

use chrono::{DateTime, Utc};
use common::SubscriptionId;
use domain::Subscription;
use store::{StoreError, SubscriptionStore};

use crate::error::SagaError;
use crate::services::crm::{self, CrmNotifier, CrmSync};

/// Moves renewal dates and keeps the CRM in step.
#[derive(Debug, Clone)]
pub struct RenewalService<S, C> {
    store: S,
    crm: C,
}

impl<S, C> RenewalService<S, C>
where
    S: SubscriptionStore,
    C: CrmNotifier + Clone + 'static,
{
    pub fn new(store: S, crm: C) -> Self {
        Self { store, crm }
    }

    /// Persists a new renewal date, then syncs it to the CRM in the background.
    #[tracing::instrument(skip(self), fields(%subscription_id))]
    pub async fn update_next_renewal(
        &self,
        subscription_id: SubscriptionId,
        next_renewal_at: DateTime<Utc>,
    ) -> Result<Subscription, SagaError> {
        let subscription = self
            .store
            .update_next_renewal(subscription_id, next_renewal_at)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => SagaError::SubscriptionNotFound(subscription_id),
                other => SagaError::Store(other),
            })?;

        tracing::info!(
            business_id = %subscription.business_id,
            next_renewal_at = %subscription.next_renewal_at,
            "renewal date updated"
        );

        crm::spawn_sync(
            self.crm.clone(),
            CrmSync::RenewalDateChanged {
                business_id: subscription.business_id,
                subscription_id,
                next_renewal_at: subscription.next_renewal_at,
            },
        );

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;
    use common::{BusinessId, PlanId};
    use domain::{BillingInterval, Business, CommitRequest, Money, Plan};
    use store::InMemoryStore;

    use crate::services::InMemoryCrmNotifier;

    async fn committed_subscription(store: &InMemoryStore) -> Subscription {
        let business_id = BusinessId::new(1);
        store
            .insert_business(Business::new(business_id, "Fake Hairdresser"))
            .await;
        let plan = Plan {
            id: PlanId::new(1),
            name: "Host program".to_string(),
            price: Money::from_dollars(299),
            interval: BillingInterval::Yearly,
        };
        store.insert_plan(plan.clone()).await;

        store
            .commit(CommitRequest {
                business_id,
                amount: plan.price,
                plan,
                price_components: vec![],
                gateway_reference: "10000001".to_string(),
                card_to_store: None,
            })
            .await
            .unwrap()
            .subscription
    }

    #[tokio::test]
    async fn test_update_persists_and_syncs_crm() {
        let store = InMemoryStore::new();
        let crm = InMemoryCrmNotifier::new();
        let service = RenewalService::new(store.clone(), crm.clone());
        let subscription = committed_subscription(&store).await;
        let at = Utc.with_ymd_and_hms(2030, 12, 20, 0, 0, 0).unwrap();

        let updated = service
            .update_next_renewal(subscription.id, at)
            .await
            .unwrap();
        assert_eq!(updated.next_renewal_at, at);
        assert_eq!(store.subscription(subscription.id).await.unwrap().next_renewal_at, at);

        assert!(crm.wait_for(1, Duration::from_secs(1)).await);
        assert_eq!(
            crm.syncs(),
            vec![CrmSync::RenewalDateChanged {
                business_id: subscription.business_id,
                subscription_id: subscription.id,
                next_renewal_at: at,
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_subscription() {
        let store = InMemoryStore::new();
        let crm = InMemoryCrmNotifier::new();
        let service = RenewalService::new(store, crm.clone());

        let result = service
            .update_next_renewal(SubscriptionId::new(), Utc::now())
            .await;
        assert!(matches!(result, Err(SagaError::SubscriptionNotFound(_))));
        assert_eq!(crm.sync_count(), 0);
    }
}
