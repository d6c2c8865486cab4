//! Saga coordinator for subscription purchases.

use std::time::Instant;

use common::{BusinessId, SagaId};
use domain::CommitRequest;
use store::{AppendOptions, JournalEntry, Store, StoreError, Version};

use crate::aggregate::SagaInstance;
use crate::config::SagaConfig;
use crate::error::{PricingError, SagaError};
use crate::events::SagaEvent;
use crate::outcome::{PurchaseFailure, PurchaseOutcome, PurchaseResult};
use crate::pricing::PricingResolver;
use crate::services::alerting::{AlertEvent, AlertSink};
use crate::services::crm::{self, CrmNotifier, CrmSync};
use crate::services::gateway::{
    ChargeInstruction, GatewayCharge, GatewayResult, PaymentGateway, PaymentGatewayClient,
};
use crate::services::location::LocationResolver;
use crate::state::SagaStage;
use crate::subscription_purchase::{
    self, PaymentMethod, PurchaseRequest, STEP_CHARGE_PAYMENT, STEP_COMMIT_SUBSCRIPTION,
    STEP_RESOLVE_PRICING,
};

/// Orchestrates subscription purchases.
///
/// Drives the 3-step saga (pricing → charge → commit). Nothing before the
/// charge has side effects, so a failure there needs no compensation. The
/// commit is the only write and runs after the charge; if it fails the
/// charge cannot be undone here and the run ends in `FailedAfterCharge` with
/// a critical alert. Every run is journaled, best effort.
pub struct SubscriptionSaga<S, L, G, A, C> {
    store: S,
    pricing: PricingResolver<S, L>,
    gateway: PaymentGatewayClient<G>,
    alerts: A,
    crm: C,
    config: SagaConfig,
}

/// Journal position of the run in progress.
struct SagaRun {
    saga_id: SagaId,
    business_id: BusinessId,
    version: Version,
    instance: SagaInstance,
    started: Instant,
}

impl<S, L, G, A, C> SubscriptionSaga<S, L, G, A, C>
where
    S: Store + Clone,
    L: LocationResolver,
    G: PaymentGateway,
    A: AlertSink,
    C: CrmNotifier + Clone + 'static,
{
    pub fn new(store: S, locations: L, gateway: G, alerts: A, crm: C, config: SagaConfig) -> Self {
        let pricing = PricingResolver::new(store.clone(), locations, config.location_timeout);
        let gateway = PaymentGatewayClient::new(gateway, config.gateway_timeout);
        Self {
            store,
            pricing,
            gateway,
            alerts,
            crm,
            config,
        }
    }

    pub fn pricing(&self) -> &PricingResolver<S, L> {
        &self.pricing
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Runs a purchase to one of its terminal outcomes.
    ///
    /// Returns `Err` only when the request is refused up front (unknown
    /// business or plan, non-positive amount, no card on file) or the store
    /// fails while checking it; nothing is charged or journaled then. Any
    /// failure after the saga started is reported through the outcome.
    #[tracing::instrument(
        skip(self, request),
        fields(
            saga_type = subscription_purchase::SAGA_TYPE,
            business_id = %request.business_id,
            plan_id = %request.plan_id,
        )
    )]
    pub async fn execute(&self, request: PurchaseRequest) -> Result<PurchaseResult, SagaError> {
        // 1. Check the request
        let business_id = request.business_id;
        let business = self
            .store
            .business(business_id)
            .await
            .map_err(|e| not_found_as(e, SagaError::BusinessNotFound(business_id)))?;
        let plan = self
            .store
            .plan(request.plan_id)
            .await
            .map_err(|e| not_found_as(e, SagaError::PlanNotFound(request.plan_id)))?;

        let amount = request.amount.unwrap_or(plan.price);
        if !amount.is_positive() {
            return Err(SagaError::InvalidAmount {
                cents: amount.cents(),
            });
        }

        let payment_method = request.payment_method.as_str();
        let instruction = match request.payment_method {
            PaymentMethod::NewCard(card) => ChargeInstruction::NewCard(card),
            PaymentMethod::CardOnFile => ChargeInstruction::CardOnFile(
                self.store
                    .credit_card(business_id)
                    .await?
                    .ok_or(SagaError::NoCardOnFile(business_id))?,
            ),
        };

        // 2. Start the saga
        metrics::counter!("saga_executions_total").increment(1);
        let mut run = SagaRun {
            saga_id: SagaId::new(),
            business_id,
            version: Version::initial(),
            instance: SagaInstance::default(),
            started: Instant::now(),
        };
        tracing::info!(
            saga_id = %run.saga_id,
            %amount,
            payment_method,
            host_program_member = business.is_host_program_member,
            "purchase saga started"
        );
        let started = SagaEvent::saga_started(
            run.saga_id,
            business_id,
            plan.id,
            amount,
            payment_method,
            subscription_purchase::SAGA_TYPE,
        );
        self.record(&mut run, started).await;

        // 3. Step 1: Resolve pricing
        self.record(&mut run, SagaEvent::step_started(STEP_RESOLVE_PRICING))
            .await;
        let price_components = match self.pricing.resolve(business_id).await {
            Ok(components) => {
                self.record(
                    &mut run,
                    SagaEvent::pricing_resolved(STEP_RESOLVE_PRICING, components.len()),
                )
                .await;
                components
            }
            Err(e) => {
                let failure = pricing_failure(e);
                return Ok(self
                    .fail(run, STEP_RESOLVE_PRICING, SagaStage::AbortedBeforeCharge, failure)
                    .await);
            }
        };

        // 4. Step 2: Charge the payment method
        self.record(&mut run, SagaEvent::step_started(STEP_CHARGE_PAYMENT))
            .await;
        let invoice_reference = run.saga_id.to_string();
        let (gateway_reference, stored_card) = match self
            .gateway
            .charge(&instruction, amount, &invoice_reference)
            .await
        {
            Ok(GatewayCharge {
                result: GatewayResult::Approved { reference },
                stored_card,
            }) => {
                self.record(
                    &mut run,
                    SagaEvent::payment_charged(STEP_CHARGE_PAYMENT, reference.clone()),
                )
                .await;
                (reference, stored_card)
            }
            Ok(GatewayCharge {
                result:
                    GatewayResult::Declined {
                        reason,
                        transaction_number,
                    },
                ..
            }) => {
                let failure = PurchaseFailure::PaymentDeclined {
                    reason,
                    transaction_number,
                };
                return Ok(self
                    .fail(run, STEP_CHARGE_PAYMENT, SagaStage::AbortedOnDecline, failure)
                    .await);
            }
            Err(e) => {
                let failure = PurchaseFailure::GatewayUnavailable {
                    reason: e.to_string(),
                    charge_attempted: e.charge_attempted(),
                };
                return Ok(self
                    .fail(run, STEP_CHARGE_PAYMENT, SagaStage::AbortedOnDecline, failure)
                    .await);
            }
        };

        // 5. Step 3: Commit subscription, snapshots and payment
        self.record(&mut run, SagaEvent::step_started(STEP_COMMIT_SUBSCRIPTION))
            .await;
        let commit_request = CommitRequest {
            business_id,
            plan,
            amount,
            price_components,
            gateway_reference: gateway_reference.clone(),
            card_to_store: stored_card,
        };
        let committed = match tokio::time::timeout(
            self.config.commit_timeout,
            self.store.commit(commit_request),
        )
        .await
        {
            Ok(Ok(committed)) => committed,
            Ok(Err(e)) => {
                let failure = PurchaseFailure::CommitFailure {
                    gateway_reference,
                    reason: e.to_string(),
                };
                return Ok(self
                    .fail(run, STEP_COMMIT_SUBSCRIPTION, SagaStage::FailedAfterCharge, failure)
                    .await);
            }
            Err(_) => {
                let failure = PurchaseFailure::CommitFailure {
                    gateway_reference,
                    reason: format!("commit timed out after {:?}", self.config.commit_timeout),
                };
                return Ok(self
                    .fail(run, STEP_COMMIT_SUBSCRIPTION, SagaStage::FailedAfterCharge, failure)
                    .await);
            }
        };

        self.record(
            &mut run,
            SagaEvent::subscription_committed(
                STEP_COMMIT_SUBSCRIPTION,
                committed.subscription.id,
                committed.payment.id,
            ),
        )
        .await;

        // 6. Saga succeeded
        self.record(&mut run, SagaEvent::saga_succeeded(committed.subscription.id))
            .await;

        crm::spawn_sync(
            self.crm.clone(),
            CrmSync::SubscriptionCreated {
                business_id,
                subscription_id: committed.subscription.id,
                plan_id: committed.subscription.plan_id,
                amount: committed.subscription.amount,
                next_renewal_at: committed.subscription.next_renewal_at,
            },
        );

        let duration = run.started.elapsed().as_secs_f64();
        let outcome = PurchaseOutcome::Succeeded(committed);
        record_outcome(&outcome, duration);
        tracing::info!(
            saga_id = %run.saga_id,
            duration,
            price_components = run.instance.price_component_count().unwrap_or_default(),
            "purchase saga succeeded"
        );

        Ok(PurchaseResult {
            saga_id: run.saga_id,
            outcome,
        })
    }

    /// Ends a run in a failure stage: journals it, alerts and builds the result.
    async fn fail(
        &self,
        mut run: SagaRun,
        step: &str,
        stage: SagaStage,
        failure: PurchaseFailure,
    ) -> PurchaseResult {
        let reason = failure.to_string();
        let needs_reconciliation = failure.needs_reconciliation();

        self.record(&mut run, SagaEvent::step_failed(step, reason.clone()))
            .await;
        self.record(
            &mut run,
            SagaEvent::saga_aborted(stage, reason.clone(), needs_reconciliation),
        )
        .await;

        match failure {
            PurchaseFailure::PaymentDeclined { .. } => {
                tracing::warn!(saga_id = %run.saga_id, %stage, %reason, "purchase declined");
            }
            _ => {
                tracing::error!(
                    saga_id = %run.saga_id,
                    %stage,
                    %reason,
                    needs_reconciliation,
                    "purchase saga failed"
                );
            }
        }

        let alert = AlertEvent::for_failure(run.saga_id, run.business_id, stage, &failure);
        metrics::counter!("alerts_emitted_total", "kind" => alert.kind.as_str()).increment(1);
        self.alerts.emit(alert).await;

        let outcome = match stage {
            SagaStage::AbortedOnDecline => PurchaseOutcome::AbortedOnDecline(failure),
            SagaStage::FailedAfterCharge => PurchaseOutcome::FailedAfterCharge(failure),
            _ => PurchaseOutcome::AbortedBeforeCharge(failure),
        };
        record_outcome(&outcome, run.started.elapsed().as_secs_f64());

        PurchaseResult {
            saga_id: run.saga_id,
            outcome,
        }
    }

    /// Applies an event to the run and appends it to the journal.
    ///
    /// A journal failure is logged and does not change the run.
    async fn record(&self, run: &mut SagaRun, event: SagaEvent) {
        match self.append_saga_event(run.saga_id, run.version, &event).await {
            Ok(version) => run.version = version,
            Err(e) => {
                tracing::warn!(
                    saga_id = %run.saga_id,
                    event_type = event.event_type(),
                    error = %e,
                    "failed to journal saga event"
                );
            }
        }
        run.instance.apply(event);
    }

    /// Loads a saga instance by ID from the journal.
    pub async fn get_saga(&self, saga_id: SagaId) -> Result<Option<SagaInstance>, SagaError> {
        let entries = self.store.load(saga_id).await?;

        let Some(last) = entries.last().map(|entry| entry.version) else {
            return Ok(None);
        };

        let mut saga = SagaInstance::default();
        for entry in entries {
            let event: SagaEvent = serde_json::from_value(entry.payload)?;
            saga.apply(event);
        }
        saga.set_version(last);
        Ok(Some(saga))
    }

    /// Appends a single saga event to the journal.
    async fn append_saga_event(
        &self,
        saga_id: SagaId,
        current_version: Version,
        event: &SagaEvent,
    ) -> Result<Version, SagaError> {
        let entry = JournalEntry::builder()
            .saga_id(saga_id)
            .saga_type(subscription_purchase::SAGA_TYPE)
            .event_type(event.event_type())
            .version(current_version.next())
            .payload(event)?
            .build()?;

        let new_version = self
            .store
            .append(vec![entry], AppendOptions::expect_version(current_version))
            .await?;

        Ok(new_version)
    }
}

fn not_found_as(error: StoreError, not_found: SagaError) -> SagaError {
    match error {
        StoreError::NotFound { .. } => not_found,
        other => SagaError::Store(other),
    }
}

fn pricing_failure(error: PricingError) -> PurchaseFailure {
    match error {
        PricingError::LocationServiceUnavailable(e) => {
            PurchaseFailure::LocationServiceUnavailable {
                reason: e.to_string(),
            }
        }
        PricingError::Validation(e) => PurchaseFailure::PricingValidation {
            reason: e.to_string(),
        },
        PricingError::Catalog(e) => PurchaseFailure::PricingValidation {
            reason: e.to_string(),
        },
    }
}

fn record_outcome(outcome: &PurchaseOutcome, duration: f64) {
    metrics::counter!("saga_outcomes_total", "outcome" => outcome.as_str()).increment(1);
    metrics::histogram!("saga_duration_seconds").record(duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{CategoryId, CreditCardId, LocationId, PlanId};
    use domain::{BillingInterval, Business, CardDetails, Category, CreditCard, Money, Plan};
    use store::{InMemoryStore, PriceCatalog};

    use crate::services::{
        AlertKind, InMemoryAlertSink, InMemoryCrmNotifier, InMemoryGateway,
        InMemoryLocationResolver,
    };

    type TestSaga = SubscriptionSaga<
        InMemoryStore,
        InMemoryLocationResolver,
        InMemoryGateway,
        InMemoryAlertSink,
        InMemoryCrmNotifier,
    >;

    const BUSINESS: BusinessId = BusinessId::new(1);
    const PLAN: PlanId = PlanId::new(1);
    const CLEANING: CategoryId = CategoryId::new(10);
    const SYDNEY: LocationId = LocationId::new(100);

    struct Fixture {
        saga: TestSaga,
        store: InMemoryStore,
        locations: InMemoryLocationResolver,
        gateway: InMemoryGateway,
        alerts: InMemoryAlertSink,
    }

    async fn setup() -> Fixture {
        let store = InMemoryStore::new();
        store
            .insert_business(Business::new(BUSINESS, "Fake Hairdresser"))
            .await;
        store.insert_category(Category::new(CLEANING, "Cleaning")).await;
        store.assign_category(BUSINESS, CLEANING).await;
        store
            .insert_plan(Plan {
                id: PLAN,
                name: "Host program".to_string(),
                price: Money::from_dollars(299),
                interval: BillingInterval::Yearly,
            })
            .await;
        store
            .append_price_component(CLEANING, SYDNEY, Money::from_cents(1500))
            .await
            .unwrap();

        let locations = InMemoryLocationResolver::new();
        locations.set_locations(BUSINESS, [SYDNEY]);
        let gateway = InMemoryGateway::new();
        let alerts = InMemoryAlertSink::new();

        let saga = SubscriptionSaga::new(
            store.clone(),
            locations.clone(),
            gateway.clone(),
            alerts.clone(),
            InMemoryCrmNotifier::new(),
            SagaConfig::default(),
        );

        Fixture {
            saga,
            store,
            locations,
            gateway,
            alerts,
        }
    }

    fn new_card() -> PaymentMethod {
        PaymentMethod::NewCard(CardDetails {
            number: "4111111111111111".to_string(),
            expiry_month: 12,
            expiry_year: 2030,
            holder: "Jo Citizen".to_string(),
            cvn: Some("123".to_string()),
        })
    }

    #[tokio::test]
    async fn test_happy_path() {
        let f = setup().await;

        let result = f
            .saga
            .execute(PurchaseRequest::new(BUSINESS, PLAN, new_card()))
            .await
            .unwrap();

        assert!(result.outcome.is_success());
        let saga = f.saga.get_saga(result.saga_id).await.unwrap().unwrap();
        assert_eq!(saga.stage(), SagaStage::Succeeded);
        assert_eq!(saga.completed_steps().len(), 3);
        assert_eq!(saga.price_component_count(), Some(1));
        assert!(saga.gateway_reference().is_some());
        assert!(!saga.needs_reconciliation());
        assert_eq!(f.alerts.count(), 0);
    }

    #[tokio::test]
    async fn test_location_failure_aborts_before_charge() {
        let f = setup().await;
        f.locations.set_unavailable(true);

        let result = f
            .saga
            .execute(PurchaseRequest::new(BUSINESS, PLAN, new_card()))
            .await
            .unwrap();

        assert!(matches!(
            result.outcome,
            PurchaseOutcome::AbortedBeforeCharge(PurchaseFailure::LocationServiceUnavailable { .. })
        ));
        assert_eq!(f.gateway.call_count(), 0);
        assert_eq!(f.store.subscription_count().await, 0);
        assert_eq!(f.alerts.count(), 1);

        let saga = f.saga.get_saga(result.saga_id).await.unwrap().unwrap();
        assert_eq!(saga.stage(), SagaStage::AbortedBeforeCharge);
        assert!(saga.completed_steps().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_outage_during_purchase_needs_reconciliation() {
        let f = setup().await;
        f.store
            .insert_credit_card(CreditCard {
                id: CreditCardId::new(1),
                business_id: BUSINESS,
                token: "918118938576".to_string(),
                last_four: "4242".to_string(),
                expiry_month: 1,
                expiry_year: 2031,
                holder: "Jo Citizen".to_string(),
                created_at: Utc::now(),
            })
            .await;
        f.gateway.set_unavailable(true);

        let result = f
            .saga
            .execute(PurchaseRequest::new(BUSINESS, PLAN, PaymentMethod::CardOnFile))
            .await
            .unwrap();

        assert_eq!(result.outcome.stage(), SagaStage::AbortedOnDecline);
        let saga = f.saga.get_saga(result.saga_id).await.unwrap().unwrap();
        assert!(saga.needs_reconciliation());
        assert_eq!(f.store.payment_count().await, 0);
    }

    #[tokio::test]
    async fn test_gateway_outage_during_tokenize_charges_nothing() {
        let f = setup().await;
        f.gateway.set_unavailable(true);

        let result = f
            .saga
            .execute(PurchaseRequest::new(BUSINESS, PLAN, new_card()))
            .await
            .unwrap();

        assert!(matches!(
            result.outcome,
            PurchaseOutcome::AbortedOnDecline(PurchaseFailure::GatewayUnavailable {
                charge_attempted: false,
                ..
            })
        ));
        let saga = f.saga.get_saga(result.saga_id).await.unwrap().unwrap();
        assert!(!saga.needs_reconciliation());
        assert_eq!(f.gateway.purchase_count(), 0);
        assert_eq!(f.alerts.events()[0].kind, AlertKind::NothingCharged);
    }

    #[tokio::test]
    async fn test_journal_failure_does_not_change_outcome() {
        let f = setup().await;
        f.store.set_fail_on_journal(true).await;

        let result = f
            .saga
            .execute(PurchaseRequest::new(BUSINESS, PLAN, new_card()))
            .await
            .unwrap();

        assert!(result.outcome.is_success());
        assert_eq!(f.store.journal_entry_count().await, 0);
        assert!(f.saga.get_saga(result.saga_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_business_is_refused() {
        let f = setup().await;
        let result = f
            .saga
            .execute(PurchaseRequest::new(BusinessId::new(404), PLAN, new_card()))
            .await;
        assert!(matches!(result, Err(SagaError::BusinessNotFound(_))));
        assert_eq!(f.store.journal_entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_plan_is_refused() {
        let f = setup().await;
        let result = f
            .saga
            .execute(PurchaseRequest::new(BUSINESS, PlanId::new(9), new_card()))
            .await;
        assert!(matches!(result, Err(SagaError::PlanNotFound(_))));
    }

    #[tokio::test]
    async fn test_non_positive_amount_is_refused() {
        let f = setup().await;
        let result = f
            .saga
            .execute(PurchaseRequest::new(BUSINESS, PLAN, new_card()).with_amount(Money::zero()))
            .await;
        assert!(matches!(result, Err(SagaError::InvalidAmount { cents: 0 })));
        assert_eq!(f.gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_card_on_file_required() {
        let f = setup().await;
        let result = f
            .saga
            .execute(PurchaseRequest::new(BUSINESS, PLAN, PaymentMethod::CardOnFile))
            .await;
        assert!(matches!(result, Err(SagaError::NoCardOnFile(_))));
        assert_eq!(f.gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_nonexistent_saga() {
        let f = setup().await;
        assert!(f.saga.get_saga(SagaId::new()).await.unwrap().is_none());
    }
}
