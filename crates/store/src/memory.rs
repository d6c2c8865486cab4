use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    BusinessId, CategoryId, CreditCardId, LocationId, PlanId, PriceComponentId, SagaId,
    SubscriptionId,
};
use domain::{
    Business, Category, CommitRequest, CommittedSubscription, CreditCard, DomainError, Money,
    Payment, Plan, PriceComponent, PriceHistory, PriceKey, Subscription,
    SubscriptionPriceComponent,
};
use tokio::sync::RwLock;

use crate::journal::validate_entries_for_append;
use crate::store::{BusinessRepository, PriceCatalog, SagaJournal, SubscriptionStore};
use crate::{AppendOptions, JournalEntry, Result, StoreError, Version};

#[derive(Debug, Default)]
struct State {
    businesses: HashMap<BusinessId, Business>,
    categories: HashMap<CategoryId, Category>,
    business_categories: HashMap<BusinessId, BTreeSet<CategoryId>>,
    credit_cards: HashMap<BusinessId, CreditCard>,
    plans: HashMap<PlanId, Plan>,
    prices: PriceHistory,
    next_price_id: i64,
    next_card_id: i64,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    subscription_price_components: Vec<SubscriptionPriceComponent>,
    payments: Vec<Payment>,
    journal: Vec<JournalEntry>,
    fail_on_commit: bool,
    fail_on_journal: bool,
    fail_on_subscription_reads: bool,
}

impl State {
    fn active_category_ids(&self, business_id: BusinessId) -> BTreeSet<CategoryId> {
        self.business_categories
            .get(&business_id)
            .into_iter()
            .flatten()
            .filter(|id| self.categories.get(*id).is_some_and(Category::is_active))
            .copied()
            .collect()
    }

    fn check_subscription_reads(&self) -> Result<()> {
        if self.fail_on_subscription_reads {
            return Err(StoreError::Unavailable("subscription read rejected".to_string()));
        }
        Ok(())
    }

    fn journal_version(&self, saga_id: SagaId) -> Option<Version> {
        self.journal
            .iter()
            .filter(|entry| entry.saga_id == saga_id)
            .map(|entry| entry.version)
            .max()
    }
}

/// In-memory store for tests and local runs.
///
/// Provides the same traits as the PostgreSQL store. A commit validates and
/// applies its whole unit under one write lock, so concurrent commits never
/// observe each other half-applied.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_business(&self, business: Business) {
        self.state
            .write()
            .await
            .businesses
            .insert(business.id, business);
    }

    pub async fn insert_category(&self, category: Category) {
        self.state
            .write()
            .await
            .categories
            .insert(category.id, category);
    }

    /// Associates a category with a business.
    pub async fn assign_category(&self, business_id: BusinessId, category_id: CategoryId) {
        self.state
            .write()
            .await
            .business_categories
            .entry(business_id)
            .or_default()
            .insert(category_id);
    }

    /// Marks a category as archived.
    pub async fn archive_category(&self, category_id: CategoryId) {
        if let Some(category) = self.state.write().await.categories.get_mut(&category_id) {
            category.archived = true;
        }
    }

    pub async fn insert_plan(&self, plan: Plan) {
        self.state.write().await.plans.insert(plan.id, plan);
    }

    /// Stores a card on file, replacing any previous one.
    pub async fn insert_credit_card(&self, card: CreditCard) {
        let mut state = self.state.write().await;
        state.next_card_id = state.next_card_id.max(card.id.as_i64());
        state.credit_cards.insert(card.business_id, card);
    }

    /// Records a price with an explicit creation time.
    pub async fn insert_price_component(&self, component: PriceComponent) {
        let mut state = self.state.write().await;
        state.next_price_id = state.next_price_id.max(component.id.as_i64());
        state.prices.append(component);
    }

    /// Makes every following commit fail before anything is written.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        self.state.write().await.fail_on_commit = fail;
    }

    /// Makes every following journal append fail.
    pub async fn set_fail_on_journal(&self, fail: bool) {
        self.state.write().await.fail_on_journal = fail;
    }

    /// Makes every following subscription or payment read fail.
    pub async fn set_fail_on_subscription_reads(&self, fail: bool) {
        self.state.write().await.fail_on_subscription_reads = fail;
    }

    pub async fn subscription_count(&self) -> usize {
        self.state.read().await.subscriptions.len()
    }

    pub async fn subscription_price_component_count(&self) -> usize {
        self.state.read().await.subscription_price_components.len()
    }

    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }

    pub async fn journal_entry_count(&self) -> usize {
        self.state.read().await.journal.len()
    }
}

#[async_trait]
impl BusinessRepository for InMemoryStore {
    async fn business(&self, business_id: BusinessId) -> Result<Business> {
        self.state
            .read()
            .await
            .businesses
            .get(&business_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Business", business_id))
    }

    async fn active_categories(&self, business_id: BusinessId) -> Result<Vec<Category>> {
        let state = self.state.read().await;
        Ok(state
            .active_category_ids(business_id)
            .iter()
            .filter_map(|id| state.categories.get(id).cloned())
            .collect())
    }

    async fn credit_card(&self, business_id: BusinessId) -> Result<Option<CreditCard>> {
        Ok(self.state.read().await.credit_cards.get(&business_id).cloned())
    }

    async fn plan(&self, plan_id: PlanId) -> Result<Plan> {
        self.state
            .read()
            .await
            .plans
            .get(&plan_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Plan", plan_id))
    }
}

#[async_trait]
impl PriceCatalog for InMemoryStore {
    async fn append_price_component(
        &self,
        category_id: CategoryId,
        location_id: LocationId,
        amount: Money,
    ) -> Result<PriceComponent> {
        let mut state = self.state.write().await;
        if !state.categories.contains_key(&category_id) {
            return Err(StoreError::not_found("Category", category_id));
        }
        if amount.is_negative() {
            return Err(StoreError::Validation(DomainError::NegativePrice {
                price_component_id: PriceComponentId::new(state.next_price_id + 1),
                cents: amount.cents(),
            }));
        }

        state.next_price_id += 1;
        let component = PriceComponent {
            id: PriceComponentId::new(state.next_price_id),
            category_id,
            location_id,
            amount,
            created_at: Utc::now(),
        };
        state.prices.append(component.clone());
        Ok(component)
    }

    async fn active_price_components(
        &self,
        categories: &[CategoryId],
        locations: &[LocationId],
    ) -> Result<Vec<PriceComponent>> {
        Ok(self.state.read().await.prices.active_for(categories, locations))
    }

    async fn price_history(&self, key: PriceKey) -> Result<Vec<PriceComponent>> {
        Ok(self.state.read().await.prices.history(&key).to_vec())
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn commit(&self, request: CommitRequest) -> Result<CommittedSubscription> {
        let mut state = self.state.write().await;

        if state.fail_on_commit {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }
        if !state.businesses.contains_key(&request.business_id) {
            return Err(StoreError::not_found("Business", request.business_id));
        }

        let active = state.active_category_ids(request.business_id);
        if let Some(input) = request
            .price_components
            .iter()
            .find(|input| !active.contains(&input.category_id))
        {
            return Err(StoreError::Validation(DomainError::ArchivedCategory(
                input.category_id,
            )));
        }

        let now = Utc::now();
        let records = request.into_records(now)?;

        // Nothing below can fail: the unit is applied whole.
        if let Some(card) = records.card_to_store {
            state.next_card_id += 1;
            let credit_card = CreditCard {
                id: CreditCardId::new(state.next_card_id),
                business_id: records.subscription.business_id,
                token: card.token,
                last_four: card.last_four,
                expiry_month: card.expiry_month,
                expiry_year: card.expiry_year,
                holder: card.holder,
                created_at: now,
            };
            state.credit_cards.insert(credit_card.business_id, credit_card);
        }

        let mut enrolled_host_program = false;
        if let Some(business) = state.businesses.get_mut(&records.subscription.business_id)
            && !business.is_host_program_member
        {
            business.is_host_program_member = true;
            enrolled_host_program = true;
        }

        state
            .subscriptions
            .insert(records.subscription.id, records.subscription.clone());
        state
            .subscription_price_components
            .extend(records.price_components.iter().cloned());
        state.payments.push(records.payment.clone());

        tracing::debug!(
            subscription_id = %records.subscription.id,
            price_components = records.price_components.len(),
            "subscription committed"
        );

        Ok(CommittedSubscription {
            subscription: records.subscription,
            price_components: records.price_components,
            payment: records.payment,
            enrolled_host_program,
        })
    }

    async fn update_next_renewal(
        &self,
        subscription_id: SubscriptionId,
        next_renewal_at: DateTime<Utc>,
    ) -> Result<Subscription> {
        let mut state = self.state.write().await;
        let subscription = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| StoreError::not_found("Subscription", subscription_id))?;
        subscription.reschedule_renewal(next_renewal_at)?;
        Ok(subscription.clone())
    }

    async fn subscription(&self, subscription_id: SubscriptionId) -> Result<Subscription> {
        let state = self.state.read().await;
        state.check_subscription_reads()?;
        state
            .subscriptions
            .get(&subscription_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Subscription", subscription_id))
    }

    async fn subscriptions_for_business(
        &self,
        business_id: BusinessId,
    ) -> Result<Vec<Subscription>> {
        let state = self.state.read().await;
        state.check_subscription_reads()?;
        let mut subscriptions: Vec<_> = state
            .subscriptions
            .values()
            .filter(|s| s.business_id == business_id)
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.created_at);
        Ok(subscriptions)
    }

    async fn subscription_price_components(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<SubscriptionPriceComponent>> {
        let state = self.state.read().await;
        state.check_subscription_reads()?;
        Ok(state
            .subscription_price_components
            .iter()
            .filter(|pc| pc.subscription_id == subscription_id)
            .cloned()
            .collect())
    }

    async fn payments_for_business(&self, business_id: BusinessId) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        state.check_subscription_reads()?;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.business_id == business_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SagaJournal for InMemoryStore {
    async fn append(&self, entries: Vec<JournalEntry>, options: AppendOptions) -> Result<Version> {
        validate_entries_for_append(&entries)?;

        let mut state = self.state.write().await;
        if state.fail_on_journal {
            return Err(StoreError::Unavailable("journal rejected".to_string()));
        }

        let saga_id = entries[0].saga_id;
        let current = state.journal_version(saga_id).unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current != expected
        {
            return Err(StoreError::ConcurrencyConflict {
                saga_id,
                expected,
                actual: current,
            });
        }

        // Unique (saga_id, version) simulation
        if entries[0].version <= current {
            return Err(StoreError::ConcurrencyConflict {
                saga_id,
                expected: options.expected_version.unwrap_or(current),
                actual: current,
            });
        }

        let last = entries.last().map(|e| e.version).unwrap_or(current);
        state.journal.extend(entries);
        Ok(last)
    }

    async fn load(&self, saga_id: SagaId) -> Result<Vec<JournalEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .journal
            .iter()
            .filter(|e| e.saga_id == saga_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.version);
        Ok(entries)
    }

    async fn saga_version(&self, saga_id: SagaId) -> Result<Option<Version>> {
        Ok(self.state.read().await.journal_version(saga_id))
    }
}
