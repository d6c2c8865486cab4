use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BusinessId, CategoryId, LocationId, PlanId, SagaId, SubscriptionId};
use domain::{
    Business, Category, CommitRequest, CommittedSubscription, CreditCard, Money, Payment, Plan,
    PriceComponent, PriceKey, Subscription, SubscriptionPriceComponent,
};

use crate::{AppendOptions, JournalEntry, Result, Version};

/// Read access to businesses and the records they reference.
///
/// Businesses, categories and plans are owned by the wider platform; this
/// core only reads them.
#[async_trait]
pub trait BusinessRepository: Send + Sync {
    /// Loads a business. Fails with `NotFound` if it does not exist.
    async fn business(&self, business_id: BusinessId) -> Result<Business>;

    /// Returns the business's non-archived categories.
    async fn active_categories(&self, business_id: BusinessId) -> Result<Vec<Category>>;

    /// Returns the card on file, if the business has one.
    async fn credit_card(&self, business_id: BusinessId) -> Result<Option<CreditCard>>;

    /// Loads a plan. Fails with `NotFound` if it does not exist.
    async fn plan(&self, plan_id: PlanId) -> Result<Plan>;
}

/// The append-only price catalog.
#[async_trait]
pub trait PriceCatalog: Send + Sync {
    /// Records a new price for a pair. Earlier prices are kept as history.
    async fn append_price_component(
        &self,
        category_id: CategoryId,
        location_id: LocationId,
        amount: Money,
    ) -> Result<PriceComponent>;

    /// Returns the active component of every priced pair in the
    /// cross-product of `categories` and `locations`.
    async fn active_price_components(
        &self,
        categories: &[CategoryId],
        locations: &[LocationId],
    ) -> Result<Vec<PriceComponent>>;

    /// Returns every component recorded for a pair, oldest first.
    async fn price_history(&self, key: PriceKey) -> Result<Vec<PriceComponent>>;
}

/// Subscriptions and the records committed with them.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Persists a charged purchase as one atomic unit.
    ///
    /// Writes the active subscription, its price snapshots, the successful
    /// payment and the card on file (when one was tokenized), and enrolls the
    /// business in the host program. On any error nothing is written.
    async fn commit(&self, request: CommitRequest) -> Result<CommittedSubscription>;

    /// Moves the renewal date of an active subscription.
    async fn update_next_renewal(
        &self,
        subscription_id: SubscriptionId,
        next_renewal_at: DateTime<Utc>,
    ) -> Result<Subscription>;

    async fn subscription(&self, subscription_id: SubscriptionId) -> Result<Subscription>;

    async fn subscriptions_for_business(&self, business_id: BusinessId)
    -> Result<Vec<Subscription>>;

    async fn subscription_price_components(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<SubscriptionPriceComponent>>;

    async fn payments_for_business(&self, business_id: BusinessId) -> Result<Vec<Payment>>;
}

/// Event-sourced record of saga runs.
#[async_trait]
pub trait SagaJournal: Send + Sync {
    /// Appends entries for one saga.
    ///
    /// Entries are appended atomically. If `options.expected_version` is set
    /// and does not match, the append fails with `ConcurrencyConflict`.
    /// Returns the saga's new version.
    async fn append(&self, entries: Vec<JournalEntry>, options: AppendOptions) -> Result<Version>;

    /// Returns a saga's entries in version order.
    async fn load(&self, saga_id: SagaId) -> Result<Vec<JournalEntry>>;

    /// Returns the current version, or None for an unknown saga.
    async fn saga_version(&self, saga_id: SagaId) -> Result<Option<Version>>;
}

/// Everything the purchase saga needs from persistence.
pub trait Store: BusinessRepository + PriceCatalog + SubscriptionStore + SagaJournal {}

impl<T> Store for T where T: BusinessRepository + PriceCatalog + SubscriptionStore + SagaJournal {}
