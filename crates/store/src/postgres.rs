use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    BusinessId, CategoryId, CreditCardId, LocationId, PaymentId, PlanId, PriceComponentId, SagaId,
    SubscriptionId,
};
use domain::{
    BillingInterval, Business, Category, CommitRequest, CommittedSubscription, CreditCard,
    DomainError, Money, Payment, PaymentState, Plan, PriceComponent, PriceKey, Subscription,
    SubscriptionPriceComponent, SubscriptionState,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::journal::validate_entries_for_append;
use crate::store::{BusinessRepository, PriceCatalog, SagaJournal, SubscriptionStore};
use crate::{AppendOptions, JournalEntry, Result, StoreError, Version};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_price_component(row: PgRow) -> Result<PriceComponent> {
        Ok(PriceComponent {
            id: PriceComponentId::new(row.try_get("id")?),
            category_id: CategoryId::new(row.try_get("category_id")?),
            location_id: LocationId::new(row.try_get("location_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_subscription(row: PgRow) -> Result<Subscription> {
        let state: String = row.try_get("state")?;
        let state = SubscriptionState::parse(&state).ok_or(StoreError::Corrupt {
            column: "subscriptions.state",
            value: state,
        })?;

        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            business_id: BusinessId::new(row.try_get("business_id")?),
            plan_id: PlanId::new(row.try_get("plan_id")?),
            state,
            amount: Money::from_cents(row.try_get("amount_cents")?),
            next_renewal_at: row.try_get("next_renewal_at")?,
            created_at: row.try_get("created_at")?,
            activated_at: row.try_get("activated_at")?,
        })
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let state: String = row.try_get("current_state")?;
        let current_state = PaymentState::parse(&state).ok_or(StoreError::Corrupt {
            column: "payments.current_state",
            value: state,
        })?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            business_id: BusinessId::new(row.try_get("business_id")?),
            subscription_id: row
                .try_get::<Option<Uuid>, _>("subscription_id")?
                .map(SubscriptionId::from_uuid),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            current_state,
            gateway_reference: row.try_get("gateway_reference")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_credit_card(row: PgRow) -> Result<CreditCard> {
        Ok(CreditCard {
            id: CreditCardId::new(row.try_get("id")?),
            business_id: BusinessId::new(row.try_get("business_id")?),
            token: row.try_get("token")?,
            last_four: row.try_get("last_four")?,
            expiry_month: row.try_get::<i32, _>("expiry_month")? as u32,
            expiry_year: row.try_get("expiry_year")?,
            holder: row.try_get("holder")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_entry(row: PgRow) -> Result<JournalEntry> {
        Ok(JournalEntry {
            entry_id: row.try_get("id")?,
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            saga_type: row.try_get("saga_type")?,
            event_type: row.try_get("event_type")?,
            version: Version::new(row.try_get("version")?),
            recorded_at: row.try_get("recorded_at")?,
            payload: row.try_get("payload")?,
        })
    }

    /// Locks the business row for the rest of the transaction and returns
    /// its host-program flag.
    async fn lock_business(
        tx: &mut Transaction<'_, Postgres>,
        business_id: BusinessId,
    ) -> Result<bool> {
        sqlx::query_scalar("SELECT is_host_program_member FROM businesses WHERE id = $1 FOR UPDATE")
            .bind(business_id.as_i64())
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::not_found("Business", business_id))
    }

    async fn active_category_ids(
        executor: impl sqlx::PgExecutor<'_>,
        business_id: BusinessId,
    ) -> Result<HashSet<CategoryId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT c.id
            FROM business_categories bc
            JOIN categories c ON c.id = bc.category_id
            WHERE bc.business_id = $1 AND NOT c.archived
            "#,
        )
        .bind(business_id.as_i64())
        .fetch_all(executor)
        .await?;

        Ok(ids.into_iter().map(CategoryId::new).collect())
    }
}

fn map_unique_violation(e: sqlx::Error, constraint: &str, message: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.constraint() == Some(constraint)
    {
        return StoreError::Conflict(message());
    }
    StoreError::Database(e)
}

#[async_trait]
impl BusinessRepository for PostgresStore {
    async fn business(&self, business_id: BusinessId) -> Result<Business> {
        let row = sqlx::query("SELECT id, name, is_host_program_member FROM businesses WHERE id = $1")
            .bind(business_id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("Business", business_id))?;

        Ok(Business {
            id: BusinessId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            is_host_program_member: row.try_get("is_host_program_member")?,
        })
    }

    async fn active_categories(&self, business_id: BusinessId) -> Result<Vec<Category>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.name, c.archived
            FROM business_categories bc
            JOIN categories c ON c.id = bc.category_id
            WHERE bc.business_id = $1 AND NOT c.archived
            ORDER BY c.id
            "#,
        )
        .bind(business_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Category {
                    id: CategoryId::new(row.try_get("id")?),
                    name: row.try_get("name")?,
                    archived: row.try_get("archived")?,
                })
            })
            .collect()
    }

    async fn credit_card(&self, business_id: BusinessId) -> Result<Option<CreditCard>> {
        let row = sqlx::query(
            r#"
            SELECT id, business_id, token, last_four, expiry_month, expiry_year, holder, created_at
            FROM credit_cards
            WHERE business_id = $1
            "#,
        )
        .bind(business_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_credit_card).transpose()
    }

    async fn plan(&self, plan_id: PlanId) -> Result<Plan> {
        let row = sqlx::query("SELECT id, name, price_cents, billing_interval FROM plans WHERE id = $1")
            .bind(plan_id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("Plan", plan_id))?;

        let interval: String = row.try_get("billing_interval")?;
        Ok(Plan {
            id: PlanId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            interval: BillingInterval::parse(&interval).ok_or(StoreError::Corrupt {
                column: "plans.billing_interval",
                value: interval,
            })?,
        })
    }
}

#[async_trait]
impl PriceCatalog for PostgresStore {
    async fn append_price_component(
        &self,
        category_id: CategoryId,
        location_id: LocationId,
        amount: Money,
    ) -> Result<PriceComponent> {
        let row = sqlx::query(
            r#"
            INSERT INTO price_components (category_id, location_id, amount_cents)
            VALUES ($1, $2, $3)
            RETURNING id, category_id, location_id, amount_cents, created_at
            "#,
        )
        .bind(category_id.as_i64())
        .bind(location_id.as_i64())
        .bind(amount.cents())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_price_component(row)
    }

    async fn active_price_components(
        &self,
        categories: &[CategoryId],
        locations: &[LocationId],
    ) -> Result<Vec<PriceComponent>> {
        if categories.is_empty() || locations.is_empty() {
            return Ok(Vec::new());
        }

        let category_ids: Vec<i64> = categories.iter().map(CategoryId::as_i64).collect();
        let location_ids: Vec<i64> = locations.iter().map(LocationId::as_i64).collect();

        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (category_id, location_id)
                id, category_id, location_id, amount_cents, created_at
            FROM price_components
            WHERE category_id = ANY($1) AND location_id = ANY($2)
            ORDER BY category_id, location_id, created_at DESC, id DESC
            "#,
        )
        .bind(category_ids)
        .bind(location_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_price_component).collect()
    }

    async fn price_history(&self, key: PriceKey) -> Result<Vec<PriceComponent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, category_id, location_id, amount_cents, created_at
            FROM price_components
            WHERE category_id = $1 AND location_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(key.category_id.as_i64())
        .bind(key.location_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_price_component).collect()
    }
}

#[async_trait]
impl SubscriptionStore for PostgresStore {
    async fn commit(&self, request: CommitRequest) -> Result<CommittedSubscription> {
        let business_id = request.business_id;
        let snapshot_categories: Vec<CategoryId> = request
            .price_components
            .iter()
            .map(|input| input.category_id)
            .collect();
        let records = request.into_records(Utc::now())?;

        // Dropping the transaction on an early return rolls everything back.
        let mut tx = self.pool.begin().await?;

        let already_member = Self::lock_business(&mut tx, business_id).await?;

        let active = Self::active_category_ids(&mut *tx, business_id).await?;
        if let Some(category_id) = snapshot_categories
            .into_iter()
            .find(|id| !active.contains(id))
        {
            return Err(DomainError::ArchivedCategory(category_id).into());
        }

        let subscription = &records.subscription;
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, business_id, plan_id, state, amount_cents, next_renewal_at, created_at, activated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.business_id.as_i64())
        .bind(subscription.plan_id.as_i64())
        .bind(subscription.state.as_str())
        .bind(subscription.amount.cents())
        .bind(subscription.next_renewal_at)
        .bind(subscription.created_at)
        .bind(subscription.activated_at)
        .execute(&mut *tx)
        .await?;

        for component in &records.price_components {
            sqlx::query(
                r#"
                INSERT INTO subscription_price_components (subscription_id, category_id, location_id, price_component_id, amount_cents, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(component.subscription_id.as_uuid())
            .bind(component.category_id.as_i64())
            .bind(component.location_id.as_i64())
            .bind(component.price_component_id.as_i64())
            .bind(component.amount.cents())
            .bind(component.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                map_unique_violation(e, "unique_subscription_pair", || {
                    format!(
                        "subscription {} already has a price for category {} at location {}",
                        component.subscription_id, component.category_id, component.location_id
                    )
                })
            })?;
        }

        let payment = &records.payment;
        sqlx::query(
            r#"
            INSERT INTO payments (id, business_id, subscription_id, amount_cents, current_state, gateway_reference, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.business_id.as_i64())
        .bind(payment.subscription_id.map(|id| id.as_uuid()))
        .bind(payment.amount.cents())
        .bind(payment.current_state.as_str())
        .bind(&payment.gateway_reference)
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(card) = &records.card_to_store {
            sqlx::query(
                r#"
                INSERT INTO credit_cards (business_id, token, last_four, expiry_month, expiry_year, holder)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (business_id) DO UPDATE SET
                    token = EXCLUDED.token,
                    last_four = EXCLUDED.last_four,
                    expiry_month = EXCLUDED.expiry_month,
                    expiry_year = EXCLUDED.expiry_year,
                    holder = EXCLUDED.holder,
                    created_at = NOW()
                "#,
            )
            .bind(business_id.as_i64())
            .bind(&card.token)
            .bind(&card.last_four)
            .bind(card.expiry_month as i32)
            .bind(card.expiry_year)
            .bind(&card.holder)
            .execute(&mut *tx)
            .await?;
        }

        if !already_member {
            sqlx::query("UPDATE businesses SET is_host_program_member = TRUE WHERE id = $1")
                .bind(business_id.as_i64())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            subscription_id = %records.subscription.id,
            price_components = records.price_components.len(),
            "subscription committed"
        );

        Ok(CommittedSubscription {
            subscription: records.subscription,
            price_components: records.price_components,
            payment: records.payment,
            enrolled_host_program: !already_member,
        })
    }

    async fn update_next_renewal(
        &self,
        subscription_id: SubscriptionId,
        next_renewal_at: DateTime<Utc>,
    ) -> Result<Subscription> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, business_id, plan_id, state, amount_cents, next_renewal_at, created_at, activated_at
            FROM subscriptions
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(subscription_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::not_found("Subscription", subscription_id))?;

        let mut subscription = Self::row_to_subscription(row)?;
        subscription.reschedule_renewal(next_renewal_at)?;

        sqlx::query("UPDATE subscriptions SET next_renewal_at = $2 WHERE id = $1")
            .bind(subscription_id.as_uuid())
            .bind(subscription.next_renewal_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(subscription)
    }

    async fn subscription(&self, subscription_id: SubscriptionId) -> Result<Subscription> {
        let row = sqlx::query(
            r#"
            SELECT id, business_id, plan_id, state, amount_cents, next_renewal_at, created_at, activated_at
            FROM subscriptions
            WHERE id = $1
            "#,
        )
        .bind(subscription_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("Subscription", subscription_id))?;

        Self::row_to_subscription(row)
    }

    async fn subscriptions_for_business(
        &self,
        business_id: BusinessId,
    ) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT id, business_id, plan_id, state, amount_cents, next_renewal_at, created_at, activated_at
            FROM subscriptions
            WHERE business_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(business_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_subscription).collect()
    }

    async fn subscription_price_components(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<SubscriptionPriceComponent>> {
        let rows = sqlx::query(
            r#"
            SELECT subscription_id, category_id, location_id, price_component_id, amount_cents, created_at
            FROM subscription_price_components
            WHERE subscription_id = $1
            ORDER BY category_id, location_id
            "#,
        )
        .bind(subscription_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(SubscriptionPriceComponent {
                    subscription_id: SubscriptionId::from_uuid(
                        row.try_get::<Uuid, _>("subscription_id")?,
                    ),
                    category_id: CategoryId::new(row.try_get("category_id")?),
                    location_id: LocationId::new(row.try_get("location_id")?),
                    price_component_id: PriceComponentId::new(row.try_get("price_component_id")?),
                    amount: Money::from_cents(row.try_get("amount_cents")?),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn payments_for_business(&self, business_id: BusinessId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, business_id, subscription_id, amount_cents, current_state, gateway_reference, created_at
            FROM payments
            WHERE business_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(business_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }
}

#[async_trait]
impl SagaJournal for PostgresStore {
    async fn append(&self, entries: Vec<JournalEntry>, options: AppendOptions) -> Result<Version> {
        validate_entries_for_append(&entries)?;

        let saga_id = entries[0].saga_id;
        let mut tx = self.pool.begin().await?;

        if let Some(expected) = options.expected_version {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT MAX(version) FROM saga_journal WHERE saga_id = $1")
                    .bind(saga_id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await?;

            let actual = Version::new(current.unwrap_or(0));
            if actual != expected {
                return Err(StoreError::ConcurrencyConflict {
                    saga_id,
                    expected,
                    actual,
                });
            }
        }

        let mut last_version = Version::initial();
        for entry in &entries {
            sqlx::query(
                r#"
                INSERT INTO saga_journal (id, saga_id, saga_type, event_type, version, recorded_at, payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(entry.entry_id)
            .bind(entry.saga_id.as_uuid())
            .bind(&entry.saga_type)
            .bind(&entry.event_type)
            .bind(entry.version.as_i64())
            .bind(entry.recorded_at)
            .bind(&entry.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_saga_version")
                {
                    return StoreError::ConcurrencyConflict {
                        saga_id,
                        expected: options.expected_version.unwrap_or(Version::initial()),
                        actual: entry.version,
                    };
                }
                StoreError::Database(e)
            })?;

            last_version = entry.version;
        }

        tx.commit().await?;
        Ok(last_version)
    }

    async fn load(&self, saga_id: SagaId) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, saga_id, saga_type, event_type, version, recorded_at, payload
            FROM saga_journal
            WHERE saga_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn saga_version(&self, saga_id: SagaId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM saga_journal WHERE saga_id = $1")
                .bind(saga_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }
}
