use common::{BusinessId, CategoryId, LocationId, PlanId, SagaId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{BillingInterval, Business, Category, CommitRequest, Money, Plan, SubscriptionPriceComponentInput};
use store::{
    AppendOptions, InMemoryStore, JournalEntry, PriceCatalog, SagaJournal, SubscriptionStore,
    Version,
};

const BUSINESS: BusinessId = BusinessId::new(1);

async fn seeded_store(categories: i64) -> (InMemoryStore, Vec<SubscriptionPriceComponentInput>) {
    let store = InMemoryStore::new();
    store.insert_business(Business::new(BUSINESS, "Bench Business")).await;

    let mut inputs = Vec::new();
    for id in 1..=categories {
        let category_id = CategoryId::new(id);
        store.insert_category(Category::new(category_id, format!("Category {id}"))).await;
        store.assign_category(BUSINESS, category_id).await;
        let component = store
            .append_price_component(category_id, LocationId::new(1), Money::from_cents(100 * id))
            .await
            .unwrap();
        inputs.push(SubscriptionPriceComponentInput::snapshot(&component));
    }
    (store, inputs)
}

fn request(inputs: Vec<SubscriptionPriceComponentInput>) -> CommitRequest {
    CommitRequest {
        business_id: BUSINESS,
        plan: Plan {
            id: PlanId::new(1),
            name: "Host program".to_string(),
            price: Money::from_dollars(299),
            interval: BillingInterval::Yearly,
        },
        amount: Money::from_dollars(299),
        price_components: inputs,
        gateway_reference: "BENCH".to_string(),
        card_to_store: None,
    }
}

fn bench_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, inputs) = rt.block_on(seeded_store(10));

    c.bench_function("store/commit_10_price_components", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.commit(request(inputs.clone())).await.unwrap();
            });
        });
    });
}

fn bench_active_prices(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, _) = rt.block_on(seeded_store(50));
    let categories: Vec<_> = (1..=50).map(CategoryId::new).collect();

    c.bench_function("store/active_price_components_50", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .active_price_components(&categories, &[LocationId::new(1)])
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_journal_append(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();

    c.bench_function("store/journal_append_batch_8", |b| {
        b.iter(|| {
            rt.block_on(async {
                let saga_id = SagaId::new();
                let entries: Vec<_> = (1..=8)
                    .map(|v| {
                        JournalEntry::builder()
                            .saga_id(saga_id)
                            .saga_type("SubscriptionPurchase")
                            .event_type("StepStarted")
                            .version(Version::new(v))
                            .payload_raw(serde_json::json!({"step": "charge_payment"}))
                            .build()
                            .unwrap()
                    })
                    .collect();
                SagaJournal::append(&store, entries, AppendOptions::expect_new())
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_commit, bench_active_prices, bench_journal_append);
criterion_main!(benches);
