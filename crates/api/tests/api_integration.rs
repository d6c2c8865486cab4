//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::{AppState, Services};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{BusinessId, CategoryId, LocationId, PlanId};
use domain::{BillingInterval, Business, Category, Money, Plan};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    InMemoryAlertSink, InMemoryCrmNotifier, InMemoryGateway, InMemoryLocationResolver, SagaConfig,
};
use store::{InMemoryStore, PriceCatalog};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const BUSINESS: BusinessId = BusinessId::new(1);
const CLEANING: CategoryId = CategoryId::new(10);
const SYDNEY: LocationId = LocationId::new(100);

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: Router,
    store: InMemoryStore,
    locations: InMemoryLocationResolver,
    gateway: InMemoryGateway,
    alerts: InMemoryAlertSink,
    crm: InMemoryCrmNotifier,
}

impl TestApp {
    async fn new() -> Self {
        let store = InMemoryStore::new();
        store
            .insert_business(Business::new(BUSINESS, "Fake Hairdresser"))
            .await;
        store.insert_category(Category::new(CLEANING, "Cleaning")).await;
        store.assign_category(BUSINESS, CLEANING).await;
        store
            .insert_plan(Plan {
                id: PlanId::new(1),
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
        let crm = InMemoryCrmNotifier::new();

        let services = Services {
            locations: Arc::new(locations.clone()),
            gateway: Arc::new(gateway.clone()),
            alerts: Arc::new(alerts.clone()),
            crm: Arc::new(crm.clone()),
        };
        let state = Arc::new(AppState::new(
            store.clone(),
            services,
            SagaConfig::default(),
        ));
        let app = api::create_app(state, get_metrics_handle());

        Self {
            app,
            store,
            locations,
            gateway,
            alerts,
            crm,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn json(
        &self,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
    }

    async fn purchase_with_new_card(&self) -> (StatusCode, serde_json::Value) {
        self.json(
            "POST",
            "/businesses/1/subscriptions",
            serde_json::json!({
                "plan_id": 1,
                "payment_method": {
                    "new_card": {
                        "number": "4111111111111111",
                        "expiry_month": 12,
                        "expiry_year": 2030,
                        "holder": "Jo Citizen",
                        "cvn": "123"
                    }
                }
            }),
        )
        .await
    }
}

fn assert_abort_notice(json: &serde_json::Value) {
    let message = json["message"].as_str().unwrap();
    assert!(message.contains("Subscription has not been created"));
    assert!(message.contains("payment has not been recorded"));
    assert!(message.contains("business has not been charged"));
}

#[tokio::test]
async fn test_health_check() {
    let t = TestApp::new().await;

    let (status, json) = t.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = TestApp::new().await;

    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_purchase_succeeds_and_journal_is_readable() {
    let t = TestApp::new().await;

    let (status, json) = t.purchase_with_new_card().await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["outcome"], "Succeeded");
    assert!(json["subscription_id"].as_str().is_some());
    assert!(
        json["message"]
            .as_str()
            .unwrap()
            .contains("a payment of $299.00 has been recorded")
    );
    assert_eq!(t.store.subscription_count().await, 1);
    assert_eq!(t.store.subscription_price_component_count().await, 1);

    let saga_id = json["saga_id"].as_str().unwrap();
    let (status, saga) = t.get(&format!("/sagas/{saga_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saga["stage"], "Succeeded");
    assert_eq!(saga["price_component_count"], 1);
    assert_eq!(saga["subscription_id"], json["subscription_id"]);
    assert_eq!(saga["needs_reconciliation"], false);
}

#[tokio::test]
async fn test_purchase_declined() {
    let t = TestApp::new().await;
    t.gateway.set_decline(Some("Do not honour"));

    let (status, json) = t.purchase_with_new_card().await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json["outcome"], "AbortedOnDecline");
    assert_eq!(json["failure"], "payment_declined");
    assert!(json.get("subscription_id").is_none());
    assert!(json["message"].as_str().unwrap().contains("Do not honour"));
    assert_abort_notice(&json);
    assert_eq!(t.store.payment_count().await, 0);
    assert_eq!(t.alerts.count(), 1);
}

#[tokio::test]
async fn test_purchase_location_fault() {
    let t = TestApp::new().await;
    t.locations.set_unavailable(true);

    let (status, json) = t.purchase_with_new_card().await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["outcome"], "AbortedBeforeCharge");
    assert_abort_notice(&json);
    assert_eq!(t.gateway.call_count(), 0);
}

#[tokio::test]
async fn test_purchase_commit_failure() {
    let t = TestApp::new().await;
    t.store.set_fail_on_commit(true).await;

    let (status, json) = t.purchase_with_new_card().await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["outcome"], "FailedAfterCharge");
    assert_abort_notice(&json);
    assert_eq!(t.store.subscription_count().await, 0);

    let saga_id = json["saga_id"].as_str().unwrap();
    let (_, saga) = t.get(&format!("/sagas/{saga_id}")).await;
    assert_eq!(saga["stage"], "FailedAfterCharge");
    assert_eq!(saga["needs_reconciliation"], true);
    assert!(saga["gateway_reference"].as_str().is_some());
}

#[tokio::test]
async fn test_purchase_unknown_business() {
    let t = TestApp::new().await;

    let (status, json) = t
        .json(
            "POST",
            "/businesses/999/subscriptions",
            serde_json::json!({ "plan_id": 1, "payment_method": { "on_file": true } }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("Business not found"));
    assert_eq!(t.gateway.call_count(), 0);
}

#[tokio::test]
async fn test_purchase_without_card_on_file() {
    let t = TestApp::new().await;

    let (status, _) = t
        .json(
            "POST",
            "/businesses/1/subscriptions",
            serde_json::json!({ "plan_id": 1, "payment_method": { "on_file": true } }),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_purchase_rejects_ambiguous_payment_method() {
    let t = TestApp::new().await;

    let (status, _) = t
        .json(
            "POST",
            "/businesses/1/subscriptions",
            serde_json::json!({ "plan_id": 1, "payment_method": {} }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_quote_shows_rrp() {
    let t = TestApp::new().await;

    let (status, json) = t.get("/businesses/1/subscriptions/new").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["rrp"], "$15.00");
    assert_eq!(json["rrp_cents"], 1500);
    assert_eq!(json["price_components"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_quote_reports_location_fault() {
    let t = TestApp::new().await;
    t.locations.set_unavailable(true);

    let (status, json) = t.get("/businesses/1/subscriptions/new").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["rrp"], "Error calculating RRP");
    assert!(json["rrp_cents"].is_null());
}

#[tokio::test]
async fn test_update_renewal_date() {
    let t = TestApp::new().await;
    let (_, purchase) = t.purchase_with_new_card().await;
    let subscription_id = purchase["subscription_id"].as_str().unwrap();

    let (status, json) = t
        .json(
            "PUT",
            &format!("/businesses/1/subscriptions/{subscription_id}"),
            serde_json::json!({ "next_renewal_at": "2031-12-20T00:00:00Z" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["next_renewal_at"].as_str().unwrap().starts_with("2031-12-20"));
    assert!(t.crm.wait_for(2, std::time::Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_update_renewal_unknown_subscription() {
    let t = TestApp::new().await;

    let (status, json) = t
        .json(
            "PUT",
            &format!("/businesses/1/subscriptions/{}", uuid::Uuid::new_v4()),
            serde_json::json!({ "next_renewal_at": "2031-12-20T00:00:00Z" }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        json["error"],
        "Something went wrong. Subscription has not been updated."
    );
}

#[tokio::test]
async fn test_saga_not_found() {
    let t = TestApp::new().await;

    let (status, _) = t.get(&format!("/sagas/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t.get("/sagas/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_renewal_store_fault_is_not_reported_as_missing() {
    let t = TestApp::new().await;
    let (_, purchase) = t.purchase_with_new_card().await;
    let subscription_id = purchase["subscription_id"].as_str().unwrap();
    t.store.set_fail_on_subscription_reads(true).await;

    let (status, json) = t
        .json(
            "PUT",
            &format!("/businesses/1/subscriptions/{subscription_id}"),
            serde_json::json!({ "next_renewal_at": "2031-12-20T00:00:00Z" }),
        )
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        json["error"],
        "Something went wrong. Subscription has not been updated."
    );
}

#[tokio::test]
async fn test_update_renewal_of_another_business_subscription() {
    let t = TestApp::new().await;
    let (_, purchase) = t.purchase_with_new_card().await;
    let subscription_id = purchase["subscription_id"].as_str().unwrap();

    let (status, _) = t
        .json(
            "PUT",
            &format!("/businesses/2/subscriptions/{subscription_id}"),
            serde_json::json!({ "next_renewal_at": "2031-12-20T00:00:00Z" }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_show_subscription_with_snapshots_and_payments() {
    let t = TestApp::new().await;
    let (_, purchase) = t.purchase_with_new_card().await;
    let subscription_id = purchase["subscription_id"].as_str().unwrap();

    let (status, json) = t
        .get(&format!("/businesses/1/subscriptions/{subscription_id}"))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["subscription"]["id"], subscription_id);
    assert_eq!(json["subscription"]["business_id"], 1);
    assert_eq!(json["subscription"]["amount_cents"], 29900);

    let components = json["price_components"].as_array().unwrap();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0]["category_id"], 10);
    assert_eq!(components[0]["location_id"], 100);
    assert_eq!(components[0]["amount_cents"], 1500);

    let payments = json["payments"].as_array().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["amount_cents"], 29900);
    assert!(!payments[0]["gateway_reference"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_show_subscription_of_another_business_is_not_found() {
    let t = TestApp::new().await;
    let (_, purchase) = t.purchase_with_new_card().await;
    let subscription_id = purchase["subscription_id"].as_str().unwrap();

    let (status, _) = t
        .get(&format!("/businesses/2/subscriptions/{subscription_id}"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t
        .get(&format!("/businesses/1/subscriptions/{}", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_show_subscription_store_fault() {
    let t = TestApp::new().await;
    let (_, purchase) = t.purchase_with_new_card().await;
    let subscription_id = purchase["subscription_id"].as_str().unwrap();
    t.store.set_fail_on_subscription_reads(true).await;

    let (status, _) = t
        .get(&format!("/businesses/1/subscriptions/{subscription_id}"))
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
