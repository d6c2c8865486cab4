//! HTTP API server for subscription purchases.
//!
//! Exposes the purchase saga, the price preview, subscription details,
//! renewal date changes and the saga journal, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    AlertSink, CrmNotifier, InMemoryAlertSink, InMemoryCrmNotifier, InMemoryGateway,
    InMemoryLocationResolver, LocationResolver, PaymentGateway, RenewalService, SagaConfig,
    SubscriptionSaga,
};
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// The purchase saga with its collaborators behind trait objects.
pub type PurchaseSaga<S> = SubscriptionSaga<
    S,
    Arc<dyn LocationResolver>,
    Arc<dyn PaymentGateway>,
    Arc<dyn AlertSink>,
    Arc<dyn CrmNotifier>,
>;

/// External collaborators the handlers depend on.
#[derive(Clone)]
pub struct Services {
    pub locations: Arc<dyn LocationResolver>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub alerts: Arc<dyn AlertSink>,
    pub crm: Arc<dyn CrmNotifier>,
}

impl Services {
    /// In-memory doubles for every collaborator.
    pub fn in_memory() -> Self {
        Self {
            locations: Arc::new(InMemoryLocationResolver::new()),
            gateway: Arc::new(InMemoryGateway::new()),
            alerts: Arc::new(InMemoryAlertSink::new()),
            crm: Arc::new(InMemoryCrmNotifier::new()),
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store + Clone + 'static> {
    pub saga: PurchaseSaga<S>,
    pub renewals: RenewalService<S, Arc<dyn CrmNotifier>>,
    pub store: S,
}

impl<S: Store + Clone + 'static> AppState<S> {
    pub fn new(store: S, services: Services, config: SagaConfig) -> Self {
        let saga = SubscriptionSaga::new(
            store.clone(),
            services.locations,
            services.gateway,
            services.alerts,
            services.crm.clone(),
            config,
        );
        let renewals = RenewalService::new(store.clone(), services.crm);
        Self {
            saga,
            renewals,
            store,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/businesses/{id}/subscriptions",
            post(routes::subscriptions::purchase::<S>),
        )
        .route(
            "/businesses/{id}/subscriptions/new",
            get(routes::subscriptions::quote::<S>),
        )
        .route(
            "/businesses/{id}/subscriptions/{subscription_id}",
            get(routes::subscriptions::show::<S>).put(routes::subscriptions::update_renewal::<S>),
        )
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
