//! Saga pattern implementation for subscription purchases.
//!
//! A purchase spans a payment gateway that cannot take part in a database
//! transaction, so it runs as a saga:
//! 1. Resolve pricing (no side effects)
//! 2. Charge the payment method
//! 3. Commit subscription, price snapshots and payment in one transaction
//!
//! Every run ends in a [`PurchaseOutcome`]. Failures raise operator alerts,
//! and a success hands a sync request to the CRM without waiting for it.

pub mod aggregate;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod outcome;
pub mod pricing;
pub mod renewal;
pub mod services;
pub mod state;
pub mod subscription_purchase;

pub use aggregate::SagaInstance;
pub use config::SagaConfig;
pub use coordinator::SubscriptionSaga;
pub use error::{ChargeError, CrmError, GatewayError, LocationError, PricingError, SagaError};
pub use events::SagaEvent;
pub use outcome::{ABORT_NOTICE, PurchaseFailure, PurchaseOutcome, PurchaseResult};
pub use pricing::{PricingResolver, RRP_UNAVAILABLE};
pub use renewal::RenewalService;
pub use services::{
    AlertEvent, AlertKind, AlertSink, ChannelCrmNotifier, ChargeInstruction, CrmNotifier, CrmSync,
    GatewayCharge, GatewayResult, InMemoryAlertSink, InMemoryCrmNotifier, InMemoryGateway,
    InMemoryLocationResolver, LocationResolver, PaymentGateway, PaymentGatewayClient,
    RestPaymentGateway, SearchLocationResolver, Severity, StoreCardResponse, TracingAlertSink,
};
pub use state::SagaStage;
pub use subscription_purchase::{PaymentMethod, PurchaseRequest};
