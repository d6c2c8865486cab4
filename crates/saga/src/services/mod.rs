//! External collaborators of the purchase saga: traits, production adapters
//! and in-memory implementations.

pub mod alerting;
pub mod crm;
pub mod gateway;
pub mod location;
pub mod rest_gateway;

pub use alerting::{AlertEvent, AlertKind, AlertSink, InMemoryAlertSink, Severity, TracingAlertSink};
pub use crm::{ChannelCrmNotifier, CrmNotifier, CrmSync, InMemoryCrmNotifier};
pub use gateway::{
    ChargeInstruction, GatewayCharge, GatewayResult, InMemoryGateway, PaymentGateway,
    PaymentGatewayClient, StoreCardResponse,
};
pub use location::{InMemoryLocationResolver, LocationResolver, SearchLocationResolver};
pub use rest_gateway::RestPaymentGateway;
