//! Subscription purchase, price quote, detail and renewal endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{BusinessId, PlanId, SubscriptionId};
use domain::{CardDetails, Money, Payment, Subscription, SubscriptionPriceComponent};
use saga::{
    PaymentMethod, PricingError, PurchaseFailure, PurchaseOutcome, PurchaseRequest, RRP_UNAVAILABLE,
    SagaError,
};
use serde::{Deserialize, Serialize};
use store::{Store, StoreError};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct PurchaseBody {
    pub plan_id: PlanId,
    /// Overrides the plan price when set.
    #[serde(default)]
    pub amount_cents: Option<i64>,
    pub payment_method: PaymentMethodBody,
}

/// Either `{"new_card": {...}}` or `{"on_file": true}`.
#[derive(Deserialize)]
pub struct PaymentMethodBody {
    #[serde(default)]
    pub new_card: Option<CardDetails>,
    #[serde(default)]
    pub on_file: bool,
}

impl PaymentMethodBody {
    fn into_payment_method(self) -> Result<PaymentMethod, ApiError> {
        match (self.new_card, self.on_file) {
            (Some(card), false) => Ok(PaymentMethod::NewCard(card)),
            (None, true) => Ok(PaymentMethod::CardOnFile),
            _ => Err(ApiError::BadRequest(
                "payment_method must be either new_card or on_file".to_string(),
            )),
        }
    }
}

#[derive(Deserialize)]
pub struct RenewalBody {
    pub next_renewal_at: DateTime<Utc>,
}

// -- Response types --

#[derive(Serialize)]
pub struct PurchaseResponse {
    pub saga_id: String,
    pub outcome: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<&'static str>,
}

#[derive(Serialize)]
pub struct QuoteResponse {
    pub business_id: i64,
    /// Formatted RRP, or the pricing error notice.
    pub rrp: String,
    pub rrp_cents: Option<i64>,
    pub price_components: Vec<PriceComponentResponse>,
}

#[derive(Serialize)]
pub struct PriceComponentResponse {
    pub category_id: i64,
    pub location_id: i64,
    pub price_component_id: i64,
    pub amount_cents: i64,
}

#[derive(Serialize)]
pub struct SubscriptionResponse {
    pub id: String,
    pub business_id: i64,
    pub plan_id: i64,
    pub state: &'static str,
    pub amount_cents: i64,
    pub next_renewal_at: String,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(subscription: Subscription) -> Self {
        Self {
            id: subscription.id.to_string(),
            business_id: subscription.business_id.as_i64(),
            plan_id: subscription.plan_id.as_i64(),
            state: subscription.state.as_str(),
            amount_cents: subscription.amount.cents(),
            next_renewal_at: subscription.next_renewal_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct SubscriptionDetailResponse {
    pub subscription: SubscriptionResponse,
    pub price_components: Vec<PriceComponentResponse>,
    pub payments: Vec<PaymentResponse>,
}

impl From<SubscriptionPriceComponent> for PriceComponentResponse {
    fn from(component: SubscriptionPriceComponent) -> Self {
        Self {
            category_id: component.category_id.as_i64(),
            location_id: component.location_id.as_i64(),
            price_component_id: component.price_component_id.as_i64(),
            amount_cents: component.amount.cents(),
        }
    }
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub amount_cents: i64,
    pub state: &'static str,
    pub gateway_reference: String,
    pub created_at: String,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id.to_string(),
            amount_cents: payment.amount.cents(),
            state: payment.current_state.as_str(),
            gateway_reference: payment.gateway_reference,
            created_at: payment.created_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /businesses/{id}/subscriptions: run a purchase saga.
#[tracing::instrument(skip(state, body))]
pub async fn purchase<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(business_id): Path<i64>,
    Json(body): Json<PurchaseBody>,
) -> Result<(StatusCode, Json<PurchaseResponse>), ApiError> {
    let payment_method = body.payment_method.into_payment_method()?;
    let mut request = PurchaseRequest::new(BusinessId::new(business_id), body.plan_id, payment_method);
    if let Some(cents) = body.amount_cents {
        request = request.with_amount(Money::from_cents(cents));
    }

    let result = state.saga.execute(request).await?;
    let message = result.message();

    let response = PurchaseResponse {
        saga_id: result.saga_id.to_string(),
        outcome: result.outcome.as_str(),
        message,
        subscription_id: result
            .outcome
            .committed()
            .map(|committed| committed.subscription.id.to_string()),
        failure: result.outcome.failure().map(PurchaseFailure::as_str),
    };

    Ok((status_for(&result.outcome), Json(response)))
}

fn status_for(outcome: &PurchaseOutcome) -> StatusCode {
    match outcome {
        PurchaseOutcome::Succeeded(_) => StatusCode::CREATED,
        PurchaseOutcome::FailedAfterCharge(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PurchaseOutcome::AbortedBeforeCharge(failure) | PurchaseOutcome::AbortedOnDecline(failure) => {
            match failure {
                PurchaseFailure::PaymentDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
                PurchaseFailure::PricingValidation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                PurchaseFailure::LocationServiceUnavailable { .. }
                | PurchaseFailure::GatewayUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                PurchaseFailure::CommitFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }
}

/// GET /businesses/{id}/subscriptions/new: price preview for the purchase form.
///
/// A location fault still answers 200 with the RRP replaced by a notice.
#[tracing::instrument(skip(state))]
pub async fn quote<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(business_id): Path<i64>,
) -> Result<Json<QuoteResponse>, ApiError> {
    let business_id = BusinessId::new(business_id);
    state.store.business(business_id).await?;

    let quote = match state.saga.pricing().quote(business_id).await {
        Ok(quote) => quote,
        Err(PricingError::LocationServiceUnavailable(e)) => {
            tracing::warn!(%business_id, error = %e, "quote without location data");
            return Ok(Json(QuoteResponse {
                business_id: business_id.as_i64(),
                rrp: RRP_UNAVAILABLE.to_string(),
                rrp_cents: None,
                price_components: Vec::new(),
            }));
        }
        Err(PricingError::Validation(e)) => return Err(ApiError::Saga(SagaError::Domain(e))),
        Err(PricingError::Catalog(e)) => return Err(ApiError::Store(e)),
    };

    Ok(Json(QuoteResponse {
        business_id: business_id.as_i64(),
        rrp: quote.rrp.to_string(),
        rrp_cents: Some(quote.rrp.cents()),
        price_components: quote
            .price_components
            .iter()
            .map(|input| PriceComponentResponse {
                category_id: input.category_id.as_i64(),
                location_id: input.location_id.as_i64(),
                price_component_id: input.price_component_id.as_i64(),
                amount_cents: input.amount.cents(),
            })
            .collect(),
    }))
}

/// GET /businesses/{id}/subscriptions/{subscription_id}: a subscription with
/// its price snapshots and payments.
#[tracing::instrument(skip(state))]
pub async fn show<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((business_id, subscription_id)): Path<(i64, String)>,
) -> Result<Json<SubscriptionDetailResponse>, ApiError> {
    let subscription_id = parse_subscription_id(&subscription_id)?;
    let not_found = || ApiError::NotFound(format!("Subscription not found: {subscription_id}"));

    let subscription = match state.store.subscription(subscription_id).await {
        Ok(subscription) => subscription,
        Err(StoreError::NotFound { .. }) => return Err(not_found()),
        Err(e) => return Err(ApiError::Store(e)),
    };
    if subscription.business_id.as_i64() != business_id {
        return Err(not_found());
    }

    let price_components = state
        .store
        .subscription_price_components(subscription_id)
        .await?;
    let payments = state
        .store
        .payments_for_business(subscription.business_id)
        .await?
        .into_iter()
        .filter(|payment| payment.subscription_id == Some(subscription_id))
        .map(PaymentResponse::from)
        .collect();

    Ok(Json(SubscriptionDetailResponse {
        subscription: subscription.into(),
        price_components: price_components.into_iter().map(Into::into).collect(),
        payments,
    }))
}

/// PUT /businesses/{id}/subscriptions/{subscription_id}: move the renewal date.
#[tracing::instrument(skip(state, body))]
pub async fn update_renewal<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((business_id, subscription_id)): Path<(i64, String)>,
    Json(body): Json<RenewalBody>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription_id = parse_subscription_id(&subscription_id)?;

    let not_found =
        || ApiError::RenewalNotUpdated(SagaError::SubscriptionNotFound(subscription_id));
    let subscription = match state.store.subscription(subscription_id).await {
        Ok(subscription) => subscription,
        Err(StoreError::NotFound { .. }) => return Err(not_found()),
        Err(e) => return Err(ApiError::RenewalNotUpdated(SagaError::Store(e))),
    };
    if subscription.business_id.as_i64() != business_id {
        return Err(not_found());
    }

    let subscription = state
        .renewals
        .update_next_renewal(subscription_id, body.next_renewal_at)
        .await
        .map_err(ApiError::RenewalNotUpdated)?;

    Ok(Json(subscription.into()))
}

fn parse_subscription_id(id: &str) -> Result<SubscriptionId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(SubscriptionId::from_uuid(uuid))
}
