//! Saga journal view.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SagaId;
use serde::Serialize;
use store::Store;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct SagaStatusResponse {
    pub saga_id: String,
    pub saga_type: String,
    pub business_id: Option<i64>,
    pub plan_id: Option<i64>,
    pub amount_cents: i64,
    pub payment_method: String,
    pub stage: &'static str,
    pub completed_steps: Vec<String>,
    pub price_component_count: Option<usize>,
    pub gateway_reference: Option<String>,
    pub subscription_id: Option<String>,
    pub payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub needs_reconciliation: bool,
    pub version: i64,
}

/// GET /sagas/{id}: replay a saga run from its journal.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError> {
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    let saga_id = SagaId::from_uuid(uuid);

    let saga = state
        .saga
        .get_saga(saga_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))?;

    Ok(Json(SagaStatusResponse {
        saga_id: saga_id.to_string(),
        saga_type: saga.saga_type().to_string(),
        business_id: saga.business_id().map(|id| id.as_i64()),
        plan_id: saga.plan_id().map(|id| id.as_i64()),
        amount_cents: saga.amount().cents(),
        payment_method: saga.payment_method().to_string(),
        stage: saga.stage().as_str(),
        completed_steps: saga.completed_steps().to_vec(),
        price_component_count: saga.price_component_count(),
        gateway_reference: saga.gateway_reference().map(String::from),
        subscription_id: saga.subscription_id().map(|id| id.to_string()),
        payment_id: saga.payment_id().map(|id| id.to_string()),
        failure_reason: saga.failure_reason().map(String::from),
        needs_reconciliation: saga.needs_reconciliation(),
        version: saga.version().as_i64(),
    }))
}
