// libs/integration-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use serde_json::Value;

use shared_models::error::AppError;

use crate::models::{BookingIngestResult, IntegrationToken, ScheduleIngestResult};
use crate::router::IntegrationCellState;

fn token_value(token: &Option<TypedHeader<IntegrationToken>>) -> Option<&str> {
    token.as_ref().map(|TypedHeader(token)| token.0.as_str())
}

#[axum::debug_handler]
pub async fn ingest_booking_webhook(
    State(state): State<Arc<IntegrationCellState>>,
    Path(clinic_id): Path<i64>,
    token: Option<TypedHeader<IntegrationToken>>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<BookingIngestResult>), AppError> {
    let result = state
        .ingestion
        .ingest_booking_event(clinic_id, token_value(&token), &payload)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(result)))
}

#[axum::debug_handler]
pub async fn ingest_schedule_push(
    State(state): State<Arc<IntegrationCellState>>,
    Path(clinic_id): Path<i64>,
    token: Option<TypedHeader<IntegrationToken>>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<ScheduleIngestResult>), AppError> {
    let result = state
        .ingestion
        .ingest_schedule(clinic_id, token_value(&token), &payload)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(result)))
}
