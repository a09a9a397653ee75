// libs/booking-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::Actor;
use shared_models::error::AppError;
use shared_models::scheduling::Application;

use crate::models::{ApplicationRequest, CancellationResult};
use crate::router::BookingCellState;

fn ensure_clinic_access(actor: &Actor, clinic_id: i64) -> Result<(), AppError> {
    if !actor.can_access_clinic(clinic_id) {
        return Err(AppError::Forbidden("No access to this clinic".to_string()));
    }
    Ok(())
}

/// Loads the application, hiding rows of other clinics.
async fn visible_application(
    state: &BookingCellState,
    actor: &Actor,
    application_id: Uuid,
) -> Result<Application, AppError> {
    let application = state.engine.get(application_id).await?;
    if !actor.can_access_clinic(application.clinic_id) {
        return Err(AppError::NotFound(format!("Application {} not found", application_id)));
    }
    Ok(application)
}

#[axum::debug_handler]
pub async fn create_application(
    State(state): State<Arc<BookingCellState>>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<ApplicationRequest>,
) -> Result<(StatusCode, Json<Application>), AppError> {
    ensure_clinic_access(&actor, request.data.clinic_id)?;

    let application = state.engine.create(request.data, request.options).await?;
    Ok((StatusCode::CREATED, Json(application)))
}

#[axum::debug_handler]
pub async fn get_application(
    State(state): State<Arc<BookingCellState>>,
    Extension(actor): Extension<Actor>,
    Path(application_id): Path<Uuid>,
) -> Result<Json<Application>, AppError> {
    let application = visible_application(&state, &actor, application_id).await?;
    Ok(Json(application))
}

#[axum::debug_handler]
pub async fn update_application(
    State(state): State<Arc<BookingCellState>>,
    Extension(actor): Extension<Actor>,
    Path(application_id): Path<Uuid>,
    Json(request): Json<ApplicationRequest>,
) -> Result<Json<Application>, AppError> {
    visible_application(&state, &actor, application_id).await?;

    let application = state
        .engine
        .update(application_id, request.data, request.options)
        .await?;
    Ok(Json(application))
}

#[axum::debug_handler]
pub async fn cancel_application(
    State(state): State<Arc<BookingCellState>>,
    Extension(actor): Extension<Actor>,
    Path(application_id): Path<Uuid>,
) -> Result<Json<CancellationResult>, AppError> {
    visible_application(&state, &actor, application_id).await?;

    let result = state.engine.cancel(application_id).await?;
    Ok(Json(result))
}

#[axum::debug_handler]
pub async fn force_delete_application(
    State(state): State<Arc<BookingCellState>>,
    Extension(actor): Extension<Actor>,
    Path(application_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    visible_application(&state, &actor, application_id).await?;

    state.engine.force_delete(application_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn branch_requires_external_slot(
    State(state): State<Arc<BookingCellState>>,
    Path(branch_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let requires = state.engine.branch_requires_external_slot(branch_id).await?;

    Ok(Json(json!({
        "branch_id": branch_id,
        "requires_external_slot": requires
    })))
}
