// libs/slot-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use shared_models::auth::{Actor, ActorRole};
use shared_models::error::AppError;
use shared_models::scheduling::Shift;

use crate::models::{CreateShiftRequest, SlotQueryParams, UpdateShiftRequest};
use crate::router::SlotCellState;

// ==============================================================================
// SLOT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_slots(
    State(state): State<Arc<SlotCellState>>,
    Extension(actor): Extension<Actor>,
    Query(params): Query<SlotQueryParams>,
) -> Result<Json<Value>, AppError> {
    let filters = params.filters()?;
    let slots = state
        .query
        .get_slots(params.from, params.to, &filters, &actor)
        .await?;

    Ok(Json(json!({
        "slots": slots,
        "total": slots.len()
    })))
}

/// Drops the mirrored schedule of a branch, e.g. before a full re-push.
#[axum::debug_handler]
pub async fn purge_branch_slots(
    State(state): State<Arc<SlotCellState>>,
    Extension(actor): Extension<Actor>,
    Path(branch_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    if !actor.is_super_admin() {
        return Err(AppError::Forbidden("Only super admins can purge slots".to_string()));
    }

    let removed = state.slot_store.purge_branch_slots(branch_id).await?;

    Ok(Json(json!({
        "branch_id": branch_id,
        "removed": removed
    })))
}

// ==============================================================================
// SHIFT HANDLERS
// ==============================================================================

fn ensure_can_manage(actor: &Actor, clinic_id: i64) -> Result<(), AppError> {
    if actor.role == ActorRole::Doctor || !actor.can_access_clinic(clinic_id) {
        return Err(AppError::Forbidden("Not allowed to manage shifts of this clinic".to_string()));
    }
    Ok(())
}

#[axum::debug_handler]
pub async fn create_shift(
    State(state): State<Arc<SlotCellState>>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreateShiftRequest>,
) -> Result<(StatusCode, Json<Shift>), AppError> {
    ensure_can_manage(&actor, request.clinic_id)?;

    let shift = state.shifts.create_shift(request).await?;
    Ok((StatusCode::CREATED, Json(shift)))
}

#[axum::debug_handler]
pub async fn get_shift(
    State(state): State<Arc<SlotCellState>>,
    Extension(actor): Extension<Actor>,
    Path(shift_id): Path<i64>,
) -> Result<Json<Shift>, AppError> {
    let shift = state.shifts.get_shift(shift_id).await?;
    if !actor.can_access_clinic(shift.clinic_id) {
        return Err(AppError::NotFound(format!("Shift {} not found", shift_id)));
    }
    Ok(Json(shift))
}

#[axum::debug_handler]
pub async fn update_shift(
    State(state): State<Arc<SlotCellState>>,
    Extension(actor): Extension<Actor>,
    Path(shift_id): Path<i64>,
    Json(request): Json<UpdateShiftRequest>,
) -> Result<Json<Shift>, AppError> {
    let current = state.shifts.get_shift(shift_id).await?;
    ensure_can_manage(&actor, current.clinic_id)?;

    let shift = state.shifts.update_shift(shift_id, request).await?;
    Ok(Json(shift))
}

#[axum::debug_handler]
pub async fn delete_shift(
    State(state): State<Arc<SlotCellState>>,
    Extension(actor): Extension<Actor>,
    Path(shift_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let current = state.shifts.get_shift(shift_id).await?;
    ensure_can_manage(&actor, current.clinic_id)?;

    state.shifts.delete_shift(shift_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
