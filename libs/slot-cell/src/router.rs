// libs/slot-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use performance_cell::SlotCache;
use shared_config::AppConfig;
use shared_database::SchedulingStore;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::{ShiftService, SlotQueryService, SlotStoreService};

pub struct SlotCellState {
    pub query: SlotQueryService,
    pub shifts: ShiftService,
    pub slot_store: SlotStoreService,
}

impl SlotCellState {
    pub fn new(store: Arc<dyn SchedulingStore>, cache: Arc<dyn SlotCache>) -> Self {
        Self {
            query: SlotQueryService::new(Arc::clone(&store), Arc::clone(&cache)),
            shifts: ShiftService::new(Arc::clone(&store), cache),
            slot_store: SlotStoreService::new(store),
        }
    }
}

pub fn slot_routes(config: Arc<AppConfig>, state: Arc<SlotCellState>) -> Router {
    // Calendar reads and shift maintenance are staff-only
    Router::new()
        .route("/slots", get(handlers::get_slots))
        .route("/slots/branches/{branch_id}", delete(handlers::purge_branch_slots))
        .route("/shifts", post(handlers::create_shift))
        .route(
            "/shifts/{shift_id}",
            get(handlers::get_shift)
                .put(handlers::update_shift)
                .delete(handlers::delete_shift),
        )
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(state)
}
