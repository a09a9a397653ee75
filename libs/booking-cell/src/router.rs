// libs/booking-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::booking::BookingEngine;

pub struct BookingCellState {
    pub engine: BookingEngine,
}

pub fn booking_routes(config: Arc<AppConfig>, state: Arc<BookingCellState>) -> Router {
    // Application management is staff-only
    Router::new()
        .route("/applications", post(handlers::create_application))
        .route(
            "/applications/{application_id}",
            get(handlers::get_application)
                .put(handlers::update_application)
                .delete(handlers::force_delete_application),
        )
        .route("/applications/{application_id}/cancel", post(handlers::cancel_application))
        .route(
            "/branches/{branch_id}/requires-external-slot",
            get(handlers::branch_requires_external_slot),
        )
        .layer(middleware::from_fn_with_state(config, auth_middleware))
        .with_state(state)
}
