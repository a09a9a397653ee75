// libs/integration-cell/src/router.rs
use std::sync::Arc;

use axum::{routing::post, Router};

use crate::handlers;
use crate::services::ingestion::WebhookIngestionService;

pub struct IntegrationCellState {
    pub ingestion: WebhookIngestionService,
}

/// Webhook routes called by 1C. They authenticate with the endpoint's shared
/// secret instead of a user JWT, so no auth middleware is layered here.
pub fn integration_routes(state: Arc<IntegrationCellState>) -> Router {
    Router::new()
        .route("/{clinic_id}/bookings", post(handlers::ingest_booking_webhook))
        .route("/{clinic_id}/schedule", post(handlers::ingest_schedule_push))
        .with_state(state)
}
