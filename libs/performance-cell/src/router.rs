use axum::{routing::get, Router};
use std::sync::Arc;

use crate::handlers::get_performance_stats;
use crate::services::SlotCache;

pub fn create_performance_router(cache: Arc<dyn SlotCache>) -> Router {
    Router::new()
        .route("/stats", get(get_performance_stats))
        .with_state(cache)
}
