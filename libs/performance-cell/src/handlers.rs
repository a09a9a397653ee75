use axum::{extract::State, Json};
use std::sync::Arc;

use crate::models::PerformanceStats;
use crate::services::SlotCache;

pub async fn get_performance_stats(State(cache): State<Arc<dyn SlotCache>>) -> Json<PerformanceStats> {
    Json(PerformanceStats {
        cache_stats: cache.stats().await,
        generated_at: chrono::Utc::now(),
    })
}
