use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::info;

use booking_cell::{booking_routes, conflict_resolver, BookingCellState, BookingEngine, OnecClient};
use integration_cell::{cell_reconciler, integration_routes, IntegrationCellState, WebhookIngestionService};
use performance_cell::{create_performance_router, SlotCache};
use shared_config::{AppConfig, StoreBackend};
use shared_database::{MemorySchedulingStore, SchedulingStore, SupabaseSchedulingStore};
use slot_cell::{slot_routes, SlotCellState};

pub fn build_store(config: &AppConfig) -> Arc<dyn SchedulingStore> {
    match config.store_backend {
        StoreBackend::Supabase => {
            info!("Using Supabase scheduling store at {}", config.supabase_url);
            Arc::new(SupabaseSchedulingStore::new(config))
        }
        StoreBackend::Memory => {
            info!("Using in-memory scheduling store");
            Arc::new(MemorySchedulingStore::new())
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "clinic-scheduling-api"
    }))
}

pub fn create_router(
    config: Arc<AppConfig>,
    store: Arc<dyn SchedulingStore>,
    cache: Arc<dyn SlotCache>,
) -> Router {
    let onec = OnecClient::new(Duration::from_secs(config.onec_request_timeout_secs));

    let slot_state = Arc::new(SlotCellState::new(Arc::clone(&store), Arc::clone(&cache)));
    let booking_state = Arc::new(BookingCellState {
        engine: BookingEngine::new(
            Arc::clone(&store),
            onec,
            conflict_resolver(config.onec_reconciliation_enabled),
            Arc::clone(&cache),
        ),
    });
    let integration_state = Arc::new(IntegrationCellState {
        ingestion: WebhookIngestionService::new(
            Arc::clone(&store),
            cell_reconciler(&config, Arc::clone(&store)),
            Arc::clone(&cache),
        ),
    });

    Router::new()
        .route("/", get(|| async { "Clinic Scheduling API is running!" }))
        .route("/health", get(health))
        .merge(slot_routes(Arc::clone(&config), slot_state))
        .merge(booking_routes(Arc::clone(&config), booking_state))
        .nest("/integrations", integration_routes(integration_state))
        .nest("/performance", create_performance_router(cache))
}
