// =====================================================================================
// INTEGRATION CELL - 1C WEBHOOK INGESTION
// =====================================================================================
//
// Inbound side of the 1C integration:
// - booking webhooks (cells batches and lifecycle events)
// - schedule batch pushes (structured and legacy 1C shapes)
//
// Payloads are normalized into one internal shape before any business logic
// runs; authentication compares the X-Integration-Token header with the
// resolved endpoint's secret.
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    BookingIngestResult, IngestionError, IntegrationToken, ScheduleIngestResult,
};
pub use router::{integration_routes, IntegrationCellState};
pub use services::ingestion::WebhookIngestionService;
pub use services::reconcile::{
    cell_reconciler, CellReconciler, NullCellReconciler, OnecCellReconciler, ReconcileStats,
};
