// libs/integration-cell/src/services/ingestion.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use performance_cell::{clinic_cache_prefix, SlotCache};
use shared_database::{ChangeSet, SchedulingStore};
use shared_models::scheduling::{Branch, Clinic, IntegrationEndpoint, SlotMode};
use shared_utils::signature::tokens_match;
use slot_cell::{ImportStats, SlotError, SlotStoreService};

use crate::models::{
    BookingIngestResult, BranchImportResult, CellsBatch, InboundBookingEvent, IngestionError,
    LifecycleEvent, ScheduleIngestResult,
};
use crate::services::normalize::{cell_slot_record, normalize_booking_payload, normalize_schedule_payload};
use crate::services::reconcile::{mirror_slot, CellReconciler, ReconcileStats};

/// Per-event tally before it becomes a `BookingIngestResult`.
#[derive(Debug, Default)]
struct EventOutcome {
    updated: usize,
    skipped: usize,
    stats: ReconcileStats,
}

pub struct WebhookIngestionService {
    store: Arc<dyn SchedulingStore>,
    slot_store: SlotStoreService,
    reconciler: Arc<dyn CellReconciler>,
    cache: Arc<dyn SlotCache>,
}

impl WebhookIngestionService {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        reconciler: Arc<dyn CellReconciler>,
        cache: Arc<dyn SlotCache>,
    ) -> Self {
        Self {
            slot_store: SlotStoreService::new(Arc::clone(&store)),
            store,
            reconciler,
            cache,
        }
    }

    // ==============================================================================
    // BOOKING WEBHOOKS
    // ==============================================================================

    #[instrument(skip(self, token, payload))]
    pub async fn ingest_booking_event(
        &self,
        clinic_id: i64,
        token: Option<&str>,
        payload: &Value,
    ) -> Result<BookingIngestResult, IngestionError> {
        let clinic = self.clinic(clinic_id).await?;
        let webhook = normalize_booking_payload(payload)?;
        let (branch, endpoint) = self.resolve_branch(clinic_id, &webhook.branch_external_id).await?;
        authenticate(token, &[&endpoint])?;

        let outcome = match webhook.event {
            InboundBookingEvent::Cells(batch) => self.apply_cells(&clinic, &branch, &batch).await?,
            InboundBookingEvent::Lifecycle(event) => self.apply_lifecycle(&clinic, &branch, &event).await?,
        };

        self.cache.invalidate(&clinic_cache_prefix(clinic_id)).await;
        info!(
            "Booking webhook for clinic {} branch {}: {} slots, {} skipped, {} reconciled, {} deleted",
            clinic_id, branch.id, outcome.updated, outcome.skipped, outcome.stats.reconciled, outcome.stats.deleted
        );

        Ok(BookingIngestResult {
            status: "accepted".to_string(),
            updated_slots: Some(outcome.updated),
            skipped: Some(outcome.skipped),
            reconciled: Some(outcome.stats.reconciled),
            deleted: Some(outcome.stats.deleted),
        })
    }

    async fn apply_cells(
        &self,
        clinic: &Clinic,
        branch: &Branch,
        batch: &CellsBatch,
    ) -> Result<EventOutcome, IngestionError> {
        let mut outcome = EventOutcome::default();

        for cell in &batch.cells {
            let record = cell_slot_record(batch, cell);
            let slot = match self.slot_store.upsert_external_slot(clinic, Some(branch.id), &record).await {
                Ok((slot, _)) => slot,
                Err(SlotError::Store(e)) => return Err(e.into()),
                Err(e) => {
                    warn!("Skipping cell {:?} of doctor {}: {}", cell.slot_id, batch.doctor_id, e);
                    outcome.skipped += 1;
                    continue;
                }
            };
            outcome.updated += 1;
            outcome
                .stats
                .merge(self.reconciler.reconcile(clinic.id, &slot, cell.flagged_free()).await?);
        }

        Ok(outcome)
    }

    /// Lifecycle events always mirror the slot state onto the application
    /// holding the booking; they never delete it.
    async fn apply_lifecycle(
        &self,
        clinic: &Clinic,
        branch: &Branch,
        event: &LifecycleEvent,
    ) -> Result<EventOutcome, IngestionError> {
        let (slot, _) = self
            .slot_store
            .upsert_external_slot(clinic, Some(branch.id), &event.slot)
            .await
            .map_err(|e| match e {
                SlotError::Store(e) => IngestionError::Store(e),
                other => IngestionError::Malformed(other.to_string()),
            })?;

        let mut outcome = EventOutcome {
            updated: 1,
            ..EventOutcome::default()
        };
        let Some(booking_id) = event.booking_id.as_deref() else {
            return Ok(outcome);
        };

        for mut application in self.store.applications_by_external_id(clinic.id, booking_id).await? {
            mirror_slot(&mut application, &slot);
            let mut changes = ChangeSet::new();
            changes.save_application(application.clone());
            self.store.commit(changes).await?;
            debug!("Application {} mirrored {:?} for booking {}", application.id, event.kind, booking_id);
            outcome.stats.reconciled += 1;
        }

        Ok(outcome)
    }

    // ==============================================================================
    // SCHEDULE PUSHES
    // ==============================================================================

    /// Structured pushes import each branch on its own; an unknown branch is
    /// reported in the stats. Legacy pushes are all-or-nothing and fail before
    /// any write when a branch cannot be resolved.
    #[instrument(skip(self, token, payload))]
    pub async fn ingest_schedule(
        &self,
        clinic_id: i64,
        token: Option<&str>,
        payload: &Value,
    ) -> Result<ScheduleIngestResult, IngestionError> {
        let clinic = self.clinic(clinic_id).await?;
        if clinic.slot_mode != SlotMode::OnecPush {
            return Err(IngestionError::Conflict(format!(
                "Clinic {} does not accept 1C schedule pushes",
                clinic_id
            )));
        }

        let batch = normalize_schedule_payload(payload)?;

        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for branch_slots in &batch.branches {
            match self.lookup_branch(clinic_id, &branch_slots.branch_external_id).await? {
                Some((branch, endpoint)) => resolved.push((branch_slots, branch, endpoint)),
                None => unresolved.push(branch_slots.branch_external_id.clone()),
            }
        }

        if batch.legacy && !unresolved.is_empty() {
            return Err(IngestionError::NotFound(format!(
                "Unknown branches in schedule push: {}",
                unresolved.join(", ")
            )));
        }
        if resolved.is_empty() {
            return Err(IngestionError::NotFound("No known branch in schedule push".to_string()));
        }

        let endpoints: Vec<&IntegrationEndpoint> = resolved.iter().map(|(_, _, endpoint)| endpoint).collect();
        authenticate(token, &endpoints)?;

        let mut stats = BTreeMap::new();
        for (branch_slots, branch, _) in &resolved {
            let imported = self
                .slot_store
                .import_batch(&clinic, Some(branch.id), &branch_slots.slots)
                .await?;
            stats.insert(
                branch_slots.branch_external_id.clone(),
                BranchImportResult {
                    status: 200,
                    stats: imported,
                },
            );
        }
        for external_id in unresolved {
            warn!("Schedule push for clinic {} names unknown branch {}", clinic_id, external_id);
            stats.insert(
                external_id.clone(),
                BranchImportResult {
                    status: 404,
                    stats: ImportStats {
                        errors: vec![format!("Branch {} not found", external_id)],
                        ..ImportStats::default()
                    },
                },
            );
        }

        self.cache.invalidate(&clinic_cache_prefix(clinic_id)).await;

        Ok(ScheduleIngestResult {
            status: "accepted".to_string(),
            stats,
        })
    }

    // ==============================================================================
    // RESOLUTION
    // ==============================================================================

    async fn clinic(&self, clinic_id: i64) -> Result<Clinic, IngestionError> {
        self.store
            .clinic(clinic_id)
            .await?
            .ok_or_else(|| IngestionError::NotFound(format!("Clinic {} not found", clinic_id)))
    }

    async fn lookup_branch(
        &self,
        clinic_id: i64,
        external_id: &str,
    ) -> Result<Option<(Branch, IntegrationEndpoint)>, IngestionError> {
        let Some(branch) = self.store.branch_by_external_id(clinic_id, external_id).await? else {
            return Ok(None);
        };
        Ok(self
            .store
            .active_endpoint_for_branch(&branch)
            .await?
            .map(|endpoint| (branch, endpoint)))
    }

    async fn resolve_branch(
        &self,
        clinic_id: i64,
        external_id: &str,
    ) -> Result<(Branch, IntegrationEndpoint), IngestionError> {
        self.lookup_branch(clinic_id, external_id).await?.ok_or_else(|| {
            IngestionError::NotFound(format!(
                "Branch {} has no active 1C integration in clinic {}",
                external_id, clinic_id
            ))
        })
    }
}

fn authenticate(token: Option<&str>, endpoints: &[&IntegrationEndpoint]) -> Result<(), IngestionError> {
    let token = token.unwrap_or_default();
    if endpoints.iter().all(|endpoint| tokens_match(token, &endpoint.webhook_secret)) {
        Ok(())
    } else {
        warn!("Rejected 1C webhook with invalid integration token");
        Err(IngestionError::Unauthorized)
    }
}
