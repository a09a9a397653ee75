// libs/integration-cell/src/services/reconcile.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use shared_config::AppConfig;
use shared_database::{ChangeSet, SchedulingStore};
use shared_models::scheduling::{Application, IntegrationType, Slot, SlotStatus};

use crate::models::IngestionError;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileStats {
    pub reconciled: usize,
    pub deleted: usize,
}

impl ReconcileStats {
    pub fn merge(&mut self, other: ReconcileStats) {
        self.reconciled += other.reconciled;
        self.deleted += other.deleted;
    }
}

/// Matches a freshly synced cell against local applications holding its
/// claim id.
#[async_trait]
pub trait CellReconciler: Send + Sync {
    async fn reconcile(
        &self,
        clinic_id: i64,
        slot: &Slot,
        cell_free: bool,
    ) -> Result<ReconcileStats, IngestionError>;
}

/// Copies the slot's 1C state onto an application and fills placement fields
/// the application does not have yet.
pub(crate) fn mirror_slot(application: &mut Application, slot: &Slot) {
    application.integration_type = IntegrationType::Onec;
    application.integration_status = Some(slot.status);
    application.integration_payload = Some(slot.source_payload.clone());

    if application.appointment_datetime.is_none() {
        application.appointment_datetime = Some(slot.start_at);
    }
    if application.branch_id.is_none() {
        application.branch_id = slot.branch_id;
    }
    if application.doctor_id.is_none() {
        application.doctor_id = slot.doctor_id;
    }
    if application.cabinet_id.is_none() {
        application.cabinet_id = slot.cabinet_id;
    }
    application.updated_at = Utc::now();
}

pub struct OnecCellReconciler {
    store: Arc<dyn SchedulingStore>,
    auto_delete_freed: bool,
}

impl OnecCellReconciler {
    pub fn new(store: Arc<dyn SchedulingStore>, auto_delete_freed: bool) -> Self {
        Self {
            store,
            auto_delete_freed,
        }
    }
}

#[async_trait]
impl CellReconciler for OnecCellReconciler {
    async fn reconcile(
        &self,
        clinic_id: i64,
        slot: &Slot,
        cell_free: bool,
    ) -> Result<ReconcileStats, IngestionError> {
        let mut stats = ReconcileStats::default();
        let Some(claim_id) = slot.booking_uuid.as_deref() else {
            return Ok(stats);
        };

        let freed = cell_free || slot.status == SlotStatus::Free;

        for mut application in self.store.applications_by_external_id(clinic_id, claim_id).await? {
            let mut changes = ChangeSet::new();

            if freed && self.auto_delete_freed {
                changes.delete_application(application.id);
                self.store.commit(changes).await?;
                info!(
                    "Deleted application {} after 1C freed slot {} (claim {})",
                    application.id, slot.id, claim_id
                );
                stats.deleted += 1;
                continue;
            }

            mirror_slot(&mut application, slot);
            changes.save_application(application.clone());
            self.store.commit(changes).await?;
            debug!("Application {} reconciled with slot {}", application.id, slot.id);
            stats.reconciled += 1;
        }

        Ok(stats)
    }
}

/// Used when cell reconciliation is switched off.
pub struct NullCellReconciler;

#[async_trait]
impl CellReconciler for NullCellReconciler {
    async fn reconcile(&self, _: i64, _: &Slot, _: bool) -> Result<ReconcileStats, IngestionError> {
        Ok(ReconcileStats::default())
    }
}

pub fn cell_reconciler(config: &AppConfig, store: Arc<dyn SchedulingStore>) -> Arc<dyn CellReconciler> {
    if config.onec_reconciliation_enabled {
        Arc::new(OnecCellReconciler::new(store, config.onec_auto_delete_freed))
    } else {
        info!("1C cell reconciliation disabled");
        Arc::new(NullCellReconciler)
    }
}
