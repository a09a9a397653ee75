// libs/slot-cell/src/services/provider.rs
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use shared_database::SchedulingStore;
use shared_models::auth::{Actor, ActorRole};
use shared_models::scheduling::{Clinic, ScheduleQuery, Slot, SlotKey, SlotMode, SlotStatus};

use crate::models::{SlotError, SlotFilters, SlotSource, SlotView};
use crate::services::slot_store::expand_shift_to_slots;

/// Read side of a clinic's slots, whichever way they are produced.
#[async_trait]
pub trait SlotProvider: Send + Sync {
    fn source(&self) -> SlotSource;

    async fn get_slots(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filters: &SlotFilters,
        actor: &Actor,
    ) -> Result<Vec<SlotView>, SlotError>;
}

/// Narrows the caller's filters to what the actor may see in this clinic.
/// `None` means nothing is visible.
pub fn visible_scope(
    clinic_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    filters: &SlotFilters,
    actor: &Actor,
) -> Option<ScheduleQuery> {
    if !actor.can_access_clinic(clinic_id) {
        return None;
    }

    let doctor_ids = match actor.role {
        ActorRole::Doctor => {
            let own = actor.doctor_id?;
            if !filters.doctor_ids.is_empty() && !filters.doctor_ids.contains(&own) {
                return None;
            }
            vec![own]
        }
        ActorRole::SuperAdmin | ActorRole::Partner => filters.doctor_ids.clone(),
    };

    Some(ScheduleQuery {
        from: Some(from),
        to: Some(to),
        clinic_id: Some(clinic_id),
        branch_ids: filters.branch_ids.clone(),
        doctor_ids,
        cabinet_ids: Vec::new(),
    })
}

fn in_window(start: DateTime<Utc>, end: DateTime<Utc>, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    end > from && start < to
}

// ==============================================================================
// LOCAL SHIFTS
// ==============================================================================

pub struct LocalSlotProvider {
    store: Arc<dyn SchedulingStore>,
    clinic_id: i64,
}

impl LocalSlotProvider {
    pub fn new(store: Arc<dyn SchedulingStore>, clinic_id: i64) -> Self {
        Self { store, clinic_id }
    }
}

#[async_trait]
impl SlotProvider for LocalSlotProvider {
    fn source(&self) -> SlotSource {
        SlotSource::Local
    }

    async fn get_slots(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filters: &SlotFilters,
        actor: &Actor,
    ) -> Result<Vec<SlotView>, SlotError> {
        let Some(query) = visible_scope(self.clinic_id, from, to, filters, actor) else {
            return Ok(Vec::new());
        };

        let shifts = self.store.shifts(&query).await?;
        let mut views = Vec::new();

        for shift in &shifts {
            for window in expand_shift_to_slots(shift) {
                if !in_window(window.start, window.end, from, to) {
                    continue;
                }
                views.push(SlotView {
                    id: format!("local-{}-{}", shift.id, window.start.timestamp()),
                    start: window.start,
                    end: window.end,
                    clinic_id: shift.clinic_id,
                    branch_id: shift.branch_id,
                    cabinet_id: Some(shift.cabinet_id),
                    doctor_id: Some(shift.doctor_id),
                    source: SlotSource::Local,
                    externally_occupied: false,
                    meta: json!({
                        "shift_id": shift.id,
                        "slot_duration_minutes": shift.slot_duration_minutes
                    }),
                });
            }
        }

        views.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        debug!("Expanded {} shifts into {} local slots for clinic {}", shifts.len(), views.len(), self.clinic_id);
        Ok(views)
    }
}

// ==============================================================================
// 1C MIRROR
// ==============================================================================

pub struct ExternalSlotProvider {
    store: Arc<dyn SchedulingStore>,
    clinic_id: i64,
}

impl ExternalSlotProvider {
    pub fn new(store: Arc<dyn SchedulingStore>, clinic_id: i64) -> Self {
        Self { store, clinic_id }
    }
}

fn status_rank(status: SlotStatus) -> u8 {
    match status {
        SlotStatus::Booked => 2,
        SlotStatus::Blocked => 1,
        SlotStatus::Free => 0,
    }
}

fn preference(a: &Slot, b: &Slot) -> Ordering {
    status_rank(a.status)
        .cmp(&status_rank(b.status))
        .then_with(|| a.synced_at.cmp(&b.synced_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Collapses rows sharing a natural key. Booked wins, then the most recent
/// sync, then the highest id.
pub fn dedup_slots(slots: Vec<Slot>) -> Vec<Slot> {
    let mut best: HashMap<SlotKey, Slot> = HashMap::new();

    for slot in slots {
        let key = slot.natural_key();
        match best.get(&key) {
            Some(current) if preference(current, &slot) != Ordering::Less => {}
            _ => {
                best.insert(key, slot);
            }
        }
    }

    let mut unique: Vec<Slot> = best.into_values().collect();
    unique.sort_by_key(|slot| (slot.start_at, slot.id));
    unique
}

#[async_trait]
impl SlotProvider for ExternalSlotProvider {
    fn source(&self) -> SlotSource {
        SlotSource::Onec
    }

    async fn get_slots(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filters: &SlotFilters,
        actor: &Actor,
    ) -> Result<Vec<SlotView>, SlotError> {
        let Some(query) = visible_scope(self.clinic_id, from, to, filters, actor) else {
            return Ok(Vec::new());
        };

        let rows = self.store.slots(&query).await?;
        let received = rows.len();

        let views: Vec<SlotView> = dedup_slots(rows)
            .into_iter()
            .filter(|slot| in_window(slot.start_at, slot.end_at, from, to))
            .map(|slot| SlotView {
                id: slot.id.to_string(),
                start: slot.start_at,
                end: slot.end_at,
                clinic_id: slot.clinic_id,
                branch_id: slot.branch_id,
                cabinet_id: slot.cabinet_id,
                doctor_id: slot.doctor_id,
                source: SlotSource::Onec,
                externally_occupied: slot.status != SlotStatus::Free,
                meta: json!({
                    "status": slot.status,
                    "external_slot_id": slot.external_slot_id,
                    "booking_uuid": slot.booking_uuid,
                    "synced_at": slot.synced_at
                }),
            })
            .collect();

        debug!("Clinic {}: {} mirrored rows, {} unique slots", self.clinic_id, received, views.len());
        Ok(views)
    }
}

// ==============================================================================
// FACTORY
// ==============================================================================

/// Picks the provider matching a clinic's slot mode.
pub struct SlotProviderFactory {
    store: Arc<dyn SchedulingStore>,
}

impl SlotProviderFactory {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self { store }
    }

    pub fn for_clinic(&self, clinic: &Clinic) -> Arc<dyn SlotProvider> {
        match clinic.slot_mode {
            SlotMode::Local => Arc::new(LocalSlotProvider::new(Arc::clone(&self.store), clinic.id)),
            SlotMode::OnecPush => Arc::new(ExternalSlotProvider::new(Arc::clone(&self.store), clinic.id)),
        }
    }
}
