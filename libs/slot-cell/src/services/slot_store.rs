// libs/slot-cell/src/services/slot_store.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use shared_database::SchedulingStore;
use shared_models::scheduling::{Clinic, NewSlot, Shift, Slot, SlotKey};
use shared_utils::signature::payload_hash;

use crate::models::{ImportStats, RawSlotRecord, SlotError, SlotWindow, UpsertOutcome};

// ==============================================================================
// SHIFT EXPANSION
// ==============================================================================

/// Lazy iterator over the whole windows of a shift.
#[derive(Debug, Clone)]
pub struct ShiftWindows {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Option<Duration>,
}

impl Iterator for ShiftWindows {
    type Item = SlotWindow;

    fn next(&mut self) -> Option<SlotWindow> {
        let step = self.step.filter(|step| *step > Duration::zero())?;
        let window_end = self.cursor.checked_add_signed(step)?;
        if window_end > self.end {
            return None;
        }
        let window = SlotWindow {
            start: self.cursor,
            end: window_end,
        };
        self.cursor = window_end;
        Some(window)
    }
}

/// Consecutive `slot_duration_minutes` windows inside the shift. A partial
/// window at the tail is dropped; a non-positive or out-of-range duration
/// yields nothing.
/// Each call returns a fresh iterator.
pub fn expand_shift_to_slots(shift: &Shift) -> ShiftWindows {
    ShiftWindows {
        cursor: shift.start_at,
        end: shift.end_at,
        step: Duration::try_minutes(shift.slot_duration_minutes),
    }
}

pub fn clinic_offset(clinic: &Clinic) -> FixedOffset {
    FixedOffset::east_opt(clinic.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
}

// ==============================================================================
// EXTERNAL SLOT PERSISTENCE
// ==============================================================================

pub struct SlotStoreService {
    store: Arc<dyn SchedulingStore>,
}

impl SlotStoreService {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self { store }
    }

    /// Idempotent upsert of one pushed record. Lookup is by external slot id
    /// within the branch, falling back to the natural key. Re-delivering an
    /// identical payload only refreshes `synced_at`.
    pub async fn upsert_external_slot(
        &self,
        clinic: &Clinic,
        branch_id: Option<i64>,
        raw: &Value,
    ) -> Result<(Slot, UpsertOutcome), SlotError> {
        let record = RawSlotRecord::from_value(raw)?.parse(clinic_offset(clinic))?;

        let doctor_id = match record.doctor_external_id.as_deref() {
            Some(external_id) => self
                .store
                .doctor_by_external_id(clinic.id, external_id)
                .await?
                .map(|doctor| doctor.id),
            None => None,
        };
        let cabinet_id = match record.cabinet_external_id.as_deref() {
            Some(external_id) => self
                .store
                .cabinet_by_external_id(clinic.id, external_id)
                .await?
                .map(|cabinet| cabinet.id),
            None => None,
        };

        let hash = payload_hash(raw);
        let now = Utc::now();

        let existing = match record.external_slot_id.as_deref() {
            Some(external_id) => {
                self.store
                    .slot_by_external_id(clinic.id, branch_id, external_id)
                    .await?
            }
            None => {
                self.store
                    .slot_by_key(&SlotKey {
                        clinic_id: clinic.id,
                        branch_id,
                        doctor_id,
                        cabinet_id,
                        start_at: record.start_at,
                        end_at: record.end_at,
                    })
                    .await?
            }
        };

        match existing {
            Some(mut slot) if slot.payload_hash == hash => {
                slot.synced_at = now;
                self.store.update_slot(&slot).await?;
                debug!("Slot {} unchanged, refreshed sync time", slot.id);
                Ok((slot, UpsertOutcome::Unchanged))
            }
            Some(mut slot) => {
                slot.branch_id = branch_id;
                slot.doctor_id = doctor_id;
                slot.cabinet_id = cabinet_id;
                slot.external_slot_id = record.external_slot_id;
                slot.booking_uuid = record.booking_uuid;
                slot.start_at = record.start_at;
                slot.end_at = record.end_at;
                slot.status = record.status;
                slot.payload_hash = hash;
                slot.source_payload = raw.clone();
                slot.synced_at = now;
                self.store.update_slot(&slot).await?;
                debug!("Slot {} updated to {}", slot.id, slot.status);
                Ok((slot, UpsertOutcome::Updated))
            }
            None => {
                let slot = self
                    .store
                    .insert_slot(NewSlot {
                        clinic_id: clinic.id,
                        branch_id,
                        cabinet_id,
                        doctor_id,
                        external_slot_id: record.external_slot_id,
                        booking_uuid: record.booking_uuid,
                        start_at: record.start_at,
                        end_at: record.end_at,
                        status: record.status,
                        payload_hash: hash,
                        source_payload: raw.clone(),
                        synced_at: now,
                    })
                    .await?;
                debug!("Slot {} created", slot.id);
                Ok((slot, UpsertOutcome::Created))
            }
        }
    }

    /// Upserts a batch for one branch. Invalid records are skipped and
    /// reported; storage errors abort the batch.
    pub async fn import_batch(
        &self,
        clinic: &Clinic,
        branch_id: Option<i64>,
        records: &[Value],
    ) -> Result<ImportStats, SlotError> {
        let mut stats = ImportStats {
            received: records.len(),
            ..ImportStats::default()
        };

        for (index, raw) in records.iter().enumerate() {
            match self.upsert_external_slot(clinic, branch_id, raw).await {
                Ok((_, outcome)) => stats.record(outcome),
                Err(SlotError::Store(e)) => return Err(SlotError::Store(e)),
                Err(e) => {
                    warn!("Skipping slot record {} for clinic {}: {}", index, clinic.id, e);
                    stats.skipped += 1;
                    stats.errors.push(format!("record {}: {}", index, e));
                }
            }
        }

        info!(
            "Imported {} slot records for clinic {} branch {:?}: {} created, {} updated, {} unchanged, {} skipped",
            stats.received, clinic.id, branch_id, stats.created, stats.updated, stats.unchanged, stats.skipped
        );
        Ok(stats)
    }

    /// Removes every mirrored slot of a branch.
    pub async fn purge_branch_slots(&self, branch_id: i64) -> Result<u64, SlotError> {
        self.store
            .branch(branch_id)
            .await?
            .ok_or_else(|| SlotError::NotFound(format!("Branch {} not found", branch_id)))?;

        let removed = self.store.purge_branch_slots(branch_id).await?;
        info!("Purged {} slots of branch {}", removed, branch_id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn shift(start_hour: u32, end_hour: u32, end_minute: u32, duration: i64) -> Shift {
        Shift {
            id: 1,
            clinic_id: 1,
            branch_id: None,
            cabinet_id: 1,
            doctor_id: 1,
            start_at: Utc.with_ymd_and_hms(2030, 3, 4, start_hour, 0, 0).unwrap(),
            end_at: Utc.with_ymd_and_hms(2030, 3, 4, end_hour, end_minute, 0).unwrap(),
            slot_duration_minutes: duration,
            deleted_at: None,
        }
    }

    #[test]
    fn expands_whole_windows_only() {
        let windows: Vec<SlotWindow> = expand_shift_to_slots(&shift(9, 10, 10, 30)).collect();

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].end, windows[1].start);
        assert_eq!(windows[1].end, Utc.with_ymd_and_hms(2030, 3, 4, 10, 0, 0).unwrap());
    }

    #[test]
    fn non_positive_duration_yields_nothing() {
        assert_eq!(expand_shift_to_slots(&shift(9, 12, 0, 0)).count(), 0);
        assert_eq!(expand_shift_to_slots(&shift(9, 12, 0, -15)).count(), 0);
    }

    #[test]
    fn oversized_duration_yields_nothing() {
        assert_eq!(expand_shift_to_slots(&shift(9, 12, 0, i64::MAX / 2)).count(), 0);
        assert_eq!(expand_shift_to_slots(&shift(9, 12, 0, 60 * 24 * 365 * 300_000)).count(), 0);
        assert_eq!(expand_shift_to_slots(&shift(9, 12, 0, 240)).count(), 0);
    }

    #[test]
    fn expansion_is_restartable() {
        let s = shift(9, 11, 0, 20);
        assert_eq!(expand_shift_to_slots(&s).count(), 6);
        assert_eq!(expand_shift_to_slots(&s).count(), 6);
    }
}
