// libs/slot-cell/src/services/shift.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use performance_cell::{clinic_cache_prefix, SlotCache};
use shared_database::SchedulingStore;
use shared_models::scheduling::{NewShift, ScheduleQuery, Shift};

use crate::models::{CreateShiftRequest, ShiftError, UpdateShiftRequest};

pub struct ShiftService {
    store: Arc<dyn SchedulingStore>,
    cache: Arc<dyn SlotCache>,
}

/// Inclusive on both ends: shifts that merely touch still conflict.
fn overlaps_inclusive(a_start: DateTime<Utc>, a_end: DateTime<Utc>, b_start: DateTime<Utc>, b_end: DateTime<Utc>) -> bool {
    a_start <= b_end && b_start <= a_end
}

impl ShiftService {
    pub fn new(store: Arc<dyn SchedulingStore>, cache: Arc<dyn SlotCache>) -> Self {
        Self { store, cache }
    }

    pub async fn get_shift(&self, shift_id: i64) -> Result<Shift, ShiftError> {
        self.store
            .shift(shift_id)
            .await?
            .filter(|shift| shift.deleted_at.is_none())
            .ok_or(ShiftError::NotFound(shift_id))
    }

    pub async fn create_shift(&self, request: CreateShiftRequest) -> Result<Shift, ShiftError> {
        let candidate = NewShift {
            clinic_id: request.clinic_id,
            branch_id: request.branch_id,
            cabinet_id: request.cabinet_id,
            doctor_id: request.doctor_id,
            start_at: request.start_at,
            end_at: request.end_at,
            slot_duration_minutes: request.slot_duration_minutes,
        };

        self.validate(&candidate, None).await?;

        let shift = self.store.insert_shift(candidate).await?;
        self.cache.invalidate(&clinic_cache_prefix(shift.clinic_id)).await;

        info!("Created shift {} for doctor {} in cabinet {}", shift.id, shift.doctor_id, shift.cabinet_id);
        Ok(shift)
    }

    pub async fn update_shift(&self, shift_id: i64, request: UpdateShiftRequest) -> Result<Shift, ShiftError> {
        let mut shift = self.get_shift(shift_id).await?;

        if let Some(branch_id) = request.branch_id {
            shift.branch_id = Some(branch_id);
        }
        if let Some(cabinet_id) = request.cabinet_id {
            shift.cabinet_id = cabinet_id;
        }
        if let Some(doctor_id) = request.doctor_id {
            shift.doctor_id = doctor_id;
        }
        if let Some(start_at) = request.start_at {
            shift.start_at = start_at;
        }
        if let Some(end_at) = request.end_at {
            shift.end_at = end_at;
        }
        if let Some(duration) = request.slot_duration_minutes {
            shift.slot_duration_minutes = duration;
        }

        let candidate = NewShift {
            clinic_id: shift.clinic_id,
            branch_id: shift.branch_id,
            cabinet_id: shift.cabinet_id,
            doctor_id: shift.doctor_id,
            start_at: shift.start_at,
            end_at: shift.end_at,
            slot_duration_minutes: shift.slot_duration_minutes,
        };
        self.validate(&candidate, Some(shift_id)).await?;

        self.store.update_shift(&shift).await?;
        self.cache.invalidate(&clinic_cache_prefix(shift.clinic_id)).await;

        info!("Updated shift {}", shift_id);
        Ok(shift)
    }

    /// Soft delete; the shift stops producing slots immediately.
    pub async fn delete_shift(&self, shift_id: i64) -> Result<(), ShiftError> {
        let mut shift = self.get_shift(shift_id).await?;
        shift.deleted_at = Some(Utc::now());

        self.store.update_shift(&shift).await?;
        self.cache.invalidate(&clinic_cache_prefix(shift.clinic_id)).await;

        info!("Deleted shift {}", shift_id);
        Ok(())
    }

    async fn validate(&self, candidate: &NewShift, exclude: Option<i64>) -> Result<(), ShiftError> {
        if candidate.start_at >= candidate.end_at {
            return Err(ShiftError::Validation {
                field: "end_at".to_string(),
                message: "Shift must end after it starts".to_string(),
            });
        }
        if candidate.slot_duration_minutes <= 0 {
            return Err(ShiftError::Validation {
                field: "slot_duration_minutes".to_string(),
                message: "Slot duration must be positive".to_string(),
            });
        }
        if candidate.slot_duration_minutes > (candidate.end_at - candidate.start_at).num_minutes() {
            return Err(ShiftError::Validation {
                field: "slot_duration_minutes".to_string(),
                message: "Slot duration must fit inside the shift".to_string(),
            });
        }

        self.check_conflict(candidate, exclude, "doctor_id", ScheduleQuery {
            from: Some(candidate.start_at),
            to: Some(candidate.end_at),
            doctor_ids: vec![candidate.doctor_id],
            ..ScheduleQuery::default()
        })
        .await?;

        self.check_conflict(candidate, exclude, "cabinet_id", ScheduleQuery {
            from: Some(candidate.start_at),
            to: Some(candidate.end_at),
            cabinet_ids: vec![candidate.cabinet_id],
            ..ScheduleQuery::default()
        })
        .await
    }

    async fn check_conflict(
        &self,
        candidate: &NewShift,
        exclude: Option<i64>,
        field: &str,
        query: ScheduleQuery,
    ) -> Result<(), ShiftError> {
        let clash = self
            .store
            .shifts(&query)
            .await?
            .into_iter()
            .filter(|existing| Some(existing.id) != exclude)
            .find(|existing| overlaps_inclusive(existing.start_at, existing.end_at, candidate.start_at, candidate.end_at));

        match clash {
            Some(existing) => Err(ShiftError::Validation {
                field: field.to_string(),
                message: format!(
                    "Overlaps shift {} ({} - {})",
                    existing.id,
                    existing.start_at.to_rfc3339(),
                    existing.end_at.to_rfc3339()
                ),
            }),
            None => Ok(()),
        }
    }
}
