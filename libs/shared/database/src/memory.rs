// libs/shared/database/src/memory.rs
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::scheduling::{
    Application, Branch, Cabinet, Clinic, Doctor, IntegrationEndpoint, NewShift, NewSlot,
    ScheduleQuery, Shift, Slot, SlotKey,
};

use crate::store::{Change, ChangeSet, EndpointResult, SchedulingStore, StoreError};

#[derive(Default)]
struct MemoryState {
    clinics: BTreeMap<i64, Clinic>,
    branches: BTreeMap<i64, Branch>,
    doctors: BTreeMap<i64, Doctor>,
    cabinets: BTreeMap<i64, Cabinet>,
    endpoints: BTreeMap<i64, IntegrationEndpoint>,
    shifts: BTreeMap<i64, Shift>,
    slots: BTreeMap<i64, Slot>,
    applications: HashMap<Uuid, Application>,
    next_shift_id: i64,
    next_slot_id: i64,
}

/// Process-local store used for development runs and tests. A commit holds
/// the write lock for the whole change set.
#[derive(Default)]
pub struct MemorySchedulingStore {
    state: RwLock<MemoryState>,
}

impl MemorySchedulingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_clinic(&self, clinic: Clinic) {
        self.state.write().await.clinics.insert(clinic.id, clinic);
    }

    pub async fn add_branch(&self, branch: Branch) {
        self.state.write().await.branches.insert(branch.id, branch);
    }

    pub async fn add_doctor(&self, doctor: Doctor) {
        self.state.write().await.doctors.insert(doctor.id, doctor);
    }

    pub async fn add_cabinet(&self, cabinet: Cabinet) {
        self.state.write().await.cabinets.insert(cabinet.id, cabinet);
    }

    pub async fn add_endpoint(&self, endpoint: IntegrationEndpoint) {
        self.state.write().await.endpoints.insert(endpoint.id, endpoint);
    }

    pub async fn endpoint(&self, endpoint_id: i64) -> Option<IntegrationEndpoint> {
        self.state.read().await.endpoints.get(&endpoint_id).cloned()
    }

    pub async fn slot_count(&self) -> usize {
        self.state.read().await.slots.len()
    }

    pub async fn application_count(&self) -> usize {
        self.state.read().await.applications.len()
    }
}

#[async_trait]
impl SchedulingStore for MemorySchedulingStore {
    async fn clinic(&self, clinic_id: i64) -> Result<Option<Clinic>, StoreError> {
        Ok(self.state.read().await.clinics.get(&clinic_id).cloned())
    }

    async fn clinics(&self) -> Result<Vec<Clinic>, StoreError> {
        Ok(self.state.read().await.clinics.values().cloned().collect())
    }

    async fn branch(&self, branch_id: i64) -> Result<Option<Branch>, StoreError> {
        Ok(self.state.read().await.branches.get(&branch_id).cloned())
    }

    async fn branch_by_external_id(
        &self,
        clinic_id: i64,
        external_id: &str,
    ) -> Result<Option<Branch>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .branches
            .values()
            .find(|b| b.clinic_id == clinic_id && b.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn doctor(&self, doctor_id: i64) -> Result<Option<Doctor>, StoreError> {
        Ok(self.state.read().await.doctors.get(&doctor_id).cloned())
    }

    async fn cabinet(&self, cabinet_id: i64) -> Result<Option<Cabinet>, StoreError> {
        Ok(self.state.read().await.cabinets.get(&cabinet_id).cloned())
    }

    async fn doctor_by_external_id(
        &self,
        clinic_id: i64,
        external_id: &str,
    ) -> Result<Option<Doctor>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .doctors
            .values()
            .find(|d| d.clinic_id == clinic_id && d.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn cabinet_by_external_id(
        &self,
        clinic_id: i64,
        external_id: &str,
    ) -> Result<Option<Cabinet>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .cabinets
            .values()
            .find(|c| c.clinic_id == clinic_id && c.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn endpoints(&self, clinic_id: i64) -> Result<Vec<IntegrationEndpoint>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .endpoints
            .values()
            .filter(|e| e.clinic_id == clinic_id)
            .cloned()
            .collect())
    }

    async fn record_endpoint_result(
        &self,
        endpoint_id: i64,
        result: EndpointResult,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let endpoint = state
            .endpoints
            .get_mut(&endpoint_id)
            .ok_or_else(|| StoreError::NotFound(format!("integration endpoint {}", endpoint_id)))?;

        match result {
            EndpointResult::Success { at } => endpoint.last_success_at = Some(at),
            EndpointResult::Failure { at, message } => {
                endpoint.last_error_at = Some(at);
                endpoint.last_error_message = Some(message);
            }
        }
        Ok(())
    }

    async fn shift(&self, shift_id: i64) -> Result<Option<Shift>, StoreError> {
        Ok(self.state.read().await.shifts.get(&shift_id).cloned())
    }

    async fn shifts(&self, query: &ScheduleQuery) -> Result<Vec<Shift>, StoreError> {
        let state = self.state.read().await;
        let mut shifts: Vec<Shift> = state
            .shifts
            .values()
            .filter(|s| s.deleted_at.is_none())
            .filter(|s| query.overlaps(s.start_at, s.end_at))
            .filter(|s| {
                query.matches_scope(s.clinic_id, s.branch_id, Some(s.doctor_id), Some(s.cabinet_id))
            })
            .cloned()
            .collect();
        shifts.sort_by_key(|s| (s.start_at, s.id));
        Ok(shifts)
    }

    async fn insert_shift(&self, shift: NewShift) -> Result<Shift, StoreError> {
        let mut state = self.state.write().await;
        state.next_shift_id += 1;
        let created = Shift {
            id: state.next_shift_id,
            clinic_id: shift.clinic_id,
            branch_id: shift.branch_id,
            cabinet_id: shift.cabinet_id,
            doctor_id: shift.doctor_id,
            start_at: shift.start_at,
            end_at: shift.end_at,
            slot_duration_minutes: shift.slot_duration_minutes,
            deleted_at: None,
        };
        state.shifts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_shift(&self, shift: &Shift) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.shifts.get_mut(&shift.id) {
            Some(existing) => {
                *existing = shift.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("shift {}", shift.id))),
        }
    }

    async fn slots(&self, query: &ScheduleQuery) -> Result<Vec<Slot>, StoreError> {
        let state = self.state.read().await;
        let mut slots: Vec<Slot> = state
            .slots
            .values()
            .filter(|s| query.overlaps(s.start_at, s.end_at))
            .filter(|s| query.matches_scope(s.clinic_id, s.branch_id, s.doctor_id, s.cabinet_id))
            .cloned()
            .collect();
        slots.sort_by_key(|s| (s.start_at, s.id));
        Ok(slots)
    }

    async fn slot_by_external_id(
        &self,
        clinic_id: i64,
        branch_id: Option<i64>,
        external_slot_id: &str,
    ) -> Result<Option<Slot>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .slots
            .values()
            .filter(|s| {
                s.clinic_id == clinic_id
                    && s.branch_id == branch_id
                    && s.external_slot_id.as_deref() == Some(external_slot_id)
            })
            .max_by_key(|s| s.id)
            .cloned())
    }

    async fn slot_by_key(&self, key: &SlotKey) -> Result<Option<Slot>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .slots
            .values()
            .filter(|s| s.natural_key() == *key)
            .max_by_key(|s| (s.synced_at, s.id))
            .cloned())
    }

    async fn slots_by_booking_uuid(
        &self,
        clinic_id: i64,
        booking_uuid: &str,
    ) -> Result<Vec<Slot>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .slots
            .values()
            .filter(|s| s.clinic_id == clinic_id && s.booking_uuid.as_deref() == Some(booking_uuid))
            .cloned()
            .collect())
    }

    async fn insert_slot(&self, slot: NewSlot) -> Result<Slot, StoreError> {
        let mut state = self.state.write().await;
        state.next_slot_id += 1;
        let created = slot.with_id(state.next_slot_id);
        state.slots.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_slot(&self, slot: &Slot) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.slots.get_mut(&slot.id) {
            Some(existing) => {
                *existing = slot.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("slot {}", slot.id))),
        }
    }

    async fn purge_branch_slots(&self, branch_id: i64) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let before = state.slots.len();
        state.slots.retain(|_, s| s.branch_id != Some(branch_id));
        Ok((before - state.slots.len()) as u64)
    }

    async fn application(&self, application_id: Uuid) -> Result<Option<Application>, StoreError> {
        Ok(self.state.read().await.applications.get(&application_id).cloned())
    }

    async fn applications_by_external_id(
        &self,
        clinic_id: i64,
        external_appointment_id: &str,
    ) -> Result<Vec<Application>, StoreError> {
        let state = self.state.read().await;
        let mut found: Vec<Application> = state
            .applications
            .values()
            .filter(|a| {
                a.clinic_id == clinic_id
                    && a.external_appointment_id.as_deref() == Some(external_appointment_id)
            })
            .cloned()
            .collect();
        found.sort_by_key(|a| a.created_at);
        Ok(found)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        // Validate first so a failing change leaves nothing half-applied.
        for change in changes.changes() {
            if let Change::SaveSlot(slot) = change {
                if !state.slots.contains_key(&slot.id) {
                    return Err(StoreError::NotFound(format!("slot {}", slot.id)));
                }
            }
        }

        for change in changes.changes() {
            match change {
                Change::SaveApplication(application) => {
                    state.applications.insert(application.id, application.clone());
                }
                Change::DeleteApplication(application_id) => {
                    state.applications.remove(application_id);
                }
                Change::SaveSlot(slot) => {
                    state.slots.insert(slot.id, slot.clone());
                }
            }
        }

        debug!("Committed {} staged changes", changes.len());
        Ok(())
    }
}
