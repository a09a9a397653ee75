// libs/shared/database/src/store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::scheduling::{
    Application, Branch, Cabinet, Clinic, Doctor, IntegrationEndpoint, NewShift, NewSlot,
    ScheduleQuery, Shift, Slot, SlotKey,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// One staged row mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", content = "row", rename_all = "snake_case")]
pub enum Change {
    SaveApplication(Application),
    DeleteApplication(Uuid),
    SaveSlot(Slot),
}

/// Local unit of work: mutations are staged here and applied all-or-nothing by
/// [`SchedulingStore::commit`]. Dropping a change set discards it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_application(&mut self, application: Application) -> &mut Self {
        self.changes.push(Change::SaveApplication(application));
        self
    }

    pub fn delete_application(&mut self, application_id: Uuid) -> &mut Self {
        self.changes.push(Change::DeleteApplication(application_id));
        self
    }

    pub fn save_slot(&mut self, slot: Slot) -> &mut Self {
        self.changes.push(Change::SaveSlot(slot));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndpointResult {
    Success { at: DateTime<Utc> },
    Failure { at: DateTime<Utc>, message: String },
}

/// Persistence port for the scheduling tables.
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    async fn clinic(&self, clinic_id: i64) -> Result<Option<Clinic>, StoreError>;

    async fn clinics(&self) -> Result<Vec<Clinic>, StoreError>;

    async fn branch(&self, branch_id: i64) -> Result<Option<Branch>, StoreError>;

    async fn branch_by_external_id(
        &self,
        clinic_id: i64,
        external_id: &str,
    ) -> Result<Option<Branch>, StoreError>;

    async fn doctor(&self, doctor_id: i64) -> Result<Option<Doctor>, StoreError>;

    async fn doctor_by_external_id(
        &self,
        clinic_id: i64,
        external_id: &str,
    ) -> Result<Option<Doctor>, StoreError>;

    async fn cabinet(&self, cabinet_id: i64) -> Result<Option<Cabinet>, StoreError>;

    async fn cabinet_by_external_id(
        &self,
        clinic_id: i64,
        external_id: &str,
    ) -> Result<Option<Cabinet>, StoreError>;

    async fn endpoints(&self, clinic_id: i64) -> Result<Vec<IntegrationEndpoint>, StoreError>;

    async fn record_endpoint_result(
        &self,
        endpoint_id: i64,
        result: EndpointResult,
    ) -> Result<(), StoreError>;

    async fn shift(&self, shift_id: i64) -> Result<Option<Shift>, StoreError>;

    /// Live (not soft-deleted) shifts overlapping the query range.
    async fn shifts(&self, query: &ScheduleQuery) -> Result<Vec<Shift>, StoreError>;

    async fn insert_shift(&self, shift: NewShift) -> Result<Shift, StoreError>;

    async fn update_shift(&self, shift: &Shift) -> Result<(), StoreError>;

    async fn slots(&self, query: &ScheduleQuery) -> Result<Vec<Slot>, StoreError>;

    async fn slot_by_external_id(
        &self,
        clinic_id: i64,
        branch_id: Option<i64>,
        external_slot_id: &str,
    ) -> Result<Option<Slot>, StoreError>;

    /// Newest row carrying this natural key, if any.
    async fn slot_by_key(&self, key: &SlotKey) -> Result<Option<Slot>, StoreError>;

    async fn slots_by_booking_uuid(
        &self,
        clinic_id: i64,
        booking_uuid: &str,
    ) -> Result<Vec<Slot>, StoreError>;

    async fn insert_slot(&self, slot: NewSlot) -> Result<Slot, StoreError>;

    async fn update_slot(&self, slot: &Slot) -> Result<(), StoreError>;

    async fn purge_branch_slots(&self, branch_id: i64) -> Result<u64, StoreError>;

    async fn application(&self, application_id: Uuid) -> Result<Option<Application>, StoreError>;

    async fn applications_by_external_id(
        &self,
        clinic_id: i64,
        external_appointment_id: &str,
    ) -> Result<Vec<Application>, StoreError>;

    /// Applies every staged change atomically.
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;

    /// Branch-specific endpoint if one exists, otherwise the clinic-wide one.
    async fn endpoint_for_branch(
        &self,
        branch: &Branch,
    ) -> Result<Option<IntegrationEndpoint>, StoreError> {
        let endpoints = self.endpoints(branch.clinic_id).await?;

        let own = endpoints
            .iter()
            .find(|endpoint| endpoint.branch_id == Some(branch.id))
            .cloned();

        Ok(own.or_else(|| {
            endpoints
                .into_iter()
                .find(|endpoint| endpoint.branch_id.is_none())
        }))
    }

    /// Resolved endpoint only when it is switched on.
    async fn active_endpoint_for_branch(
        &self,
        branch: &Branch,
    ) -> Result<Option<IntegrationEndpoint>, StoreError> {
        Ok(self
            .endpoint_for_branch(branch)
            .await?
            .filter(|endpoint| endpoint.is_active))
    }
}
