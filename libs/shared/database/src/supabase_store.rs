// libs/shared/database/src/supabase_store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::scheduling::{
    Application, Branch, Cabinet, Clinic, Doctor, IntegrationEndpoint, NewShift, NewSlot,
    ScheduleQuery, Shift, Slot, SlotKey,
};

use crate::store::{ChangeSet, EndpointResult, SchedulingStore, StoreError};
use crate::supabase::SupabaseClient;

/// Scheduling tables served through PostgREST. Multi-row commits go through
/// the `apply_scheduling_changes` database function so they run in one
/// Postgres transaction.
pub struct SupabaseSchedulingStore {
    supabase: SupabaseClient,
}

impl SupabaseSchedulingStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    async fn select<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, StoreError> {
        let rows: Vec<Value> = self.supabase.request(Method::GET, path, None, None).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(StoreError::from))
            .collect()
    }

    async fn select_one<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        Ok(self.select(path).await?.into_iter().next())
    }

    async fn insert<T: DeserializeOwned>(&self, table: &str, row: Value) -> Result<T, StoreError> {
        let created: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                &format!("/rest/v1/{}", table),
                None,
                Some(row),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;

        let first = created
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend(format!("insert into {} returned no row", table)))?;
        Ok(serde_json::from_value(first)?)
    }

    async fn patch(&self, table: &str, id: i64, row: Value) -> Result<(), StoreError> {
        let updated: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &format!("/rest/v1/{}?id=eq.{}", table, id),
                None,
                Some(row),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;

        if updated.is_empty() {
            return Err(StoreError::NotFound(format!("{} {}", table, id)));
        }
        Ok(())
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    urlencoding::encode(&value.to_rfc3339()).into_owned()
}

fn in_list(ids: &[i64]) -> String {
    let joined = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
    format!("in.({})", joined)
}

fn eq_or_null(value: Option<i64>) -> String {
    match value {
        Some(v) => format!("eq.{}", v),
        None => "is.null".to_string(),
    }
}

/// PostgREST filter string for a schedule query over `start_at`/`end_at` rows.
fn schedule_filters(query: &ScheduleQuery) -> Vec<String> {
    let mut parts = Vec::new();

    if let Some(clinic_id) = query.clinic_id {
        parts.push(format!("clinic_id=eq.{}", clinic_id));
    }
    if let Some(from) = query.from {
        parts.push(format!("end_at=gte.{}", timestamp(from)));
    }
    if let Some(to) = query.to {
        parts.push(format!("start_at=lte.{}", timestamp(to)));
    }
    if !query.branch_ids.is_empty() {
        parts.push(format!("branch_id={}", in_list(&query.branch_ids)));
    }
    if !query.doctor_ids.is_empty() {
        parts.push(format!("doctor_id={}", in_list(&query.doctor_ids)));
    }
    if !query.cabinet_ids.is_empty() {
        parts.push(format!("cabinet_id={}", in_list(&query.cabinet_ids)));
    }

    parts
}

#[async_trait]
impl SchedulingStore for SupabaseSchedulingStore {
    async fn clinic(&self, clinic_id: i64) -> Result<Option<Clinic>, StoreError> {
        self.select_one(&format!("/rest/v1/clinics?id=eq.{}", clinic_id)).await
    }

    async fn clinics(&self) -> Result<Vec<Clinic>, StoreError> {
        self.select("/rest/v1/clinics?order=id.asc").await
    }

    async fn branch(&self, branch_id: i64) -> Result<Option<Branch>, StoreError> {
        self.select_one(&format!("/rest/v1/branches?id=eq.{}", branch_id)).await
    }

    async fn branch_by_external_id(
        &self,
        clinic_id: i64,
        external_id: &str,
    ) -> Result<Option<Branch>, StoreError> {
        self.select_one(&format!(
            "/rest/v1/branches?clinic_id=eq.{}&external_id=eq.{}",
            clinic_id,
            urlencoding::encode(external_id)
        ))
        .await
    }

    async fn doctor(&self, doctor_id: i64) -> Result<Option<Doctor>, StoreError> {
        self.select_one(&format!("/rest/v1/doctors?id=eq.{}", doctor_id)).await
    }

    async fn cabinet(&self, cabinet_id: i64) -> Result<Option<Cabinet>, StoreError> {
        self.select_one(&format!("/rest/v1/cabinets?id=eq.{}", cabinet_id)).await
    }

    async fn doctor_by_external_id(
        &self,
        clinic_id: i64,
        external_id: &str,
    ) -> Result<Option<Doctor>, StoreError> {
        self.select_one(&format!(
            "/rest/v1/doctors?clinic_id=eq.{}&external_id=eq.{}",
            clinic_id,
            urlencoding::encode(external_id)
        ))
        .await
    }

    async fn cabinet_by_external_id(
        &self,
        clinic_id: i64,
        external_id: &str,
    ) -> Result<Option<Cabinet>, StoreError> {
        self.select_one(&format!(
            "/rest/v1/cabinets?clinic_id=eq.{}&external_id=eq.{}",
            clinic_id,
            urlencoding::encode(external_id)
        ))
        .await
    }

    async fn endpoints(&self, clinic_id: i64) -> Result<Vec<IntegrationEndpoint>, StoreError> {
        self.select(&format!(
            "/rest/v1/integration_endpoints?clinic_id=eq.{}&order=id.asc",
            clinic_id
        ))
        .await
    }

    async fn record_endpoint_result(
        &self,
        endpoint_id: i64,
        result: EndpointResult,
    ) -> Result<(), StoreError> {
        let row = match result {
            EndpointResult::Success { at } => json!({ "last_success_at": at }),
            EndpointResult::Failure { at, message } => json!({
                "last_error_at": at,
                "last_error_message": message
            }),
        };
        self.patch("integration_endpoints", endpoint_id, row).await
    }

    async fn shift(&self, shift_id: i64) -> Result<Option<Shift>, StoreError> {
        self.select_one(&format!("/rest/v1/shifts?id=eq.{}", shift_id)).await
    }

    async fn shifts(&self, query: &ScheduleQuery) -> Result<Vec<Shift>, StoreError> {
        let mut parts = schedule_filters(query);
        parts.push("deleted_at=is.null".to_string());
        parts.push("order=start_at.asc,id.asc".to_string());
        self.select(&format!("/rest/v1/shifts?{}", parts.join("&"))).await
    }

    async fn insert_shift(&self, shift: NewShift) -> Result<Shift, StoreError> {
        self.insert("shifts", serde_json::to_value(&shift)?).await
    }

    async fn update_shift(&self, shift: &Shift) -> Result<(), StoreError> {
        self.patch("shifts", shift.id, serde_json::to_value(shift)?).await
    }

    async fn slots(&self, query: &ScheduleQuery) -> Result<Vec<Slot>, StoreError> {
        let mut parts = schedule_filters(query);
        parts.push("order=start_at.asc,id.asc".to_string());
        self.select(&format!("/rest/v1/slots?{}", parts.join("&"))).await
    }

    async fn slot_by_external_id(
        &self,
        clinic_id: i64,
        branch_id: Option<i64>,
        external_slot_id: &str,
    ) -> Result<Option<Slot>, StoreError> {
        self.select_one(&format!(
            "/rest/v1/slots?clinic_id=eq.{}&branch_id={}&external_slot_id=eq.{}&order=id.desc&limit=1",
            clinic_id,
            eq_or_null(branch_id),
            urlencoding::encode(external_slot_id)
        ))
        .await
    }

    async fn slot_by_key(&self, key: &SlotKey) -> Result<Option<Slot>, StoreError> {
        self.select_one(&format!(
            "/rest/v1/slots?clinic_id=eq.{}&branch_id={}&doctor_id={}&cabinet_id={}&start_at=eq.{}&end_at=eq.{}&order=synced_at.desc,id.desc&limit=1",
            key.clinic_id,
            eq_or_null(key.branch_id),
            eq_or_null(key.doctor_id),
            eq_or_null(key.cabinet_id),
            timestamp(key.start_at),
            timestamp(key.end_at)
        ))
        .await
    }

    async fn slots_by_booking_uuid(
        &self,
        clinic_id: i64,
        booking_uuid: &str,
    ) -> Result<Vec<Slot>, StoreError> {
        self.select(&format!(
            "/rest/v1/slots?clinic_id=eq.{}&booking_uuid=eq.{}",
            clinic_id,
            urlencoding::encode(booking_uuid)
        ))
        .await
    }

    async fn insert_slot(&self, slot: NewSlot) -> Result<Slot, StoreError> {
        self.insert("slots", serde_json::to_value(&slot)?).await
    }

    async fn update_slot(&self, slot: &Slot) -> Result<(), StoreError> {
        self.patch("slots", slot.id, serde_json::to_value(slot)?).await
    }

    async fn purge_branch_slots(&self, branch_id: i64) -> Result<u64, StoreError> {
        let deleted: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &format!("/rest/v1/slots?branch_id=eq.{}", branch_id),
                None,
                None,
                Some(SupabaseClient::representation_headers()),
            )
            .await?;
        Ok(deleted.len() as u64)
    }

    async fn application(&self, application_id: Uuid) -> Result<Option<Application>, StoreError> {
        self.select_one(&format!("/rest/v1/applications?id=eq.{}", application_id)).await
    }

    async fn applications_by_external_id(
        &self,
        clinic_id: i64,
        external_appointment_id: &str,
    ) -> Result<Vec<Application>, StoreError> {
        self.select(&format!(
            "/rest/v1/applications?clinic_id=eq.{}&external_appointment_id=eq.{}&order=created_at.asc",
            clinic_id,
            urlencoding::encode(external_appointment_id)
        ))
        .await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        debug!("Committing {} staged changes through rpc", changes.len());

        let _: Value = self
            .supabase
            .request(
                Method::POST,
                "/rest/v1/rpc/apply_scheduling_changes",
                None,
                Some(json!({ "changes": changes.changes() })),
            )
            .await?;
        Ok(())
    }
}
