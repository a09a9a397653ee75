// libs/shared/models/src/scheduling.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CLINIC STRUCTURE
// ==============================================================================

/// How a clinic produces bookable slots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotMode {
    /// Slots are expanded on read from staff-maintained shifts.
    Local,
    /// Slots are mirrored from 1C schedule pushes.
    OnecPush,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clinic {
    pub id: i64,
    pub name: String,
    pub slot_mode: SlotMode,
    /// Offset used to read naive wall-clock times in 1C payloads.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    pub id: i64,
    pub clinic_id: i64,
    pub name: String,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Doctor {
    pub id: i64,
    pub clinic_id: i64,
    pub full_name: String,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cabinet {
    pub id: i64,
    pub clinic_id: i64,
    pub branch_id: Option<i64>,
    pub name: String,
    pub external_id: Option<String>,
}

/// Connection settings for a 1C instance. `branch_id == None` marks a
/// clinic-wide endpoint inherited by branches without their own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrationEndpoint {
    pub id: i64,
    pub clinic_id: i64,
    pub branch_id: Option<i64>,
    pub base_url: String,
    pub api_token: String,
    pub webhook_secret: String,
    pub is_active: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
}

// ==============================================================================
// SLOTS & SHIFTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Free,
    Booked,
    Blocked,
}

impl SlotStatus {
    /// Lenient parser for the status vocabulary used by 1C payloads.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "free" | "available" | "open" => Some(SlotStatus::Free),
            "booked" | "busy" | "reserved" | "taken" => Some(SlotStatus::Booked),
            "blocked" | "closed" | "unavailable" => Some(SlotStatus::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotStatus::Free => write!(f, "free"),
            SlotStatus::Booked => write!(f, "booked"),
            SlotStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// A persisted slot mirrored from 1C.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub id: i64,
    pub clinic_id: i64,
    pub branch_id: Option<i64>,
    pub cabinet_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub external_slot_id: Option<String>,
    pub booking_uuid: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: SlotStatus,
    pub payload_hash: String,
    pub source_payload: Value,
    pub synced_at: DateTime<Utc>,
}

impl Slot {
    pub fn natural_key(&self) -> SlotKey {
        SlotKey {
            clinic_id: self.clinic_id,
            branch_id: self.branch_id,
            doctor_id: self.doctor_id,
            cabinet_id: self.cabinet_id,
            start_at: self.start_at,
            end_at: self.end_at,
        }
    }
}

/// Slot row before the store assigns an id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSlot {
    pub clinic_id: i64,
    pub branch_id: Option<i64>,
    pub cabinet_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub external_slot_id: Option<String>,
    pub booking_uuid: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: SlotStatus,
    pub payload_hash: String,
    pub source_payload: Value,
    pub synced_at: DateTime<Utc>,
}

impl NewSlot {
    pub fn with_id(self, id: i64) -> Slot {
        Slot {
            id,
            clinic_id: self.clinic_id,
            branch_id: self.branch_id,
            cabinet_id: self.cabinet_id,
            doctor_id: self.doctor_id,
            external_slot_id: self.external_slot_id,
            booking_uuid: self.booking_uuid,
            start_at: self.start_at,
            end_at: self.end_at,
            status: self.status,
            payload_hash: self.payload_hash,
            source_payload: self.source_payload,
            synced_at: self.synced_at,
        }
    }
}

/// Natural identity of a physical time window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub clinic_id: i64,
    pub branch_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub cabinet_id: Option<i64>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shift {
    pub id: i64,
    pub clinic_id: i64,
    pub branch_id: Option<i64>,
    pub cabinet_id: i64,
    pub doctor_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub slot_duration_minutes: i64,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewShift {
    pub clinic_id: i64,
    pub branch_id: Option<i64>,
    pub cabinet_id: i64,
    pub doctor_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub slot_duration_minutes: i64,
}

/// Range/scope filter shared by slot and shift lookups. `None` fields are
/// unrestricted; list filters restrict when non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScheduleQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub clinic_id: Option<i64>,
    pub branch_ids: Vec<i64>,
    pub doctor_ids: Vec<i64>,
    pub cabinet_ids: Vec<i64>,
}

impl ScheduleQuery {
    /// Inclusive-range overlap test against `[start, end]`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let after_from = self.from.map_or(true, |from| end >= from);
        let before_to = self.to.map_or(true, |to| start <= to);
        after_from && before_to
    }

    pub fn matches_scope(
        &self,
        clinic_id: i64,
        branch_id: Option<i64>,
        doctor_id: Option<i64>,
        cabinet_id: Option<i64>,
    ) -> bool {
        fn listed(filter: &[i64], value: Option<i64>) -> bool {
            filter.is_empty() || value.map_or(false, |v| filter.contains(&v))
        }

        self.clinic_id.map_or(true, |id| id == clinic_id)
            && listed(&self.branch_ids, branch_id)
            && listed(&self.doctor_ids, doctor_id)
            && listed(&self.cabinet_ids, cabinet_id)
    }
}

// ==============================================================================
// APPLICATIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationType {
    #[default]
    None,
    Onec,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentSource {
    #[default]
    Admin,
    Website,
    Telegram,
    Phone,
}

impl fmt::Display for AppointmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentSource::Admin => write!(f, "admin"),
            AppointmentSource::Website => write!(f, "website"),
            AppointmentSource::Telegram => write!(f, "telegram"),
            AppointmentSource::Phone => write!(f, "phone"),
        }
    }
}

/// The local appointment request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Application {
    pub id: Uuid,
    pub clinic_id: i64,
    pub branch_id: Option<i64>,
    pub cabinet_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub patient_name: String,
    pub patient_phone: Option<String>,
    pub patient_birth_date: Option<NaiveDate>,
    pub appointment_datetime: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    pub source: AppointmentSource,
    pub integration_type: IntegrationType,
    pub external_appointment_id: Option<String>,
    pub integration_status: Option<SlotStatus>,
    pub integration_payload: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// True while the application believes it holds a 1C reservation.
    pub fn is_claimed(&self) -> bool {
        self.external_appointment_id.is_some()
    }

    pub fn clear_claim(&mut self) {
        self.integration_type = IntegrationType::None;
        self.external_appointment_id = None;
        self.integration_status = None;
        self.integration_payload = None;
    }
}

/// Caller-editable application fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApplicationData {
    pub clinic_id: i64,
    pub branch_id: Option<i64>,
    pub cabinet_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub patient_name: String,
    pub patient_phone: Option<String>,
    pub patient_birth_date: Option<NaiveDate>,
    pub appointment_datetime: Option<DateTime<Utc>>,
}
