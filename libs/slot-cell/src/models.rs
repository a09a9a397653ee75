// libs/slot-cell/src/models.rs
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use shared_database::StoreError;
use shared_models::error::AppError;
use shared_models::scheduling::SlotStatus;

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum SlotError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl SlotError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        SlotError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ShiftError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Shift {0} not found")]
    NotFound(i64),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<SlotError> for AppError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::Validation { field, message } => AppError::validation(field, message),
            SlotError::NotFound(what) => AppError::NotFound(what),
            SlotError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}

impl From<ShiftError> for AppError {
    fn from(err: ShiftError) -> Self {
        match err {
            ShiftError::Validation { field, message } => AppError::validation(field, message),
            ShiftError::NotFound(id) => AppError::NotFound(format!("Shift {} not found", id)),
            ShiftError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}

// ==============================================================================
// SLOT VIEWS
// ==============================================================================

/// A `[start, end)` window produced from a shift.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotSource {
    Local,
    Onec,
}

/// Read-only projection handed to the booking UI and calendar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub clinic_id: i64,
    pub branch_id: Option<i64>,
    pub cabinet_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub source: SlotSource,
    pub externally_occupied: bool,
    pub meta: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SlotFilters {
    pub clinic_id: Option<i64>,
    #[serde(default)]
    pub branch_ids: Vec<i64>,
    #[serde(default)]
    pub doctor_ids: Vec<i64>,
}

/// Query string of `GET /slots`; id lists are comma separated.
#[derive(Debug, Deserialize)]
pub struct SlotQueryParams {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub clinic_id: Option<i64>,
    pub branch_ids: Option<String>,
    pub doctor_ids: Option<String>,
}

impl SlotQueryParams {
    pub fn filters(&self) -> Result<SlotFilters, SlotError> {
        Ok(SlotFilters {
            clinic_id: self.clinic_id,
            branch_ids: parse_id_list("branch_ids", self.branch_ids.as_deref())?,
            doctor_ids: parse_id_list("doctor_ids", self.doctor_ids.as_deref())?,
        })
    }
}

fn parse_id_list(field: &str, raw: Option<&str>) -> Result<Vec<i64>, SlotError> {
    match raw {
        None => Ok(Vec::new()),
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<i64>()
                    .map_err(|_| SlotError::validation(field, format!("'{}' is not an id", part)))
            })
            .collect(),
    }
}

// ==============================================================================
// EXTERNAL SLOT RECORDS
// ==============================================================================

/// One slot as delivered by 1C, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSlotRecord {
    #[serde(default, alias = "id", deserialize_with = "string_or_number")]
    pub slot_id: Option<String>,
    #[serde(default, alias = "start_at")]
    pub start: Option<String>,
    #[serde(default, alias = "end_at")]
    pub end: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub free: Option<bool>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub doctor_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub cabinet_id: Option<String>,
    #[serde(default, alias = "claim_id", deserialize_with = "string_or_number")]
    pub booking_uuid: Option<String>,
}

/// A raw record that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSlotRecord {
    pub external_slot_id: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: SlotStatus,
    pub doctor_external_id: Option<String>,
    pub cabinet_external_id: Option<String>,
    pub booking_uuid: Option<String>,
}

impl RawSlotRecord {
    pub fn from_value(raw: &Value) -> Result<Self, SlotError> {
        if !raw.is_object() {
            return Err(SlotError::validation("record", "slot record must be an object"));
        }
        serde_json::from_value(raw.clone())
            .map_err(|e| SlotError::validation("record", e.to_string()))
    }

    /// Validates required fields; naive times are read in `offset`.
    pub fn parse(&self, offset: FixedOffset) -> Result<ParsedSlotRecord, SlotError> {
        let start_raw = self
            .start
            .as_deref()
            .ok_or_else(|| SlotError::validation("start", "missing"))?;
        let end_raw = self
            .end
            .as_deref()
            .ok_or_else(|| SlotError::validation("end", "missing"))?;

        let start_at = parse_timestamp(start_raw, offset)
            .ok_or_else(|| SlotError::validation("start", format!("unreadable time '{}'", start_raw)))?;
        let end_at = parse_timestamp(end_raw, offset)
            .ok_or_else(|| SlotError::validation("end", format!("unreadable time '{}'", end_raw)))?;

        if start_at >= end_at {
            return Err(SlotError::validation("end", "slot must end after it starts"));
        }

        let status = match (self.status.as_deref(), self.free) {
            (Some(raw), _) => SlotStatus::parse(raw)
                .ok_or_else(|| SlotError::validation("status", format!("unknown status '{}'", raw)))?,
            (None, Some(true)) => SlotStatus::Free,
            (None, Some(false)) => SlotStatus::Booked,
            (None, None) => return Err(SlotError::validation("status", "missing")),
        };

        Ok(ParsedSlotRecord {
            external_slot_id: self.slot_id.clone().filter(|id| !id.is_empty()),
            start_at,
            end_at,
            status,
            doctor_external_id: self.doctor_id.clone().filter(|id| !id.is_empty()),
            cabinet_external_id: self.cabinet_id.clone().filter(|id| !id.is_empty()),
            booking_uuid: self.booking_uuid.clone().filter(|id| !id.is_empty()),
        })
    }
}

/// RFC 3339 with offset, or a naive `YYYY-MM-DD[T ]HH:MM[:SS]` in `offset`.
pub fn parse_timestamp(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|local| local.with_timezone(&Utc))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Identical payload re-delivered; only `synced_at` moved.
    Unchanged,
}

/// Per-branch counters of one batch import.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImportStats {
    pub received: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl ImportStats {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn written(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

// ==============================================================================
// SHIFT REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateShiftRequest {
    pub clinic_id: i64,
    pub branch_id: Option<i64>,
    pub cabinet_id: i64,
    pub doctor_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub slot_duration_minutes: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateShiftRequest {
    pub branch_id: Option<i64>,
    pub cabinet_id: Option<i64>,
    pub doctor_id: Option<i64>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub slot_duration_minutes: Option<i64>,
}
