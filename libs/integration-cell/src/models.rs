// libs/integration-cell/src/models.rs
use std::collections::BTreeMap;

use chrono::NaiveDate;
use headers::{Header, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use shared_database::StoreError;
use shared_models::error::AppError;
use slot_cell::{ImportStats, SlotError};

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Integration token mismatch")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Slot error: {0}")]
    Slot(#[from] SlotError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<IngestionError> for AppError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::Unauthorized => AppError::Auth("Invalid integration token".to_string()),
            IngestionError::NotFound(msg) => AppError::NotFound(msg),
            IngestionError::Conflict(msg) => AppError::Conflict(msg),
            IngestionError::Malformed(msg) => AppError::BadRequest(msg),
            IngestionError::Slot(e) => e.into(),
            IngestionError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}

// ==============================================================================
// AUTH HEADER
// ==============================================================================

static INTEGRATION_TOKEN: HeaderName = HeaderName::from_static("x-integration-token");

/// `X-Integration-Token` shared secret sent by 1C.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationToken(pub String);

impl Header for IntegrationToken {
    fn name() -> &'static HeaderName {
        &INTEGRATION_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        values
            .next()
            .and_then(|value| value.to_str().ok())
            .map(|token| IntegrationToken(token.trim().to_string()))
            .ok_or_else(headers::Error::invalid)
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(value));
        }
    }
}

// ==============================================================================
// NORMALIZED BOOKING WEBHOOKS
// ==============================================================================

/// One schedule cell of a cells batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub slot_id: Option<String>,
    pub time_start: String,
    pub time_end: String,
    pub free: Option<bool>,
    pub status: Option<String>,
    pub claim_id: Option<String>,
    pub cabinet_id: Option<String>,
    pub raw: Value,
}

impl Cell {
    /// The cell explicitly reports itself free.
    pub fn flagged_free(&self) -> bool {
        self.free == Some(true)
            || self
                .status
                .as_deref()
                .map(|status| status.eq_ignore_ascii_case("free"))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellsBatch {
    pub doctor_id: String,
    pub date: NaiveDate,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleKind {
    #[serde(rename = "booking.created")]
    Created,
    #[serde(rename = "booking.updated")]
    Updated,
    #[serde(rename = "booking.cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    /// Slot record in the raw slot shape.
    pub slot: Value,
    pub booking_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundBookingEvent {
    Cells(CellsBatch),
    Lifecycle(LifecycleEvent),
}

/// Booking webhook after normalization, tagged with its branch.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingWebhook {
    pub branch_external_id: String,
    pub event: InboundBookingEvent,
}

// ==============================================================================
// NORMALIZED SCHEDULE PUSHES
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct BranchSlots {
    pub branch_external_id: String,
    pub slots: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleBatch {
    /// Came in the legacy 1C shape; such batches fail as a whole.
    pub legacy: bool,
    pub branches: Vec<BranchSlots>,
}

// ==============================================================================
// RESPONSES
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BookingIngestResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_slots: Option<usize>,
    /// Cells dropped because they could not be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchImportResult {
    /// HTTP-style outcome of this branch: 200 imported, 404 unresolved.
    pub status: u16,
    #[serde(flatten)]
    pub stats: ImportStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleIngestResult {
    pub status: String,
    pub stats: BTreeMap<String, BranchImportResult>,
}
