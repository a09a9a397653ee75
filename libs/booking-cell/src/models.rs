// libs/booking-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use shared_database::StoreError;
use shared_models::error::AppError;
use shared_models::scheduling::{Application, ApplicationData, AppointmentSource};

// ==============================================================================
// ERRORS
// ==============================================================================

/// Failure reported by the external scheduler, with what it sent back.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ExternalBookingError {
    /// `None` when the request never got a response (timeout, connect error).
    pub status: Option<u16>,
    pub body: String,
    pub message: String,
}

impl ExternalBookingError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: String::new(),
            message: message.into(),
        }
    }

    /// Builds the error from a non-success response, pulling the remote
    /// message out of `detail`/`message`/`error` when the body is JSON.
    pub fn from_response(status: u16, body: String) -> Self {
        let message = remote_detail(&body)
            .unwrap_or_else(|| format!("External scheduler responded with status {}", status));
        Self {
            status: Some(status),
            body,
            message,
        }
    }
}

/// Free-text detail of an error body, if there is any.
pub fn remote_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => ["detail", "message", "error"]
            .iter()
            .find_map(|key| match map.get(*key) {
                Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
                Some(Value::Object(nested)) => nested
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            }),
        Ok(Value::String(text)) => Some(text),
        Ok(_) => None,
        Err(_) => Some(trimmed.to_string()),
    }
}

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("No active integration endpoint is configured for this branch")]
    IntegrationNotConfigured,

    #[error("Application has no external booking to cancel")]
    NoExternalClaim,

    #[error("External scheduler error: {0}")]
    External(ExternalBookingError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl BookingError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        BookingError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation { field, message } => AppError::validation(field, message),
            BookingError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            BookingError::IntegrationNotConfigured | BookingError::NoExternalClaim => {
                AppError::Conflict(err.to_string())
            }
            BookingError::External(e) => AppError::ExternalService(e.message),
            BookingError::Store(e) => AppError::Database(e.to_string()),
        }
    }
}

// ==============================================================================
// CONFLICTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCode {
    AlreadyGoneUpstream,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictOutcome {
    pub code: ConflictCode,
    pub message: String,
    pub can_force_delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancellationResult {
    pub application: Application,
    pub conflict: Option<ConflictOutcome>,
}

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BookingOptions {
    pub slot_external_id: Option<String>,
    pub comment: Option<String>,
    #[serde(default)]
    pub source: AppointmentSource,
}

/// Body of `POST /applications` and `PUT /applications/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationRequest {
    pub data: ApplicationData,
    #[serde(flatten)]
    pub options: BookingOptions,
}

// ==============================================================================
// 1C WIRE FORMAT
// ==============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OnecBookingRequest {
    pub application_id: String,
    pub branch_id: Option<String>,
    pub doctor_id: Option<String>,
    pub cabinet_id: Option<String>,
    /// Set when booking a mirrored slot; absent for direct bookings.
    pub slot_id: Option<String>,
    pub appointment_datetime: DateTime<Utc>,
    pub patient_name: String,
    pub patient_phone: Option<String>,
    pub patient_birth_date: Option<NaiveDate>,
    pub comment: Option<String>,
    pub source: AppointmentSource,
}

/// Reservation confirmed by 1C; `raw` is the full response body.
#[derive(Debug, Clone, PartialEq)]
pub struct OnecBooking {
    pub appointment_id: String,
    pub status: Option<String>,
    pub raw: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_is_read_from_known_keys() {
        assert_eq!(remote_detail(r#"{"detail": "Slot not found"}"#).as_deref(), Some("Slot not found"));
        assert_eq!(remote_detail(r#"{"message": "busy"}"#).as_deref(), Some("busy"));
        assert_eq!(remote_detail(r#"{"error": {"message": "nested"}}"#).as_deref(), Some("nested"));
        assert_eq!(remote_detail("plain text").as_deref(), Some("plain text"));
        assert_eq!(remote_detail("  "), None);
        assert_eq!(remote_detail(r#"{"code": 1}"#), None);
    }

    #[test]
    fn response_error_falls_back_to_status_message() {
        let err = ExternalBookingError::from_response(500, String::new());
        assert_eq!(err.status, Some(500));
        assert!(err.message.contains("500"));
    }
}
