use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    /// `app_metadata` claim; carries the staff role and clinic/doctor binding.
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    SuperAdmin,
    Partner,
    Doctor,
}

/// Visibility scope of the staff member calling the scheduling API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: ActorRole,
    pub clinic_id: Option<i64>,
    pub doctor_id: Option<i64>,
}

impl Actor {
    pub fn super_admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: ActorRole::SuperAdmin,
            clinic_id: None,
            doctor_id: None,
        }
    }

    pub fn partner(user_id: impl Into<String>, clinic_id: i64) -> Self {
        Self {
            user_id: user_id.into(),
            role: ActorRole::Partner,
            clinic_id: Some(clinic_id),
            doctor_id: None,
        }
    }

    pub fn doctor(user_id: impl Into<String>, clinic_id: i64, doctor_id: i64) -> Self {
        Self {
            user_id: user_id.into(),
            role: ActorRole::Doctor,
            clinic_id: Some(clinic_id),
            doctor_id: Some(doctor_id),
        }
    }

    /// Builds the actor from the `app_metadata` claim of a validated token.
    pub fn from_user(user: &User) -> Result<Self, AppError> {
        let metadata = user
            .metadata
            .as_ref()
            .ok_or_else(|| AppError::Forbidden("Token carries no staff metadata".to_string()))?;

        let role: ActorRole = metadata
            .get("role")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|_| AppError::Forbidden("Unknown staff role".to_string()))?
            .ok_or_else(|| AppError::Forbidden("Token carries no staff role".to_string()))?;

        let clinic_id = metadata.get("clinic_id").and_then(|v| v.as_i64());
        let doctor_id = metadata.get("doctor_id").and_then(|v| v.as_i64());

        match role {
            ActorRole::SuperAdmin => Ok(Self::super_admin(user.id.clone())),
            ActorRole::Partner => clinic_id
                .map(|clinic_id| Self::partner(user.id.clone(), clinic_id))
                .ok_or_else(|| AppError::Forbidden("Partner account is not bound to a clinic".to_string())),
            ActorRole::Doctor => match (clinic_id, doctor_id) {
                (Some(clinic_id), Some(doctor_id)) => Ok(Self::doctor(user.id.clone(), clinic_id, doctor_id)),
                _ => Err(AppError::Forbidden("Doctor account is not bound to a doctor profile".to_string())),
            },
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == ActorRole::SuperAdmin
    }

    pub fn can_access_clinic(&self, clinic_id: i64) -> bool {
        match self.role {
            ActorRole::SuperAdmin => true,
            _ => self.clinic_id == Some(clinic_id),
        }
    }
}
