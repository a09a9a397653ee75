use std::sync::Arc;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::{AppConfig, StoreBackend};
use shared_database::MemorySchedulingStore;
use shared_models::auth::User;
use shared_models::scheduling::{
    Branch, Cabinet, Clinic, Doctor, IntegrationEndpoint, SlotMode,
};

pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const TEST_CLINIC_ID: i64 = 1;
pub const TEST_BRANCH_ID: i64 = 10;
pub const TEST_BRANCH_EXTERNAL_ID: &str = "filial-10";
pub const TEST_DOCTOR_ID: i64 = 100;
pub const TEST_DOCTOR_EXTERNAL_ID: &str = "emp-100";
pub const TEST_CABINET_ID: i64 = 200;
pub const TEST_CABINET_EXTERNAL_ID: &str = "cab-200";
pub const TEST_ENDPOINT_ID: i64 = 1000;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            store_backend: StoreBackend::Memory,
            onec_reconciliation_enabled: true,
            onec_auto_delete_freed: true,
            onec_request_timeout_secs: 5,
            slot_cache_ttl_secs: 60,
            server_port: 3000,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub role: String,
    pub clinic_id: Option<i64>,
    pub doctor_id: Option<i64>,
}

impl TestUser {
    pub fn super_admin() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: "super_admin".to_string(),
            clinic_id: None,
            doctor_id: None,
        }
    }

    pub fn partner(clinic_id: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: "partner".to_string(),
            clinic_id: Some(clinic_id),
            doctor_id: None,
        }
    }

    pub fn doctor(clinic_id: i64, doctor_id: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: "doctor".to_string(),
            clinic_id: Some(clinic_id),
            doctor_id: Some(doctor_id),
        }
    }

    pub fn app_metadata(&self) -> Value {
        json!({
            "role": self.role,
            "clinic_id": self.clinic_id,
            "doctor_id": self.doctor_id
        })
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(format!("{}@clinic.test", self.role)),
            role: Some("authenticated".to_string()),
            metadata: Some(self.app_metadata()),
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "role": "authenticated",
            "app_metadata": user.app_metadata(),
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }
}

/// Seed rows shared by the cell test suites.
pub struct SchedulingFixtures;

impl SchedulingFixtures {
    pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, 4, hour, minute, 0).unwrap()
    }

    pub fn clinic(slot_mode: SlotMode) -> Clinic {
        Clinic {
            id: TEST_CLINIC_ID,
            name: "Test Clinic".to_string(),
            slot_mode,
            utc_offset_minutes: 0,
        }
    }

    pub fn branch() -> Branch {
        Branch {
            id: TEST_BRANCH_ID,
            clinic_id: TEST_CLINIC_ID,
            name: "Main branch".to_string(),
            external_id: Some(TEST_BRANCH_EXTERNAL_ID.to_string()),
        }
    }

    pub fn endpoint(base_url: &str) -> IntegrationEndpoint {
        IntegrationEndpoint {
            id: TEST_ENDPOINT_ID,
            clinic_id: TEST_CLINIC_ID,
            branch_id: Some(TEST_BRANCH_ID),
            base_url: base_url.to_string(),
            api_token: "onec-api-token".to_string(),
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            is_active: true,
            last_success_at: None,
            last_error_at: None,
            last_error_message: None,
        }
    }

    /// Clinic, branch, doctor and cabinet; an endpoint only when `onec_url` is given.
    pub async fn seeded_store(slot_mode: SlotMode, onec_url: Option<&str>) -> Arc<MemorySchedulingStore> {
        let store = Arc::new(MemorySchedulingStore::new());
        store.add_clinic(Self::clinic(slot_mode)).await;
        store.add_branch(Self::branch()).await;
        store
            .add_doctor(Doctor {
                id: TEST_DOCTOR_ID,
                clinic_id: TEST_CLINIC_ID,
                full_name: "Dr. Test".to_string(),
                external_id: Some(TEST_DOCTOR_EXTERNAL_ID.to_string()),
            })
            .await;
        store
            .add_cabinet(Cabinet {
                id: TEST_CABINET_ID,
                clinic_id: TEST_CLINIC_ID,
                branch_id: Some(TEST_BRANCH_ID),
                name: "Cabinet 1".to_string(),
                external_id: Some(TEST_CABINET_EXTERNAL_ID.to_string()),
            })
            .await;
        if let Some(url) = onec_url {
            store.add_endpoint(Self::endpoint(url)).await;
        }
        store
    }

    /// Raw slot record in the structured push shape.
    pub fn raw_slot(slot_id: &str, start: DateTime<Utc>, end: DateTime<Utc>, status: &str) -> Value {
        json!({
            "slot_id": slot_id,
            "start": start.to_rfc3339(),
            "end": end.to_rfc3339(),
            "status": status,
            "doctor_id": TEST_DOCTOR_EXTERNAL_ID,
            "cabinet_id": TEST_CABINET_EXTERNAL_ID
        })
    }
}

pub struct MockOnecResponses;

impl MockOnecResponses {
    pub fn booking_created(appointment_id: &str) -> Value {
        json!({
            "appointment_id": appointment_id,
            "status": "booked",
            "created_at": "2030-03-01T00:00:00Z"
        })
    }

    pub fn error_response(detail: &str) -> Value {
        json!({
            "detail": detail
        })
    }
}
