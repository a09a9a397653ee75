// =====================================================================================
// SCHEDULING STORE TESTS
// =====================================================================================

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio_test::assert_ok;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::{AppConfig, StoreBackend};
use shared_database::{ChangeSet, MemorySchedulingStore, SchedulingStore, StoreError, SupabaseSchedulingStore};
use shared_models::scheduling::{
    Application, AppointmentSource, IntegrationType, NewSlot, SlotMode, SlotStatus,
};

fn config(url: &str) -> AppConfig {
    AppConfig {
        supabase_url: url.to_string(),
        supabase_anon_key: "anon-key".to_string(),
        supabase_jwt_secret: "jwt-secret".to_string(),
        store_backend: StoreBackend::Supabase,
        onec_reconciliation_enabled: true,
        onec_auto_delete_freed: true,
        onec_request_timeout_secs: 5,
        slot_cache_ttl_secs: 60,
        server_port: 3000,
    }
}

fn application() -> Application {
    let now = Utc::now();
    Application {
        id: Uuid::new_v4(),
        clinic_id: 1,
        branch_id: None,
        cabinet_id: None,
        doctor_id: None,
        patient_name: "Jane Patient".to_string(),
        patient_phone: None,
        patient_birth_date: None,
        appointment_datetime: None,
        comment: None,
        source: AppointmentSource::Admin,
        integration_type: IntegrationType::None,
        external_appointment_id: None,
        integration_status: None,
        integration_payload: None,
        created_at: now,
        updated_at: now,
    }
}

fn new_slot() -> NewSlot {
    NewSlot {
        clinic_id: 1,
        branch_id: Some(10),
        cabinet_id: None,
        doctor_id: None,
        external_slot_id: Some("s1".to_string()),
        booking_uuid: None,
        start_at: Utc.with_ymd_and_hms(2030, 3, 4, 9, 0, 0).unwrap(),
        end_at: Utc.with_ymd_and_hms(2030, 3, 4, 9, 30, 0).unwrap(),
        status: SlotStatus::Free,
        payload_hash: "h".to_string(),
        source_payload: json!({}),
        synced_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_memory_commit_is_all_or_nothing() {
    let store = MemorySchedulingStore::new();
    let slot = store.insert_slot(new_slot()).await.unwrap();

    let mut ghost = slot.clone();
    ghost.id = 999;
    let mut booked = slot.clone();
    booked.status = SlotStatus::Booked;

    let mut changes = ChangeSet::new();
    changes.save_application(application()).save_slot(booked).save_slot(ghost);

    assert_matches!(store.commit(changes).await, Err(StoreError::NotFound(_)));
    assert_eq!(store.application_count().await, 0);
    assert_eq!(
        store.slot_by_external_id(1, Some(10), "s1").await.unwrap().unwrap().status,
        SlotStatus::Free
    );
}

#[tokio::test]
async fn test_memory_commit_applies_deletes() {
    let store = MemorySchedulingStore::new();
    let application = application();

    let mut changes = ChangeSet::new();
    changes.save_application(application.clone());
    assert_ok!(store.commit(changes).await);
    assert_eq!(store.application_count().await, 1);

    let mut changes = ChangeSet::new();
    changes.delete_application(application.id);
    assert_ok!(store.commit(changes).await);
    assert!(store.application(application.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_supabase_reads_clinic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/clinics"))
        .and(query_param("id", "eq.1"))
        .and(header("apikey", "anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "name": "Clinic", "slot_mode": "onec_push", "utc_offset_minutes": 180}
        ])))
        .mount(&server)
        .await;

    let store = SupabaseSchedulingStore::new(&config(&server.uri()));
    let clinic = store.clinic(1).await.unwrap().unwrap();

    assert_eq!(clinic.slot_mode, SlotMode::OnecPush);
    assert_eq!(clinic.utc_offset_minutes, 180);
}

#[tokio::test]
async fn test_supabase_commit_goes_through_one_rpc() {
    let server = MockServer::start().await;
    let application = application();
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/apply_scheduling_changes"))
        .and(body_partial_json(json!({
            "changes": [{"op": "delete_application", "row": application.id}]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = SupabaseSchedulingStore::new(&config(&server.uri()));
    let mut changes = ChangeSet::new();
    changes.delete_application(application.id);

    assert_ok!(store.commit(changes).await);
    assert_ok!(store.commit(ChangeSet::new()).await);
}

#[tokio::test]
async fn test_supabase_errors_surface_as_backend_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/branches"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let store = SupabaseSchedulingStore::new(&config(&server.uri()));
    assert_matches!(store.branch(10).await, Err(StoreError::Backend(_)));
}
