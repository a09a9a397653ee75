// =====================================================================================
// WEBHOOK INGESTION TESTS
// =====================================================================================

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use integration_cell::{
    IngestionError, NullCellReconciler, OnecCellReconciler, WebhookIngestionService,
};
use performance_cell::{InMemorySlotCache, SlotCache};
use shared_database::{ChangeSet, MemorySchedulingStore, SchedulingStore};
use shared_models::scheduling::{
    Application, AppointmentSource, Branch, IntegrationType, ScheduleQuery, Slot, SlotMode,
    SlotStatus,
};
use shared_utils::test_utils::{
    SchedulingFixtures, TEST_BRANCH_EXTERNAL_ID, TEST_BRANCH_ID, TEST_CLINIC_ID,
    TEST_DOCTOR_EXTERNAL_ID, TEST_DOCTOR_ID, TEST_WEBHOOK_SECRET,
};

const ONEC_URL: &str = "http://onec.invalid";

struct Harness {
    store: Arc<MemorySchedulingStore>,
    service: WebhookIngestionService,
}

async fn harness(slot_mode: SlotMode, reconcile: bool, auto_delete: bool) -> Harness {
    let store = SchedulingFixtures::seeded_store(slot_mode, Some(ONEC_URL)).await;
    let dyn_store: Arc<dyn SchedulingStore> = store.clone();
    let cache: Arc<dyn SlotCache> = Arc::new(InMemorySlotCache::new(Duration::from_secs(60)));
    let reconciler: Arc<dyn integration_cell::CellReconciler> = if reconcile {
        Arc::new(OnecCellReconciler::new(Arc::clone(&dyn_store), auto_delete))
    } else {
        Arc::new(NullCellReconciler)
    };

    Harness {
        service: WebhookIngestionService::new(dyn_store, reconciler, cache),
        store,
    }
}

async fn claimed_application(store: &MemorySchedulingStore, claim: &str) -> Uuid {
    let now = Utc::now();
    let application = Application {
        id: Uuid::new_v4(),
        clinic_id: TEST_CLINIC_ID,
        branch_id: None,
        cabinet_id: None,
        doctor_id: None,
        patient_name: "Jane Patient".to_string(),
        patient_phone: None,
        patient_birth_date: None,
        appointment_datetime: None,
        comment: None,
        source: AppointmentSource::Phone,
        integration_type: IntegrationType::Onec,
        external_appointment_id: Some(claim.to_string()),
        integration_status: Some(SlotStatus::Booked),
        integration_payload: None,
        created_at: now,
        updated_at: now,
    };
    let id = application.id;
    let mut changes = ChangeSet::new();
    changes.save_application(application);
    store.commit(changes).await.unwrap();
    id
}

async fn all_slots(store: &MemorySchedulingStore) -> Vec<Slot> {
    store.slots(&ScheduleQuery::default()).await.unwrap()
}

fn cells_payload(cells: Value) -> Value {
    json!({
        "branch_id": TEST_BRANCH_EXTERNAL_ID,
        "doctor_id": TEST_DOCTOR_EXTERNAL_ID,
        "date": "2030-03-04",
        "cells": cells
    })
}

fn token() -> Option<&'static str> {
    Some(TEST_WEBHOOK_SECRET)
}

// ==============================================================================
// CELLS BATCHES
// ==============================================================================

#[tokio::test]
async fn test_booked_cell_backfills_application() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let application_id = claimed_application(&h.store, "X").await;

    let payload = cells_payload(json!([
        {"slot_id": "c1", "time_start": "09:00", "time_end": "09:30", "free": false, "claim_id": "X"}
    ]));
    let result = h.service.ingest_booking_event(TEST_CLINIC_ID, token(), &payload).await.unwrap();

    assert_eq!(result.status, "accepted");
    assert_eq!(result.updated_slots, Some(1));
    assert_eq!(result.reconciled, Some(1));
    assert_eq!(result.deleted, Some(0));

    let application = h.store.application(application_id).await.unwrap().unwrap();
    assert_eq!(application.integration_status, Some(SlotStatus::Booked));
    assert_eq!(application.branch_id, Some(TEST_BRANCH_ID));
    assert_eq!(application.doctor_id, Some(TEST_DOCTOR_ID));
    assert_eq!(application.appointment_datetime, Some(SchedulingFixtures::at(9, 0)));
    assert!(application.integration_payload.is_some());
}

#[tokio::test]
async fn test_freed_cell_deletes_application() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let application_id = claimed_application(&h.store, "X").await;

    let payload = cells_payload(json!([
        {"slot_id": "c1", "time_start": "09:00", "time_end": "09:30", "free": true, "claim_id": "X"}
    ]));
    let result = h.service.ingest_booking_event(TEST_CLINIC_ID, token(), &payload).await.unwrap();

    assert_eq!(result.deleted, Some(1));
    assert!(h.store.application(application_id).await.unwrap().is_none());
    assert_eq!(all_slots(&h.store).await[0].status, SlotStatus::Free);
}

#[tokio::test]
async fn test_freed_cell_kept_when_auto_delete_disabled() {
    let h = harness(SlotMode::OnecPush, true, false).await;
    let application_id = claimed_application(&h.store, "X").await;

    let payload = cells_payload(json!([
        {"slot_id": "c1", "time_start": "09:00", "time_end": "09:30", "free": true, "claim_id": "X"}
    ]));
    let result = h.service.ingest_booking_event(TEST_CLINIC_ID, token(), &payload).await.unwrap();

    assert_eq!(result.deleted, Some(0));
    assert_eq!(result.reconciled, Some(1));
    let application = h.store.application(application_id).await.unwrap().unwrap();
    assert_eq!(application.integration_status, Some(SlotStatus::Free));
}

#[tokio::test]
async fn test_disabled_reconciliation_only_upserts() {
    let h = harness(SlotMode::OnecPush, false, true).await;
    let application_id = claimed_application(&h.store, "X").await;

    let payload = cells_payload(json!([
        {"slot_id": "c1", "time_start": "09:00", "time_end": "09:30", "free": true, "claim_id": "X"}
    ]));
    let result = h.service.ingest_booking_event(TEST_CLINIC_ID, token(), &payload).await.unwrap();

    assert_eq!(result.updated_slots, Some(1));
    assert_eq!(result.reconciled, Some(0));
    assert_eq!(result.deleted, Some(0));
    let application = h.store.application(application_id).await.unwrap().unwrap();
    assert_eq!(application.integration_status, Some(SlotStatus::Booked));
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let payload = cells_payload(json!([
        {"slot_id": "c1", "time_start": "09:00", "time_end": "09:30", "free": true},
        {"slot_id": "c2", "time_start": "09:30", "time_end": "10:00", "status": "busy", "appointment_id": "Y"}
    ]));

    assert_ok!(h.service.ingest_booking_event(TEST_CLINIC_ID, token(), &payload).await);
    let first = all_slots(&h.store).await;
    assert_ok!(h.service.ingest_booking_event(TEST_CLINIC_ID, token(), &payload).await);
    let second = all_slots(&h.store).await;

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.payload_hash, b.payload_hash);
        assert_eq!(a.status, b.status);
    }
    assert_eq!(second[1].booking_uuid.as_deref(), Some("Y"));
    assert_eq!(second[1].cabinet_id, None);
}

#[tokio::test]
async fn test_unreadable_cells_are_skipped_and_counted() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let payload = cells_payload(json!([
        {"slot_id": "c1", "time_start": "09:00", "time_end": "09:30", "free": true},
        {"slot_id": "c2", "time_start": "quarter past nine", "time_end": "09:45", "free": true}
    ]));

    let result = assert_ok!(h.service.ingest_booking_event(TEST_CLINIC_ID, token(), &payload).await);

    assert_eq!(result.updated_slots, Some(1));
    assert_eq!(result.skipped, Some(1));
    assert_eq!(all_slots(&h.store).await.len(), 1);
}

#[tokio::test]
async fn test_clock_times_use_clinic_offset() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let mut clinic = SchedulingFixtures::clinic(SlotMode::OnecPush);
    clinic.utc_offset_minutes = 180;
    h.store.add_clinic(clinic).await;

    let payload = cells_payload(json!([
        {"slot_id": "c1", "time_start": "12:00", "time_end": "12:30", "free": true}
    ]));
    assert_ok!(h.service.ingest_booking_event(TEST_CLINIC_ID, token(), &payload).await);

    let slots = all_slots(&h.store).await;
    assert_eq!(slots[0].start_at, SchedulingFixtures::at(9, 0));
    assert_eq!(slots[0].end_at, SchedulingFixtures::at(9, 30));
}

// ==============================================================================
// LIFECYCLE EVENTS
// ==============================================================================

#[tokio::test]
async fn test_cancelled_event_mirrors_free_without_deleting() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let application_id = claimed_application(&h.store, "X").await;

    let payload = json!({
        "event": "booking.cancelled",
        "slot": {
            "branch_id": TEST_BRANCH_EXTERNAL_ID,
            "slot_id": "s1",
            "start": SchedulingFixtures::at(9, 0).to_rfc3339(),
            "end": SchedulingFixtures::at(9, 30).to_rfc3339(),
            "status": "booked",
            "doctor_id": TEST_DOCTOR_EXTERNAL_ID
        },
        "booking": {"id": "X"}
    });
    let result = h.service.ingest_booking_event(TEST_CLINIC_ID, token(), &payload).await.unwrap();

    assert_eq!(result.reconciled, Some(1));
    let application = h.store.application(application_id).await.unwrap().unwrap();
    assert_eq!(application.integration_status, Some(SlotStatus::Free));

    let slots = all_slots(&h.store).await;
    assert_eq!(slots[0].status, SlotStatus::Free);
    assert_eq!(slots[0].booking_uuid, None);
}

#[tokio::test]
async fn test_created_event_marks_slot_booked() {
    let h = harness(SlotMode::OnecPush, true, true).await;

    let payload = json!({
        "event": "booking.created",
        "slot": {
            "branch_id": TEST_BRANCH_EXTERNAL_ID,
            "slot_id": "s1",
            "start": SchedulingFixtures::at(10, 0).to_rfc3339(),
            "end": SchedulingFixtures::at(10, 30).to_rfc3339(),
            "status": "booked"
        },
        "booking": {"id": "B-1"}
    });
    let result = assert_ok!(h.service.ingest_booking_event(TEST_CLINIC_ID, token(), &payload).await);
    assert_eq!(result.updated_slots, Some(1));
    assert_eq!(result.skipped, Some(0));

    let slots = all_slots(&h.store).await;
    assert_eq!(slots[0].status, SlotStatus::Booked);
    assert_eq!(slots[0].booking_uuid.as_deref(), Some("B-1"));
    assert_eq!(slots[0].cabinet_id, None);
}

// ==============================================================================
// AUTHENTICATION & RESOLUTION
// ==============================================================================

#[tokio::test]
async fn test_wrong_token_changes_nothing() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let payload = cells_payload(json!([
        {"slot_id": "c1", "time_start": "09:00", "time_end": "09:30", "free": true}
    ]));

    let wrong = h.service.ingest_booking_event(TEST_CLINIC_ID, Some("nope"), &payload).await;
    assert_matches!(wrong, Err(IngestionError::Unauthorized));

    let missing = h.service.ingest_booking_event(TEST_CLINIC_ID, None, &payload).await;
    assert_matches!(missing, Err(IngestionError::Unauthorized));

    assert_eq!(h.store.slot_count().await, 0);
}

#[tokio::test]
async fn test_unknown_branch_is_not_found() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let mut payload = cells_payload(json!([]));
    payload["branch_id"] = json!("no-such-branch");

    let result = h.service.ingest_booking_event(TEST_CLINIC_ID, token(), &payload).await;
    assert_matches!(result, Err(IngestionError::NotFound(_)));

    let unknown_clinic = h.service.ingest_booking_event(999, token(), &cells_payload(json!([]))).await;
    assert_matches!(unknown_clinic, Err(IngestionError::NotFound(_)));
}

// ==============================================================================
// SCHEDULE PUSHES
// ==============================================================================

#[tokio::test]
async fn test_schedule_push_rejected_for_local_clinic() {
    let h = harness(SlotMode::Local, true, true).await;
    let payload = json!({"branches": []});

    let result = h.service.ingest_schedule(TEST_CLINIC_ID, token(), &payload).await;
    assert_matches!(result, Err(IngestionError::Conflict(_)));
}

#[tokio::test]
async fn test_unparseable_schedule_is_malformed() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let payload = json!({"Filials": [{"FilialId": TEST_BRANCH_EXTERNAL_ID, "Employees": [{
        "EmployeeId": TEST_DOCTOR_EXTERNAL_ID,
        "Cells": [{"Date": "not a date", "TimeBegin": "09:00", "TimeEnd": "09:30"}]
    }]}]});

    let result = h.service.ingest_schedule(TEST_CLINIC_ID, token(), &payload).await;
    assert_matches!(result, Err(IngestionError::Malformed(_)));
}

#[tokio::test]
async fn test_structured_push_isolates_branches() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let payload = json!({"branches": [
        {"branch_id": TEST_BRANCH_EXTERNAL_ID, "slots": [
            SchedulingFixtures::raw_slot("s1", SchedulingFixtures::at(9, 0), SchedulingFixtures::at(9, 30), "free"),
            SchedulingFixtures::raw_slot("s2", SchedulingFixtures::at(9, 30), SchedulingFixtures::at(10, 0), "booked"),
            {"slot_id": "bad", "start": "yesterday"}
        ]},
        {"branch_id": "ghost", "slots": [
            SchedulingFixtures::raw_slot("g1", SchedulingFixtures::at(9, 0), SchedulingFixtures::at(9, 30), "free")
        ]}
    ]});

    let result = h.service.ingest_schedule(TEST_CLINIC_ID, token(), &payload).await.unwrap();

    let imported = &result.stats[TEST_BRANCH_EXTERNAL_ID];
    assert_eq!(imported.status, 200);
    assert_eq!(imported.stats.received, 3);
    assert_eq!(imported.stats.created, 2);
    assert_eq!(imported.stats.skipped, 1);
    assert_eq!(result.stats["ghost"].status, 404);
    assert_eq!(h.store.slot_count().await, 2);
}

#[tokio::test]
async fn test_legacy_push_fails_fast_on_unknown_branch() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let cells = json!([{"Id": 1, "Date": "04.03.2030", "TimeBegin": "09:00", "TimeEnd": "09:30", "Free": true}]);
    let payload = json!({"Filials": [
        {"FilialId": TEST_BRANCH_EXTERNAL_ID, "Employees": [{"EmployeeId": TEST_DOCTOR_EXTERNAL_ID, "Cells": cells}]},
        {"FilialId": "ghost", "Employees": [{"EmployeeId": TEST_DOCTOR_EXTERNAL_ID, "Cells": cells}]}
    ]});

    let result = h.service.ingest_schedule(TEST_CLINIC_ID, token(), &payload).await;
    assert_matches!(result, Err(IngestionError::NotFound(_)));
    assert_eq!(h.store.slot_count().await, 0);
}

#[tokio::test]
async fn test_legacy_push_imports_known_branch() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    let payload = json!({"Filials": [{"FilialId": TEST_BRANCH_EXTERNAL_ID, "Employees": [{
        "EmployeeId": TEST_DOCTOR_EXTERNAL_ID,
        "Cells": [
            {"Id": 1, "Date": "2030-03-04", "TimeBegin": "09:00", "TimeEnd": "09:30", "Free": true},
            {"Id": 2, "Date": "2030-03-04", "TimeBegin": "09:30", "TimeEnd": "10:00", "Free": false, "AppointmentId": "A1"}
        ]
    }]}]});

    let result = h.service.ingest_schedule(TEST_CLINIC_ID, token(), &payload).await.unwrap();
    assert_eq!(result.stats[TEST_BRANCH_EXTERNAL_ID].stats.created, 2);

    let slots = all_slots(&h.store).await;
    assert_eq!(slots[1].status, SlotStatus::Booked);
    assert_eq!(slots[1].booking_uuid.as_deref(), Some("A1"));
    assert_eq!(slots[1].doctor_id, Some(TEST_DOCTOR_ID));
}

#[tokio::test]
async fn test_schedule_token_checked_against_every_branch() {
    let h = harness(SlotMode::OnecPush, true, true).await;
    h.store
        .add_branch(Branch {
            id: 11,
            clinic_id: TEST_CLINIC_ID,
            name: "Second branch".to_string(),
            external_id: Some("filial-11".to_string()),
        })
        .await;
    let mut other = SchedulingFixtures::endpoint(ONEC_URL);
    other.id = 1001;
    other.branch_id = Some(11);
    other.webhook_secret = "other-secret".to_string();
    h.store.add_endpoint(other).await;

    let payload = json!({"branches": [
        {"branch_id": TEST_BRANCH_EXTERNAL_ID, "slots": []},
        {"branch_id": "filial-11", "slots": [
            SchedulingFixtures::raw_slot("s1", SchedulingFixtures::at(9, 0), SchedulingFixtures::at(9, 30), "free")
        ]}
    ]});

    let result = h.service.ingest_schedule(TEST_CLINIC_ID, token(), &payload).await;
    assert_err!(&result);
    assert_matches!(result, Err(IngestionError::Unauthorized));
    assert_eq!(h.store.slot_count().await, 0);
}
