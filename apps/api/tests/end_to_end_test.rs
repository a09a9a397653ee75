// =====================================================================================
// END-TO-END: SCHEDULE PUSH -> SLOT QUERY -> BOOKING -> WEBHOOK SYNC
// =====================================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use clinic_scheduling_api::create_router;
use performance_cell::{InMemorySlotCache, SlotCache};
use shared_database::{MemorySchedulingStore, SchedulingStore};
use shared_models::scheduling::SlotMode;
use shared_utils::test_utils::{
    JwtTestUtils, MockOnecResponses, SchedulingFixtures, TestConfig, TestUser,
    TEST_BRANCH_EXTERNAL_ID, TEST_BRANCH_ID, TEST_CLINIC_ID, TEST_DOCTOR_EXTERNAL_ID,
    TEST_WEBHOOK_SECRET,
};

const SLOTS_URI: &str = "/slots?from=2030-03-04T00:00:00Z&to=2030-03-05T00:00:00Z";

async fn app(onec_url: &str) -> (Router, Arc<MemorySchedulingStore>) {
    let store = SchedulingFixtures::seeded_store(SlotMode::OnecPush, Some(onec_url)).await;
    let dyn_store: Arc<dyn SchedulingStore> = store.clone();
    let cache: Arc<dyn SlotCache> = Arc::new(InMemorySlotCache::new(Duration::from_secs(60)));
    let config = Arc::new(TestConfig::default().to_app_config());

    (create_router(config, dyn_store, cache), store)
}

fn bearer() -> String {
    let config = TestConfig::default();
    format!(
        "Bearer {}",
        JwtTestUtils::create_test_token(&TestUser::partner(TEST_CLINIC_ID), &config.jwt_secret, None)
    )
}

fn webhook(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .header("X-Integration-Token", TEST_WEBHOOK_SECRET)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn slots(app: &Router) -> Vec<Value> {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(SLOTS_URI)
                .header("Authorization", bearer())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["slots"].as_array().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_health_route() {
    let (app, _) = app("http://onec.invalid").await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_book_pushed_slot_then_sync_frees_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/appointments"))
        .and(header("Authorization", "Bearer onec-api-token"))
        .respond_with(ResponseTemplate::new(201).set_body_json(MockOnecResponses::booking_created("ext-1")))
        .expect(1)
        .mount(&server)
        .await;
    let (app, store) = app(&server.uri()).await;

    // 1C pushes one free slot
    let push = json!({"branches": [{"branch_id": TEST_BRANCH_EXTERNAL_ID, "slots": [
        SchedulingFixtures::raw_slot("S1", SchedulingFixtures::at(9, 0), SchedulingFixtures::at(9, 30), "free")
    ]}]});
    let response = app
        .clone()
        .oneshot(webhook(&format!("/integrations/{}/schedule", TEST_CLINIC_ID), push))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let listed = slots(&app).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["source"], "onec");
    assert_eq!(listed[0]["externallyOccupied"], false);

    // Staff books it
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/applications")
                .header("Authorization", bearer())
                .header("Content-Type", "application/json")
                .body(Body::from(
                    json!({
                        "data": {
                            "clinic_id": TEST_CLINIC_ID,
                            "branch_id": TEST_BRANCH_ID,
                            "patient_name": "Jane Patient"
                        },
                        "slot_external_id": "S1",
                        "source": "phone"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let application = body_json(response).await;
    assert_eq!(application["external_appointment_id"], "ext-1");

    // The cached view was invalidated by the booking commit
    let listed = slots(&app).await;
    assert_eq!(listed[0]["externallyOccupied"], true);

    // 1C later reports the cell free again; the application is removed
    let cells = json!({
        "branch_id": TEST_BRANCH_EXTERNAL_ID,
        "doctor_id": TEST_DOCTOR_EXTERNAL_ID,
        "date": "2030-03-04",
        "cells": [{"slot_id": "S1", "time_start": "09:00", "time_end": "09:30", "free": true, "claim_id": "ext-1"}]
    });
    let response = app
        .clone()
        .oneshot(webhook(&format!("/integrations/{}/bookings", TEST_CLINIC_ID), cells))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["deleted"], 1);

    assert_eq!(store.application_count().await, 0);
    assert_eq!(store.slot_count().await, 1);
    assert_eq!(slots(&app).await[0]["externallyOccupied"], false);
}
