// =====================================================================================
// SLOT PROVIDER TESTS - LOCAL EXPANSION, 1C MIRROR & CACHED QUERIES
// =====================================================================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde_json::{json, Value};

use performance_cell::{CacheStats, InMemorySlotCache, SlotCache};
use shared_database::SchedulingStore;
use shared_models::auth::Actor;
use shared_models::scheduling::{NewShift, NewSlot, SlotMode, SlotStatus};
use shared_utils::test_utils::{
    SchedulingFixtures, TEST_BRANCH_ID, TEST_CABINET_ID, TEST_CLINIC_ID, TEST_DOCTOR_ID,
};
use slot_cell::{SlotFilters, SlotProviderFactory, SlotQueryService, SlotSource};

fn shift(doctor_id: i64, start_hour: u32, end_hour: u32) -> NewShift {
    NewShift {
        clinic_id: TEST_CLINIC_ID,
        branch_id: Some(TEST_BRANCH_ID),
        cabinet_id: TEST_CABINET_ID,
        doctor_id,
        start_at: SchedulingFixtures::at(start_hour, 0),
        end_at: SchedulingFixtures::at(end_hour, 0),
        slot_duration_minutes: 30,
    }
}

fn mirrored(status: SlotStatus, synced_offset_secs: i64) -> NewSlot {
    NewSlot {
        clinic_id: TEST_CLINIC_ID,
        branch_id: Some(TEST_BRANCH_ID),
        cabinet_id: Some(TEST_CABINET_ID),
        doctor_id: Some(TEST_DOCTOR_ID),
        external_slot_id: None,
        booking_uuid: None,
        start_at: SchedulingFixtures::at(9, 0),
        end_at: SchedulingFixtures::at(9, 30),
        status,
        payload_hash: String::new(),
        source_payload: json!({}),
        synced_at: SchedulingFixtures::at(8, 0) + ChronoDuration::seconds(synced_offset_secs),
    }
}

#[tokio::test]
async fn test_local_provider_expands_shifts_in_range() {
    let store: Arc<dyn SchedulingStore> = SchedulingFixtures::seeded_store(SlotMode::Local, None).await;
    store.insert_shift(shift(TEST_DOCTOR_ID, 9, 11)).await.unwrap();
    let clinic = store.clinic(TEST_CLINIC_ID).await.unwrap().unwrap();

    let provider = SlotProviderFactory::new(Arc::clone(&store)).for_clinic(&clinic);
    let slots = provider
        .get_slots(
            SchedulingFixtures::at(9, 30),
            SchedulingFixtures::at(10, 30),
            &SlotFilters::default(),
            &Actor::partner("p", TEST_CLINIC_ID),
        )
        .await
        .unwrap();

    assert_eq!(provider.source(), SlotSource::Local);
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].start, SchedulingFixtures::at(9, 30));
    assert!(slots.iter().all(|slot| !slot.externally_occupied));
}

#[tokio::test]
async fn test_external_provider_collapses_duplicate_rows() {
    let store: Arc<dyn SchedulingStore> = SchedulingFixtures::seeded_store(SlotMode::OnecPush, None).await;
    store.insert_slot(mirrored(SlotStatus::Booked, 0)).await.unwrap();
    store.insert_slot(mirrored(SlotStatus::Free, 60)).await.unwrap();
    let clinic = store.clinic(TEST_CLINIC_ID).await.unwrap().unwrap();

    let provider = SlotProviderFactory::new(Arc::clone(&store)).for_clinic(&clinic);
    let slots = provider
        .get_slots(
            SchedulingFixtures::at(8, 0),
            SchedulingFixtures::at(12, 0),
            &SlotFilters::default(),
            &Actor::super_admin("admin"),
        )
        .await
        .unwrap();

    assert_eq!(provider.source(), SlotSource::Onec);
    assert_eq!(slots.len(), 1);
    assert!(slots[0].externally_occupied);
    assert_eq!(slots[0].meta["status"], "booked");
}

#[tokio::test]
async fn test_doctor_only_sees_own_slots() {
    let store: Arc<dyn SchedulingStore> = SchedulingFixtures::seeded_store(SlotMode::Local, None).await;
    store.insert_shift(shift(TEST_DOCTOR_ID, 9, 10)).await.unwrap();
    let mut other = shift(TEST_DOCTOR_ID + 1, 12, 13);
    other.cabinet_id = TEST_CABINET_ID + 1;
    store.insert_shift(other).await.unwrap();

    let cache: Arc<dyn SlotCache> = Arc::new(InMemorySlotCache::new(Duration::from_secs(60)));
    let query = SlotQueryService::new(Arc::clone(&store), cache);

    let slots = query
        .get_slots(
            SchedulingFixtures::at(8, 0),
            SchedulingFixtures::at(14, 0),
            &SlotFilters::default(),
            &Actor::doctor("d", TEST_CLINIC_ID, TEST_DOCTOR_ID),
        )
        .await
        .unwrap();

    assert_eq!(slots.len(), 2);
    assert!(slots.iter().all(|slot| slot.doctor_id == Some(TEST_DOCTOR_ID)));
}

#[tokio::test]
async fn test_query_results_are_cached_until_invalidated() {
    let store: Arc<dyn SchedulingStore> = SchedulingFixtures::seeded_store(SlotMode::Local, None).await;
    store.insert_shift(shift(TEST_DOCTOR_ID, 9, 10)).await.unwrap();

    let cache: Arc<dyn SlotCache> = Arc::new(InMemorySlotCache::new(Duration::from_secs(60)));
    let query = SlotQueryService::new(Arc::clone(&store), Arc::clone(&cache));
    let actor = Actor::partner("p", TEST_CLINIC_ID);
    let (from, to) = (SchedulingFixtures::at(8, 0), SchedulingFixtures::at(14, 0));

    assert_eq!(query.get_slots(from, to, &SlotFilters::default(), &actor).await.unwrap().len(), 2);

    let mut later = shift(TEST_DOCTOR_ID, 12, 13);
    later.cabinet_id = TEST_CABINET_ID + 1;
    store.insert_shift(later).await.unwrap();

    // Served from cache
    assert_eq!(query.get_slots(from, to, &SlotFilters::default(), &actor).await.unwrap().len(), 2);

    query.invalidate_clinic(TEST_CLINIC_ID).await;
    assert_eq!(query.get_slots(from, to, &SlotFilters::default(), &actor).await.unwrap().len(), 4);
    assert_eq!(cache.stats().await.hits, 1);
}

/// Lands a shift insert plus invalidation between a reader's computation and
/// its cache fill, the way a concurrent booking commit would.
struct CommitBeforeFill {
    inner: InMemorySlotCache,
    store: Arc<dyn SchedulingStore>,
    pending: Mutex<Option<NewShift>>,
}

#[async_trait]
impl SlotCache for CommitBeforeFill {
    async fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key).await
    }

    async fn put(&self, key: String, value: Value) {
        self.inner.put(key, value).await
    }

    async fn generation(&self, prefix: &str) -> u64 {
        self.inner.generation(prefix).await
    }

    async fn put_if_current(&self, key: String, value: Value, prefix: &str, generation: u64) -> bool {
        let pending = self.pending.lock().unwrap().take();
        if let Some(shift) = pending {
            self.store.insert_shift(shift).await.unwrap();
            self.inner.invalidate(prefix).await;
        }
        self.inner.put_if_current(key, value, prefix, generation).await
    }

    async fn invalidate(&self, prefix: &str) -> usize {
        self.inner.invalidate(prefix).await
    }

    async fn stats(&self) -> CacheStats {
        self.inner.stats().await
    }
}

#[tokio::test]
async fn test_views_computed_before_an_invalidation_are_not_cached() {
    let store: Arc<dyn SchedulingStore> = SchedulingFixtures::seeded_store(SlotMode::Local, None).await;
    store.insert_shift(shift(TEST_DOCTOR_ID, 9, 10)).await.unwrap();

    let mut later = shift(TEST_DOCTOR_ID, 12, 13);
    later.cabinet_id = TEST_CABINET_ID + 1;
    let cache = Arc::new(CommitBeforeFill {
        inner: InMemorySlotCache::new(Duration::from_secs(60)),
        store: Arc::clone(&store),
        pending: Mutex::new(Some(later)),
    });
    let query = SlotQueryService::new(Arc::clone(&store), cache.clone());
    let actor = Actor::partner("p", TEST_CLINIC_ID);
    let (from, to) = (SchedulingFixtures::at(8, 0), SchedulingFixtures::at(14, 0));

    // Computed from the pre-commit state; the fill is dropped
    assert_eq!(query.get_slots(from, to, &SlotFilters::default(), &actor).await.unwrap().len(), 2);
    assert_eq!(cache.stats().await.total_entries, 0);

    // Next read recomputes instead of serving the stale view
    assert_eq!(query.get_slots(from, to, &SlotFilters::default(), &actor).await.unwrap().len(), 4);
    assert_eq!(cache.stats().await.total_entries, 1);
    assert_eq!(cache.stats().await.hits, 0);
}

#[tokio::test]
async fn test_partner_cannot_read_foreign_clinic() {
    let store: Arc<dyn SchedulingStore> = SchedulingFixtures::seeded_store(SlotMode::Local, None).await;
    store.insert_shift(shift(TEST_DOCTOR_ID, 9, 10)).await.unwrap();

    let cache: Arc<dyn SlotCache> = Arc::new(InMemorySlotCache::new(Duration::from_secs(60)));
    let query = SlotQueryService::new(Arc::clone(&store), cache);
    let filters = SlotFilters {
        clinic_id: Some(TEST_CLINIC_ID),
        ..SlotFilters::default()
    };

    let slots = query
        .get_slots(SchedulingFixtures::at(8, 0), SchedulingFixtures::at(14, 0), &filters, &Actor::partner("p", 2))
        .await
        .unwrap();

    assert!(slots.is_empty());
}

#[tokio::test]
async fn test_inverted_range_is_rejected() {
    let store: Arc<dyn SchedulingStore> = SchedulingFixtures::seeded_store(SlotMode::Local, None).await;
    let cache: Arc<dyn SlotCache> = Arc::new(InMemorySlotCache::new(Duration::from_secs(60)));
    let query = SlotQueryService::new(store, cache);

    let result = query
        .get_slots(
            SchedulingFixtures::at(14, 0),
            SchedulingFixtures::at(8, 0),
            &SlotFilters::default(),
            &Actor::super_admin("admin"),
        )
        .await;

    assert!(result.is_err());
}
