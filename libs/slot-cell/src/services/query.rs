// libs/slot-cell/src/services/query.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use performance_cell::{clinic_cache_prefix, SlotCache};
use shared_database::SchedulingStore;
use shared_models::auth::Actor;
use shared_models::scheduling::Clinic;

use crate::models::{SlotError, SlotFilters, SlotView};
use crate::services::provider::SlotProviderFactory;

/// Calendar read path: resolves the clinics in scope, asks each clinic's
/// provider for slots and memoizes the result per clinic.
pub struct SlotQueryService {
    store: Arc<dyn SchedulingStore>,
    factory: SlotProviderFactory,
    cache: Arc<dyn SlotCache>,
}

impl SlotQueryService {
    pub fn new(store: Arc<dyn SchedulingStore>, cache: Arc<dyn SlotCache>) -> Self {
        Self {
            factory: SlotProviderFactory::new(Arc::clone(&store)),
            store,
            cache,
        }
    }

    pub async fn get_slots(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filters: &SlotFilters,
        actor: &Actor,
    ) -> Result<Vec<SlotView>, SlotError> {
        if from >= to {
            return Err(SlotError::validation("to", "range end must be after its start"));
        }

        let mut views = Vec::new();
        for clinic in self.clinics_in_scope(filters, actor).await? {
            views.extend(self.clinic_slots(&clinic, from, to, filters, actor).await?);
        }

        views.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(views)
    }

    async fn clinics_in_scope(&self, filters: &SlotFilters, actor: &Actor) -> Result<Vec<Clinic>, SlotError> {
        match filters.clinic_id.or(actor.clinic_id) {
            Some(clinic_id) if !actor.can_access_clinic(clinic_id) => {
                warn!("Actor {} asked for slots of foreign clinic {}", actor.user_id, clinic_id);
                Ok(Vec::new())
            }
            Some(clinic_id) => self
                .store
                .clinic(clinic_id)
                .await?
                .map(|clinic| vec![clinic])
                .ok_or_else(|| SlotError::NotFound(format!("Clinic {} not found", clinic_id))),
            None => Ok(self.store.clinics().await?),
        }
    }

    async fn clinic_slots(
        &self,
        clinic: &Clinic,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filters: &SlotFilters,
        actor: &Actor,
    ) -> Result<Vec<SlotView>, SlotError> {
        let prefix = clinic_cache_prefix(clinic.id);
        let key = format!(
            "{}{}|{}|b{:?}|d{:?}|{:?}:{:?}",
            prefix,
            from.timestamp(),
            to.timestamp(),
            filters.branch_ids,
            filters.doctor_ids,
            actor.role,
            actor.doctor_id
        );

        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_value::<Vec<SlotView>>(cached) {
                Ok(views) => return Ok(views),
                Err(e) => warn!("Discarding unreadable cache entry {}: {}", key, e),
            }
        }

        let generation = self.cache.generation(&prefix).await;

        let provider = self.factory.for_clinic(clinic);
        let views = provider.get_slots(from, to, filters, actor).await?;
        debug!("Computed {} {:?} slots for clinic {}", views.len(), provider.source(), clinic.id);

        match serde_json::to_value(&views) {
            Ok(value) => {
                self.cache.put_if_current(key, value, &prefix, generation).await;
            }
            Err(e) => warn!("Could not cache slots for clinic {}: {}", clinic.id, e),
        }
        Ok(views)
    }

    /// Drops memoized views of a clinic after its slots changed.
    pub async fn invalidate_clinic(&self, clinic_id: i64) {
        self.cache.invalidate(&clinic_cache_prefix(clinic_id)).await;
    }
}
