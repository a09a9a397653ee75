// libs/booking-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use performance_cell::{clinic_cache_prefix, SlotCache};
use shared_database::{ChangeSet, EndpointResult, SchedulingStore};
use shared_models::scheduling::{
    Application, ApplicationData, IntegrationEndpoint, IntegrationType, SlotMode, SlotStatus,
};

use crate::models::{
    BookingError, BookingOptions, CancellationResult, ConflictOutcome, ExternalBookingError,
    OnecBookingRequest,
};
use crate::services::conflict::ConflictResolver;
use crate::services::onec_client::OnecClient;

/// Application lifecycle against the external scheduler.
///
/// Every operation stages its local rows in one `ChangeSet` and commits it
/// after the remote call returns, so a failed remote call leaves no local
/// trace. A commit failing after a successful remote call can orphan the
/// remote booking; the next webhook sync brings it back.
pub struct BookingEngine {
    store: Arc<dyn SchedulingStore>,
    onec: OnecClient,
    resolver: Arc<dyn ConflictResolver>,
    cache: Arc<dyn SlotCache>,
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        onec: OnecClient,
        resolver: Arc<dyn ConflictResolver>,
        cache: Arc<dyn SlotCache>,
    ) -> Self {
        Self {
            store,
            onec,
            resolver,
            cache,
        }
    }

    pub async fn get(&self, application_id: Uuid) -> Result<Application, BookingError> {
        self.store
            .application(application_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("Application {}", application_id)))
    }

    // ==============================================================================
    // CREATE
    // ==============================================================================

    pub async fn create(
        &self,
        data: ApplicationData,
        options: BookingOptions,
    ) -> Result<Application, BookingError> {
        self.validate_data(&data).await?;

        let now = Utc::now();
        let mut application = Application {
            id: Uuid::new_v4(),
            clinic_id: data.clinic_id,
            branch_id: data.branch_id,
            cabinet_id: data.cabinet_id,
            doctor_id: data.doctor_id,
            patient_name: data.patient_name,
            patient_phone: data.patient_phone,
            patient_birth_date: data.patient_birth_date,
            appointment_datetime: data.appointment_datetime,
            comment: options.comment.clone(),
            source: options.source,
            integration_type: IntegrationType::None,
            external_appointment_id: None,
            integration_status: None,
            integration_payload: None,
            created_at: now,
            updated_at: now,
        };

        let mut changes = ChangeSet::new();
        if let Some(endpoint) = self.active_endpoint(&application).await? {
            self.claim(&mut application, &endpoint, &options, &mut changes).await?;
        }
        changes.save_application(application.clone());
        self.commit(application.clinic_id, changes).await?;

        info!(
            "Created application {} for clinic {} (external id {:?})",
            application.id, application.clinic_id, application.external_appointment_id
        );
        Ok(application)
    }

    // ==============================================================================
    // UPDATE
    // ==============================================================================

    /// Saves new data and moves the external claim with it. 1C has no atomic
    /// move, so the old claim is cancelled and committed before the new one is
    /// attempted; if rebooking fails the application is left unclaimed with
    /// its previous data.
    pub async fn update(
        &self,
        application_id: Uuid,
        data: ApplicationData,
        options: BookingOptions,
    ) -> Result<Application, BookingError> {
        let mut current = self.get(application_id).await?;
        if data.clinic_id != current.clinic_id {
            return Err(BookingError::validation("clinic_id", "Application cannot move between clinics"));
        }
        self.validate_data(&data).await?;

        let mut updated = current.clone();
        updated.branch_id = data.branch_id;
        updated.cabinet_id = data.cabinet_id;
        updated.doctor_id = data.doctor_id;
        updated.patient_name = data.patient_name;
        updated.patient_phone = data.patient_phone;
        updated.patient_birth_date = data.patient_birth_date;
        updated.appointment_datetime = data.appointment_datetime;
        if options.comment.is_some() {
            updated.comment = options.comment.clone();
        }
        updated.source = options.source;
        updated.updated_at = Utc::now();

        if current.is_claimed() {
            let moved = options.slot_external_id.is_some() || booking_fields_changed(&current, &updated);

            let endpoint = match self.active_endpoint(&current).await? {
                Some(endpoint) if moved => endpoint,
                Some(_) => {
                    debug!("Application {} keeps its claim, booking fields unchanged", application_id);
                    return self.save_only(updated).await;
                }
                None => {
                    warn!(
                        "Application {} holds external claim {:?} but its endpoint is inactive, saving data only",
                        application_id, current.external_appointment_id
                    );
                    return self.save_only(updated).await;
                }
            };

            // Phase 1: release the old claim
            let mut release = ChangeSet::new();
            self.release_claim(&mut current, &endpoint, &mut release).await?;
            release.save_application(current.clone());
            self.commit(current.clinic_id, release).await?;
            info!("Released external claim of application {} before rebooking", application_id);

            updated.clear_claim();
        }

        // Phase 2: claim with the new data
        let mut changes = ChangeSet::new();
        if let Some(endpoint) = self.active_endpoint(&updated).await? {
            self.claim(&mut updated, &endpoint, &options, &mut changes).await?;
        }
        changes.save_application(updated.clone());
        self.commit(updated.clinic_id, changes).await?;

        info!("Updated application {}", application_id);
        Ok(updated)
    }

    // ==============================================================================
    // CANCEL & DELETE
    // ==============================================================================

    pub async fn cancel(&self, application_id: Uuid) -> Result<CancellationResult, BookingError> {
        let mut application = self.get(application_id).await?;

        let endpoint = self
            .active_endpoint(&application)
            .await?
            .ok_or(BookingError::IntegrationNotConfigured)?;
        if !application.is_claimed() {
            return Err(BookingError::NoExternalClaim);
        }

        let mut changes = ChangeSet::new();
        let conflict = self.release_claim(&mut application, &endpoint, &mut changes).await?;
        application.updated_at = Utc::now();
        changes.save_application(application.clone());
        self.commit(application.clinic_id, changes).await?;

        info!("Cancelled external booking of application {}", application_id);
        Ok(CancellationResult {
            application,
            conflict,
        })
    }

    /// Removes the application row without contacting 1C.
    pub async fn force_delete(&self, application_id: Uuid) -> Result<(), BookingError> {
        let application = self.get(application_id).await?;

        let mut changes = ChangeSet::new();
        if let Some(external_id) = application.external_appointment_id.as_deref() {
            warn!(
                "Force deleting application {} while 1C booking {} may still exist",
                application_id, external_id
            );
            self.stage_freed_slots(application.clinic_id, external_id, &mut changes).await?;
        }
        changes.delete_application(application_id);
        self.commit(application.clinic_id, changes).await?;

        info!("Force deleted application {}", application_id);
        Ok(())
    }

    /// True when bookings in this branch must go through a mirrored 1C slot.
    pub async fn branch_requires_external_slot(&self, branch_id: i64) -> Result<bool, BookingError> {
        let branch = self
            .store
            .branch(branch_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("Branch {}", branch_id)))?;

        let push_mode = self
            .store
            .clinic(branch.clinic_id)
            .await?
            .map(|clinic| clinic.slot_mode == SlotMode::OnecPush)
            .unwrap_or(false);

        Ok(push_mode && self.store.active_endpoint_for_branch(&branch).await?.is_some())
    }

    // ==============================================================================
    // INTERNALS
    // ==============================================================================

    async fn validate_data(&self, data: &ApplicationData) -> Result<(), BookingError> {
        if data.patient_name.trim().is_empty() {
            return Err(BookingError::validation("patient_name", "Patient name is required"));
        }

        self.store
            .clinic(data.clinic_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("Clinic {}", data.clinic_id)))?;

        if let Some(branch_id) = data.branch_id {
            let branch = self.store.branch(branch_id).await?;
            if branch.map(|b| b.clinic_id) != Some(data.clinic_id) {
                return Err(BookingError::validation("branch_id", "Branch does not belong to the clinic"));
            }
        }
        Ok(())
    }

    async fn active_endpoint(&self, application: &Application) -> Result<Option<IntegrationEndpoint>, BookingError> {
        let Some(branch_id) = application.branch_id else {
            return Ok(None);
        };
        match self.store.branch(branch_id).await? {
            Some(branch) => Ok(self.store.active_endpoint_for_branch(&branch).await?),
            None => Ok(None),
        }
    }

    /// Reserves in 1C and stages the claim. Nothing is staged on failure.
    async fn claim(
        &self,
        application: &mut Application,
        endpoint: &IntegrationEndpoint,
        options: &BookingOptions,
        changes: &mut ChangeSet,
    ) -> Result<(), BookingError> {
        let slot = match options.slot_external_id.as_deref() {
            Some(slot_external_id) => {
                let slot = self
                    .store
                    .slot_by_external_id(application.clinic_id, application.branch_id, slot_external_id)
                    .await?
                    .filter(|slot| slot.status == SlotStatus::Free)
                    .ok_or_else(|| BookingError::validation("slot_external_id", "Slot is unavailable"))?;

                application.appointment_datetime = Some(slot.start_at);
                application.doctor_id = application.doctor_id.or(slot.doctor_id);
                application.cabinet_id = application.cabinet_id.or(slot.cabinet_id);
                Some(slot)
            }
            None => None,
        };

        let appointment_datetime = application.appointment_datetime.ok_or_else(|| {
            BookingError::validation(
                "appointment_datetime",
                "Appointment time is required before external booking",
            )
        })?;

        let request = OnecBookingRequest {
            application_id: application.id.to_string(),
            branch_id: self.branch_external_id(application.branch_id).await?,
            doctor_id: self.doctor_external_id(application.doctor_id).await?,
            cabinet_id: self.cabinet_external_id(application.cabinet_id).await?,
            slot_id: slot.as_ref().and_then(|slot| slot.external_slot_id.clone()),
            appointment_datetime,
            patient_name: application.patient_name.clone(),
            patient_phone: application.patient_phone.clone(),
            patient_birth_date: application.patient_birth_date,
            comment: application.comment.clone(),
            source: application.source,
        };

        let booking = match self.onec.book(endpoint, &request).await {
            Ok(booking) => {
                self.record_result(endpoint, EndpointResult::Success { at: Utc::now() }).await;
                booking
            }
            Err(e) => {
                self.record_failure(endpoint, &e).await;
                return Err(BookingError::External(e));
            }
        };

        application.integration_type = IntegrationType::Onec;
        application.external_appointment_id = Some(booking.appointment_id.clone());
        application.integration_status = Some(
            booking
                .status
                .as_deref()
                .and_then(SlotStatus::parse)
                .unwrap_or(SlotStatus::Booked),
        );
        application.integration_payload = Some(booking.raw);

        if let Some(mut slot) = slot {
            slot.status = SlotStatus::Booked;
            slot.booking_uuid = Some(booking.appointment_id.clone());
            // Local edits void the sync fingerprint so the next 1C push is applied in full
            slot.payload_hash.clear();
            changes.save_slot(slot);
        }

        info!(
            "Application {} booked in 1C as {}",
            application.id, booking.appointment_id
        );
        Ok(())
    }

    /// Cancels the remote claim and stages the cleared application fields and
    /// freed slots. Returns the resolved conflict when 1C reported the booking
    /// as already gone.
    async fn release_claim(
        &self,
        application: &mut Application,
        endpoint: &IntegrationEndpoint,
        changes: &mut ChangeSet,
    ) -> Result<Option<ConflictOutcome>, BookingError> {
        let Some(external_id) = application.external_appointment_id.clone() else {
            return Ok(None);
        };

        let conflict = match self.onec.cancel(endpoint, &external_id).await {
            Ok(()) => {
                self.record_result(endpoint, EndpointResult::Success { at: Utc::now() }).await;
                None
            }
            Err(e) => {
                self.record_failure(endpoint, &e).await;
                match self.resolver.resolve(&e) {
                    Some(outcome) => {
                        warn!("1C booking {} already gone: {}", external_id, outcome.message);
                        Some(outcome)
                    }
                    None => return Err(BookingError::External(e)),
                }
            }
        };

        self.stage_freed_slots(application.clinic_id, &external_id, changes).await?;
        application.clear_claim();
        Ok(conflict)
    }

    async fn stage_freed_slots(
        &self,
        clinic_id: i64,
        external_id: &str,
        changes: &mut ChangeSet,
    ) -> Result<(), BookingError> {
        for mut slot in self.store.slots_by_booking_uuid(clinic_id, external_id).await? {
            slot.status = SlotStatus::Free;
            slot.booking_uuid = None;
            slot.payload_hash.clear();
            changes.save_slot(slot);
        }
        Ok(())
    }

    async fn save_only(&self, application: Application) -> Result<Application, BookingError> {
        let mut changes = ChangeSet::new();
        changes.save_application(application.clone());
        self.commit(application.clinic_id, changes).await?;
        Ok(application)
    }

    async fn commit(&self, clinic_id: i64, changes: ChangeSet) -> Result<(), BookingError> {
        let staged = changes.len();
        self.store.commit(changes).await?;
        self.cache.invalidate(&clinic_cache_prefix(clinic_id)).await;
        debug!("Committed {} changes for clinic {}", staged, clinic_id);
        Ok(())
    }

    async fn record_result(&self, endpoint: &IntegrationEndpoint, result: EndpointResult) {
        if let Err(e) = self.store.record_endpoint_result(endpoint.id, result).await {
            warn!("Failed to record result for endpoint {}: {}", endpoint.id, e);
        }
    }

    async fn record_failure(&self, endpoint: &IntegrationEndpoint, error: &ExternalBookingError) {
        self.record_result(
            endpoint,
            EndpointResult::Failure {
                at: Utc::now(),
                message: error.message.clone(),
            },
        )
        .await;
    }

    async fn branch_external_id(&self, branch_id: Option<i64>) -> Result<Option<String>, BookingError> {
        Ok(match branch_id {
            Some(id) => self.store.branch(id).await?.and_then(|b| b.external_id),
            None => None,
        })
    }

    async fn doctor_external_id(&self, doctor_id: Option<i64>) -> Result<Option<String>, BookingError> {
        Ok(match doctor_id {
            Some(id) => self.store.doctor(id).await?.and_then(|d| d.external_id),
            None => None,
        })
    }

    async fn cabinet_external_id(&self, cabinet_id: Option<i64>) -> Result<Option<String>, BookingError> {
        Ok(match cabinet_id {
            Some(id) => self.store.cabinet(id).await?.and_then(|c| c.external_id),
            None => None,
        })
    }
}

fn booking_fields_changed(before: &Application, after: &Application) -> bool {
    before.branch_id != after.branch_id
        || before.doctor_id != after.doctor_id
        || before.cabinet_id != after.cabinet_id
        || before.appointment_datetime != after.appointment_datetime
}
