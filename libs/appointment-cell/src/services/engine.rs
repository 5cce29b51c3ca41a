// libs/appointment-cell/src/services/engine.rs
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{json, to_value};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use availability_cell::{
    booked_id, generate, AvailabilityEditor, BookingPolicySettings, CalendarEventType,
    CalendarException, ExceptionOverlay, Service, Slot, SlotQuery, AVAILABILITY_COLLECTION,
    EXCEPTIONS_COLLECTION, SERVICE_AVAILABILITY_COLLECTION, WeeklySchedule,
};
use shared_config::AppConfig;
use shared_database::{ChangeEvent, Document, DocumentStore, WriteBatch};
use shared_models::{AppError, Clock, ProfessionalId};

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookingError, BookingRequest, Client,
    PaymentStatus, TransitionOutcome, APPOINTMENTS_COLLECTION, CLIENTS_COLLECTION,
    SERVICES_COLLECTION, SLOT_CLAIMS_COLLECTION,
};
use crate::services::booking::{claim_ids, BookingPolicyGuard};
use crate::services::clients::{client_id, record_visit};
use crate::services::hold::HoldTimers;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notifications::{dispatch, NotificationSender, StatusNotification};
use crate::services::view::{ScheduleView, ViewSnapshot};

/// Availability and appointment engine for one professional.
///
/// Reads are served from the in-memory `ScheduleView`; every write goes through
/// the document store first and is then applied to the view in commit order.
pub struct SchedulingEngine {
    tenant: ProfessionalId,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSender>,
    config: Arc<AppConfig>,
    view: RwLock<ScheduleView>,
    availability: RwLock<AvailabilityEditor>,
    lifecycle: AppointmentLifecycleService,
    holds: HoldTimers,
    this: Weak<SchedulingEngine>,
}

impl SchedulingEngine {
    pub fn new(
        tenant: ProfessionalId,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSender>,
        config: Arc<AppConfig>,
    ) -> Arc<Self> {
        let settings = default_settings(&config);
        Arc::new_cyclic(|this| Self {
            view: RwLock::new(ScheduleView::new(tenant.clone())),
            availability: RwLock::new(AvailabilityEditor::new(
                settings,
                WeeklySchedule::business_hours(),
            )),
            tenant,
            store,
            clock,
            notifier,
            config,
            lifecycle: AppointmentLifecycleService::new(),
            holds: HoldTimers::new(),
            this: this.clone(),
        })
    }

    /// Build the engine, load every collection and recover pending holds.
    pub async fn open(
        tenant: ProfessionalId,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSender>,
        config: Arc<AppConfig>,
    ) -> Result<Arc<Self>, AppointmentError> {
        let engine = Self::new(tenant, store, clock, notifier, config);
        engine.refresh().await?;
        engine.recover_holds().await?;
        Ok(engine)
    }

    pub fn tenant(&self) -> &ProfessionalId {
        &self.tenant
    }

    // ==========================================================================
    // VIEW MAINTENANCE
    // ==========================================================================

    /// Rebuild the view and the availability settings from a full read.
    #[instrument(skip(self), fields(tenant = %self.tenant))]
    pub async fn refresh(&self) -> Result<(), AppointmentError> {
        let store = self.store.as_ref();
        let (appointments, exceptions, clients, services) = futures::try_join!(
            store.list(&self.tenant, APPOINTMENTS_COLLECTION),
            store.list(&self.tenant, EXCEPTIONS_COLLECTION),
            store.list(&self.tenant, CLIENTS_COLLECTION),
            store.list(&self.tenant, SERVICES_COLLECTION),
        )?;

        let view = ScheduleView::from_snapshot(
            self.tenant.clone(),
            ViewSnapshot {
                appointments,
                exceptions,
                clients,
                services,
            },
        )?;
        *self.view.write().await = view;

        self.reload_availability().await?;
        info!("Schedule view refreshed for {}", self.tenant);
        Ok(())
    }

    async fn reload_availability(&self) -> Result<(), AppointmentError> {
        let editor =
            AvailabilityEditor::load_or(self.store.as_ref(), &self.tenant, default_settings(&self.config))
                .await?;
        *self.availability.write().await = editor;
        Ok(())
    }

    /// Pump store change events into the view until the channel closes.
    pub async fn sync_from(&self, mut receiver: broadcast::Receiver<ChangeEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if event.tenant != self.tenant {
                        continue;
                    }
                    if event.collection == AVAILABILITY_COLLECTION
                        || event.collection == SERVICE_AVAILABILITY_COLLECTION
                    {
                        if let Err(e) = self.reload_availability().await {
                            error!("Failed to reload availability for {}: {}", self.tenant, e);
                        }
                        continue;
                    }
                    self.view.write().await.apply(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Change feed lagged by {} events, rebuilding view", skipped);
                    if let Err(e) = self.refresh().await {
                        error!("Failed to rebuild view for {}: {}", self.tenant, e);
                    }
                }
                Err(RecvError::Closed) => {
                    debug!("Change feed closed for {}", self.tenant);
                    break;
                }
            }
        }
    }

    async fn commit(&self, batch: WriteBatch) -> Result<u64, AppError> {
        let sequence = self.store.commit(&self.tenant, batch.clone()).await?;
        let mut view = self.view.write().await;
        for event in batch.into_events(&self.tenant, sequence) {
            view.apply(&event);
        }
        Ok(sequence)
    }

    // ==========================================================================
    // AVAILABILITY
    // ==========================================================================

    /// Staged copy of the working-hours templates and booking settings.
    pub async fn availability(&self) -> AvailabilityEditor {
        self.availability.read().await.clone()
    }

    #[instrument(skip(self, editor), fields(tenant = %self.tenant))]
    pub async fn save_availability(&self, mut editor: AvailabilityEditor) -> Result<u64, AppointmentError> {
        let sequence = editor.save_all(self.store.as_ref(), &self.tenant).await?;
        *self.availability.write().await = editor;
        Ok(sequence)
    }

    pub async fn save_service(&self, service: Service) -> Result<(), AppointmentError> {
        let batch = WriteBatch::new().set(SERVICES_COLLECTION, service.id.clone(), to_value(&service)?);
        self.commit(batch).await?;
        debug!("Saved service {} for {}", service.id, self.tenant);
        Ok(())
    }

    #[instrument(skip(self, title), fields(tenant = %self.tenant))]
    pub async fn add_exception(
        &self,
        event_type: CalendarEventType,
        title: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        is_all_day: bool,
    ) -> Result<CalendarException, AppointmentError> {
        let exception = ExceptionOverlay::prepare_exception(event_type, title, start, end, is_all_day)?;
        let batch = WriteBatch::new().set(EXCEPTIONS_COLLECTION, exception.id.clone(), to_value(&exception)?);
        self.commit(batch).await?;

        info!("Added {:?} exception {} ({} - {})", event_type, exception.id, start, end);
        Ok(exception)
    }

    #[instrument(skip(self), fields(tenant = %self.tenant))]
    pub async fn remove_exception(&self, id: &str) -> Result<CalendarException, AppointmentError> {
        let removed = self.view.read().await.exceptions().check_removable(id)?.clone();
        self.commit(WriteBatch::new().delete(EXCEPTIONS_COLLECTION, id)).await?;
        info!("Removed exception {}", id);
        Ok(removed)
    }

    pub async fn exceptions_for_date(&self, date: NaiveDate) -> Vec<CalendarException> {
        let view = self.view.read().await;
        view.exceptions()
            .exceptions_for_date(date)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn month_index(&self, year: i32, month: u32) -> BTreeMap<NaiveDate, Vec<CalendarException>> {
        let view = self.view.read().await;
        view.exceptions()
            .month_index(year, month)
            .into_iter()
            .map(|(date, entries)| (date, entries.into_iter().cloned().collect()))
            .collect()
    }

    // ==========================================================================
    // SLOTS
    // ==========================================================================

    /// Generator output for `service_id` on `date`, ignoring the notice window.
    pub async fn available_slots(&self, service_id: &str, date: NaiveDate) -> Result<Vec<Slot>, AppointmentError> {
        let view = self.view.read().await;
        let availability = self.availability.read().await;
        let service = view
            .service(service_id)
            .ok_or_else(|| BookingError::ServiceNotFound(service_id.to_string()))?;
        if !service.is_active {
            return Ok(Vec::new());
        }
        self.slots_for(&view, &availability, service, date)
    }

    /// Available slots that also satisfy the notice window right now.
    pub async fn bookable_slots(&self, service_id: &str, date: NaiveDate) -> Result<Vec<Slot>, AppointmentError> {
        let slots = self.available_slots(service_id, date).await?;
        let guard = BookingPolicyGuard::new(self.availability.read().await.settings().clone());
        let now = self.clock.now();
        Ok(slots
            .into_iter()
            .filter(|slot| guard.within_notice_window(now, slot.start))
            .collect())
    }

    fn slots_for(
        &self,
        view: &ScheduleView,
        availability: &AvailabilityEditor,
        service: &Service,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, AppointmentError> {
        let query = SlotQuery::for_service(date, service)
            .with_fallback_step(i64::from(self.config.slot_granularity_minutes));
        let slots = generate(
            &query,
            availability.schedule_for(&service.id),
            view.exceptions().all(),
            &view.busy_ranges(date),
        )?;
        Ok(slots)
    }

    // ==========================================================================
    // BOOKING
    // ==========================================================================

    #[instrument(skip(self, request), fields(tenant = %self.tenant, start = %request.start))]
    pub async fn book(&self, request: BookingRequest) -> Result<Appointment, AppointmentError> {
        let client_name = request.client_name.trim();
        if client_name.is_empty() {
            return Err(BookingError::MissingClientName.into());
        }

        let now = self.clock.now();
        let (appointment, batch) = {
            let view = self.view.read().await;
            let availability = self.availability.read().await;

            let service = view
                .service(&request.service_id)
                .ok_or_else(|| BookingError::ServiceNotFound(request.service_id.clone()))?;
            if !service.is_active {
                return Err(BookingError::ServiceInactive(service.id.clone()).into());
            }

            let guard = BookingPolicyGuard::new(availability.settings().clone());
            guard.check_notice(now, request.start)?;
            let slots = self.slots_for(&view, &availability, service, request.start.date())?;
            guard.check(now, request.start, &slots)?;

            let appointment = Appointment {
                id: Uuid::new_v4().to_string(),
                client_name: client_name.to_string(),
                client_email: request.client_email.clone(),
                client_phone: request.client_phone.clone(),
                service: service.id.clone(),
                service_name: service.name.clone(),
                date_time: request.start,
                duration: service.duration,
                status: AppointmentStatus::Scheduled,
                modality: request.modality.unwrap_or(service.modality),
                price: service.price,
                payment_status: PaymentStatus::Pending,
                hold_expires_at: guard.hold_expiry(now, request.source),
                source: request.source,
            };
            let batch = booking_batch(&appointment)?;
            (appointment, batch)
        };

        if let Err(e) = self.commit(batch).await {
            if e.is_conflict() {
                warn!("Lost the race for {}: {}", request.start, e);
                return Err(BookingError::SlotUnavailable(request.start).into());
            }
            return Err(e.into());
        }

        if let Some(expires_at) = appointment.hold_expires_at {
            self.arm_hold(&appointment.id, expires_at);
        }

        info!(
            "Booked appointment {} for {} at {} ({:?})",
            appointment.id, appointment.client_name, appointment.date_time, appointment.source
        );
        Ok(appointment)
    }

    /// Record payment for a booking and confirm it if it is still scheduled.
    ///
    /// Fails with `SlotUnavailable` once the hold expired and the slot was released.
    #[instrument(skip(self), fields(tenant = %self.tenant))]
    pub async fn confirm_payment(&self, id: &str) -> Result<TransitionOutcome, AppointmentError> {
        self.holds.cancel(id);

        let mut retried = false;
        loop {
            let appointment = self.load_appointment(id).await?;
            match self.record_payment(appointment).await {
                Err(AppointmentError::Conflict(_)) if !retried => {
                    debug!("Appointment {} changed under payment, reloading", id);
                    retried = true;
                }
                result => return result,
            }
        }
    }

    async fn record_payment(&self, appointment: Appointment) -> Result<TransitionOutcome, AppointmentError> {
        if appointment.status == AppointmentStatus::Canceled
            && appointment.payment_status == PaymentStatus::Expired
        {
            warn!("Payment for {} arrived after its hold expired", appointment.id);
            return Err(BookingError::SlotUnavailable(appointment.date_time).into());
        }

        if appointment.status == AppointmentStatus::Scheduled {
            return self
                .apply_transition(appointment, AppointmentStatus::Confirmed, Some(PaymentStatus::Paid))
                .await;
        }

        let mut paid = appointment.clone();
        paid.payment_status = PaymentStatus::Paid;
        paid.hold_expires_at = None;
        if paid == appointment {
            return Ok(TransitionOutcome::unchanged(appointment));
        }

        let batch = WriteBatch::new()
            .require(APPOINTMENTS_COLLECTION, paid.id.clone(), "status", to_value(appointment.status)?)
            .set(APPOINTMENTS_COLLECTION, paid.id.clone(), to_value(&paid)?);
        self.commit_guarded(&paid.id, batch).await?;
        info!("Payment recorded for {} in status {}", paid.id, paid.status);
        Ok(TransitionOutcome::unchanged(paid))
    }

    // ==========================================================================
    // LIFECYCLE
    // ==========================================================================

    #[instrument(skip(self), fields(tenant = %self.tenant))]
    pub async fn transition(
        &self,
        id: &str,
        target: AppointmentStatus,
    ) -> Result<TransitionOutcome, AppointmentError> {
        let appointment = self.load_appointment(id).await?;
        self.apply_transition(appointment, target, None).await
    }

    /// Apply one status to many appointments, each with its own side effects.
    /// Appointments already in `target` are left untouched.
    #[instrument(skip(self, ids), fields(tenant = %self.tenant, count = ids.len()))]
    pub async fn transition_batch(
        &self,
        ids: &[String],
        target: AppointmentStatus,
    ) -> Vec<(String, Result<TransitionOutcome, AppointmentError>)> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.transition(id, target).await;
            if let Err(e) = &result {
                warn!("Batch transition of {} to {} failed: {}", id, target, e);
            }
            results.push((id.clone(), result));
        }
        results
    }

    /// Remove the record, its booked marker and its slot claims.
    #[instrument(skip(self), fields(tenant = %self.tenant))]
    pub async fn delete_appointment(&self, id: &str) -> Result<Appointment, AppointmentError> {
        let appointment = self.load_appointment(id).await?;

        let mut batch = WriteBatch::new()
            .delete(APPOINTMENTS_COLLECTION, id)
            .delete(EXCEPTIONS_COLLECTION, booked_id(id));
        if appointment.occupies_slot() {
            batch = batch.extend(release_claims(&appointment));
        }
        self.commit(batch).await?;
        self.holds.cancel(id);

        info!("Deleted appointment {}", id);
        Ok(appointment)
    }

    /// Re-derive the client aggregate from an appointment's current status.
    pub async fn sync_client(&self, id: &str) -> Result<Option<Client>, AppointmentError> {
        let appointment = self.load_appointment(id).await?;
        match appointment.status {
            AppointmentStatus::Confirmed => Ok(Some(self.upsert_client(&appointment, false).await?)),
            AppointmentStatus::Finished => Ok(Some(self.upsert_client(&appointment, true).await?)),
            _ => Ok(None),
        }
    }

    async fn apply_transition(
        &self,
        appointment: Appointment,
        target: AppointmentStatus,
        payment: Option<PaymentStatus>,
    ) -> Result<TransitionOutcome, AppointmentError> {
        let Some(plan) = self.lifecycle.plan(appointment.status, target)? else {
            return Ok(TransitionOutcome::unchanged(appointment));
        };

        let mut updated = appointment.clone();
        updated.status = target;
        updated.hold_expires_at = None;
        if let Some(payment) = payment {
            updated.payment_status = payment;
        }

        let mut batch = WriteBatch::new()
            .require(APPOINTMENTS_COLLECTION, updated.id.clone(), "status", to_value(plan.from)?)
            .set(APPOINTMENTS_COLLECTION, updated.id.clone(), to_value(&updated)?);
        if plan.release_slot {
            batch = batch
                .delete(EXCEPTIONS_COLLECTION, booked_id(&updated.id))
                .extend(release_claims(&updated));
        }
        self.commit_guarded(&updated.id, batch).await?;
        self.holds.cancel(&updated.id);
        info!("Appointment {} moved {} -> {}", updated.id, plan.from, plan.to);

        let side_effect_error = if plan.upsert_client {
            match self.upsert_client(&updated, plan.accumulate_totals).await {
                Ok(_) => None,
                Err(e) => {
                    error!("Client update for appointment {} failed: {}", updated.id, e);
                    Some(e)
                }
            }
        } else {
            None
        };

        if plan.notify_client && self.config.notifications_enabled {
            if let Some(notification) = StatusNotification::for_status(&updated) {
                dispatch(Arc::clone(&self.notifier), notification);
            }
        }

        Ok(TransitionOutcome {
            appointment: updated,
            previous_status: plan.from,
            changed: true,
            side_effect_error,
        })
    }

    /// Commit a status-guarded batch; a failed guard means another writer got there first.
    async fn commit_guarded(&self, id: &str, batch: WriteBatch) -> Result<u64, AppointmentError> {
        match self.commit(batch).await {
            Ok(sequence) => Ok(sequence),
            Err(e) if e.is_conflict() => {
                warn!("Appointment {} changed before the write landed: {}", id, e);
                Err(AppointmentError::Conflict(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert_client(&self, appointment: &Appointment, finished: bool) -> Result<Client, AppError> {
        let id = client_id(&appointment.client_name);
        let existing = match self.store.get(&self.tenant, CLIENTS_COLLECTION, &id).await? {
            Some(data) => Some(Client::from_document(Document { id: id.clone(), data })?),
            None => None,
        };

        let client = record_visit(existing, appointment, finished);
        self.commit(WriteBatch::new().set(CLIENTS_COLLECTION, id, to_value(&client)?))
            .await?;
        Ok(client)
    }

    async fn load_appointment(&self, id: &str) -> Result<Appointment, AppointmentError> {
        let data = self
            .store
            .get(&self.tenant, APPOINTMENTS_COLLECTION, id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound(id.to_string()))?;
        Ok(Appointment::from_document(Document {
            id: id.to_string(),
            data,
        })?)
    }

    // ==========================================================================
    // HOLDS
    // ==========================================================================

    fn arm_hold(&self, id: &str, expires_at: NaiveDateTime) {
        let delay = (expires_at - self.clock.now()).to_std().unwrap_or_default();
        let engine = self.this.clone();
        let appointment_id = id.to_string();

        self.holds.schedule(id, delay, async move {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            engine.holds.finish(&appointment_id);
            if let Err(e) = engine.release_hold(&appointment_id).await {
                error!("Failed to release hold on {}: {}", appointment_id, e);
            }
        });
    }

    /// Cancel an unpaid hold. No-op (returns false) once it was paid or canceled.
    #[instrument(skip(self), fields(tenant = %self.tenant))]
    pub async fn release_hold(&self, id: &str) -> Result<bool, AppointmentError> {
        let appointment = match self.load_appointment(id).await {
            Ok(appointment) => appointment,
            Err(AppointmentError::NotFound(_)) => {
                debug!("Hold on {} outlived its appointment", id);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if !appointment.has_pending_hold() {
            debug!("Hold on {} already resolved", id);
            return Ok(false);
        }

        match self
            .apply_transition(appointment, AppointmentStatus::Canceled, Some(PaymentStatus::Expired))
            .await
        {
            Ok(outcome) => {
                info!("Hold on {} expired, slot released", id);
                Ok(outcome.changed)
            }
            Err(AppointmentError::Conflict(_)) => {
                debug!("Hold on {} resolved while expiring", id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Release every hold whose expiry has passed. Returns the released ids.
    #[instrument(skip(self), fields(tenant = %self.tenant))]
    pub async fn release_expired_holds(&self) -> Result<Vec<String>, AppointmentError> {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .view
            .read()
            .await
            .appointments()
            .filter(|a| a.has_pending_hold() && a.hold_expires_at.is_some_and(|at| at <= now))
            .map(|a| a.id.clone())
            .collect();

        let mut released = Vec::with_capacity(expired.len());
        for id in expired {
            self.holds.cancel(&id);
            if self.release_hold(&id).await? {
                released.push(id);
            }
        }
        Ok(released)
    }

    /// Release expired holds and re-arm timers for the rest.
    async fn recover_holds(&self) -> Result<(), AppointmentError> {
        let released = self.release_expired_holds().await?;
        if !released.is_empty() {
            info!("Released {} expired holds on start-up", released.len());
        }

        let pending: Vec<(String, NaiveDateTime)> = self
            .view
            .read()
            .await
            .appointments()
            .filter(|a| a.has_pending_hold())
            .filter_map(|a| a.hold_expires_at.map(|at| (a.id.clone(), at)))
            .collect();
        for (id, expires_at) in pending {
            self.arm_hold(&id, expires_at);
        }
        Ok(())
    }

    pub fn has_pending_hold_timer(&self, id: &str) -> bool {
        self.holds.is_pending(id)
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn appointment(&self, id: &str) -> Option<Appointment> {
        self.view.read().await.appointment(id).cloned()
    }

    pub async fn appointments_on(&self, date: NaiveDate) -> Vec<Appointment> {
        self.view
            .read()
            .await
            .appointments_on(date)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn client_named(&self, name: &str) -> Option<Client> {
        self.view.read().await.client(&client_id(name)).cloned()
    }

    pub async fn clients(&self) -> Vec<Client> {
        self.view.read().await.clients().cloned().collect()
    }
}

impl Drop for SchedulingEngine {
    fn drop(&mut self) {
        if !self.holds.is_empty() {
            debug!("Dropping {} pending hold timers for {}", self.holds.len(), self.tenant);
        }
    }
}

fn default_settings(config: &AppConfig) -> BookingPolicySettings {
    BookingPolicySettings {
        reservation_hold_minutes: config.default_hold_minutes,
        ..BookingPolicySettings::default()
    }
}

fn booking_batch(appointment: &Appointment) -> Result<WriteBatch, AppError> {
    let marker = ExceptionOverlay::booked_marker(
        &appointment.id,
        &appointment.client_name,
        appointment.date_time,
        appointment.end_time(),
    );

    let mut batch = WriteBatch::new()
        .create(APPOINTMENTS_COLLECTION, appointment.id.clone(), to_value(appointment)?)
        .set(EXCEPTIONS_COLLECTION, marker.id.clone(), to_value(&marker)?);
    for claim in claim_ids(appointment.date_time, appointment.end_time()) {
        batch = batch.create(SLOT_CLAIMS_COLLECTION, claim, json!({ "appointmentId": appointment.id }));
    }
    Ok(batch)
}

fn release_claims(appointment: &Appointment) -> WriteBatch {
    claim_ids(appointment.date_time, appointment.end_time())
        .into_iter()
        .fold(WriteBatch::new(), |batch, claim| batch.delete(SLOT_CLAIMS_COLLECTION, claim))
}
