use std::collections::BTreeMap;

use serde_json::to_value;
use tracing::{debug, info, instrument, warn};

use shared_database::{DocumentStore, WriteBatch};
use shared_models::ProfessionalId;

use crate::error::AvailabilityError;
use crate::models::{
    AvailabilityDocument, BookingPolicySettings, DayOfWeek, ServiceAvailabilityDocument,
    TimeInterval, WallTime, WeeklySchedule, AVAILABILITY_COLLECTION, DEFAULT_AVAILABILITY_ID,
    SERVICE_AVAILABILITY_COLLECTION,
};
use crate::services::interval;

const NEW_INTERVAL_MINUTES: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TemplateKey {
    Default,
    Service(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalBound {
    Start,
    End,
}

/// Staged copy of a professional's weekly templates and booking settings.
///
/// Every edit is an in-memory mutation; nothing is persisted until `save_all`.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityEditor {
    default_schedule: WeeklySchedule,
    services: BTreeMap<String, WeeklySchedule>,
    settings: BookingPolicySettings,
    dirty: bool,
}

impl Default for AvailabilityEditor {
    fn default() -> Self {
        Self::new(BookingPolicySettings::default(), WeeklySchedule::business_hours())
    }
}

impl AvailabilityEditor {
    pub fn new(settings: BookingPolicySettings, default_schedule: WeeklySchedule) -> Self {
        Self {
            default_schedule,
            services: BTreeMap::new(),
            settings,
            dirty: false,
        }
    }

    pub async fn load(
        store: &dyn DocumentStore,
        tenant: &ProfessionalId,
    ) -> Result<Self, AvailabilityError> {
        Self::load_or(store, tenant, BookingPolicySettings::default()).await
    }

    /// Like `load`, seeding `defaults` when nothing has been saved yet.
    #[instrument(skip(store, defaults))]
    pub async fn load_or(
        store: &dyn DocumentStore,
        tenant: &ProfessionalId,
        defaults: BookingPolicySettings,
    ) -> Result<Self, AvailabilityError> {
        let mut editor = match store
            .get(tenant, AVAILABILITY_COLLECTION, DEFAULT_AVAILABILITY_ID)
            .await?
        {
            Some(value) => {
                let doc: AvailabilityDocument = serde_json::from_value(value)?;
                let settings = doc.settings();
                if let Err(e) = settings.validate() {
                    warn!("Stored availability settings for {} are invalid: {}", tenant, e);
                    return Err(e);
                }
                Self::new(settings, doc.working_hours)
            }
            None => {
                info!("No availability document for {}, seeding defaults", tenant);
                Self::new(defaults, WeeklySchedule::business_hours())
            }
        };

        for doc in store.list(tenant, SERVICE_AVAILABILITY_COLLECTION).await? {
            let service: ServiceAvailabilityDocument = serde_json::from_value(doc.data)?;
            editor.services.insert(doc.id, service.working_hours);
        }

        debug!("Loaded {} service templates for {}", editor.services.len(), tenant);
        Ok(editor)
    }

    pub fn settings(&self) -> &BookingPolicySettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: BookingPolicySettings) {
        self.settings = settings;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn default_schedule(&self) -> &WeeklySchedule {
        &self.default_schedule
    }

    pub fn schedule(&self, key: &TemplateKey) -> Option<&WeeklySchedule> {
        match key {
            TemplateKey::Default => Some(&self.default_schedule),
            TemplateKey::Service(id) => self.services.get(id),
        }
    }

    /// Per-service template, falling back to the default one.
    pub fn schedule_for(&self, service_id: &str) -> &WeeklySchedule {
        self.services.get(service_id).unwrap_or(&self.default_schedule)
    }

    pub fn service_ids(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// A service edited for the first time starts from a copy of the default.
    fn schedule_mut(&mut self, key: &TemplateKey) -> &mut WeeklySchedule {
        self.dirty = true;
        match key {
            TemplateKey::Default => &mut self.default_schedule,
            TemplateKey::Service(id) => self
                .services
                .entry(id.clone())
                .or_insert_with(|| self.default_schedule.clone()),
        }
    }

    /// Returns the new `enabled` flag.
    pub fn toggle_day(&mut self, key: &TemplateKey, day: DayOfWeek) -> bool {
        let working_day = self.schedule_mut(key).day_mut(day);
        working_day.enabled = !working_day.enabled;
        working_day.enabled
    }

    /// Append an hour after the last interval (09:00-18:00 on an empty day).
    /// Returns the index of the new interval.
    pub fn add_interval(&mut self, key: &TemplateKey, day: DayOfWeek) -> Result<usize, AvailabilityError> {
        let working_day = self.schedule_mut(key).day_mut(day);

        let next = match working_day.intervals.last() {
            None => TimeInterval {
                start_time: WallTime::hm(9, 0)?,
                end_time: WallTime::hm(18, 0)?,
            },
            Some(last) if last.end_time >= WallTime::END_OF_DAY => {
                return Err(AvailabilityError::DayFull(day));
            }
            Some(last) => {
                let end = (last.end_time.to_minutes() + NEW_INTERVAL_MINUTES)
                    .min(WallTime::END_OF_DAY.to_minutes());
                TimeInterval {
                    start_time: last.end_time,
                    end_time: WallTime::from_minutes(i64::from(end))?,
                }
            }
        };

        working_day.intervals.push(next);
        Ok(working_day.intervals.len() - 1)
    }

    pub fn remove_interval(
        &mut self,
        key: &TemplateKey,
        day: DayOfWeek,
        index: usize,
    ) -> Result<TimeInterval, AvailabilityError> {
        let working_day = self.schedule_mut(key).day_mut(day);
        if index >= working_day.intervals.len() {
            return Err(AvailabilityError::IntervalIndexOutOfRange { day, index });
        }
        Ok(working_day.intervals.remove(index))
    }

    /// Staged edits may leave the interval malformed; `save_all` rejects it.
    pub fn set_interval_bound(
        &mut self,
        key: &TemplateKey,
        day: DayOfWeek,
        index: usize,
        bound: IntervalBound,
        value: WallTime,
    ) -> Result<(), AvailabilityError> {
        let working_day = self.schedule_mut(key).day_mut(day);
        let interval = working_day
            .intervals
            .get_mut(index)
            .ok_or(AvailabilityError::IntervalIndexOutOfRange { day, index })?;

        match bound {
            IntervalBound::Start => interval.start_time = value,
            IntervalBound::End => interval.end_time = value,
        }
        Ok(())
    }

    /// Overwrite `to` wholesale, `enabled` flag included.
    pub fn copy_day(&mut self, key: &TemplateKey, from: DayOfWeek, to: DayOfWeek) {
        let schedule = self.schedule_mut(key);
        let mut copied = schedule.day(from).clone();
        copied.day_of_week = to;
        *schedule.day_mut(to) = copied;
    }

    pub fn copy_default_template(&mut self, service_id: &str) {
        debug!("Copying default template onto service {}", service_id);
        self.services
            .insert(service_id.to_string(), self.default_schedule.clone());
        self.dirty = true;
    }

    pub fn validate(&self) -> Result<(), AvailabilityError> {
        self.settings.validate()?;
        let schedules = std::iter::once(&self.default_schedule).chain(self.services.values());
        for schedule in schedules {
            for day in schedule.days() {
                for interval in &day.intervals {
                    interval::validate(interval)?;
                }
            }
        }
        Ok(())
    }

    /// Every document `save_all` writes, as one batch.
    pub fn save_batch(&self) -> Result<WriteBatch, AvailabilityError> {
        self.validate()?;

        let default_doc = AvailabilityDocument::new(&self.settings, self.default_schedule.clone());
        let mut batch = WriteBatch::new().set(
            AVAILABILITY_COLLECTION,
            DEFAULT_AVAILABILITY_ID,
            to_value(&default_doc)?,
        );

        for (service_id, schedule) in &self.services {
            let doc = ServiceAvailabilityDocument {
                working_hours: schedule.clone(),
            };
            batch = batch.set(SERVICE_AVAILABILITY_COLLECTION, service_id.clone(), to_value(&doc)?);
        }
        Ok(batch)
    }

    #[instrument(skip(self, store))]
    pub async fn save_all(
        &mut self,
        store: &dyn DocumentStore,
        tenant: &ProfessionalId,
    ) -> Result<u64, AvailabilityError> {
        let batch = self.save_batch()?;
        let writes = batch.len();
        let sequence = store.commit(tenant, batch).await?;
        self.dirty = false;

        info!("Saved availability for {} ({} documents)", tenant, writes);
        Ok(sequence)
    }
}
