use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::{debug, warn};

use availability_cell::{
    CalendarException, ExceptionOverlay, Service, TimeRange, EXCEPTIONS_COLLECTION,
};
use shared_database::{Change, ChangeEvent, Document};
use shared_models::{AppError, ProfessionalId};

use crate::models::{
    Appointment, Client, APPOINTMENTS_COLLECTION, CLIENTS_COLLECTION, SERVICES_COLLECTION,
};

/// In-memory projection of one professional's appointments, exceptions,
/// clients and services, kept current from ordered change events.
#[derive(Debug, Clone)]
pub struct ScheduleView {
    tenant: ProfessionalId,
    appointments: BTreeMap<String, Appointment>,
    exceptions: ExceptionOverlay,
    clients: BTreeMap<String, Client>,
    services: BTreeMap<String, Service>,
    /// Highest sequence applied per `(collection, id)`.
    versions: HashMap<(String, String), u64>,
}

#[derive(Debug, Default)]
pub struct ViewSnapshot {
    pub appointments: Vec<Document>,
    pub exceptions: Vec<Document>,
    pub clients: Vec<Document>,
    pub services: Vec<Document>,
}

impl ScheduleView {
    pub fn new(tenant: ProfessionalId) -> Self {
        Self {
            tenant,
            appointments: BTreeMap::new(),
            exceptions: ExceptionOverlay::new(),
            clients: BTreeMap::new(),
            services: BTreeMap::new(),
            versions: HashMap::new(),
        }
    }

    /// Rebuild from a full read of every collection.
    pub fn from_snapshot(tenant: ProfessionalId, snapshot: ViewSnapshot) -> Result<Self, AppError> {
        let mut view = Self::new(tenant);

        for doc in snapshot.appointments {
            let appointment = Appointment::from_document(doc)?;
            view.appointments.insert(appointment.id.clone(), appointment);
        }

        let mut exceptions = Vec::new();
        for doc in snapshot.exceptions {
            let exception = CalendarException::from_document(doc)
                .map_err(|e| AppError::Serialization(e.to_string()))?;
            exceptions.push(exception);
        }
        view.exceptions = ExceptionOverlay::from_exceptions(exceptions);

        for doc in snapshot.clients {
            let client = Client::from_document(doc)?;
            view.clients.insert(client.id.clone(), client);
        }

        for doc in snapshot.services {
            let service: Service = serde_json::from_value(doc.data)?;
            view.services.insert(doc.id, service);
        }

        Ok(view)
    }

    pub fn tenant(&self) -> &ProfessionalId {
        &self.tenant
    }

    /// Apply one change event; returns false when it is ignored.
    ///
    /// Events for other tenants or untracked collections are ignored, as are
    /// events older than the last one applied to the same document.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        if event.tenant != self.tenant {
            return false;
        }

        let key = (event.collection.clone(), event.id.clone());
        if self.versions.get(&key).is_some_and(|applied| *applied >= event.sequence) {
            debug!("Skipping stale event {} for {}/{}", event.sequence, event.collection, event.id);
            return false;
        }

        let applied = match &event.change {
            Change::Upsert(data) => self.upsert(&event.collection, &event.id, data),
            Change::Delete => self.remove(&event.collection, &event.id),
        };

        match applied {
            Ok(true) => {
                self.versions.insert(key, event.sequence);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(
                    "Unreadable {}/{} at sequence {}: {}",
                    event.collection, event.id, event.sequence, e
                );
                false
            }
        }
    }

    fn upsert(&mut self, collection: &str, id: &str, data: &serde_json::Value) -> Result<bool, AppError> {
        let doc = Document {
            id: id.to_string(),
            data: data.clone(),
        };

        match collection {
            APPOINTMENTS_COLLECTION => {
                self.appointments.insert(id.to_string(), Appointment::from_document(doc)?);
            }
            EXCEPTIONS_COLLECTION => {
                let exception = CalendarException::from_document(doc)
                    .map_err(|e| AppError::Serialization(e.to_string()))?;
                self.exceptions.insert(exception);
            }
            CLIENTS_COLLECTION => {
                self.clients.insert(id.to_string(), Client::from_document(doc)?);
            }
            SERVICES_COLLECTION => {
                self.services.insert(id.to_string(), serde_json::from_value(doc.data)?);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn remove(&mut self, collection: &str, id: &str) -> Result<bool, AppError> {
        match collection {
            APPOINTMENTS_COLLECTION => {
                self.appointments.remove(id);
            }
            EXCEPTIONS_COLLECTION => {
                self.exceptions.take(id);
            }
            CLIENTS_COLLECTION => {
                self.clients.remove(id);
            }
            SERVICES_COLLECTION => {
                self.services.remove(id);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub fn appointment(&self, id: &str) -> Option<&Appointment> {
        self.appointments.get(id)
    }

    pub fn appointments(&self) -> impl Iterator<Item = &Appointment> {
        self.appointments.values()
    }

    pub fn appointments_on(&self, date: NaiveDate) -> Vec<&Appointment> {
        let mut on_date: Vec<_> = self
            .appointments
            .values()
            .filter(|a| a.date_time.date() == date)
            .collect();
        on_date.sort_by_key(|a| a.date_time);
        on_date
    }

    /// Ranges held by appointments that still occupy their slot on `date`.
    pub fn busy_ranges(&self, date: NaiveDate) -> Vec<TimeRange> {
        let day = TimeRange::of_day(date);
        self.appointments
            .values()
            .filter(|a| a.occupies_slot())
            .map(Appointment::range)
            .filter(|range| range.intersects(&day))
            .collect()
    }

    pub fn exceptions(&self) -> &ExceptionOverlay {
        &self.exceptions
    }

    pub fn client(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.get(id)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }
}
