// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use availability_cell::{AvailabilityError, Modality, TimeRange};
use shared_database::Document;
use shared_models::AppError;

pub const APPOINTMENTS_COLLECTION: &str = "appointments";
pub const CLIENTS_COLLECTION: &str = "clients";
pub const SERVICES_COLLECTION: &str = "services";
pub const SLOT_CLAIMS_COLLECTION: &str = "slot_claims";

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub client_name: String,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub client_phone: Option<String>,
    /// Service id.
    pub service: String,
    #[serde(default)]
    pub service_name: String,
    pub date_time: NaiveDateTime,
    /// Minutes.
    pub duration: i64,
    pub status: AppointmentStatus,
    pub modality: Modality,
    pub price: f64,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_expires_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub source: BookingSource,
}

impl Appointment {
    pub fn end_time(&self) -> NaiveDateTime {
        self.date_time + Duration::minutes(self.duration)
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.date_time, self.end_time())
    }

    pub fn occupies_slot(&self) -> bool {
        self.status.occupies_slot()
    }

    /// An unpaid hold still waiting on payment.
    pub fn has_pending_hold(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
            && self.payment_status != PaymentStatus::Paid
            && self.hold_expires_at.is_some()
    }

    pub fn from_document(doc: Document) -> Result<Self, AppError> {
        let mut appointment: Appointment = serde_json::from_value(doc.data)?;
        appointment.id = doc.id;
        Ok(appointment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Finished,
    Canceled,
    /// Needs manual attention (no-show, payment failure).
    Problem,
}

impl AppointmentStatus {
    pub fn occupies_slot(self) -> bool {
        !matches!(self, AppointmentStatus::Canceled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Finished => write!(f, "finished"),
            AppointmentStatus::Canceled => write!(f, "canceled"),
            AppointmentStatus::Problem => write!(f, "problem"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    /// The reservation hold lapsed before payment.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingSource {
    #[default]
    PublicPage,
    Professional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub service_id: String,
    pub start: NaiveDateTime,
    pub modality: Option<Modality>,
    pub source: BookingSource,
}

// ==============================================================================
// CLIENT AGGREGATE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClientCategory {
    #[default]
    New,
    Fiel,
    #[serde(rename = "VIP")]
    Vip,
}

/// Derived from appointment history; status is the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub total_spent: f64,
    #[serde(default)]
    pub avg_ticket: f64,
    #[serde(default)]
    pub total_appointments: u32,
    #[serde(default)]
    pub last_visit: Option<NaiveDateTime>,
    #[serde(default)]
    pub category: ClientCategory,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Finished appointments already folded into the totals.
    #[serde(default)]
    pub counted_appointments: Vec<String>,
}

impl Client {
    pub fn from_document(doc: Document) -> Result<Self, AppError> {
        let mut client: Client = serde_json::from_value(doc.data)?;
        client.id = doc.id;
        Ok(client)
    }
}

// ==============================================================================
// TRANSITION RESULTS
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub appointment: Appointment,
    pub previous_status: AppointmentStatus,
    /// False when the status did not change.
    pub changed: bool,
    /// Client aggregate failure; the status change itself persisted.
    pub side_effect_error: Option<AppError>,
}

impl TransitionOutcome {
    pub fn unchanged(appointment: Appointment) -> Self {
        Self {
            previous_status: appointment.status,
            appointment,
            changed: false,
            side_effect_error: None,
        }
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

/// Why a booking attempt was refused.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookingError {
    #[error("Requested start {requested} is before the minimum notice ({earliest})")]
    TooSoon {
        requested: NaiveDateTime,
        earliest: NaiveDateTime,
    },

    #[error("Requested start {requested} is after the maximum notice ({latest})")]
    TooFar {
        requested: NaiveDateTime,
        latest: NaiveDateTime,
    },

    #[error("Slot at {0} is no longer available")]
    SlotUnavailable(NaiveDateTime),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service is not bookable: {0}")]
    ServiceInactive(String),

    #[error("Client name is required")]
    MissingClientName,
}

impl BookingError {
    /// Another booking got there first; the caller should offer a different slot.
    pub fn is_race(&self) -> bool {
        matches!(self, BookingError::SlotUnavailable(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppointmentError {
    #[error("Appointment not found: {0}")]
    NotFound(String),

    #[error("Appointment cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Availability(#[from] AvailabilityError),

    #[error("Appointment {0} was changed concurrently")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] AppError),
}

impl AppointmentError {
    pub fn is_race(&self) -> bool {
        matches!(self, AppointmentError::Booking(err) if err.is_race())
    }
}

impl From<serde_json::Error> for AppointmentError {
    fn from(err: serde_json::Error) -> Self {
        AppointmentError::Store(AppError::from(err))
    }
}
