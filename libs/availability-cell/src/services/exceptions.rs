use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::error::AvailabilityError;
use crate::models::{CalendarEventType, CalendarException, TimeRange};

const BOOKED_PREFIX: &str = "booked-";

/// Id of the booked marker synthesized for an appointment.
pub fn booked_id(appointment_id: &str) -> String {
    format!("{}{}", BOOKED_PREFIX, appointment_id)
}

/// One-off calendar overrides, kept ordered by start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExceptionOverlay {
    exceptions: Vec<CalendarException>,
}

impl ExceptionOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_exceptions(exceptions: Vec<CalendarException>) -> Self {
        let mut overlay = Self { exceptions };
        overlay.sort();
        overlay
    }

    fn sort(&mut self) {
        self.exceptions
            .sort_by(|a, b| (a.start, &a.id).cmp(&(b.start, &b.id)));
    }

    /// Validate a user-created exception without recording it.
    pub fn prepare_exception(
        event_type: CalendarEventType,
        title: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        is_all_day: bool,
    ) -> Result<CalendarException, AvailabilityError> {
        if start >= end {
            return Err(AvailabilityError::InvalidRange { start, end });
        }
        if event_type == CalendarEventType::Booked {
            return Err(AvailabilityError::Protected(
                "booked markers are derived from appointments".to_string(),
            ));
        }
        Ok(CalendarException {
            id: CalendarException::new_id(),
            event_type,
            title: title.trim().to_string(),
            start,
            end,
            is_all_day,
        })
    }

    /// Build the booked marker for an appointment occupying `[start, end)`.
    pub fn booked_marker(
        appointment_id: &str,
        title: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarException {
        CalendarException {
            id: booked_id(appointment_id),
            event_type: CalendarEventType::Booked,
            title: title.to_string(),
            start,
            end,
            is_all_day: false,
        }
    }

    /// Insert or replace by id.
    pub fn insert(&mut self, exception: CalendarException) {
        self.exceptions.retain(|e| e.id != exception.id);
        self.exceptions.push(exception);
        self.sort();
    }

    /// Fails with `Protected` for booked markers.
    pub fn check_removable(&self, id: &str) -> Result<&CalendarException, AvailabilityError> {
        let exception = self
            .get(id)
            .ok_or_else(|| AvailabilityError::ExceptionNotFound(id.to_string()))?;
        if exception.event_type == CalendarEventType::Booked {
            return Err(AvailabilityError::Protected(id.to_string()));
        }
        Ok(exception)
    }

    /// Remove by id regardless of type (change-feed deletions).
    pub fn take(&mut self, id: &str) -> Option<CalendarException> {
        let position = self.exceptions.iter().position(|e| e.id == id)?;
        Some(self.exceptions.remove(position))
    }

    pub fn get(&self, id: &str) -> Option<&CalendarException> {
        self.exceptions.iter().find(|e| e.id == id)
    }

    pub fn all(&self) -> &[CalendarException] {
        &self.exceptions
    }

    pub fn len(&self) -> usize {
        self.exceptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exceptions.is_empty()
    }

    /// Exceptions whose effective range touches `date`.
    pub fn exceptions_for_date(&self, date: NaiveDate) -> Vec<&CalendarException> {
        let day = TimeRange::of_day(date);
        self.exceptions
            .iter()
            .filter(|e| e.effective_range().intersects(&day))
            .collect()
    }

    /// Calendar projection: every date of the month that has exceptions.
    pub fn month_index(&self, year: i32, month: u32) -> BTreeMap<NaiveDate, Vec<&CalendarException>> {
        let mut index = BTreeMap::new();
        let Some(mut date) = NaiveDate::from_ymd_opt(year, month, 1) else {
            return index;
        };

        while date.month() == month {
            let entries = self.exceptions_for_date(date);
            if !entries.is_empty() {
                index.insert(date, entries);
            }
            date += Duration::days(1);
        }
        index
    }
}
