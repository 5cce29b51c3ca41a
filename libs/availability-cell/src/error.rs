use chrono::NaiveDateTime;
use thiserror::Error;

use shared_models::AppError;

use crate::models::{DayOfWeek, WallTime};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AvailabilityError {
    #[error("Malformed interval: start {start} must be before end {end}")]
    MalformedInterval { start: WallTime, end: WallTime },

    #[error("Invalid range: start {start} must be before end {end}")]
    InvalidRange { start: NaiveDateTime, end: NaiveDateTime },

    #[error("Exception {0} is a booked marker and cannot be removed directly")]
    Protected(String),

    #[error("Exception not found: {0}")]
    ExceptionNotFound(String),

    #[error("Time out of range: {0} minutes")]
    TimeOutOfRange(i64),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("No room left on {0} for another interval")]
    DayFull(DayOfWeek),

    #[error("No interval {index} on {day}")]
    IntervalIndexOutOfRange { day: DayOfWeek, index: usize },

    #[error("Invalid booking settings: {0}")]
    InvalidSettings(String),

    #[error("Store error: {0}")]
    Store(#[from] AppError),
}

impl From<serde_json::Error> for AvailabilityError {
    fn from(err: serde_json::Error) -> Self {
        AvailabilityError::Store(AppError::from(err))
    }
}
