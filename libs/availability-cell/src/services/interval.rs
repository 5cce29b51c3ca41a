//! Pure arithmetic over same-day wall-clock intervals.
//!
//! Every operation validates its inputs and fails with `MalformedInterval`
//! when `start >= end`, instead of producing a silently wrong answer.

use crate::error::AvailabilityError;
use crate::models::{TimeInterval, WallTime};

pub fn validate(interval: &TimeInterval) -> Result<(), AvailabilityError> {
    if interval.start_time >= interval.end_time {
        return Err(AvailabilityError::MalformedInterval {
            start: interval.start_time,
            end: interval.end_time,
        });
    }
    Ok(())
}

/// Half-open overlap: touching endpoints do not overlap.
pub fn overlaps(a: &TimeInterval, b: &TimeInterval) -> Result<bool, AvailabilityError> {
    validate(a)?;
    validate(b)?;
    Ok(a.start_time < b.end_time && b.start_time < a.end_time)
}

/// Whether `b` lies entirely inside `a`.
pub fn contains(a: &TimeInterval, b: &TimeInterval) -> Result<bool, AvailabilityError> {
    validate(a)?;
    validate(b)?;
    Ok(a.start_time <= b.start_time && b.end_time <= a.end_time)
}

/// `a` minus `b`: zero, one or two intervals, in order.
pub fn subtract(a: &TimeInterval, b: &TimeInterval) -> Result<Vec<TimeInterval>, AvailabilityError> {
    if !overlaps(a, b)? {
        return Ok(vec![*a]);
    }

    let mut remainder = Vec::with_capacity(2);
    if a.start_time < b.start_time {
        remainder.push(TimeInterval {
            start_time: a.start_time,
            end_time: b.start_time,
        });
    }
    if b.end_time < a.end_time {
        remainder.push(TimeInterval {
            start_time: b.end_time,
            end_time: a.end_time,
        });
    }
    Ok(remainder)
}

pub fn to_minutes(time: WallTime) -> u32 {
    time.to_minutes()
}

pub fn from_minutes(minutes: i64) -> Result<WallTime, AvailabilityError> {
    WallTime::from_minutes(minutes)
}

/// Sort and merge overlapping or adjacent intervals.
pub fn normalize(intervals: &[TimeInterval]) -> Result<Vec<TimeInterval>, AvailabilityError> {
    for interval in intervals {
        validate(interval)?;
    }

    let mut sorted = intervals.to_vec();
    sorted.sort_by_key(|i| (i.start_time, i.end_time));

    let mut merged: Vec<TimeInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        if let Some(last) = merged.last_mut() {
            if interval.start_time <= last.end_time {
                last.end_time = last.end_time.max(interval.end_time);
                continue;
            }
        }
        merged.push(interval);
    }
    Ok(merged)
}

pub fn union(a: &[TimeInterval], b: &[TimeInterval]) -> Result<Vec<TimeInterval>, AvailabilityError> {
    let combined: Vec<TimeInterval> = a.iter().chain(b.iter()).copied().collect();
    normalize(&combined)
}
