use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AvailabilityError;
use crate::models::{
    CalendarEventType, CalendarException, DayOfWeek, Service, TimeInterval, TimeRange, WallTime,
    WeeklySchedule, WorkingDay,
};
use crate::services::interval;

/// Cursor step used when `duration + buffers` is not positive.
pub const MIN_GRANULARITY_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQuery {
    pub date: NaiveDate,
    pub duration_minutes: i64,
    pub buffer_before_minutes: i64,
    pub buffer_after_minutes: i64,
    pub fallback_step_minutes: i64,
}

impl SlotQuery {
    pub fn new(date: NaiveDate, duration_minutes: i64) -> Self {
        Self {
            date,
            duration_minutes,
            buffer_before_minutes: 0,
            buffer_after_minutes: 0,
            fallback_step_minutes: MIN_GRANULARITY_MINUTES,
        }
    }

    pub fn for_service(date: NaiveDate, service: &Service) -> Self {
        Self {
            buffer_before_minutes: service.buffer_before,
            buffer_after_minutes: service.buffer_after,
            ..Self::new(date, service.duration)
        }
    }

    pub fn with_buffers(mut self, before: i64, after: i64) -> Self {
        self.buffer_before_minutes = before;
        self.buffer_after_minutes = after;
        self
    }

    pub fn with_fallback_step(mut self, minutes: i64) -> Self {
        self.fallback_step_minutes = minutes;
        self
    }

    pub fn step_minutes(&self) -> i64 {
        let step = self.duration_minutes + self.buffer_before_minutes + self.buffer_after_minutes;
        if step > 0 {
            step
        } else {
            self.fallback_step_minutes.max(1)
        }
    }
}

/// A candidate bookable range of exactly one service's duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Slot {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }
}

/// Layered override: weekly intervals (normalised), plus extra availability
/// clipped to the date. Blocked ranges are applied per slot by `generate`.
pub fn effective_intervals(
    day: &WorkingDay,
    date: NaiveDate,
    exceptions: &[CalendarException],
) -> Result<Vec<TimeInterval>, AvailabilityError> {
    let weekly = if day.enabled {
        interval::normalize(&day.intervals)?
    } else {
        Vec::new()
    };

    let day_range = TimeRange::of_day(date);
    let day_start = day_range.start;
    let extra: Vec<TimeInterval> = exceptions
        .iter()
        .filter(|e| e.event_type == CalendarEventType::ExtraAvailability)
        .map(|e| e.effective_range())
        .filter(|range| range.intersects(&day_range))
        .map(|range| {
            let start = (range.start.max(day_start) - day_start).num_minutes();
            let end = (range.end.min(day_range.end) - day_start).num_minutes();
            Ok(TimeInterval {
                start_time: WallTime::from_minutes(start)?,
                end_time: WallTime::from_minutes(end)?,
            })
        })
        .collect::<Result<_, AvailabilityError>>()?;

    interval::union(&weekly, &extra)
}

/// Ordered bookable start times for one day and one service.
///
/// Deterministic and side-effect free. `busy` holds ranges of appointments that
/// already occupy the calendar.
pub fn generate(
    query: &SlotQuery,
    schedule: &WeeklySchedule,
    exceptions: &[CalendarException],
    busy: &[TimeRange],
) -> Result<Vec<Slot>, AvailabilityError> {
    if query.duration_minutes <= 0 {
        debug!("Non-positive duration {}, no slots", query.duration_minutes);
        return Ok(Vec::new());
    }

    let day = schedule.day(DayOfWeek::of(query.date));
    let intervals = effective_intervals(day, query.date, exceptions)?;

    let excluded: Vec<TimeRange> = exceptions
        .iter()
        .filter(|e| match e.event_type {
            CalendarEventType::Blocked | CalendarEventType::Booked => true,
            CalendarEventType::ExtraAvailability => false,
        })
        .map(|e| e.effective_range())
        .chain(busy.iter().copied())
        .collect();

    let step = query.step_minutes();
    let duration = query.duration_minutes;
    let mut slots = Vec::new();

    for window in &intervals {
        let limit = i64::from(window.end_time.to_minutes()) - duration;
        let mut cursor = i64::from(window.start_time.to_minutes());

        while cursor <= limit {
            let start = WallTime::MIDNIGHT.on(query.date) + Duration::minutes(cursor);
            let slot = Slot {
                start,
                end: start + Duration::minutes(duration),
            };
            if !excluded.iter().any(|range| range.intersects(&slot.range())) {
                slots.push(slot);
            }
            cursor += step;
        }
    }

    debug!(
        "Generated {} slots for {} (duration {}, step {})",
        slots.len(),
        query.date,
        duration,
        step
    );
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    // 2024-01-01 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        monday().and_hms_opt(hour, minute, 0).unwrap()
    }

    fn iv(start: &str, end: &str) -> TimeInterval {
        TimeInterval {
            start_time: start.parse().unwrap(),
            end_time: end.parse().unwrap(),
        }
    }

    fn monday_schedule(intervals: Vec<TimeInterval>) -> WeeklySchedule {
        let mut schedule = WeeklySchedule::closed();
        let day = schedule.day_mut(DayOfWeek::Monday);
        day.enabled = true;
        day.intervals = intervals;
        schedule
    }

    fn exception(event_type: CalendarEventType, start: NaiveDateTime, end: NaiveDateTime) -> CalendarException {
        CalendarException {
            id: CalendarException::new_id(),
            event_type,
            title: "test".to_string(),
            start,
            end,
            is_all_day: false,
        }
    }

    fn starts(slots: &[Slot]) -> Vec<String> {
        slots.iter().map(|s| s.start.format("%H:%M").to_string()).collect()
    }

    #[test]
    fn hourly_slots_fill_interval_exactly() {
        let schedule = monday_schedule(vec![iv("09:00", "12:00")]);
        let slots = generate(&SlotQuery::new(monday(), 60), &schedule, &[], &[]).unwrap();
        assert_eq!(starts(&slots), vec!["09:00", "10:00", "11:00"]);
    }

    #[test]
    fn blocked_range_excludes_intersecting_slots_only() {
        let schedule = monday_schedule(vec![iv("09:00", "12:00")]);
        let blocked = [exception(CalendarEventType::Blocked, at(10, 0), at(10, 30))];
        let slots = generate(&SlotQuery::new(monday(), 60), &schedule, &blocked, &[]).unwrap();
        assert_eq!(starts(&slots), vec!["09:00", "11:00"]);
    }

    #[test]
    fn slot_starting_half_past_overlapping_block_is_excluded() {
        let schedule = monday_schedule(vec![iv("09:30", "12:30")]);
        let blocked = [exception(CalendarEventType::Blocked, at(10, 0), at(10, 30))];
        let slots = generate(&SlotQuery::new(monday(), 60), &schedule, &blocked, &[]).unwrap();
        assert_eq!(starts(&slots), vec!["10:30", "11:30"]);
    }

    #[test]
    fn buffers_widen_the_step() {
        let schedule = monday_schedule(vec![iv("09:00", "12:00")]);
        let query = SlotQuery::new(monday(), 45).with_buffers(5, 10);
        let slots = generate(&query, &schedule, &[], &[]).unwrap();
        assert_eq!(starts(&slots), vec!["09:00", "10:00", "11:00"]);
    }

    #[test]
    fn non_positive_duration_yields_nothing() {
        let schedule = monday_schedule(vec![iv("09:00", "12:00")]);
        assert!(generate(&SlotQuery::new(monday(), 0), &schedule, &[], &[]).unwrap().is_empty());
        assert!(generate(&SlotQuery::new(monday(), -30), &schedule, &[], &[]).unwrap().is_empty());
    }

    #[test]
    fn negative_buffers_fall_back_to_minimum_step() {
        let query = SlotQuery::new(monday(), 30).with_buffers(-20, -20);
        assert_eq!(query.step_minutes(), MIN_GRANULARITY_MINUTES);

        let schedule = monday_schedule(vec![iv("09:00", "10:00")]);
        let slots = generate(&query, &schedule, &[], &[]).unwrap();
        assert_eq!(starts(&slots), vec!["09:00", "09:15", "09:30"]);

        let coarse = query.with_fallback_step(30);
        assert_eq!(starts(&generate(&coarse, &schedule, &[], &[]).unwrap()), vec!["09:00", "09:30"]);
    }

    #[test]
    fn disabled_day_only_offers_extra_availability() {
        let mut schedule = monday_schedule(vec![iv("09:00", "12:00")]);
        schedule.day_mut(DayOfWeek::Monday).enabled = false;
        let extra = [exception(CalendarEventType::ExtraAvailability, at(14, 0), at(16, 0))];

        let slots = generate(&SlotQuery::new(monday(), 60), &schedule, &extra, &[]).unwrap();
        assert_eq!(starts(&slots), vec!["14:00", "15:00"]);
    }

    #[test]
    fn extra_availability_merges_with_template() {
        let schedule = monday_schedule(vec![iv("09:00", "11:00")]);
        let extra = [exception(CalendarEventType::ExtraAvailability, at(11, 0), at(12, 0))];
        let slots = generate(&SlotQuery::new(monday(), 60), &schedule, &extra, &[]).unwrap();
        assert_eq!(starts(&slots), vec!["09:00", "10:00", "11:00"]);
    }

    #[test]
    fn blocked_wins_over_extra_availability() {
        let schedule = WeeklySchedule::closed();
        let exceptions = [
            exception(CalendarEventType::ExtraAvailability, at(14, 0), at(16, 0)),
            exception(CalendarEventType::Blocked, at(14, 0), at(16, 0)),
        ];
        let slots = generate(&SlotQuery::new(monday(), 60), &schedule, &exceptions, &[]).unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn overlapping_weekly_intervals_do_not_duplicate_slots() {
        let schedule = monday_schedule(vec![iv("09:00", "11:00"), iv("10:00", "12:00")]);
        let slots = generate(&SlotQuery::new(monday(), 60), &schedule, &[], &[]).unwrap();
        assert_eq!(starts(&slots), vec!["09:00", "10:00", "11:00"]);
    }

    #[test]
    fn booked_markers_and_busy_ranges_are_excluded() {
        let schedule = monday_schedule(vec![iv("09:00", "13:00")]);
        let booked = [exception(CalendarEventType::Booked, at(9, 0), at(10, 0))];
        let busy = [TimeRange::new(at(11, 30), at(12, 0))];

        let slots = generate(&SlotQuery::new(monday(), 60), &schedule, &booked, &busy).unwrap();
        assert_eq!(starts(&slots), vec!["10:00", "12:00"]);
    }

    #[test]
    fn malformed_template_interval_fails() {
        let schedule = monday_schedule(vec![iv("12:00", "09:00")]);
        assert_matches!(
            generate(&SlotQuery::new(monday(), 60), &schedule, &[], &[]),
            Err(AvailabilityError::MalformedInterval { .. })
        );
    }

    #[test]
    fn generation_is_deterministic_and_non_overlapping() {
        let schedule = monday_schedule(vec![iv("08:00", "12:00"), iv("13:00", "18:30")]);
        let exceptions = [
            exception(CalendarEventType::Blocked, at(9, 10), at(9, 50)),
            exception(CalendarEventType::Booked, at(15, 0), at(15, 45)),
        ];
        let query = SlotQuery::new(monday(), 50).with_buffers(0, 10);

        let first = generate(&query, &schedule, &exceptions, &[]).unwrap();
        let second = generate(&query, &schedule, &exceptions, &[]).unwrap();
        assert_eq!(first, second);

        let allowed = [TimeRange::new(at(8, 0), at(12, 0)), TimeRange::new(at(13, 0), at(18, 30))];
        for (i, slot) in first.iter().enumerate() {
            assert!(allowed.iter().any(|w| w.start <= slot.start && slot.end <= w.end));
            for e in &exceptions {
                assert!(!slot.range().intersects(&e.effective_range()));
            }
            for other in &first[i + 1..] {
                assert!(!slot.range().intersects(&other.range()));
            }
        }
    }

    #[test]
    fn interval_ending_at_midnight_is_supported() {
        let schedule = monday_schedule(vec![iv("22:00", "24:00")]);
        let slots = generate(&SlotQuery::new(monday(), 60), &schedule, &[], &[]).unwrap();
        assert_eq!(starts(&slots), vec!["22:00", "23:00"]);
    }
}
