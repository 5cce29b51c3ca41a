use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use shared_database::Document;

use crate::error::AvailabilityError;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

// ==============================================================================
// WALL-CLOCK TIME AND INTERVALS
// ==============================================================================

/// Minutes since local midnight, `00:00` through `24:00` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WallTime(u32);

impl WallTime {
    pub const MIDNIGHT: WallTime = WallTime(0);
    pub const END_OF_DAY: WallTime = WallTime(MINUTES_PER_DAY);

    pub fn from_minutes(minutes: i64) -> Result<Self, AvailabilityError> {
        if !(0..=MINUTES_PER_DAY as i64).contains(&minutes) {
            return Err(AvailabilityError::TimeOutOfRange(minutes));
        }
        Ok(WallTime(minutes as u32))
    }

    pub fn hm(hour: u32, minute: u32) -> Result<Self, AvailabilityError> {
        if minute >= 60 {
            return Err(AvailabilityError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Self::from_minutes(i64::from(hour) * 60 + i64::from(minute))
    }

    pub fn to_minutes(self) -> u32 {
        self.0
    }

    pub fn from_naive_time(time: NaiveTime) -> Self {
        WallTime(time.num_seconds_from_midnight() / 60)
    }

    /// Timestamp of this wall time on `date`; `24:00` is the next midnight.
    pub fn on(self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(NaiveTime::MIN) + Duration::minutes(i64::from(self.0))
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for WallTime {
    type Err = AvailabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AvailabilityError::InvalidTime(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.get(..2).unwrap_or(minute).parse().map_err(|_| invalid())?;
        Self::hm(hour, minute).map_err(|_| invalid())
    }
}

impl Serialize for WallTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WallTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Wall-clock interval within one day. Fields stay public so staged edits may be
/// temporarily malformed; `services::interval::validate` is the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeInterval {
    pub start_time: WallTime,
    pub end_time: WallTime,
}

impl TimeInterval {
    pub fn new(start_time: WallTime, end_time: WallTime) -> Result<Self, AvailabilityError> {
        let interval = Self { start_time, end_time };
        crate::services::interval::validate(&interval)?;
        Ok(interval)
    }

    pub fn duration_minutes(&self) -> i64 {
        i64::from(self.end_time.to_minutes()) - i64::from(self.start_time.to_minutes())
    }
}

/// Half-open range of local timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn of_day(date: NaiveDate) -> Self {
        Self::new(WallTime::MIDNIGHT.on(date), WallTime::END_OF_DAY.on(date))
    }
}

// ==============================================================================
// WEEKLY TEMPLATE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    /// 0 = Sunday through 6 = Saturday.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Sun => DayOfWeek::Sunday,
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DayOfWeek::Sunday => "sunday",
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingDay {
    pub day_of_week: DayOfWeek,
    pub enabled: bool,
    #[serde(default)]
    pub intervals: Vec<TimeInterval>,
}

impl WorkingDay {
    pub fn closed(day_of_week: DayOfWeek) -> Self {
        Self {
            day_of_week,
            enabled: false,
            intervals: Vec::new(),
        }
    }
}

/// Seven working days, always indexed Sunday..Saturday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<WorkingDay>", into = "Vec<WorkingDay>")]
pub struct WeeklySchedule {
    days: Vec<WorkingDay>,
}

impl WeeklySchedule {
    pub fn closed() -> Self {
        Self {
            days: DayOfWeek::ALL.iter().map(|d| WorkingDay::closed(*d)).collect(),
        }
    }

    /// Monday to Friday, 09:00-18:00.
    pub fn business_hours() -> Self {
        let mut schedule = Self::closed();
        let hours = TimeInterval {
            start_time: WallTime(9 * 60),
            end_time: WallTime(18 * 60),
        };
        for day in &mut schedule.days {
            if !matches!(day.day_of_week, DayOfWeek::Saturday | DayOfWeek::Sunday) {
                day.enabled = true;
                day.intervals = vec![hours];
            }
        }
        schedule
    }

    pub fn day(&self, day: DayOfWeek) -> &WorkingDay {
        &self.days[day.index()]
    }

    pub fn day_mut(&mut self, day: DayOfWeek) -> &mut WorkingDay {
        &mut self.days[day.index()]
    }

    pub fn days(&self) -> &[WorkingDay] {
        &self.days
    }
}

impl TryFrom<Vec<WorkingDay>> for WeeklySchedule {
    type Error = String;

    fn try_from(mut days: Vec<WorkingDay>) -> Result<Self, Self::Error> {
        days.sort_by_key(|d| d.day_of_week);
        days.dedup_by_key(|d| d.day_of_week);
        if days.len() != 7 {
            return Err(format!("workingHours must hold 7 distinct days, found {}", days.len()));
        }
        Ok(Self { days })
    }
}

impl From<WeeklySchedule> for Vec<WorkingDay> {
    fn from(schedule: WeeklySchedule) -> Self {
        schedule.days
    }
}

// ==============================================================================
// CALENDAR EXCEPTIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarEventType {
    Blocked,
    ExtraAvailability,
    /// Derived from an appointment; never user-editable.
    Booked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarException {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: CalendarEventType,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    #[serde(default)]
    pub is_all_day: bool,
}

impl CalendarException {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Range actually covered; all-day entries cover every touched date in full.
    pub fn effective_range(&self) -> TimeRange {
        if !self.is_all_day {
            return TimeRange::new(self.start, self.end);
        }
        let first = self.start.date();
        let last = if self.end.time() == NaiveTime::MIN && self.end.date() > first {
            self.end.date()
        } else {
            self.end.date() + Duration::days(1)
        };
        TimeRange::new(first.and_time(NaiveTime::MIN), last.and_time(NaiveTime::MIN))
    }

    pub fn from_document(doc: Document) -> Result<Self, AvailabilityError> {
        let mut exception: CalendarException = serde_json::from_value(doc.data)?;
        exception.id = doc.id;
        Ok(exception)
    }
}

// ==============================================================================
// BOOKING POLICY AND SERVICES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingPolicy {
    /// Slot reserved pending payment, released automatically on expiry.
    TemporaryHold,
    /// Slot booked immediately; payment settled out-of-band.
    NoOnlinePayment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicySettings {
    pub min_notice_hours: u32,
    pub max_notice_days: u32,
    pub policy: BookingPolicy,
    pub reservation_hold_minutes: u32,
}

impl Default for BookingPolicySettings {
    fn default() -> Self {
        Self {
            min_notice_hours: 2,
            max_notice_days: 60,
            policy: BookingPolicy::NoOnlinePayment,
            reservation_hold_minutes: 15,
        }
    }
}

impl BookingPolicySettings {
    pub fn validate(&self) -> Result<(), AvailabilityError> {
        if self.max_notice_days < 1 {
            return Err(AvailabilityError::InvalidSettings(
                "maxNoticeDays must be at least 1".to_string(),
            ));
        }
        if !(1..=1440).contains(&self.reservation_hold_minutes) {
            return Err(AvailabilityError::InvalidSettings(format!(
                "reservationHoldMinutes must be between 1 and 1440, got {}",
                self.reservation_hold_minutes
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    InPerson,
    Online,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    /// Minutes.
    pub duration: i64,
    pub price: f64,
    pub modality: Modality,
    pub is_active: bool,
    #[serde(default)]
    pub buffer_before: i64,
    #[serde(default)]
    pub buffer_after: i64,
}

// ==============================================================================
// PERSISTED DOCUMENTS
// ==============================================================================

pub const AVAILABILITY_COLLECTION: &str = "availability";
pub const DEFAULT_AVAILABILITY_ID: &str = "default";
pub const SERVICE_AVAILABILITY_COLLECTION: &str = "service_availability";
pub const EXCEPTIONS_COLLECTION: &str = "availability_exceptions";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedSettings {
    pub reservation_hold_minutes: u32,
}

/// `availability/default`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityDocument {
    pub min_notice_hours: u32,
    pub max_notice_days: u32,
    pub booking_policy: BookingPolicy,
    pub working_hours: WeeklySchedule,
    pub advanced_settings: AdvancedSettings,
}

impl AvailabilityDocument {
    pub fn new(settings: &BookingPolicySettings, working_hours: WeeklySchedule) -> Self {
        Self {
            min_notice_hours: settings.min_notice_hours,
            max_notice_days: settings.max_notice_days,
            booking_policy: settings.policy,
            working_hours,
            advanced_settings: AdvancedSettings {
                reservation_hold_minutes: settings.reservation_hold_minutes,
            },
        }
    }

    pub fn settings(&self) -> BookingPolicySettings {
        BookingPolicySettings {
            min_notice_hours: self.min_notice_hours,
            max_notice_days: self.max_notice_days,
            policy: self.booking_policy,
            reservation_hold_minutes: self.advanced_settings.reservation_hold_minutes,
        }
    }
}

/// `service_availability/{serviceId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAvailabilityDocument {
    pub working_hours: WeeklySchedule,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wall_time_parses_and_formats() {
        let t: WallTime = "09:30".parse().unwrap();
        assert_eq!(t.to_minutes(), 570);
        assert_eq!(t.to_string(), "09:30");
        assert_eq!("24:00".parse::<WallTime>().unwrap(), WallTime::END_OF_DAY);
        assert!("24:30".parse::<WallTime>().is_err());
        assert!("9h30".parse::<WallTime>().is_err());
    }

    #[test]
    fn weekly_schedule_requires_seven_days() {
        let doc = json!([{ "dayOfWeek": "monday", "enabled": true, "intervals": [] }]);
        assert!(serde_json::from_value::<WeeklySchedule>(doc).is_err());
    }

    #[test]
    fn weekly_schedule_orders_days_sunday_first() {
        let days: Vec<_> = DayOfWeek::ALL
            .iter()
            .rev()
            .map(|d| json!({ "dayOfWeek": d, "enabled": false }))
            .collect();
        let schedule: WeeklySchedule = serde_json::from_value(json!(days)).unwrap();
        assert_eq!(schedule.days()[0].day_of_week, DayOfWeek::Sunday);
        assert_eq!(schedule.day(DayOfWeek::Friday).day_of_week, DayOfWeek::Friday);
    }

    #[test]
    fn exception_document_uses_type_field() {
        let doc = Document {
            id: "ex-1".to_string(),
            data: json!({
                "type": "extra_availability",
                "title": "Saturday clinic",
                "start": "2024-01-06T09:00:00",
                "end": "2024-01-06T12:00:00",
                "isAllDay": false
            }),
        };
        let exception = CalendarException::from_document(doc).unwrap();
        assert_eq!(exception.id, "ex-1");
        assert_eq!(exception.event_type, CalendarEventType::ExtraAvailability);

        let back = serde_json::to_value(&exception).unwrap();
        assert!(back.get("id").is_none());
        assert_eq!(back["type"], "extra_availability");
    }

    #[test]
    fn all_day_exception_covers_whole_days() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let exception = CalendarException {
            id: "x".to_string(),
            event_type: CalendarEventType::Blocked,
            title: "Holiday".to_string(),
            start,
            end: start + Duration::hours(1),
            is_all_day: true,
        };
        let range = exception.effective_range();
        assert_eq!(range, TimeRange::of_day(start.date()));
    }

    #[test]
    fn settings_validation_bounds() {
        let mut settings = BookingPolicySettings::default();
        assert!(settings.validate().is_ok());
        settings.reservation_hold_minutes = 0;
        assert!(settings.validate().is_err());
        settings.reservation_hold_minutes = 1441;
        assert!(settings.validate().is_err());
        settings.reservation_hold_minutes = 30;
        settings.max_notice_days = 0;
        assert!(settings.validate().is_err());
    }
}
