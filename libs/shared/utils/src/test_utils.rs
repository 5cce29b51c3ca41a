use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{FixedClock, ProfessionalId};

pub struct TestConfig {
    pub document_store_url: String,
    pub document_store_api_key: String,
    pub default_hold_minutes: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            document_store_url: "http://localhost:54321".to_string(),
            document_store_api_key: "test-api-key".to_string(),
            default_hold_minutes: 15,
        }
    }
}

impl TestConfig {
    pub fn with_url(url: &str) -> Self {
        Self {
            document_store_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            document_store_url: self.document_store_url.clone(),
            document_store_api_key: self.document_store_api_key.clone(),
            default_hold_minutes: self.default_hold_minutes,
            notifications_enabled: false,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestProfessional {
    pub id: ProfessionalId,
    pub email: String,
}

impl Default for TestProfessional {
    fn default() -> Self {
        Self {
            id: ProfessionalId::new(format!("pro-{}", Uuid::new_v4())),
            email: "professional@example.com".to_string(),
        }
    }
}

/// Build a local timestamp, panicking on invalid input (tests only).
pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .expect("valid test timestamp")
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid test time")
}

pub fn fixed_clock(now: NaiveDateTime) -> Arc<FixedClock> {
    Arc::new(FixedClock::new(now))
}

pub struct MockStoreResponses;

impl MockStoreResponses {
    /// `availability/default` with Monday 09:00-12:00 enabled and every other day off.
    pub fn availability_default(min_notice_hours: u32, policy: &str) -> serde_json::Value {
        let days = ["sunday", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday"];
        let working_hours: Vec<_> = days
            .iter()
            .map(|day| {
                let enabled = *day == "monday";
                let intervals = if enabled {
                    json!([{ "startTime": "09:00", "endTime": "12:00" }])
                } else {
                    json!([])
                };
                json!({
                    "dayOfWeek": day,
                    "enabled": enabled,
                    "intervals": intervals
                })
            })
            .collect();

        json!({
            "minNoticeHours": min_notice_hours,
            "maxNoticeDays": 60,
            "bookingPolicy": policy,
            "workingHours": working_hours,
            "advancedSettings": { "reservationHoldMinutes": 15 }
        })
    }

    pub fn blocked_exception(title: &str, start: &str, end: &str) -> serde_json::Value {
        json!({
            "type": "blocked",
            "title": title,
            "start": start,
            "end": end,
            "isAllDay": false
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "error": {
                "message": message,
                "code": code
            }
        })
    }
}
