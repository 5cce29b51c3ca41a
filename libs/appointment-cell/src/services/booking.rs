// libs/appointment-cell/src/services/booking.rs
use chrono::{Duration, NaiveDateTime, Timelike};
use tracing::{debug, warn};

use availability_cell::{BookingPolicy, BookingPolicySettings, Slot};

use crate::models::{BookingError, BookingSource};

/// Notice-window and reservation-policy rules applied before an appointment exists.
pub struct BookingPolicyGuard {
    settings: BookingPolicySettings,
}

impl BookingPolicyGuard {
    pub fn new(settings: BookingPolicySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BookingPolicySettings {
        &self.settings
    }

    pub fn earliest_start(&self, now: NaiveDateTime) -> NaiveDateTime {
        now + Duration::hours(i64::from(self.settings.min_notice_hours))
    }

    pub fn latest_start(&self, now: NaiveDateTime) -> NaiveDateTime {
        now + Duration::days(i64::from(self.settings.max_notice_days))
    }

    pub fn within_notice_window(&self, now: NaiveDateTime, start: NaiveDateTime) -> bool {
        self.check_notice(now, start).is_ok()
    }

    pub fn check_notice(&self, now: NaiveDateTime, requested: NaiveDateTime) -> Result<(), BookingError> {
        let earliest = self.earliest_start(now);
        if requested < earliest {
            debug!("Booking at {} refused: earliest is {}", requested, earliest);
            return Err(BookingError::TooSoon { requested, earliest });
        }

        let latest = self.latest_start(now);
        if requested > latest {
            debug!("Booking at {} refused: latest is {}", requested, latest);
            return Err(BookingError::TooFar { requested, latest });
        }
        Ok(())
    }

    /// Checks in order: too soon, too far, slot still generated.
    pub fn check(
        &self,
        now: NaiveDateTime,
        requested: NaiveDateTime,
        available: &[Slot],
    ) -> Result<(), BookingError> {
        self.check_notice(now, requested)?;

        if !available.iter().any(|slot| slot.start == requested) {
            warn!("Slot {} missing from current availability", requested);
            return Err(BookingError::SlotUnavailable(requested));
        }
        Ok(())
    }

    /// Hold expiry for a new booking, if the policy reserves pending payment.
    /// Bookings made by the professional are never held.
    pub fn hold_expiry(&self, now: NaiveDateTime, source: BookingSource) -> Option<NaiveDateTime> {
        match (self.settings.policy, source) {
            (BookingPolicy::TemporaryHold, BookingSource::PublicPage) => {
                Some(now + Duration::minutes(i64::from(self.settings.reservation_hold_minutes)))
            }
            _ => None,
        }
    }
}

/// Claim document ids, one per minute of `[start, end)`.
///
/// Ranges that only touch never share a claim; ranges that overlap always do.
pub fn claim_ids(start: NaiveDateTime, end: NaiveDateTime) -> Vec<String> {
    let mut ids = Vec::new();
    let mut minute = floor_to_minute(start);
    while minute < end {
        ids.push(minute.format("%Y-%m-%dT%H:%M").to_string());
        minute += Duration::minutes(1);
    }
    ids
}

fn floor_to_minute(at: NaiveDateTime) -> NaiveDateTime {
    at - Duration::seconds(i64::from(at.second())) - Duration::nanoseconds(i64::from(at.nanosecond()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn guard(min_notice_hours: u32, policy: BookingPolicy) -> BookingPolicyGuard {
        BookingPolicyGuard::new(BookingPolicySettings {
            min_notice_hours,
            max_notice_days: 30,
            policy,
            reservation_hold_minutes: 15,
        })
    }

    fn slot(start: NaiveDateTime) -> Slot {
        Slot {
            start,
            end: start + Duration::hours(1),
        }
    }

    #[test]
    fn twenty_three_hours_of_notice_is_too_soon() {
        let guard = guard(24, BookingPolicy::NoOnlinePayment);
        let result = guard.check(at(1, 10, 0), at(2, 9, 0), &[slot(at(2, 9, 0))]);
        assert_matches!(result, Err(BookingError::TooSoon { .. }));
    }

    #[test]
    fn exact_minimum_notice_is_accepted() {
        let guard = guard(24, BookingPolicy::NoOnlinePayment);
        assert!(guard.check(at(1, 9, 0), at(2, 9, 0), &[slot(at(2, 9, 0))]).is_ok());
    }

    #[test]
    fn beyond_max_notice_is_too_far() {
        let guard = guard(0, BookingPolicy::NoOnlinePayment);
        let result = guard.check(at(1, 9, 0), at(31, 9, 1), &[]);
        assert_matches!(result, Err(BookingError::TooFar { .. }));
        assert!(guard.within_notice_window(at(1, 9, 0), at(31, 9, 0)));
    }

    #[test]
    fn notice_is_checked_before_availability() {
        let guard = guard(2, BookingPolicy::NoOnlinePayment);
        assert_matches!(
            guard.check(at(2, 8, 0), at(2, 9, 0), &[]),
            Err(BookingError::TooSoon { .. })
        );
        assert_matches!(
            guard.check(at(1, 8, 0), at(2, 9, 0), &[slot(at(2, 10, 0))]),
            Err(BookingError::SlotUnavailable(_))
        );
    }

    #[test]
    fn only_public_bookings_under_temporary_hold_are_held() {
        let hold = guard(0, BookingPolicy::TemporaryHold);
        assert_eq!(hold.hold_expiry(at(1, 9, 0), BookingSource::PublicPage), Some(at(1, 9, 15)));
        assert_eq!(hold.hold_expiry(at(1, 9, 0), BookingSource::Professional), None);

        let no_payment = guard(0, BookingPolicy::NoOnlinePayment);
        assert_eq!(no_payment.hold_expiry(at(1, 9, 0), BookingSource::PublicPage), None);
    }

    #[test]
    fn claims_cover_every_minute_of_the_range() {
        let ids = claim_ids(at(2, 9, 0), at(2, 9, 30));
        assert_eq!(ids.len(), 30);
        assert_eq!(ids[0], "2024-01-02T09:00");
        assert_eq!(ids[29], "2024-01-02T09:29");

        let ids = claim_ids(at(2, 9, 7), at(2, 9, 9));
        assert_eq!(ids, vec!["2024-01-02T09:07", "2024-01-02T09:08"]);
    }

    #[test]
    fn overlapping_bookings_share_a_claim() {
        let first = claim_ids(at(2, 9, 0), at(2, 10, 0));
        let second = claim_ids(at(2, 9, 59), at(2, 10, 59));
        assert!(second.iter().any(|id| first.contains(id)));
    }

    #[test]
    fn back_to_back_bookings_never_share_a_claim() {
        // 62 and 7 minute services end off any five minute grid.
        let first = claim_ids(at(2, 9, 0), at(2, 10, 2));
        let next = claim_ids(at(2, 10, 2), at(2, 11, 4));
        assert!(!next.iter().any(|id| first.contains(id)));

        let short = claim_ids(at(2, 9, 0), at(2, 9, 7));
        let after = claim_ids(at(2, 9, 7), at(2, 9, 14));
        assert!(!after.iter().any(|id| short.contains(id)));
    }
}
