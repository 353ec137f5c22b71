//! Time source abstraction.
//!
//! All hour-of-day, date, and timestamp decisions (peak speeds, quota hours,
//! surge windows, the external-call budget reset) flow through [`Clock`] so
//! they can be pinned to a chosen instant in tests. Production code uses
//! [`SystemClock`]; tests use [`ManualClock`].

use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Injectable time source. Local-time helpers apply a fixed UTC offset taken
/// from configuration (the fleet operates in a single region).
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current local wall-clock time under the given UTC offset (hours).
    fn local_now(&self, utc_offset_hours: i32) -> NaiveDateTime {
        (self.now() + Duration::hours(i64::from(utc_offset_hours))).naive_utc()
    }

    /// Local hour of day, 0..=23.
    fn local_hour(&self, utc_offset_hours: i32) -> u8 {
        self.local_now(utc_offset_hours).hour() as u8
    }

    /// Local day of week, 0 = Monday .. 6 = Sunday.
    fn local_dow(&self, utc_offset_hours: i32) -> u8 {
        self.local_now(utc_offset_hours)
            .weekday()
            .num_days_from_monday() as u8
    }

    /// Local calendar date.
    fn local_date(&self, utc_offset_hours: i32) -> NaiveDate {
        self.local_now(utc_offset_hours).date()
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests: starts at a fixed instant and only moves when
/// told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Convenience: a clock pinned to the given local hour on a fixed date
    /// (offset 0).
    pub fn at_hour(hour: u32) -> Self {
        let start = NaiveDate::from_ymd_opt(2024, 6, 3)
            .expect("valid date")
            .and_hms_opt(hour, 0, 0)
            .expect("valid time")
            .and_utc();
        Self::new(start)
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at_hour(12);
        let before = clock.now();
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now() - before, Duration::minutes(90));
        assert_eq!(clock.local_hour(0), 13);
    }

    #[test]
    fn utc_offset_shifts_local_hour_and_date() {
        let clock = ManualClock::at_hour(23);
        assert_eq!(clock.local_hour(0), 23);
        assert_eq!(clock.local_hour(8), 7);
        let date_utc = clock.local_date(0);
        let date_tw = clock.local_date(8);
        assert_eq!(date_tw, date_utc.succ_opt().unwrap());
    }
}
