//! Local-day date arithmetic.
//!
//! Streaks are counted in the user's calendar days, not in UTC days or
//! 24-hour windows. Every conversion from an instant to a day goes through a
//! `DayClock` so the offset used is explicit and tests can pin both "now" and
//! the timezone.

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

/// Source of the current instant and of the local UTC offset.
pub trait DayClock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;

    /// UTC offset in effect at `instant` for this clock's timezone.
    fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset;

    /// Calendar date of `instant` in local time.
    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset_at(instant)).date_naive()
    }

    fn today(&self) -> NaiveDate {
        self.local_date(self.now())
    }

    fn yesterday(&self) -> NaiveDate {
        previous_day(self.today())
    }

    /// Whether two instants fall on the same local calendar day,
    /// regardless of time of day.
    fn is_same_local_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.local_date(a) == self.local_date(b)
    }

    /// Move `instant` to calendar day `date`, keeping its local time of day.
    fn with_local_date(&self, instant: DateTime<Utc>, date: NaiveDate) -> DateTime<Utc> {
        let local_time = instant.with_timezone(&self.offset_at(instant)).time();
        let naive = date.and_time(local_time);
        // Offset can differ on the target day (DST); resolve it there.
        let guess = naive - self.offset_at(instant);
        let offset = self.offset_at(guess.and_utc());
        (naive - offset).and_utc()
    }

    /// First instant of local calendar day `date`.
    fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        let guess = midnight - self.offset_at(midnight.and_utc());
        let offset = self.offset_at(guess.and_utc());
        (midnight - offset).and_utc()
    }
}

/// System timezone via `chrono::Local`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl DayClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset {
        Local.offset_from_utc_datetime(&instant.naive_utc()).fix()
    }
}

/// Real time with a fixed UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct OffsetClock {
    offset: FixedOffset,
}

impl OffsetClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Build from an offset in minutes east of UTC.
    pub fn from_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(Self::new)
    }
}

impl DayClock for OffsetClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset_at(&self, _instant: DateTime<Utc>) -> FixedOffset {
        self.offset
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    /// Pinned clock in UTC.
    pub fn utc(now: DateTime<Utc>) -> Self {
        Self::new(now, Utc.fix())
    }

    /// Pinned to local noon of `date`, so day arithmetic has slack both ways.
    pub fn at_local_noon(date: NaiveDate, offset: FixedOffset) -> Self {
        let naive = date.and_hms_opt(12, 0, 0).unwrap_or_default();
        Self::new((naive - offset).and_utc(), offset)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl DayClock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn offset_at(&self, _instant: DateTime<Utc>) -> FixedOffset {
        self.offset
    }
}

/// The calendar day before `date`.
pub fn previous_day(date: NaiveDate) -> NaiveDate {
    date.pred_opt().unwrap_or(NaiveDate::MIN)
}

/// Whole calendar days from `earlier` to `later` (negative if reversed).
pub fn days_between(earlier: NaiveDate, later: NaiveDate) -> i64 {
    later.signed_duration_since(earlier).num_days()
}
