//! Day-based recording streaks.
//!
//! A streak is a run of consecutive local calendar days that each hold at
//! least one memo. The current streak survives one day of grace: with no
//! record today it is still counted from yesterday.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{previous_day, DayClock};

/// How `longest_streak` is maintained across recomputes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LongestStreakPolicy {
    /// Running maximum of every current streak ever observed. Deleting the
    /// memos behind a past peak does not lower it.
    #[default]
    RunningMax,
    /// Longest run present in the full set of recorded days.
    Exact,
}

/// Derived streak state. Always re-derivable from memo timestamps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakSnapshot {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_record_date: Option<NaiveDate>,
    /// Distinct days with at least one memo, ascending.
    pub streak_dates: Vec<NaiveDate>,
}

impl StreakSnapshot {
    /// Re-derive the current streak for a new `today` from the cached days.
    pub fn refreshed(&self, today: NaiveDate, policy: LongestStreakPolicy) -> StreakSnapshot {
        compute_streak(
            self.streak_dates.iter().copied(),
            today,
            self.longest_streak,
            policy,
        )
    }

    /// Whether a memo was recorded on `today`.
    pub fn recorded_on(&self, today: NaiveDate) -> bool {
        self.streak_dates.binary_search(&today).is_ok()
    }
}

/// Compute a snapshot from recorded days.
///
/// `previous_longest` is the longest streak from the last cached snapshot;
/// it only matters under `LongestStreakPolicy::RunningMax`.
pub fn compute_streak<I>(
    days: I,
    today: NaiveDate,
    previous_longest: u32,
    policy: LongestStreakPolicy,
) -> StreakSnapshot
where
    I: IntoIterator<Item = NaiveDate>,
{
    let set: BTreeSet<NaiveDate> = days.into_iter().collect();

    let yesterday = previous_day(today);
    let anchor = if set.contains(&today) {
        Some(today)
    } else if set.contains(&yesterday) {
        Some(yesterday)
    } else {
        None
    };

    let current_streak = match anchor {
        Some(start) => {
            let mut count = 1u32;
            let mut day = previous_day(start);
            while set.contains(&day) {
                count += 1;
                day = previous_day(day);
            }
            count
        }
        None => 0,
    };

    let longest_streak = match policy {
        LongestStreakPolicy::RunningMax => previous_longest.max(current_streak),
        LongestStreakPolicy::Exact => longest_run(&set).max(current_streak),
    };

    StreakSnapshot {
        current_streak,
        longest_streak,
        last_record_date: set.iter().next_back().copied(),
        streak_dates: set.into_iter().collect(),
    }
}

/// Compute a snapshot with no trusted prior state: the longest streak is
/// taken from a full scan of the recorded days.
pub fn compute_streak_from_scratch<I>(days: I, today: NaiveDate) -> StreakSnapshot
where
    I: IntoIterator<Item = NaiveDate>,
{
    compute_streak(days, today, 0, LongestStreakPolicy::Exact)
}

/// Longest run of consecutive days in `days`.
pub fn longest_run(days: &BTreeSet<NaiveDate>) -> u32 {
    let mut longest = 0u32;
    let mut run = 0u32;
    let mut prev: Option<NaiveDate> = None;

    for &day in days {
        run = match prev {
            Some(p) if p.succ_opt() == Some(day) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(day);
    }
    longest
}

/// Map memo instants to local calendar days.
pub fn local_days<C, I>(clock: &C, instants: I) -> BTreeSet<NaiveDate>
where
    C: DayClock + ?Sized,
    I: IntoIterator<Item = DateTime<Utc>>,
{
    instants.into_iter().map(|t| clock.local_date(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::FixedOffset;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn jan(days: &[u32]) -> Vec<NaiveDate> {
        days.iter().map(|&d| ymd(2024, 1, d)).collect()
    }

    fn running(days: Vec<NaiveDate>, today: NaiveDate) -> StreakSnapshot {
        compute_streak(days, today, 0, LongestStreakPolicy::RunningMax)
    }

    #[test]
    fn test_streak_including_today() {
        let snap = running(jan(&[1, 2, 3]), ymd(2024, 1, 3));
        assert_eq!(snap.current_streak, 3);
        assert_eq!(snap.longest_streak, 3);
        assert_eq!(snap.last_record_date, Some(ymd(2024, 1, 3)));
    }

    #[test]
    fn test_streak_grace_day() {
        let snap = running(jan(&[1, 2, 3]), ymd(2024, 1, 4));
        assert_eq!(snap.current_streak, 3);
    }

    #[test]
    fn test_streak_broken_after_two_days() {
        let snap = running(jan(&[1, 2, 3]), ymd(2024, 1, 5));
        assert_eq!(snap.current_streak, 0);
        assert_eq!(snap.last_record_date, Some(ymd(2024, 1, 3)));
    }

    #[test]
    fn test_streak_empty() {
        let snap = running(vec![], ymd(2024, 1, 5));
        assert_eq!(snap, StreakSnapshot::default());
    }

    #[test]
    fn test_duplicates_and_order_ignored() {
        let snap = running(jan(&[3, 1, 2, 3, 2]), ymd(2024, 1, 3));
        assert_eq!(snap.current_streak, 3);
        assert_eq!(snap.streak_dates, jan(&[1, 2, 3]));
    }

    #[test]
    fn test_gap_stops_backward_walk() {
        let snap = running(jan(&[1, 2, 4, 5]), ymd(2024, 1, 5));
        assert_eq!(snap.current_streak, 2);
    }

    #[test]
    fn test_streak_across_month_boundary() {
        let days = vec![ymd(2024, 1, 30), ymd(2024, 1, 31), ymd(2024, 2, 1)];
        let snap = running(days, ymd(2024, 2, 1));
        assert_eq!(snap.current_streak, 3);
    }

    #[test]
    fn test_future_days_do_not_count_toward_current() {
        let snap = running(jan(&[3, 10]), ymd(2024, 1, 3));
        assert_eq!(snap.current_streak, 1);
        assert_eq!(snap.last_record_date, Some(ymd(2024, 1, 10)));
    }

    #[test]
    fn test_running_max_keeps_previous_peak() {
        let snap = compute_streak(jan(&[10]), ymd(2024, 1, 10), 7, LongestStreakPolicy::RunningMax);
        assert_eq!(snap.current_streak, 1);
        assert_eq!(snap.longest_streak, 7);
    }

    #[test]
    fn test_exact_policy_scans_history() {
        // Peak of 4 in the past, previous cache claims 7 (e.g. memos deleted since).
        let days = jan(&[1, 2, 3, 4, 8, 9]);
        let snap = compute_streak(days, ymd(2024, 1, 9), 7, LongestStreakPolicy::Exact);
        assert_eq!(snap.current_streak, 2);
        assert_eq!(snap.longest_streak, 4);
    }

    #[test]
    fn test_from_scratch_uses_full_history() {
        let snap = compute_streak_from_scratch(jan(&[1, 2, 3, 4, 20]), ymd(2024, 1, 25));
        assert_eq!(snap.current_streak, 0);
        assert_eq!(snap.longest_streak, 4);
    }

    #[test]
    fn test_longest_never_decreases_over_additions() {
        let order = jan(&[5, 1, 3, 2, 9, 4, 8, 7, 6]);
        let today = ymd(2024, 1, 9);
        let mut seen = Vec::new();
        for policy in [LongestStreakPolicy::RunningMax, LongestStreakPolicy::Exact] {
            let mut longest = 0;
            seen.clear();
            for day in &order {
                seen.push(*day);
                let snap = compute_streak(seen.clone(), today, longest, policy);
                assert!(snap.longest_streak >= longest, "{:?} decreased", policy);
                longest = snap.longest_streak;
            }
            assert_eq!(longest, 9);
        }
    }

    #[test]
    fn test_refreshed_moves_today() {
        let snap = running(jan(&[1, 2, 3]), ymd(2024, 1, 3));
        let later = snap.refreshed(ymd(2024, 1, 6), LongestStreakPolicy::RunningMax);
        assert_eq!(later.current_streak, 0);
        assert_eq!(later.longest_streak, 3);
        assert!(snap.recorded_on(ymd(2024, 1, 2)));
        assert!(!later.recorded_on(ymd(2024, 1, 6)));
    }

    #[test]
    fn test_longest_run() {
        let set: BTreeSet<NaiveDate> = jan(&[1, 2, 5, 6, 7, 9]).into_iter().collect();
        assert_eq!(longest_run(&set), 3);
        assert_eq!(longest_run(&BTreeSet::new()), 0);
    }

    #[test]
    fn test_local_days_respect_offset() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let clock = FixedClock::at_local_noon(ymd(2024, 1, 3), offset);
        let instants = vec![
            DateTime::parse_from_rfc3339("2024-01-03T03:00:00Z").unwrap().with_timezone(&Utc),
            DateTime::parse_from_rfc3339("2024-01-03T15:00:00Z").unwrap().with_timezone(&Utc),
        ];
        let days = local_days(&clock, instants);
        assert_eq!(days.into_iter().collect::<Vec<_>>(), vec![ymd(2024, 1, 2), ymd(2024, 1, 3)]);
    }
}
