//! Persisted streak snapshot.
//!
//! The snapshot is a cache over memo dates. A missing, unreadable, or
//! older-schema row is rebuilt from scratch. A row whose recorded days no
//! longer match the memos is recomputed from them, keeping its longest
//! streak. Writes that change memos recompute it in their own transaction
//! through `recompute_in`.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};

use memovox_core::clock::DayClock;
use memovox_core::error::Result;
use memovox_core::streak::{
    compute_streak, compute_streak_from_scratch, local_days, LongestStreakPolicy, StreakSnapshot,
};

use crate::db::{storage_err, Database};
use crate::migrations::CURRENT_VERSION;
use crate::repository::memo_dates;

pub struct StreakCache {
    db: Arc<Database>,
    clock: Arc<dyn DayClock>,
    policy: LongestStreakPolicy,
}

impl StreakCache {
    pub fn new(db: Arc<Database>, clock: Arc<dyn DayClock>, policy: LongestStreakPolicy) -> Self {
        Self { db, clock, policy }
    }

    pub fn policy(&self) -> LongestStreakPolicy {
        self.policy
    }

    /// Snapshot for today.
    ///
    /// The cached row is only trusted when its days match the memos on
    /// record; otherwise the streak is recomputed from the memos.
    pub fn current(&self) -> Result<StreakSnapshot> {
        let today = self.clock.today();
        self.db.with_conn(|conn| {
            let days = local_days(self.clock.as_ref(), memo_dates(conn)?);
            let Some(cached) = load_snapshot(conn)? else {
                return self.rebuild_in(conn);
            };
            if !cached.streak_dates.iter().eq(days.iter()) {
                warn!(
                    cached_days = cached.streak_dates.len(),
                    recorded_days = days.len(),
                    "Streak snapshot out of date with memos; recomputing"
                );
                let snapshot = compute_streak(days, today, cached.longest_streak, self.policy);
                save_snapshot(conn, &snapshot)?;
                return Ok(snapshot);
            }

            let refreshed = cached.refreshed(today, self.policy);
            if refreshed != cached {
                save_snapshot(conn, &refreshed)?;
            }
            Ok(refreshed)
        })
    }

    /// Recompute from memo dates, carrying the cached longest streak under
    /// the running-max policy.
    pub fn recompute(&self) -> Result<StreakSnapshot> {
        self.db.with_conn(|conn| self.recompute_in(conn))
    }

    /// `recompute` on a connection the caller holds, typically inside the
    /// transaction that changed the memos.
    pub(crate) fn recompute_in(&self, conn: &Connection) -> Result<StreakSnapshot> {
        let Some(cached) = load_snapshot(conn)? else {
            return self.rebuild_in(conn);
        };
        let days = local_days(self.clock.as_ref(), memo_dates(conn)?);
        let snapshot = compute_streak(days, self.clock.today(), cached.longest_streak, self.policy);
        save_snapshot(conn, &snapshot)?;
        debug!(
            current = snapshot.current_streak,
            longest = snapshot.longest_streak,
            "Streak recomputed"
        );
        Ok(snapshot)
    }

    /// Rebuild from memo dates alone, discarding any cached longest streak.
    pub fn recompute_from_scratch(&self) -> Result<StreakSnapshot> {
        self.db.with_conn(|conn| self.rebuild_in(conn))
    }

    fn rebuild_in(&self, conn: &Connection) -> Result<StreakSnapshot> {
        let days = local_days(self.clock.as_ref(), memo_dates(conn)?);
        let snapshot = compute_streak_from_scratch(days, self.clock.today());
        save_snapshot(conn, &snapshot)?;
        info!(
            current = snapshot.current_streak,
            longest = snapshot.longest_streak,
            days = snapshot.streak_dates.len(),
            "Streak rebuilt from scratch"
        );
        Ok(snapshot)
    }
}

/// The cached snapshot, or `None` when absent or not trustworthy.
fn load_snapshot(conn: &Connection) -> Result<Option<StreakSnapshot>> {
    let row = conn
        .query_row(
            "SELECT schema_version, current_streak, longest_streak, last_record_date, streak_dates
             FROM streak_snapshot WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .map_err(storage_err("Failed to read streak snapshot"))?;

    let Some((version, current, longest, last, dates)) = row else {
        return Ok(None);
    };
    if version != CURRENT_VERSION {
        info!(cached = version, current = CURRENT_VERSION, "Streak snapshot from another schema version");
        return Ok(None);
    }

    let streak_dates: Vec<NaiveDate> = match serde_json::from_str(&dates) {
        Ok(dates) => dates,
        Err(e) => {
            warn!(error = %e, "Discarding unreadable streak snapshot");
            return Ok(None);
        }
    };
    let last_record_date = match last.as_deref().map(|s| s.parse::<NaiveDate>()) {
        Some(Ok(date)) => Some(date),
        Some(Err(e)) => {
            warn!(error = %e, "Discarding unreadable streak snapshot");
            return Ok(None);
        }
        None => None,
    };

    Ok(Some(StreakSnapshot {
        current_streak: u32::try_from(current).unwrap_or(0),
        longest_streak: u32::try_from(longest).unwrap_or(0),
        last_record_date,
        streak_dates,
    }))
}

fn save_snapshot(conn: &Connection, snapshot: &StreakSnapshot) -> Result<()> {
    let dates = serde_json::to_string(&snapshot.streak_dates)?;
    conn.execute(
        "INSERT INTO streak_snapshot
             (id, schema_version, current_streak, longest_streak, last_record_date, streak_dates, computed_at)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             schema_version = excluded.schema_version,
             current_streak = excluded.current_streak,
             longest_streak = excluded.longest_streak,
             last_record_date = excluded.last_record_date,
             streak_dates = excluded.streak_dates,
             computed_at = excluded.computed_at",
        rusqlite::params![
            CURRENT_VERSION,
            snapshot.current_streak,
            snapshot.longest_streak,
            snapshot.last_record_date.map(|d| d.to_string()),
            dates,
            Utc::now().timestamp(),
        ],
    )
    .map_err(storage_err("Failed to save streak snapshot"))?;
    Ok(())
}
