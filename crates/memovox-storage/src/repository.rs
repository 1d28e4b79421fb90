//! Repository implementations for SQLite-backed persistence.
//!
//! `MemoRepository` and `ReportRepository` hold the metadata rows; audio
//! bytes are in the blob store. Dates are stored as epoch milliseconds.
//! The free functions take a `Connection` so callers can compose them inside
//! one transaction.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row};

use memovox_core::clock::DayClock;
use memovox_core::error::{MemovoxError, Result};
use memovox_core::types::{AnalysisType, Memo, Report};

use crate::db::{storage_err, Database};

pub(crate) fn to_millis(date: DateTime<Utc>) -> i64 {
    date.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        MemovoxError::StorageUnavailable(format!("Stored timestamp out of range: {}", millis))
    })
}

/// Drop sub-millisecond precision so a written date reads back equal.
pub fn truncate_to_millis(date: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(to_millis(date)).unwrap_or(date)
}

// =============================================================================
// Memos
// =============================================================================

/// Repository for memo metadata.
pub struct MemoRepository {
    db: Arc<Database>,
}

impl MemoRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, memo: &Memo) -> Result<()> {
        self.db.with_conn(|conn| insert_memo(conn, memo))
    }

    /// Overwrite every field of an existing memo. Returns whether it existed.
    pub fn update(&self, memo: &Memo) -> Result<bool> {
        self.db.with_conn(|conn| update_memo(conn, memo))
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Memo>> {
        self.db.with_conn(|conn| find_memo(conn, id))
    }

    /// All memos, newest first.
    pub fn list(&self) -> Result<Vec<Memo>> {
        self.db.with_conn(|conn| {
            query_memos(
                conn,
                "SELECT id, transcript, date, audio_format
                 FROM memos
                 ORDER BY date DESC, id",
                [],
            )
        })
    }

    /// Memos dated on local days `from` through `to`, both inclusive,
    /// newest first.
    pub fn list_between(
        &self,
        clock: &dyn DayClock,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Memo>> {
        if from > to {
            return Err(MemovoxError::InvalidArgument(format!(
                "Date range starts after it ends: {} > {}",
                from, to
            )));
        }
        let end_day = to.succ_opt().ok_or_else(|| {
            MemovoxError::InvalidArgument(format!("Date out of range: {}", to))
        })?;
        let start = to_millis(clock.start_of_day(from));
        let end = to_millis(clock.start_of_day(end_day));
        self.db.with_conn(|conn| {
            query_memos(
                conn,
                "SELECT id, transcript, date, audio_format
                 FROM memos
                 WHERE date >= ?1 AND date < ?2
                 ORDER BY date DESC, id",
                [start, end],
            )
        })
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.db.with_conn(|conn| delete_memo(conn, id))
    }

    pub fn count(&self) -> Result<u64> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM memos", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(storage_err("Failed to count memos"))
        })
    }

    /// Every memo date, for streak derivation.
    pub fn all_dates(&self) -> Result<Vec<DateTime<Utc>>> {
        self.db.with_conn(memo_dates)
    }

    pub fn set_audio_format(&self, id: &str, format_tag: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE memos SET audio_format = ?1 WHERE id = ?2",
                    rusqlite::params![format_tag, id],
                )
                .map_err(storage_err("Failed to update memo format"))?;
            Ok(changed > 0)
        })
    }
}

pub(crate) fn insert_memo(conn: &Connection, memo: &Memo) -> Result<()> {
    conn.execute(
        "INSERT INTO memos (id, transcript, date, audio_format) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![memo.id, memo.transcript, to_millis(memo.date), memo.audio_format],
    )
    .map_err(storage_err("Failed to save memo"))?;
    Ok(())
}

/// Insert or replace by id, keeping `created_at` of an existing row.
pub(crate) fn upsert_memo(conn: &Connection, memo: &Memo) -> Result<()> {
    conn.execute(
        "INSERT INTO memos (id, transcript, date, audio_format) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             transcript = excluded.transcript,
             date = excluded.date,
             audio_format = excluded.audio_format",
        rusqlite::params![memo.id, memo.transcript, to_millis(memo.date), memo.audio_format],
    )
    .map_err(storage_err("Failed to save memo"))?;
    Ok(())
}

pub(crate) fn update_memo(conn: &Connection, memo: &Memo) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE memos SET transcript = ?1, date = ?2, audio_format = ?3 WHERE id = ?4",
            rusqlite::params![memo.transcript, to_millis(memo.date), memo.audio_format, memo.id],
        )
        .map_err(storage_err("Failed to update memo"))?;
    Ok(changed > 0)
}

pub(crate) fn delete_memo(conn: &Connection, id: &str) -> Result<bool> {
    let removed = conn
        .execute("DELETE FROM memos WHERE id = ?1", [id])
        .map_err(storage_err("Failed to delete memo"))?;
    Ok(removed > 0)
}

fn query_memos<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Memo>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(storage_err("Failed to list memos"))?;
    let rows = stmt
        .query_map(params, |row| Ok(row_to_memo(row)))
        .map_err(storage_err("Failed to list memos"))?;

    let mut memos = Vec::new();
    for row in rows {
        let memo = row.map_err(storage_err("Failed to list memos"))??;
        memos.push(memo);
    }
    Ok(memos)
}

pub(crate) fn find_memo(conn: &Connection, id: &str) -> Result<Option<Memo>> {
    let result = conn
        .query_row(
            "SELECT id, transcript, date, audio_format FROM memos WHERE id = ?1",
            [id],
            |row| Ok(row_to_memo(row)),
        )
        .optional()
        .map_err(storage_err("Failed to read memo"))?;

    match result {
        Some(memo) => Ok(Some(memo?)),
        None => Ok(None),
    }
}

pub(crate) fn memo_dates(conn: &Connection) -> Result<Vec<DateTime<Utc>>> {
    let mut stmt = conn
        .prepare("SELECT date FROM memos")
        .map_err(storage_err("Failed to read memo dates"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, i64>(0))
        .map_err(storage_err("Failed to read memo dates"))?;

    let mut dates = Vec::new();
    for row in rows {
        let millis = row.map_err(storage_err("Failed to read memo dates"))?;
        dates.push(from_millis(millis)?);
    }
    Ok(dates)
}

fn row_to_memo(row: &Row<'_>) -> Result<Memo> {
    let read = |e: rusqlite::Error| MemovoxError::StorageUnavailable(format!("Bad memo row: {}", e));
    let millis: i64 = row.get(2).map_err(read)?;
    Ok(Memo {
        id: row.get(0).map_err(read)?,
        transcript: row.get(1).map_err(read)?,
        date: from_millis(millis)?,
        audio_format: row.get(3).map_err(read)?,
    })
}

// =============================================================================
// Reports
// =============================================================================

/// Repository for saved analysis reports.
pub struct ReportRepository {
    db: Arc<Database>,
}

impl ReportRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn save(&self, report: &Report) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reports (id, title, topic, analysis_type, date, content, memo_ids)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                &report_params(report)?.as_params()[..],
            )
            .map_err(storage_err("Failed to save report"))?;
            Ok(())
        })
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Report>> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, title, topic, analysis_type, date, content, memo_ids
                     FROM reports WHERE id = ?1",
                    [id],
                    |row| Ok(row_to_report(row)),
                )
                .optional()
                .map_err(storage_err("Failed to read report"))?;

            match result {
                Some(report) => Ok(Some(report?)),
                None => Ok(None),
            }
        })
    }

    /// All reports, newest first.
    pub fn list(&self) -> Result<Vec<Report>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, topic, analysis_type, date, content, memo_ids
                     FROM reports
                     ORDER BY date DESC, id",
                )
                .map_err(storage_err("Failed to list reports"))?;

            let rows = stmt
                .query_map([], |row| Ok(row_to_report(row)))
                .map_err(storage_err("Failed to list reports"))?;

            let mut reports = Vec::new();
            for row in rows {
                let report = row.map_err(storage_err("Failed to list reports"))??;
                reports.push(report);
            }
            Ok(reports)
        })
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute("DELETE FROM reports WHERE id = ?1", [id])
                .map_err(storage_err("Failed to delete report"))?;
            Ok(removed > 0)
        })
    }
}

/// Owned bind values for a report row.
struct ReportParams {
    id: String,
    title: String,
    topic: String,
    analysis_type: String,
    date: i64,
    content: String,
    memo_ids: String,
}

impl ReportParams {
    fn as_params(&self) -> [&dyn rusqlite::ToSql; 7] {
        [
            &self.id,
            &self.title,
            &self.topic,
            &self.analysis_type,
            &self.date,
            &self.content,
            &self.memo_ids,
        ]
    }
}

fn report_params(report: &Report) -> Result<ReportParams> {
    Ok(ReportParams {
        id: report.id.clone(),
        title: report.title.clone(),
        topic: report.topic.clone(),
        analysis_type: report.analysis_type.as_str().to_string(),
        date: to_millis(report.date),
        content: report.content.clone(),
        memo_ids: serde_json::to_string(&report.memo_ids)?,
    })
}

pub(crate) fn upsert_report(conn: &Connection, report: &Report) -> Result<()> {
    conn.execute(
        "INSERT INTO reports (id, title, topic, analysis_type, date, content, memo_ids)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             title = excluded.title,
             topic = excluded.topic,
             analysis_type = excluded.analysis_type,
             date = excluded.date,
             content = excluded.content,
             memo_ids = excluded.memo_ids",
        &report_params(report)?.as_params()[..],
    )
    .map_err(storage_err("Failed to save report"))?;
    Ok(())
}

fn row_to_report(row: &Row<'_>) -> Result<Report> {
    let read =
        |e: rusqlite::Error| MemovoxError::StorageUnavailable(format!("Bad report row: {}", e));
    let analysis_type: String = row.get(3).map_err(read)?;
    let millis: i64 = row.get(4).map_err(read)?;
    let memo_ids: String = row.get(6).map_err(read)?;
    Ok(Report {
        id: row.get(0).map_err(read)?,
        title: row.get(1).map_err(read)?,
        topic: row.get(2).map_err(read)?,
        analysis_type: AnalysisType::from(analysis_type.as_str()),
        date: from_millis(millis)?,
        content: row.get(5).map_err(read)?,
        memo_ids: serde_json::from_str(&memo_ids)?,
    })
}

// =============================================================================
// Store metadata
// =============================================================================

pub(crate) fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT value FROM store_meta WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .optional()
    .map_err(storage_err("Failed to read store metadata"))
}

pub(crate) fn write_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value],
    )
    .map_err(storage_err("Failed to write store metadata"))?;
    Ok(())
}
