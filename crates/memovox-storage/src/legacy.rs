//! One-time import from the legacy store.
//!
//! The legacy store is a SQLite file whose `memos` table keeps the audio
//! inline (`audio_blob`) with an optional `audio_type`, and dates as ISO-8601
//! text. An optional `reports` table keeps `memo_ids` as a comma-separated or
//! JSON list. The file is attached to the store's connection for the
//! duration of the import and never written.
//!
//! Every record is upserted by id in its own transaction, so an interrupted
//! import can simply be re-run. Completion is recorded in `store_meta`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use memovox_core::error::{MemovoxError, Result};
use memovox_core::format;
use memovox_core::types::{AnalysisType, Memo, Report};

use crate::blob::put_blob;
use crate::db::{storage_err, Database};
use crate::repository::{
    from_millis, read_meta, truncate_to_millis, upsert_memo, upsert_report, write_meta,
};

pub const IMPORT_COMPLETED_KEY: &str = "legacy_import_completed_at";
pub const IMPORT_SOURCE_KEY: &str = "legacy_import_source";

/// A record that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub id: String,
    pub reason: String,
}

impl SkippedRecord {
    pub fn to_error(&self) -> MemovoxError {
        MemovoxError::ImportPartialFailure {
            id: self.id.clone(),
            reason: self.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegacyImportReport {
    pub source: PathBuf,
    pub memos_imported: usize,
    pub reports_imported: usize,
    pub skipped: Vec<SkippedRecord>,
}

pub fn is_import_completed(conn: &Connection) -> Result<bool> {
    Ok(read_meta(conn, IMPORT_COMPLETED_KEY)?.is_some())
}

/// Whether the file at `path` has a legacy `memos` table with at least
/// `id` and `date` columns.
///
/// A file that cannot be read as SQLite at all counts as not legacy.
pub fn is_legacy_store(db: &Database, path: &Path) -> Result<bool> {
    let recognized = with_attached(db, path, |db| {
        db.with_conn(|conn| {
            let columns = legacy_columns(conn, "memos")?;
            Ok(columns.contains("id") && columns.contains("date"))
        })
    });
    match recognized {
        Ok(found) => Ok(found),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Legacy store is unreadable");
            Ok(false)
        }
    }
}

/// Copy every legacy memo and report into the current schema, then mark the
/// import complete.
///
/// Records that cannot be read are skipped and reported; storage failures
/// abort the import without setting the marker.
pub fn import(db: &Database, path: &Path, fallback_format: &str) -> Result<LegacyImportReport> {
    info!(path = %path.display(), "Importing legacy store");

    let report = with_attached(db, path, |db| {
        let mut report = LegacyImportReport {
            source: path.to_path_buf(),
            ..LegacyImportReport::default()
        };
        import_memos(db, fallback_format, &mut report)?;
        import_reports(db, &mut report)?;
        Ok(report)
    })?;

    db.with_tx(|tx| {
        write_meta(tx, IMPORT_COMPLETED_KEY, &Utc::now().to_rfc3339())?;
        write_meta(tx, IMPORT_SOURCE_KEY, &path.display().to_string())
    })?;

    for skipped in &report.skipped {
        warn!(error = %skipped.to_error(), "Legacy record skipped");
    }
    info!(
        memos = report.memos_imported,
        reports = report.reports_imported,
        skipped = report.skipped.len(),
        "Legacy import complete"
    );
    Ok(report)
}

/// Attach `path` as schema `legacy`, run `f`, and always detach.
fn with_attached<T>(
    db: &Database,
    path: &Path,
    f: impl FnOnce(&Database) -> Result<T>,
) -> Result<T> {
    let location = path.to_str().ok_or_else(|| {
        MemovoxError::InvalidArgument(format!("Legacy path is not valid UTF-8: {}", path.display()))
    })?;
    db.with_conn(|conn| {
        conn.execute("ATTACH DATABASE ?1 AS legacy", [location])
            .map_err(storage_err("Failed to attach legacy store"))?;
        Ok(())
    })?;

    let result = f(db);

    let detached = db.with_conn(|conn| {
        conn.execute_batch("DETACH DATABASE legacy")
            .map_err(storage_err("Failed to detach legacy store"))
    });
    let value = result?;
    detached?;
    Ok(value)
}

fn legacy_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA legacy.table_info({})", table))
        .map_err(storage_err("Failed to inspect legacy store"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(storage_err("Failed to inspect legacy store"))?;
    rows.collect::<std::result::Result<_, _>>()
        .map_err(storage_err("Failed to inspect legacy store"))
}

fn legacy_ids(conn: &Connection, table: &str) -> Result<Vec<Value>> {
    let mut stmt = conn
        .prepare(&format!("SELECT id FROM legacy.{} ORDER BY rowid", table))
        .map_err(storage_err("Failed to read legacy ids"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, Value>(0))
        .map_err(storage_err("Failed to read legacy ids"))?;
    rows.collect::<std::result::Result<_, _>>()
        .map_err(storage_err("Failed to read legacy ids"))
}

/// Column expression that reads `column` if the legacy table has it.
fn column_or(columns: &BTreeSet<String>, column: &str, default: &str) -> String {
    if columns.contains(column) {
        column.to_string()
    } else {
        default.to_string()
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Integer(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_legacy_date(value: &Value) -> std::result::Result<DateTime<Utc>, String> {
    match value {
        Value::Text(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
                return Ok(dt.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .map_err(|_| format!("unparseable date {:?}", s))
        }
        Value::Integer(millis) => from_millis(*millis).map_err(|e| e.to_string()),
        Value::Real(millis) => from_millis(*millis as i64).map_err(|e| e.to_string()),
        _ => Err("missing date".to_string()),
    }
}

/// Declared type when it is specific and well formed, else the sniffed
/// format, else `fallback`.
fn legacy_format(declared: Option<&str>, bytes: &[u8], fallback: &str) -> String {
    declared
        .filter(|t| !format::is_generic(t))
        .and_then(|t| format::validate(t).ok())
        .or_else(|| format::sniff(bytes).map(str::to_string))
        .unwrap_or_else(|| fallback.to_string())
}

/// Accepts `a,b,c` as well as a JSON array of strings or numbers.
fn parse_memo_ids(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
            return values
                .into_iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
        }
    }
    trimmed
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

struct LegacyMemoRow {
    transcript: Option<String>,
    date: Value,
    audio: Option<Vec<u8>>,
    audio_type: Option<String>,
}

fn import_memos(db: &Database, fallback_format: &str, report: &mut LegacyImportReport) -> Result<()> {
    let (columns, ids) = db.with_conn(|conn| {
        let columns = legacy_columns(conn, "memos")?;
        let ids = legacy_ids(conn, "memos")?;
        Ok((columns, ids))
    })?;

    let select = format!(
        "SELECT {}, date, {}, {} FROM legacy.memos WHERE id = ?1",
        column_or(&columns, "transcript", "NULL"),
        column_or(&columns, "audio_blob", "NULL"),
        column_or(&columns, "audio_type", "NULL"),
    );

    for raw_id in ids {
        let Some(id) = id_text(&raw_id) else {
            report.skipped.push(SkippedRecord {
                id: format!("{:?}", raw_id),
                reason: "memo has no usable id".to_string(),
            });
            continue;
        };

        let row = db.with_conn(|conn| {
            conn.query_row(&select, [&raw_id], |row| {
                Ok(LegacyMemoRow {
                    transcript: row.get(0)?,
                    date: row.get(1)?,
                    audio: row.get(2)?,
                    audio_type: row.get(3)?,
                })
            })
            .map_err(storage_err("Failed to read legacy memo"))
        });
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                report.skipped.push(SkippedRecord {
                    id,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let date = match parse_legacy_date(&row.date) {
            Ok(date) => truncate_to_millis(date),
            Err(reason) => {
                report.skipped.push(SkippedRecord { id, reason });
                continue;
            }
        };

        let audio = row.audio.filter(|bytes| !bytes.is_empty());
        let audio_format = legacy_format(
            row.audio_type.as_deref(),
            audio.as_deref().unwrap_or_default(),
            fallback_format,
        );
        let memo = Memo {
            id,
            transcript: row.transcript.unwrap_or_default(),
            date,
            audio_format,
        };

        db.with_tx(|tx| {
            if let Some(bytes) = &audio {
                put_blob(tx, &memo.id, bytes, &memo.audio_format)?;
            }
            upsert_memo(tx, &memo)
        })?;
        report.memos_imported += 1;
    }
    Ok(())
}

struct LegacyReportRow {
    title: Option<String>,
    topic: Option<String>,
    analysis_type: Option<String>,
    date: Value,
    content: Option<String>,
    memo_ids: Option<String>,
}

fn import_reports(db: &Database, report: &mut LegacyImportReport) -> Result<()> {
    let columns = db.with_conn(|conn| legacy_columns(conn, "reports"))?;
    if !columns.contains("id") {
        return Ok(());
    }
    let ids = db.with_conn(|conn| legacy_ids(conn, "reports"))?;

    let select = format!(
        "SELECT {}, {}, {}, {}, {}, {} FROM legacy.reports WHERE id = ?1",
        column_or(&columns, "title", "NULL"),
        column_or(&columns, "topic", "NULL"),
        column_or(&columns, "analysis_type", "NULL"),
        column_or(&columns, "date", "NULL"),
        column_or(&columns, "content", "NULL"),
        column_or(&columns, "memo_ids", "NULL"),
    );

    for raw_id in ids {
        let Some(id) = id_text(&raw_id) else {
            report.skipped.push(SkippedRecord {
                id: format!("{:?}", raw_id),
                reason: "report has no usable id".to_string(),
            });
            continue;
        };

        let row = db.with_conn(|conn| {
            conn.query_row(&select, [&raw_id], |row| {
                Ok(LegacyReportRow {
                    title: row.get(0)?,
                    topic: row.get(1)?,
                    analysis_type: row.get(2)?,
                    date: row.get(3)?,
                    content: row.get(4)?,
                    memo_ids: row.get(5)?,
                })
            })
            .map_err(storage_err("Failed to read legacy report"))
        });
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                report.skipped.push(SkippedRecord {
                    id,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let date = match parse_legacy_date(&row.date) {
            Ok(date) => truncate_to_millis(date),
            Err(reason) => {
                report.skipped.push(SkippedRecord { id, reason });
                continue;
            }
        };

        let topic = row.topic.unwrap_or_default();
        let imported = Report {
            id,
            title: row.title.unwrap_or_else(|| topic.clone()),
            topic,
            analysis_type: AnalysisType::from(row.analysis_type.as_deref().unwrap_or("general")),
            date,
            content: row.content.unwrap_or_default(),
            memo_ids: memovox_core::types::dedup_preserving_order(
                row.memo_ids.as_deref().map(parse_memo_ids).unwrap_or_default(),
            ),
        };

        db.with_tx(|tx| upsert_report(tx, &imported))?;
        report.reports_imported += 1;
    }
    Ok(())
}
