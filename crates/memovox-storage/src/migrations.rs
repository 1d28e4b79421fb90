//! Schema detection and migration.
//!
//! Startup runs `Uninitialized -> Detecting -> {FreshInit | Upgrading |
//! LegacyImporting} -> Ready`. Detection inspects the tables and columns that
//! actually exist rather than trusting the `schema_migrations` marker alone,
//! so databases written before version tracking are still recognized.
//!
//! Schema history:
//! - v1: `memos(id, transcript, date)` and `audio_blobs(id, data)`
//! - v2: `memos.audio_format`, `audio_blobs.format_tag`
//! - v3: `reports`
//! - v4: `streak_snapshot`, `store_meta`

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use memovox_core::error::{MemovoxError, Result};

use crate::db::{storage_err, Database};
use crate::legacy::{self, LegacyImportReport};

/// Schema version this build reads and writes.
pub const CURRENT_VERSION: i64 = 4;

const MIGRATION_NAMES: [(i64, &str); 4] = [
    (1, "initial_schema"),
    (2, "audio_format_tags"),
    (3, "reports"),
    (4, "streak_cache"),
];

const OWN_TABLES: [&str; 6] = [
    "schema_migrations",
    "memos",
    "audio_blobs",
    "reports",
    "streak_snapshot",
    "store_meta",
];

const MIGRATIONS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version     INTEGER PRIMARY KEY NOT NULL,
        name        TEXT NOT NULL,
        applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    );";

const V1_SQL: &str = "
    CREATE TABLE IF NOT EXISTS memos (
        id          TEXT PRIMARY KEY NOT NULL,
        transcript  TEXT NOT NULL DEFAULT '',
        date        INTEGER NOT NULL,
        created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    );

    CREATE TABLE IF NOT EXISTS audio_blobs (
        id          TEXT PRIMARY KEY NOT NULL,
        data        BLOB NOT NULL,
        updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    );";

const V3_SQL: &str = "
    CREATE TABLE IF NOT EXISTS reports (
        id              TEXT PRIMARY KEY NOT NULL,
        title           TEXT NOT NULL,
        topic           TEXT NOT NULL,
        analysis_type   TEXT NOT NULL,
        date            INTEGER NOT NULL,
        content         TEXT NOT NULL,
        memo_ids        TEXT NOT NULL DEFAULT '[]'
    );";

const V4_SQL: &str = "
    CREATE TABLE IF NOT EXISTS streak_snapshot (
        id               INTEGER PRIMARY KEY CHECK (id = 1),
        schema_version   INTEGER NOT NULL,
        current_streak   INTEGER NOT NULL,
        longest_streak   INTEGER NOT NULL,
        last_record_date TEXT,
        streak_dates     TEXT NOT NULL DEFAULT '[]',
        computed_at      INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS store_meta (
        key     TEXT PRIMARY KEY NOT NULL,
        value   TEXT NOT NULL
    );";

/// Full current schema, used when the database is empty.
const CURRENT_SCHEMA_SQL: &str = "
    CREATE TABLE memos (
        id            TEXT PRIMARY KEY NOT NULL,
        transcript    TEXT NOT NULL DEFAULT '',
        date          INTEGER NOT NULL,
        created_at    INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
        audio_format  TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE audio_blobs (
        id          TEXT PRIMARY KEY NOT NULL,
        data        BLOB NOT NULL,
        updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
        format_tag  TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE reports (
        id              TEXT PRIMARY KEY NOT NULL,
        title           TEXT NOT NULL,
        topic           TEXT NOT NULL,
        analysis_type   TEXT NOT NULL,
        date            INTEGER NOT NULL,
        content         TEXT NOT NULL,
        memo_ids        TEXT NOT NULL DEFAULT '[]'
    );

    CREATE TABLE streak_snapshot (
        id               INTEGER PRIMARY KEY CHECK (id = 1),
        schema_version   INTEGER NOT NULL,
        current_streak   INTEGER NOT NULL,
        longest_streak   INTEGER NOT NULL,
        last_record_date TEXT,
        streak_dates     TEXT NOT NULL DEFAULT '[]',
        computed_at      INTEGER NOT NULL
    );

    CREATE TABLE store_meta (
        key     TEXT PRIMARY KEY NOT NULL,
        value   TEXT NOT NULL
    );";

const INDEXES_SQL: &str = "
    CREATE INDEX IF NOT EXISTS idx_memos_date ON memos (date DESC);";

const REPORT_INDEXES_SQL: &str = "
    CREATE INDEX IF NOT EXISTS idx_reports_date ON reports (date DESC);";

// =============================================================================
// Shape inspection
// =============================================================================

/// Tables and columns present in the database, plus the recorded marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaShape {
    pub tables: BTreeMap<String, BTreeSet<String>>,
    pub recorded_version: Option<i64>,
}

impl SchemaShape {
    pub fn inspect(conn: &Connection) -> Result<Self> {
        let names: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )
                .map_err(storage_err("Failed to list tables"))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_err("Failed to list tables"))?;
            rows.collect::<std::result::Result<_, _>>()
                .map_err(storage_err("Failed to list tables"))?
        };

        let mut tables = BTreeMap::new();
        for name in names {
            let columns = table_columns(conn, &name)?;
            tables.insert(name, columns);
        }

        let recorded_version = if tables.contains_key("schema_migrations") {
            conn.query_row(
                "SELECT MAX(version) FROM schema_migrations",
                [],
                |row| row.get::<_, Option<i64>>(0),
            )
            .map_err(storage_err("Failed to query migration version"))?
        } else {
            None
        };

        Ok(Self {
            tables,
            recorded_version,
        })
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .map(|cols| cols.contains(column))
            .unwrap_or(false)
    }

    fn require_columns(&self, table: &str, columns: &[&str]) -> Result<()> {
        let missing: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|c| !self.has_column(table, c))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MemovoxError::SchemaUnrecognized(format!(
                "table {} is missing columns {:?}",
                table, missing
            )))
        }
    }

    /// Highest version whose changes are all present, 0 for an empty database.
    ///
    /// Fails with `SchemaUnrecognized` when the shape matches no version.
    pub fn inferred_version(&self) -> Result<i64> {
        if let Some(recorded) = self.recorded_version {
            if recorded > CURRENT_VERSION {
                return Err(MemovoxError::SchemaUnrecognized(format!(
                    "database is at version {}, this build supports up to {}",
                    recorded, CURRENT_VERSION
                )));
            }
        }

        let foreign: Vec<&String> = self
            .tables
            .keys()
            .filter(|t| !OWN_TABLES.contains(&t.as_str()))
            .collect();
        let data_tables = OWN_TABLES[1..].iter().filter(|t| self.has_table(t)).count();

        if data_tables == 0 {
            if !foreign.is_empty() {
                return Err(MemovoxError::SchemaUnrecognized(format!(
                    "database holds no memo tables, only {:?}",
                    foreign
                )));
            }
            return Ok(0);
        }
        if !foreign.is_empty() {
            debug!(tables = ?foreign, "Ignoring tables not owned by the store");
        }

        if !self.has_table("memos") || !self.has_table("audio_blobs") {
            return Err(MemovoxError::SchemaUnrecognized(
                "memo tables are incomplete: memos and audio_blobs must both exist".to_string(),
            ));
        }
        self.require_columns("memos", &["id", "transcript", "date"])?;
        self.require_columns("audio_blobs", &["id", "data"])?;
        if self.has_table("reports") {
            self.require_columns(
                "reports",
                &["id", "title", "topic", "analysis_type", "date", "content", "memo_ids"],
            )?;
        }
        if self.has_table("streak_snapshot") {
            self.require_columns(
                "streak_snapshot",
                &["id", "schema_version", "current_streak", "longest_streak", "streak_dates"],
            )?;
        }
        if self.has_table("store_meta") {
            self.require_columns("store_meta", &["key", "value"])?;
        }

        let mut version = 1;
        if self.has_column("memos", "audio_format") && self.has_column("audio_blobs", "format_tag")
        {
            version = 2;
            if self.has_table("reports") {
                version = 3;
                if self.has_table("streak_snapshot") && self.has_table("store_meta") {
                    version = 4;
                }
            }
        }
        Ok(version)
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .map_err(storage_err("Failed to inspect table"))?;
    let rows = stmt
        .query_map([table], |row| row.get::<_, String>(0))
        .map_err(storage_err("Failed to inspect table"))?;
    rows.collect::<std::result::Result<_, _>>()
        .map_err(storage_err("Failed to inspect table"))
}

// =============================================================================
// State machine
// =============================================================================

/// Lifecycle of schema initialization for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationState {
    Uninitialized,
    Detecting,
    FreshInit,
    Upgrading,
    LegacyImporting,
    Ready,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationState::Uninitialized => "Uninitialized",
            MigrationState::Detecting => "Detecting",
            MigrationState::FreshInit => "FreshInit",
            MigrationState::Upgrading => "Upgrading",
            MigrationState::LegacyImporting => "LegacyImporting",
            MigrationState::Ready => "Ready",
        };
        f.write_str(name)
    }
}

impl MigrationState {
    /// Returns whether a transition from `self` to `target` is valid.
    ///
    /// `Detecting -> Ready` covers a database that is already current.
    pub fn can_transition_to(&self, target: &MigrationState) -> bool {
        matches!(
            (self, target),
            (MigrationState::Uninitialized, MigrationState::Detecting)
                | (MigrationState::Detecting, MigrationState::FreshInit)
                | (MigrationState::Detecting, MigrationState::Upgrading)
                | (MigrationState::Detecting, MigrationState::LegacyImporting)
                | (MigrationState::Detecting, MigrationState::Ready)
                | (MigrationState::FreshInit, MigrationState::Ready)
                | (MigrationState::Upgrading, MigrationState::Ready)
                | (MigrationState::LegacyImporting, MigrationState::Ready)
        )
    }
}

/// Which branch initialization took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPath {
    FreshInit,
    Upgrading,
    LegacyImporting,
    UpToDate,
}

/// What a migration run did.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub path: MigrationPath,
    pub from_version: i64,
    pub to_version: i64,
    /// Names of the migrations applied in this run.
    pub applied: Vec<&'static str>,
    pub legacy: Option<LegacyImportReport>,
}

impl MigrationOutcome {
    /// Whether cached derived state may no longer match the records.
    pub fn invalidates_caches(&self) -> bool {
        self.legacy.is_some()
    }
}

/// Detects the on-disk schema and brings it to `CURRENT_VERSION`.
#[derive(Debug)]
pub struct MigrationManager {
    state: MigrationState,
    legacy_path: Option<PathBuf>,
    fallback_format: String,
    outcome: Option<MigrationOutcome>,
}

impl MigrationManager {
    pub fn new(legacy_path: Option<PathBuf>, fallback_format: impl Into<String>) -> Self {
        Self {
            state: MigrationState::Uninitialized,
            legacy_path,
            fallback_format: fallback_format.into(),
            outcome: None,
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    fn transition(&mut self, target: MigrationState) -> Result<()> {
        if !self.state.can_transition_to(&target) {
            return Err(MemovoxError::StorageUnavailable(format!(
                "Invalid migration transition: {} -> {}",
                self.state, target
            )));
        }
        debug!(from = %self.state, to = %target, "Migration state transition");
        self.state = target;
        Ok(())
    }

    /// Run detection and whichever migration branch applies.
    ///
    /// Once `Ready` is reached, further calls return the first outcome
    /// without touching the database.
    pub fn run(&mut self, db: &Database) -> Result<MigrationOutcome> {
        if self.state == MigrationState::Ready {
            if let Some(outcome) = &self.outcome {
                return Ok(outcome.clone());
            }
        }

        self.transition(MigrationState::Detecting)?;
        let shape = db.with_conn(SchemaShape::inspect)?;
        let from_version = shape.inferred_version()?;
        let legacy_pending = self.legacy_pending(db, &shape)?;

        let outcome = if let Some(path) = legacy_pending {
            self.transition(MigrationState::LegacyImporting)?;
            let applied = if from_version == 0 {
                create_current_schema(db)?
            } else {
                upgrade(db, from_version, &shape)?
            };
            let report = legacy::import(db, &path, &self.fallback_format)?;
            MigrationOutcome {
                path: MigrationPath::LegacyImporting,
                from_version,
                to_version: CURRENT_VERSION,
                applied,
                legacy: Some(report),
            }
        } else if from_version == 0 {
            self.transition(MigrationState::FreshInit)?;
            let applied = create_current_schema(db)?;
            MigrationOutcome {
                path: MigrationPath::FreshInit,
                from_version,
                to_version: CURRENT_VERSION,
                applied,
                legacy: None,
            }
        } else if from_version < CURRENT_VERSION
            || shape.recorded_version != Some(CURRENT_VERSION)
        {
            self.transition(MigrationState::Upgrading)?;
            let applied = upgrade(db, from_version, &shape)?;
            MigrationOutcome {
                path: MigrationPath::Upgrading,
                from_version,
                to_version: CURRENT_VERSION,
                applied,
                legacy: None,
            }
        } else {
            db.with_conn(|conn| {
                conn.execute_batch(INDEXES_SQL)
                    .and_then(|_| conn.execute_batch(REPORT_INDEXES_SQL))
                    .map_err(storage_err("Failed to ensure indexes"))
            })?;
            MigrationOutcome {
                path: MigrationPath::UpToDate,
                from_version,
                to_version: CURRENT_VERSION,
                applied: Vec::new(),
                legacy: None,
            }
        };

        self.transition(MigrationState::Ready)?;
        info!(
            path = ?outcome.path,
            from_version = outcome.from_version,
            to_version = outcome.to_version,
            applied = ?outcome.applied,
            "Schema ready"
        );
        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    /// The legacy store to import, if one is configured, present, and not
    /// yet imported.
    fn legacy_pending(&self, db: &Database, shape: &SchemaShape) -> Result<Option<PathBuf>> {
        let Some(path) = self.legacy_path.as_deref() else {
            return Ok(None);
        };
        if !path.exists() {
            debug!(path = %path.display(), "No legacy store at configured path");
            return Ok(None);
        }
        if shape.has_table("store_meta") && db.with_conn(legacy::is_import_completed)? {
            return Ok(None);
        }
        if !legacy::is_legacy_store(db, path)? {
            warn!(path = %path.display(), "Configured legacy store has no recognizable memo table; skipping import");
            return Ok(None);
        }
        Ok(Some(path.to_path_buf()))
    }
}

// =============================================================================
// Branches
// =============================================================================

fn record_versions(conn: &Connection, versions: impl IntoIterator<Item = i64>) -> Result<()> {
    for version in versions {
        let name = MIGRATION_NAMES
            .iter()
            .find(|(v, _)| *v == version)
            .map(|(_, n)| *n)
            .unwrap_or("unknown");
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![version, name],
        )
        .map_err(storage_err("Failed to record migration"))?;
    }
    Ok(())
}

/// Create the current schema directly in an empty database.
fn create_current_schema(db: &Database) -> Result<Vec<&'static str>> {
    db.with_tx(|tx| {
        tx.execute_batch(MIGRATIONS_TABLE_SQL)
            .and_then(|_| tx.execute_batch(CURRENT_SCHEMA_SQL))
            .and_then(|_| tx.execute_batch(INDEXES_SQL))
            .and_then(|_| tx.execute_batch(REPORT_INDEXES_SQL))
            .map_err(storage_err("Failed to create schema"))?;
        record_versions(tx, 1..=CURRENT_VERSION)
    })?;
    info!(version = CURRENT_VERSION, "Created fresh schema");
    Ok(MIGRATION_NAMES.iter().map(|(_, name)| *name).collect())
}

/// Apply every change after `from_version`, each in its own transaction and
/// each guarded by a check of the current shape, then verify the result.
fn upgrade(db: &Database, from_version: i64, shape: &SchemaShape) -> Result<Vec<&'static str>> {
    let mut applied = Vec::new();

    db.with_tx(|tx| {
        tx.execute_batch(MIGRATIONS_TABLE_SQL)
            .and_then(|_| tx.execute_batch(V1_SQL))
            .and_then(|_| tx.execute_batch(INDEXES_SQL))
            .map_err(storage_err("Failed to apply migration v1"))?;
        record_versions(tx, [1])
    })?;

    if from_version < 2 {
        db.with_tx(|tx| {
            if !shape.has_column("memos", "audio_format") {
                tx.execute_batch("ALTER TABLE memos ADD COLUMN audio_format TEXT NOT NULL DEFAULT '';")
                    .map_err(storage_err("Failed to add memos.audio_format"))?;
            }
            if !shape.has_column("audio_blobs", "format_tag") {
                tx.execute_batch(
                    "ALTER TABLE audio_blobs ADD COLUMN format_tag TEXT NOT NULL DEFAULT '';",
                )
                .map_err(storage_err("Failed to add audio_blobs.format_tag"))?;
            }
            record_versions(tx, [2])
        })?;
        applied.push("audio_format_tags");
        info!("Applied migration v2: audio_format_tags");
    }

    if from_version < 3 {
        db.with_tx(|tx| {
            tx.execute_batch(V3_SQL)
                .and_then(|_| tx.execute_batch(REPORT_INDEXES_SQL))
                .map_err(storage_err("Failed to apply migration v3"))?;
            record_versions(tx, [3])
        })?;
        applied.push("reports");
        info!("Applied migration v3: reports");
    }

    if from_version < 4 {
        db.with_tx(|tx| {
            tx.execute_batch(V4_SQL)
                .map_err(storage_err("Failed to apply migration v4"))?;
            record_versions(tx, [4])
        })?;
        applied.push("streak_cache");
        info!("Applied migration v4: streak_cache");
    }

    // Databases created before version tracking get their markers backfilled.
    db.with_tx(|tx| {
        tx.execute_batch(REPORT_INDEXES_SQL)
            .map_err(storage_err("Failed to ensure indexes"))?;
        record_versions(tx, 1..=CURRENT_VERSION)
    })?;

    let after = db.with_conn(SchemaShape::inspect)?;
    let reached = after.inferred_version()?;
    if reached != CURRENT_VERSION {
        return Err(MemovoxError::SchemaUnrecognized(format!(
            "upgrade from version {} ended at version {}",
            from_version, reached
        )));
    }
    Ok(applied)
}

/// Convenience for tests and tools: run a fresh manager with no legacy store.
pub fn run_migrations(db: &Database) -> Result<MigrationOutcome> {
    MigrationManager::new(None, memovox_core::format::DEFAULT_FORMAT).run(db)
}
