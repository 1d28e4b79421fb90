//! The `VoiceStore` facade.
//!
//! Every operation waits for one-time initialization (schema detection and
//! migration, legacy import, consistency sweep, streak warm-up) and then runs
//! its SQLite work on a blocking thread. Initialization that fails is retried
//! by the next call.
//!
//! Writes hold the store's gate exclusively and commit the audio payload,
//! the memo row and the streak snapshot in one transaction, so a reader never
//! sees one without the others.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, error, info, warn};

use memovox_core::clock::{DayClock, OffsetClock, SystemClock};
use memovox_core::config::MemovoxConfig;
use memovox_core::error::{MemovoxError, Result};
use memovox_core::format;
use memovox_core::streak::StreakSnapshot;
use memovox_core::types::{new_record_id, AudioPayload, Memo, MemoPatch, NewReport, Report};

use crate::blob::{delete_blob, put_blob, BlobStore, SqliteBlobStore};
use crate::db::Database;
use crate::migrations::{MigrationManager, MigrationOutcome};
use crate::repository::{
    delete_memo, insert_memo, truncate_to_millis, update_memo, MemoRepository, ReportRepository,
};
use crate::streak::StreakCache;
use crate::sweep::{run_sweep, SweepReport};

/// What initialization did.
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub migration: MigrationOutcome,
    pub sweep: Option<SweepReport>,
    pub streak: StreakSnapshot,
}

/// Clock for streak days: a fixed offset when configured, else system local.
pub fn clock_for(config: &MemovoxConfig) -> Arc<dyn DayClock> {
    match config
        .streak
        .utc_offset_minutes
        .and_then(OffsetClock::from_minutes)
    {
        Some(clock) => Arc::new(clock),
        None => Arc::new(SystemClock),
    }
}

pub struct VoiceStore {
    inner: Arc<StoreInner>,
    init: OnceCell<InitReport>,
    /// Shared by reads, exclusive for writes and the sweep.
    gate: Arc<RwLock<()>>,
}

impl VoiceStore {
    /// Open the store at the configured database path.
    pub fn open(config: MemovoxConfig) -> Result<Self> {
        let path = config.database_path();
        let db = Database::open(
            &path,
            Duration::from_millis(config.storage.busy_timeout_ms),
        )?;
        let db = Arc::new(db);
        let blobs: Arc<dyn BlobStore> = Arc::new(SqliteBlobStore::new(db.clone()));
        let clock = clock_for(&config);
        Ok(Self::with_parts(db, blobs, clock, config))
    }

    /// A throwaway in-memory store.
    pub fn in_memory(config: MemovoxConfig, clock: Arc<dyn DayClock>) -> Result<Self> {
        let db = Arc::new(Database::in_memory()?);
        let blobs: Arc<dyn BlobStore> = Arc::new(SqliteBlobStore::new(db.clone()));
        Ok(Self::with_parts(db, blobs, clock, config))
    }

    /// Assemble a store from explicit parts. When `blobs` writes into `db`
    /// itself, payload and metadata commit together; any other blob store
    /// is written first and restored if the metadata write fails.
    pub fn with_parts(
        db: Arc<Database>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn DayClock>,
        config: MemovoxConfig,
    ) -> Self {
        let colocated = blobs.database().is_some_and(|own| Arc::ptr_eq(own, &db));
        let inner = StoreInner {
            memos: MemoRepository::new(db.clone()),
            reports: ReportRepository::new(db.clone()),
            streak: StreakCache::new(db.clone(), clock.clone(), config.streak.longest_policy),
            db,
            blobs,
            colocated,
            clock,
            config,
        };
        Self {
            inner: Arc::new(inner),
            init: OnceCell::new(),
            gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn config(&self) -> &MemovoxConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> Arc<dyn DayClock> {
        self.inner.clock.clone()
    }

    /// Run initialization if it has not completed yet.
    pub async fn ready(&self) -> Result<&InitReport> {
        self.init
            .get_or_try_init(|| async {
                let inner = Arc::clone(&self.inner);
                tokio::task::spawn_blocking(move || inner.initialize())
                    .await
                    .map_err(|e| {
                        MemovoxError::StorageUnavailable(format!(
                            "Initialization task panicked: {}",
                            e
                        ))
                    })?
            })
            .await
    }

    /// Run a read alongside other reads.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreInner) -> Result<T> + Send + 'static,
    {
        self.ready().await?;
        let guard = Arc::clone(&self.gate).read_owned().await;
        self.execute(op, guard, f).await
    }

    /// Run a write with every other operation shut out.
    async fn run_exclusive<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreInner) -> Result<T> + Send + 'static,
    {
        self.ready().await?;
        let guard = Arc::clone(&self.gate).write_owned().await;
        self.execute(op, guard, f).await
    }

    /// The guard moves onto the blocking thread so it is held until the
    /// work finishes, even if the caller stops waiting.
    async fn execute<G, T, F>(&self, op: &'static str, guard: G, f: F) -> Result<T>
    where
        G: Send + 'static,
        T: Send + 'static,
        F: FnOnce(&StoreInner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let result = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            f(&inner)
        })
        .await
        .map_err(|e| MemovoxError::StorageUnavailable(format!("{} task panicked: {}", op, e)))?;
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(op, error = %e, "Store operation failed");
            } else {
                debug!(op, error = %e, "Store operation rejected");
            }
        }
        result
    }

    // -------------------------------------------------------------------------
    // Memos
    // -------------------------------------------------------------------------

    /// Store a new memo with its audio. Returns the new id.
    pub async fn add_memo(
        &self,
        transcript: impl Into<String>,
        date: DateTime<Utc>,
        audio: AudioPayload,
        audio_format: impl Into<String>,
    ) -> Result<String> {
        let transcript = transcript.into();
        let audio_format = audio_format.into();
        self.run_exclusive("add_memo", move |inner| {
            inner.add_memo(transcript, date, audio, &audio_format)
        })
        .await
    }

    pub async fn update_memo(&self, id: &str, patch: MemoPatch) -> Result<Memo> {
        let id = id.to_string();
        self.run_exclusive("update_memo", move |inner| inner.update_memo(&id, patch))
            .await
    }

    /// Remove a memo and its audio. Unknown ids are a no-op; returns whether
    /// the memo existed.
    pub async fn delete_memo(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run_exclusive("delete_memo", move |inner| inner.delete_memo(&id))
            .await
    }

    /// `None` when no memo has this id.
    pub async fn get_memo(&self, id: &str) -> Result<Option<Memo>> {
        let id = id.to_string();
        self.run("get_memo", move |inner| inner.memos.find_by_id(&id))
            .await
    }

    /// All memos, newest first.
    pub async fn list_memos(&self) -> Result<Vec<Memo>> {
        self.run("list_memos", |inner| inner.memos.list()).await
    }

    /// Memos recorded on local days `from` through `to`, both whole days
    /// included, newest first.
    pub async fn list_memos_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Memo>> {
        self.run("list_memos_between", move |inner| {
            inner.memos.list_between(inner.clock.as_ref(), from, to)
        })
        .await
    }

    pub async fn count_memos(&self) -> Result<u64> {
        self.run("count_memos", |inner| inner.memos.count()).await
    }

    /// The memo's audio, tagged with the memo's `audio_format`. `None` when
    /// the memo or its payload is missing.
    pub async fn get_audio(&self, id: &str) -> Result<Option<AudioPayload>> {
        let id = id.to_string();
        self.run("get_audio", move |inner| inner.get_audio(&id)).await
    }

    // -------------------------------------------------------------------------
    // Reports
    // -------------------------------------------------------------------------

    /// Persist a report under a fresh id.
    pub async fn save_report(&self, report: NewReport) -> Result<Report> {
        self.run_exclusive("save_report", move |inner| {
            if report.title.trim().is_empty() {
                return Err(MemovoxError::InvalidArgument(
                    "Report title must not be empty".to_string(),
                ));
            }
            let mut report = report.into_report(new_record_id());
            report.date = truncate_to_millis(report.date);
            inner.reports.save(&report)?;
            info!(id = %report.id, memos = report.memo_ids.len(), "Report saved");
            Ok(report)
        })
        .await
    }

    /// `None` when no report has this id.
    pub async fn get_report(&self, id: &str) -> Result<Option<Report>> {
        let id = id.to_string();
        self.run("get_report", move |inner| inner.reports.find_by_id(&id))
            .await
    }

    /// All reports, newest first.
    pub async fn list_reports(&self) -> Result<Vec<Report>> {
        self.run("list_reports", |inner| inner.reports.list()).await
    }

    /// Unknown ids are a no-op; returns whether the report existed.
    pub async fn delete_report(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run_exclusive("delete_report", move |inner| inner.reports.delete(&id))
            .await
    }

    // -------------------------------------------------------------------------
    // Streaks and maintenance
    // -------------------------------------------------------------------------

    /// Streak as of today.
    pub async fn streak(&self) -> Result<StreakSnapshot> {
        // May rewrite the cached row.
        self.run_exclusive("streak", |inner| inner.streak.current()).await
    }

    pub async fn recompute_streak_from_scratch(&self) -> Result<StreakSnapshot> {
        self.run_exclusive("recompute_streak", |inner| {
            inner.streak.recompute_from_scratch()
        })
        .await
    }

    /// Run the payload/format consistency sweep now.
    pub async fn consistency_sweep(&self) -> Result<SweepReport> {
        self.run_exclusive("consistency_sweep", |inner| {
            run_sweep(
                &inner.memos,
                inner.blobs.as_ref(),
                &inner.config.audio.default_format,
            )
        })
        .await
    }
}

impl std::fmt::Debug for VoiceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceStore")
            .field("db", &self.inner.db)
            .field("colocated_payloads", &self.inner.colocated)
            .field("initialized", &self.init.initialized())
            .finish()
    }
}

/// What a write does to the memo's audio payload.
enum PayloadChange<'a> {
    Keep,
    Put { data: &'a [u8], format_tag: &'a str },
    Remove,
}

struct StoreInner {
    db: Arc<Database>,
    memos: MemoRepository,
    reports: ReportRepository,
    blobs: Arc<dyn BlobStore>,
    /// Whether `blobs` writes into `db`.
    colocated: bool,
    streak: StreakCache,
    clock: Arc<dyn DayClock>,
    config: MemovoxConfig,
}

impl StoreInner {
    fn initialize(&self) -> Result<InitReport> {
        let mut manager = MigrationManager::new(
            self.config.legacy_database_path(),
            self.config.audio.default_format.clone(),
        );
        let migration = manager.run(&self.db)?;

        let sweep = if self.config.storage.consistency_sweep {
            match run_sweep(
                &self.memos,
                self.blobs.as_ref(),
                &self.config.audio.default_format,
            ) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "Consistency sweep aborted");
                    None
                }
            }
        } else {
            None
        };

        let streak = if migration.invalidates_caches() {
            self.streak.recompute_from_scratch()?
        } else {
            self.streak.current()?
        };

        info!(
            current_streak = streak.current_streak,
            longest_streak = streak.longest_streak,
            "Store ready"
        );
        Ok(InitReport {
            migration,
            sweep,
            streak,
        })
    }

    /// Apply a payload change and a metadata write, then recompute the
    /// streak, all or nothing.
    fn commit<T>(
        &self,
        id: &str,
        payload: PayloadChange<'_>,
        metadata: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        if self.colocated {
            return self.db.with_tx(|tx| {
                let conn: &Connection = tx;
                match payload {
                    PayloadChange::Keep => {}
                    PayloadChange::Put { data, format_tag } => put_blob(conn, id, data, format_tag)?,
                    PayloadChange::Remove => {
                        delete_blob(conn, id)?;
                    }
                }
                let value = metadata(conn)?;
                self.streak.recompute_in(conn)?;
                Ok(value)
            });
        }

        // Payload lives outside the database: write it first and put the
        // previous one back if the metadata transaction does not commit.
        let previous = match payload {
            PayloadChange::Keep => None,
            PayloadChange::Put { data, format_tag } => {
                let previous = self.blobs.get(id)?;
                self.blobs.put(id, data, format_tag)?;
                Some(previous)
            }
            PayloadChange::Remove => {
                let previous = self.blobs.get(id)?;
                self.blobs.delete(id)?;
                Some(previous)
            }
        };

        let result = self.db.with_tx(|tx| {
            let conn: &Connection = tx;
            let value = metadata(conn)?;
            self.streak.recompute_in(conn)?;
            Ok(value)
        });

        if result.is_err() {
            if let Some(previous) = previous {
                let restored = match previous {
                    Some(blob) => self.blobs.put(id, &blob.data, &blob.format_tag),
                    None => self.blobs.delete(id).map(|_| ()),
                };
                if let Err(undo) = restored {
                    error!(id, error = %undo, "Failed to restore payload after failed write");
                }
            }
        }
        result
    }

    fn add_memo(
        &self,
        transcript: String,
        date: DateTime<Utc>,
        audio: AudioPayload,
        audio_format: &str,
    ) -> Result<String> {
        if audio.is_empty() {
            return Err(MemovoxError::InvalidArgument(
                "Memo audio must not be empty".to_string(),
            ));
        }
        let mut tag = format::validate(audio_format)?;
        if format::is_generic(&tag) {
            if let Ok(inferred) = format::infer(audio.format.as_deref(), &audio.bytes) {
                tag = inferred;
            }
        }

        let memo = Memo {
            id: new_record_id(),
            transcript,
            date: truncate_to_millis(date),
            audio_format: tag,
        };

        let payload = PayloadChange::Put {
            data: &audio.bytes,
            format_tag: &memo.audio_format,
        };
        self.commit(&memo.id, payload, |conn| insert_memo(conn, &memo))?;

        info!(id = %memo.id, format = %memo.audio_format, bytes = audio.len(), "Memo added");
        Ok(memo.id)
    }

    fn update_memo(&self, id: &str, patch: MemoPatch) -> Result<Memo> {
        if patch.is_empty() {
            return Err(MemovoxError::InvalidArgument(
                "Update must change at least one field".to_string(),
            ));
        }
        if patch.audio_format.is_some() && patch.audio.is_none() {
            return Err(MemovoxError::InvalidArgument(
                "audio_format can only change together with the audio".to_string(),
            ));
        }

        let existing = self
            .memos
            .find_by_id(id)?
            .ok_or_else(|| MemovoxError::memo_not_found(id))?;

        let mut updated = existing.clone();
        if let Some(transcript) = patch.transcript {
            updated.transcript = transcript;
        }
        if let Some(date) = patch.date {
            updated.date = truncate_to_millis(date);
        }
        if let Some(audio) = &patch.audio {
            if audio.is_empty() {
                return Err(MemovoxError::InvalidArgument(
                    "Memo audio must not be empty".to_string(),
                ));
            }
            updated.audio_format = match patch.audio_format.as_deref() {
                Some(explicit) => format::validate(explicit)?,
                None => format::infer(audio.format.as_deref(), &audio.bytes)?,
            };
        }

        let payload = match &patch.audio {
            Some(audio) => PayloadChange::Put {
                data: &audio.bytes,
                format_tag: &updated.audio_format,
            },
            None => PayloadChange::Keep,
        };
        self.commit(id, payload, |conn| {
            if update_memo(conn, &updated)? {
                Ok(())
            } else {
                Err(MemovoxError::memo_not_found(id))
            }
        })?;

        info!(id, date_changed = updated.date != existing.date, "Memo updated");
        Ok(updated)
    }

    fn delete_memo(&self, id: &str) -> Result<bool> {
        let existed = self.commit(id, PayloadChange::Remove, |conn| delete_memo(conn, id))?;
        if existed {
            info!(id, "Memo deleted");
        } else {
            debug!(id, "Delete of unknown memo ignored");
        }
        Ok(existed)
    }

    fn get_audio(&self, id: &str) -> Result<Option<AudioPayload>> {
        let Some(memo) = self.memos.find_by_id(id)? else {
            return Ok(None);
        };
        let Some(blob) = self.blobs.get(id)? else {
            warn!(id, "Memo has no audio payload");
            return Ok(None);
        };

        let tag = if format::is_generic(&memo.audio_format) {
            blob.format_tag
        } else {
            memo.audio_format
        };
        Ok(Some(AudioPayload::new(blob.data, tag)))
    }
}
