//! End-to-end behavior of the store through its public facade.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;

use memovox_core::clock::{DayClock, FixedClock};
use memovox_core::config::MemovoxConfig;
use memovox_core::error::{MemovoxError, Result};
use memovox_core::format;
use memovox_core::types::{AudioPayload, MemoPatch};
use memovox_core::LongestStreakPolicy;
use memovox_storage::{
    BlobStore, Database, MigrationPath, SqliteBlobStore, StoredBlob, VoiceStore,
};

const WEBM: &[u8] = b"\x1A\x45\xDF\xA3webm-cluster";
const OGG: &[u8] = b"OggS\x00\x02ogg-page";

fn utc_clock(today: NaiveDate) -> Arc<FixedClock> {
    Arc::new(FixedClock::at_local_noon(today, FixedOffset::east_opt(0).unwrap()))
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(date: NaiveDate, hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).unwrap())
}

/// Store plus direct handles on its database and blob store.
struct Harness {
    store: VoiceStore,
    db: Arc<Database>,
    blobs: Arc<SqliteBlobStore>,
    clock: Arc<FixedClock>,
}

async fn harness(today: NaiveDate, config: MemovoxConfig) -> Harness {
    let db = Arc::new(Database::in_memory().unwrap());
    let blobs = Arc::new(SqliteBlobStore::new(db.clone()));
    let clock = utc_clock(today);
    let store = VoiceStore::with_parts(db.clone(), blobs.clone(), clock.clone(), config);
    store.ready().await.unwrap();
    Harness {
        store,
        db,
        blobs,
        clock,
    }
}

fn file_config(dir: &Path) -> MemovoxConfig {
    let mut config = MemovoxConfig::default();
    config.general.data_dir = dir.to_string_lossy().into_owned();
    config
}

// =============================================================================
// Round trip and deletion
// =============================================================================

#[tokio::test]
async fn test_memo_round_trip() {
    let h = harness(day(2024, 1, 3), MemovoxConfig::default()).await;
    let date = Utc.timestamp_millis_opt(1_704_283_200_123).unwrap();

    let id = h
        .store
        .add_memo("morning check-in", date, AudioPayload::untyped(WEBM.to_vec()), "audio/webm;codecs=opus")
        .await
        .unwrap();

    let memo = h.store.get_memo(&id).await.unwrap().unwrap();
    assert_eq!(memo.id, id);
    assert_eq!(memo.transcript, "morning check-in");
    assert_eq!(memo.date, date);
    assert_eq!(memo.audio_format, "audio/webm;codecs=opus");

    let audio = h.store.get_audio(&id).await.unwrap().unwrap();
    assert_eq!(audio.bytes, WEBM);
    assert_eq!(audio.format.as_deref(), Some("audio/webm;codecs=opus"));

    assert_eq!(h.store.list_memos().await.unwrap(), vec![memo]);
}

#[tokio::test]
async fn test_list_is_newest_first() {
    let h = harness(day(2024, 1, 3), MemovoxConfig::default()).await;
    let mut ids = Vec::new();
    for d in 1..=3 {
        ids.push(
            h.store
                .add_memo(format!("day {}", d), at(day(2024, 1, d), 8), AudioPayload::untyped(OGG.to_vec()), "audio/ogg")
                .await
                .unwrap(),
        );
    }
    ids.reverse();
    let listed: Vec<String> = h.store.list_memos().await.unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn test_delete_removes_memo_and_audio() {
    let h = harness(day(2024, 1, 3), MemovoxConfig::default()).await;
    let id = h
        .store
        .add_memo("t", Utc::now(), AudioPayload::untyped(OGG.to_vec()), "audio/ogg")
        .await
        .unwrap();
    assert_eq!(h.store.count_memos().await.unwrap(), 1);

    assert!(h.store.delete_memo(&id).await.unwrap());
    assert!(h.store.get_memo(&id).await.unwrap().is_none());
    assert!(h.store.get_audio(&id).await.unwrap().is_none());
    assert!(h.blobs.get(&id).unwrap().is_none());
    assert_eq!(h.store.count_memos().await.unwrap(), 0);

    // Idempotent.
    assert!(!h.store.delete_memo(&id).await.unwrap());
    assert!(!h.store.delete_memo("never-existed").await.unwrap());
}

#[tokio::test]
async fn test_missing_records_read_as_absent() {
    let h = harness(day(2024, 1, 3), MemovoxConfig::default()).await;
    assert!(h.store.get_memo("never-existed").await.unwrap().is_none());
    assert!(h.store.get_audio("never-existed").await.unwrap().is_none());
    assert!(h.store.get_report("never-existed").await.unwrap().is_none());

    // A memo whose payload vanished has no audio to hand back.
    let id = h
        .store
        .add_memo("t", Utc::now(), AudioPayload::untyped(OGG.to_vec()), "audio/ogg")
        .await
        .unwrap();
    h.blobs.delete(&id).unwrap();
    assert!(h.store.get_memo(&id).await.unwrap().is_some());
    assert!(h.store.get_audio(&id).await.unwrap().is_none());
}

// =============================================================================
// Format consistency
// =============================================================================

#[tokio::test]
async fn test_audio_is_tagged_with_memo_format() {
    let h = harness(day(2024, 1, 3), MemovoxConfig::default()).await;
    let id = h
        .store
        .add_memo("t", Utc::now(), AudioPayload::untyped(WEBM.to_vec()), "audio/webm")
        .await
        .unwrap();

    // Payload lost its tag, as a generic container would.
    h.blobs.put(&id, WEBM, "application/octet-stream").unwrap();
    let audio = h.store.get_audio(&id).await.unwrap().unwrap();
    assert_eq!(audio.format.as_deref(), Some("audio/webm"));

    let updated = h
        .store
        .update_memo(
            &id,
            MemoPatch::audio(AudioPayload::new(OGG.to_vec(), "audio/ogg;codecs=opus")),
        )
        .await
        .unwrap();
    assert_eq!(updated.audio_format, "audio/ogg;codecs=opus");
    let audio = h.store.get_audio(&id).await.unwrap().unwrap();
    assert_eq!(audio.format.as_deref(), Some(updated.audio_format.as_str()));
    assert_eq!(audio.bytes, OGG);
}

#[tokio::test]
async fn test_explicit_format_overrides_payload_type() {
    let h = harness(day(2024, 1, 3), MemovoxConfig::default()).await;
    let id = h
        .store
        .add_memo("t", Utc::now(), AudioPayload::untyped(WEBM.to_vec()), "audio/webm")
        .await
        .unwrap();

    let patch = MemoPatch::audio(AudioPayload::new(OGG.to_vec(), "audio/webm"))
        .with_audio_format("audio/ogg");
    let updated = h.store.update_memo(&id, patch).await.unwrap();
    assert_eq!(updated.audio_format, "audio/ogg");
    assert_eq!(h.blobs.get(&id).unwrap().unwrap().format_tag, "audio/ogg");
}

#[tokio::test]
async fn test_startup_sweep_repairs_mismatched_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());

    let id = {
        let store = VoiceStore::open(config.clone()).unwrap();
        store
            .add_memo("t", Utc::now(), AudioPayload::untyped(OGG.to_vec()), "audio/ogg")
            .await
            .unwrap()
    };

    // Corrupt the stored tag behind the store's back.
    let conn = Connection::open(config.database_path()).unwrap();
    conn.execute(
        "UPDATE audio_blobs SET format_tag = 'audio/wav' WHERE id = ?1",
        [&id],
    )
    .unwrap();
    drop(conn);

    let store = VoiceStore::open(config).unwrap();
    let init = store.ready().await.unwrap();
    assert_eq!(init.sweep.as_ref().unwrap().payloads_retagged, 1);
    assert_eq!(store.get_audio(&id).await.unwrap().unwrap().format.as_deref(), Some("audio/ogg"));
}

// =============================================================================
// Migration
// =============================================================================

#[tokio::test]
async fn test_reopen_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());

    let id = {
        let store = VoiceStore::open(config.clone()).unwrap();
        assert_eq!(store.ready().await.unwrap().migration.path, MigrationPath::FreshInit);
        store
            .add_memo("kept", Utc::now(), AudioPayload::untyped(WEBM.to_vec()), "audio/webm")
            .await
            .unwrap()
    };

    for _ in 0..2 {
        let store = VoiceStore::open(config.clone()).unwrap();
        let init = store.ready().await.unwrap();
        assert_eq!(init.migration.path, MigrationPath::UpToDate);
        assert!(init.migration.applied.is_empty());
        assert_eq!(store.count_memos().await.unwrap(), 1);
        assert_eq!(store.get_memo(&id).await.unwrap().unwrap().transcript, "kept");
    }
}

#[tokio::test]
async fn test_v1_database_is_upgraded_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    std::fs::create_dir_all(dir.path()).unwrap();

    let conn = Connection::open(config.database_path()).unwrap();
    conn.execute_batch(
        "CREATE TABLE memos (id TEXT PRIMARY KEY, transcript TEXT NOT NULL, date INTEGER NOT NULL);
         CREATE TABLE audio_blobs (id TEXT PRIMARY KEY, data BLOB NOT NULL);
         INSERT INTO memos VALUES ('old', 'from v1', 1704067200000);
         INSERT INTO audio_blobs VALUES ('old', X'4F6767530002');",
    )
    .unwrap();
    drop(conn);

    let store = VoiceStore::open(config).unwrap();
    let init = store.ready().await.unwrap();
    assert_eq!(init.migration.path, MigrationPath::Upgrading);
    assert_eq!(init.migration.from_version, 1);

    // The sweep fills in the format the v1 row never had.
    let memo = store.get_memo("old").await.unwrap().unwrap();
    assert_eq!(memo.transcript, "from v1");
    assert_eq!(memo.audio_format, "audio/ogg");
    assert_eq!(store.get_audio("old").await.unwrap().unwrap().bytes, b"OggS\x00\x02");
}

#[tokio::test]
async fn test_foreign_database_fails_with_unrecognized_schema() {
    let dir = tempfile::tempdir().unwrap();
    let config = file_config(dir.path());
    std::fs::create_dir_all(dir.path()).unwrap();
    Connection::open(config.database_path())
        .unwrap()
        .execute_batch("CREATE TABLE invoices (id INTEGER PRIMARY KEY);")
        .unwrap();

    let store = VoiceStore::open(config).unwrap();
    let err = store.count_memos().await.unwrap_err();
    assert!(matches!(err, MemovoxError::SchemaUnrecognized(_)));
    assert!(err.is_fatal());
}

// =============================================================================
// Legacy import
// =============================================================================

fn write_legacy(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE memos (id TEXT PRIMARY KEY, transcript TEXT, date TEXT, audio_blob BLOB, audio_type TEXT);
         INSERT INTO memos VALUES
             ('l1', 'legacy one', '2024-01-01T09:00:00.000Z', X'4F6767530002', 'audio/ogg'),
             ('l2', 'legacy two', '2024-01-02T09:00:00.000Z', X'1A45DFA301', NULL);",
    )
    .unwrap();
}

#[tokio::test]
async fn test_legacy_import_runs_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = dir.path().join("legacy.db");
    write_legacy(&legacy);
    let mut config = file_config(&dir.path().join("data"));
    config.storage.legacy_database = Some(legacy.to_string_lossy().into_owned());

    {
        let store = VoiceStore::open(config.clone()).unwrap();
        let init = store.ready().await.unwrap();
        assert_eq!(init.migration.path, MigrationPath::LegacyImporting);
        let report = init.migration.legacy.as_ref().unwrap();
        assert_eq!(report.memos_imported, 2);
        assert!(report.skipped.is_empty());
        assert_eq!(init.streak.streak_dates.len(), 2);
        assert_eq!(store.get_memo("l2").await.unwrap().unwrap().audio_format, "audio/webm");
    }

    {
        let store = VoiceStore::open(config.clone()).unwrap();
        let init = store.ready().await.unwrap();
        assert_eq!(init.migration.path, MigrationPath::UpToDate);
        assert!(init.migration.legacy.is_none());
        assert_eq!(store.count_memos().await.unwrap(), 2);
    }

    // Simulate a crash before the completion marker was written.
    Connection::open(config.database_path())
        .unwrap()
        .execute("DELETE FROM store_meta WHERE key = 'legacy_import_completed_at'", [])
        .unwrap();

    let store = VoiceStore::open(config).unwrap();
    let init = store.ready().await.unwrap();
    assert_eq!(init.migration.path, MigrationPath::LegacyImporting);
    assert_eq!(store.count_memos().await.unwrap(), 2);
}

#[tokio::test]
async fn test_missing_legacy_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = file_config(dir.path());
    config.storage.legacy_database = Some(dir.path().join("absent.db").to_string_lossy().into_owned());

    let store = VoiceStore::open(config).unwrap();
    assert_eq!(store.ready().await.unwrap().migration.path, MigrationPath::FreshInit);
}

// =============================================================================
// Streaks
// =============================================================================

async fn add_on(h: &Harness, date: NaiveDate) -> String {
    h.store
        .add_memo("t", at(date, 9), AudioPayload::untyped(OGG.to_vec()), "audio/ogg")
        .await
        .unwrap()
}

#[tokio::test]
async fn test_streak_three_consecutive_days() {
    let h = harness(day(2024, 1, 3), MemovoxConfig::default()).await;
    for d in 1..=3 {
        add_on(&h, day(2024, 1, d)).await;
    }
    let streak = h.store.streak().await.unwrap();
    assert_eq!(streak.current_streak, 3);
    assert_eq!(streak.longest_streak, 3);
    assert_eq!(streak.last_record_date, Some(day(2024, 1, 3)));
}

#[tokio::test]
async fn test_streak_grace_day_and_break() {
    let h = harness(day(2024, 1, 4), MemovoxConfig::default()).await;
    for d in 1..=3 {
        add_on(&h, day(2024, 1, d)).await;
    }
    // No memo today, one yesterday: still counted.
    assert_eq!(h.store.streak().await.unwrap().current_streak, 3);

    h.clock.advance(Duration::days(1));
    let streak = h.store.streak().await.unwrap();
    assert_eq!(streak.current_streak, 0);
    assert_eq!(streak.longest_streak, 3);
}

#[tokio::test]
async fn test_streak_uses_local_days() {
    let db = Arc::new(Database::in_memory().unwrap());
    let blobs = Arc::new(SqliteBlobStore::new(db.clone()));
    // UTC-5: 03:00Z on Jan 2 is still Jan 1 locally.
    let offset = FixedOffset::west_opt(5 * 3600).unwrap();
    let clock = Arc::new(FixedClock::at_local_noon(day(2024, 1, 2), offset));
    let store = VoiceStore::with_parts(db, blobs, clock.clone(), MemovoxConfig::default());

    for instant in ["2024-01-01T15:00:00Z", "2024-01-02T03:00:00Z"] {
        let date = DateTime::parse_from_rfc3339(instant).unwrap().with_timezone(&Utc);
        store
            .add_memo("t", date, AudioPayload::untyped(OGG.to_vec()), "audio/ogg")
            .await
            .unwrap();
    }
    let streak = store.streak().await.unwrap();
    assert_eq!(streak.streak_dates, vec![day(2024, 1, 1)]);
    assert_eq!(streak.current_streak, 1);
    assert!(clock.is_same_local_day(
        DateTime::parse_from_rfc3339("2024-01-01T15:00:00Z").unwrap().with_timezone(&Utc),
        DateTime::parse_from_rfc3339("2024-01-02T03:00:00Z").unwrap().with_timezone(&Utc),
    ));
}

#[tokio::test]
async fn test_longest_streak_never_decreases_under_adds() {
    let mut exact = MemovoxConfig::default();
    exact.streak.longest_policy = LongestStreakPolicy::Exact;

    // Running max only sees streaks that were current when observed, so
    // backdated runs do not raise it; the exact policy scans full history.
    for (config, expected_longest) in [(MemovoxConfig::default(), 1), (exact, 4)] {
        let h = harness(day(2024, 2, 1), config).await;
        let mut longest = 0;
        for d in [1, 2, 3, 10, 11, 20, 21, 22, 23, 31] {
            add_on(&h, day(2024, 1, d)).await;
            let streak = h.store.streak().await.unwrap();
            assert!(streak.longest_streak >= longest);
            longest = streak.longest_streak;
        }
        assert_eq!(longest, expected_longest);
    }
}

#[tokio::test]
async fn test_delete_policy() {
    let mut exact = MemovoxConfig::default();
    exact.streak.longest_policy = LongestStreakPolicy::Exact;

    for (config, expected_longest) in [(MemovoxConfig::default(), 3), (exact, 2)] {
        let h = harness(day(2024, 1, 3), config).await;
        add_on(&h, day(2024, 1, 1)).await;
        add_on(&h, day(2024, 1, 2)).await;
        let third = add_on(&h, day(2024, 1, 3)).await;

        h.store.delete_memo(&third).await.unwrap();
        let streak = h.store.streak().await.unwrap();
        assert_eq!(streak.current_streak, 2);
        assert_eq!(streak.longest_streak, expected_longest);
    }
}

#[tokio::test]
async fn test_recompute_from_scratch_matches_history() {
    let h = harness(day(2024, 1, 3), MemovoxConfig::default()).await;
    for d in 1..=3 {
        add_on(&h, day(2024, 1, d)).await;
    }
    let middle = h.store.list_memos().await.unwrap()[1].id.clone();
    h.store.delete_memo(&middle).await.unwrap();

    assert_eq!(h.store.streak().await.unwrap().longest_streak, 3);
    let rebuilt = h.store.recompute_streak_from_scratch().await.unwrap();
    assert_eq!(rebuilt.longest_streak, 1);
    assert_eq!(rebuilt.current_streak, 1);
}

#[tokio::test]
async fn test_failed_streak_write_rolls_back_the_add() {
    let today = day(2024, 1, 3);
    let h = harness(today, MemovoxConfig::default()).await;
    add_on(&h, day(2024, 1, 2)).await;
    h.db.with_conn(|conn| {
        conn.execute_batch(
            "CREATE TRIGGER reject_streak BEFORE UPDATE ON streak_snapshot
             BEGIN SELECT RAISE(ABORT, 'injected streak failure'); END;",
        )
        .map_err(|e| MemovoxError::StorageUnavailable(e.to_string()))
    })
    .unwrap();

    let err = h
        .store
        .add_memo("t", at(today, 9), AudioPayload::untyped(OGG.to_vec()), "audio/ogg")
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(h.store.count_memos().await.unwrap(), 1);
    assert_eq!(h.blobs.list_ids().unwrap().len(), 1);

    h.db.with_conn(|conn| {
        conn.execute_batch("DROP TRIGGER reject_streak;")
            .map_err(|e| MemovoxError::StorageUnavailable(e.to_string()))
    })
    .unwrap();
    add_on(&h, today).await;
    let streak = h.store.streak().await.unwrap();
    assert_eq!(streak.current_streak, 2);
    assert_eq!(streak, h.store.recompute_streak_from_scratch().await.unwrap());
}

#[tokio::test]
async fn test_streak_catches_up_with_memos_written_behind_its_back() {
    let today = day(2024, 1, 3);
    let h = harness(today, MemovoxConfig::default()).await;
    add_on(&h, day(2024, 1, 2)).await;
    assert_eq!(h.store.streak().await.unwrap().current_streak, 1);

    // Rows written without going through the store leave the cached
    // snapshot behind.
    h.db.with_conn(|conn| {
        for (id, date) in [("side-1", day(2024, 1, 1)), ("side-2", today)] {
            conn.execute(
                "INSERT INTO memos (id, transcript, date, audio_format) VALUES (?1, 't', ?2, 'audio/ogg')",
                rusqlite::params![id, at(date, 9).timestamp_millis()],
            )
            .map_err(|e| MemovoxError::StorageUnavailable(e.to_string()))?;
        }
        Ok(())
    })
    .unwrap();

    let streak = h.store.streak().await.unwrap();
    assert_eq!(streak.current_streak, 3);
    assert_eq!(streak.last_record_date, Some(today));
    assert_eq!(streak, h.store.recompute_streak_from_scratch().await.unwrap());
}

// =============================================================================
// Atomicity under failure injection
// =============================================================================

/// Blob store whose writes always fail.
struct FailingPuts(SqliteBlobStore);

impl BlobStore for FailingPuts {
    fn put(&self, _id: &str, _data: &[u8], _format_tag: &str) -> Result<()> {
        Err(MemovoxError::StorageUnavailable("injected put failure".to_string()))
    }
    fn get(&self, id: &str) -> Result<Option<StoredBlob>> {
        self.0.get(id)
    }
    fn delete(&self, id: &str) -> Result<bool> {
        self.0.delete(id)
    }
    fn list_ids(&self) -> Result<Vec<String>> {
        self.0.list_ids()
    }
}

#[tokio::test]
async fn test_failed_payload_write_stores_nothing() {
    let db = Arc::new(Database::in_memory().unwrap());
    let blobs = Arc::new(FailingPuts(SqliteBlobStore::new(db.clone())));
    let clock: Arc<dyn DayClock> = utc_clock(day(2024, 1, 3));
    let store = VoiceStore::with_parts(db, blobs.clone(), clock, MemovoxConfig::default());

    let err = store
        .add_memo("t", Utc::now(), AudioPayload::untyped(OGG.to_vec()), "audio/ogg")
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(store.count_memos().await.unwrap(), 0);
    assert!(blobs.list_ids().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_metadata_insert_removes_payload() {
    let h = harness(day(2024, 1, 3), MemovoxConfig::default()).await;
    h.db.with_conn(|conn| {
        conn.execute_batch(
            "CREATE TRIGGER reject_insert BEFORE INSERT ON memos
             BEGIN SELECT RAISE(ABORT, 'injected insert failure'); END;",
        )
        .map_err(|e| MemovoxError::StorageUnavailable(e.to_string()))
    })
    .unwrap();

    let err = h
        .store
        .add_memo("t", Utc::now(), AudioPayload::untyped(OGG.to_vec()), "audio/ogg")
        .await
        .unwrap_err();
    assert!(matches!(err, MemovoxError::StorageUnavailable(_)));
    assert_eq!(h.store.count_memos().await.unwrap(), 0);
    assert!(h.blobs.list_ids().unwrap().is_empty());
    assert_eq!(h.store.streak().await.unwrap().current_streak, 0);
}

#[tokio::test]
async fn test_failed_metadata_update_restores_payload() {
    let h = harness(day(2024, 1, 3), MemovoxConfig::default()).await;
    let id = h
        .store
        .add_memo("before", Utc::now(), AudioPayload::untyped(WEBM.to_vec()), "audio/webm")
        .await
        .unwrap();
    h.db.with_conn(|conn| {
        conn.execute_batch(
            "CREATE TRIGGER reject_update BEFORE UPDATE ON memos
             BEGIN SELECT RAISE(ABORT, 'injected update failure'); END;",
        )
        .map_err(|e| MemovoxError::StorageUnavailable(e.to_string()))
    })
    .unwrap();

    let patch = MemoPatch {
        transcript: Some("after".to_string()),
        audio: Some(AudioPayload::new(OGG.to_vec(), "audio/ogg")),
        ..MemoPatch::default()
    };
    assert!(h.store.update_memo(&id, patch).await.is_err());

    let memo = h.store.get_memo(&id).await.unwrap().unwrap();
    assert_eq!(memo.transcript, "before");
    assert_eq!(memo.audio_format, "audio/webm");
    let audio = h.store.get_audio(&id).await.unwrap().unwrap();
    assert_eq!(audio.bytes, WEBM);
    assert_eq!(audio.format.as_deref(), Some("audio/webm"));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_calls_during_initialization_wait_for_ready() {
    let db = Arc::new(Database::in_memory().unwrap());
    let blobs = Arc::new(SqliteBlobStore::new(db.clone()));
    let store = Arc::new(VoiceStore::with_parts(
        db,
        blobs,
        utc_clock(day(2024, 1, 3)),
        MemovoxConfig::default(),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .add_memo(format!("memo {}", i), Utc::now(), AudioPayload::untyped(OGG.to_vec()), "audio/ogg")
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(store.count_memos().await.unwrap(), 8);
    assert_eq!(store.ready().await.unwrap().migration.path, MigrationPath::FreshInit);
}

async fn shared_store() -> Arc<VoiceStore> {
    let db = Arc::new(Database::in_memory().unwrap());
    let blobs = Arc::new(SqliteBlobStore::new(db.clone()));
    let store = VoiceStore::with_parts(db, blobs, utc_clock(day(2024, 1, 3)), MemovoxConfig::default());
    store.ready().await.unwrap();
    Arc::new(store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_alongside_adds_loses_no_payloads() {
    let store = shared_store().await;

    let mut adds = Vec::new();
    for i in 0..24 {
        let store = store.clone();
        adds.push(tokio::spawn(async move {
            store
                .add_memo(format!("memo {}", i), Utc::now(), AudioPayload::untyped(WEBM.to_vec()), "audio/webm")
                .await
        }));
    }
    let mut sweeps = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        sweeps.push(tokio::spawn(async move { store.consistency_sweep().await }));
    }

    let mut ids = Vec::new();
    for handle in adds {
        ids.push(handle.await.unwrap().unwrap());
    }
    for handle in sweeps {
        handle.await.unwrap().unwrap();
    }

    for id in &ids {
        let audio = store.get_audio(id).await.unwrap();
        assert_eq!(audio.map(|a| a.bytes).as_deref(), Some(WEBM), "payload of {} lost", id);
    }
    assert_eq!(store.count_memos().await.unwrap(), 24);
    let report = store.consistency_sweep().await.unwrap();
    assert_eq!(report.orphans_removed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_during_updates_see_matching_bytes_and_tag() {
    let store = shared_store().await;
    let id = store
        .add_memo("t", Utc::now(), AudioPayload::untyped(WEBM.to_vec()), "audio/webm")
        .await
        .unwrap();

    let writer = {
        let store = store.clone();
        let id = id.clone();
        tokio::spawn(async move {
            for i in 0..40 {
                let bytes = if i % 2 == 0 { OGG } else { WEBM };
                store
                    .update_memo(&id, MemoPatch::audio(AudioPayload::untyped(bytes.to_vec())))
                    .await
                    .unwrap();
            }
        })
    };
    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let id = id.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..40 {
                let audio = store.get_audio(&id).await.unwrap().unwrap();
                assert_eq!(format::sniff(&audio.bytes), audio.format.as_deref());
            }
        }));
    }

    writer.await.unwrap();
    for handle in readers {
        handle.await.unwrap();
    }
    let audio = store.get_audio(&id).await.unwrap().unwrap();
    assert_eq!(audio.bytes, WEBM);
    assert_eq!(audio.format.as_deref(), Some("audio/webm"));
}
