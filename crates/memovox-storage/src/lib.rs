//! memovox storage - SQLite persistence for memos, audio payloads, reports
//! and the streak cache.
//!
//! Provides a WAL-mode SQLite database whose schema is owned by the
//! migration manager (fresh init, additive upgrades, one-time legacy
//! import), a blob store for audio, repositories for memo and report rows,
//! and the async `VoiceStore` facade that ties them together.

pub mod blob;
pub mod db;
pub mod journal;
pub mod legacy;
pub mod migrations;
pub mod repository;
pub mod store;
pub mod streak;
pub mod sweep;

pub use blob::{BlobStore, SqliteBlobStore, StoredBlob};
pub use db::Database;
pub use journal::{
    capture_format, generate_report, record_memo, CapturedAudio, MemoSelection, ReportRequest,
    DEFAULT_REPORT_DAYS,
};
pub use legacy::{LegacyImportReport, SkippedRecord};
pub use migrations::{
    MigrationManager, MigrationOutcome, MigrationPath, MigrationState, SchemaShape,
    CURRENT_VERSION,
};
pub use repository::{truncate_to_millis, MemoRepository, ReportRepository};
pub use store::{clock_for, InitReport, VoiceStore};
pub use streak::StreakCache;
pub use sweep::SweepReport;
