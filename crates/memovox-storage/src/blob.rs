//! Keyed storage for opaque audio payloads.
//!
//! Payloads are kept apart from memo metadata so listing memos never loads
//! audio. Each payload carries the format tag it was written with.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use memovox_core::error::Result;
use memovox_core::format;

use crate::db::{storage_err, Database};

/// A payload as read back from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Vec<u8>,
    pub format_tag: String,
}

impl StoredBlob {
    /// Stored tag, or the sniffed container format when the stored tag
    /// is empty or generic.
    pub fn effective_format(&self) -> Option<String> {
        if !format::is_generic(&self.format_tag) {
            return Some(format::normalize(&self.format_tag));
        }
        format::sniff(&self.data).map(str::to_string)
    }
}

/// Key-value store for audio payloads, keyed by memo id.
pub trait BlobStore: Send + Sync {
    /// Insert or overwrite the payload under `id`.
    fn put(&self, id: &str, data: &[u8], format_tag: &str) -> Result<()>;

    /// Read the payload under `id`. A generic or empty stored tag is
    /// replaced by the detected format when one can be sniffed.
    fn get(&self, id: &str) -> Result<Option<StoredBlob>>;

    /// Remove the payload under `id`. Returns whether one existed.
    fn delete(&self, id: &str) -> Result<bool>;

    fn list_ids(&self) -> Result<Vec<String>>;

    /// The database this store writes into, when it is one. Stores that
    /// share the memo database let writes commit payload and metadata in
    /// one transaction.
    fn database(&self) -> Option<&Arc<Database>> {
        None
    }
}

/// Blob store backed by the `audio_blobs` table.
pub struct SqliteBlobStore {
    db: Arc<Database>,
}

impl SqliteBlobStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl BlobStore for SqliteBlobStore {
    fn put(&self, id: &str, data: &[u8], format_tag: &str) -> Result<()> {
        self.db.with_conn(|conn| put_blob(conn, id, data, format_tag))
    }

    fn get(&self, id: &str) -> Result<Option<StoredBlob>> {
        let stored = self.db.with_conn(|conn| get_blob(conn, id))?;
        Ok(stored.map(|mut blob| {
            if format::is_generic(&blob.format_tag) {
                if let Some(sniffed) = format::sniff(&blob.data) {
                    debug!(id, format = sniffed, "Re-tagged untyped payload on read");
                    blob.format_tag = sniffed.to_string();
                }
            }
            blob
        }))
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.db.with_conn(|conn| delete_blob(conn, id))
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM audio_blobs ORDER BY id")
                .map_err(storage_err("Failed to list blobs"))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_err("Failed to list blobs"))?;
            rows.collect::<std::result::Result<_, _>>()
                .map_err(storage_err("Failed to list blobs"))
        })
    }

    fn database(&self) -> Option<&Arc<Database>> {
        Some(&self.db)
    }
}

pub(crate) fn put_blob(conn: &Connection, id: &str, data: &[u8], format_tag: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO audio_blobs (id, data, format_tag, updated_at)
         VALUES (?1, ?2, ?3, strftime('%s', 'now'))
         ON CONFLICT(id) DO UPDATE SET
             data = excluded.data,
             format_tag = excluded.format_tag,
             updated_at = excluded.updated_at",
        rusqlite::params![id, data, format::normalize(format_tag)],
    )
    .map_err(storage_err("Failed to write audio payload"))?;
    Ok(())
}

pub(crate) fn get_blob(conn: &Connection, id: &str) -> Result<Option<StoredBlob>> {
    conn.query_row(
        "SELECT data, format_tag FROM audio_blobs WHERE id = ?1",
        [id],
        |row| {
            Ok(StoredBlob {
                data: row.get(0)?,
                format_tag: row.get(1)?,
            })
        },
    )
    .optional()
    .map_err(storage_err("Failed to read audio payload"))
}

pub(crate) fn delete_blob(conn: &Connection, id: &str) -> Result<bool> {
    let removed = conn
        .execute("DELETE FROM audio_blobs WHERE id = ?1", [id])
        .map_err(storage_err("Failed to delete audio payload"))?;
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;

    const OGG: &[u8] = b"OggS\x00\x02rest-of-page";

    fn store() -> SqliteBlobStore {
        let db = Arc::new(Database::in_memory().unwrap());
        run_migrations(&db).unwrap();
        SqliteBlobStore::new(db)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let blobs = store();
        blobs.put("m1", b"\x1A\x45\xDF\xA3webm", "audio/webm;codecs=opus").unwrap();

        let blob = blobs.get("m1").unwrap().unwrap();
        assert_eq!(blob.data, b"\x1A\x45\xDF\xA3webm");
        assert_eq!(blob.format_tag, "audio/webm;codecs=opus");
    }

    #[test]
    fn test_put_overwrites() {
        let blobs = store();
        blobs.put("m1", b"first", "audio/wav").unwrap();
        blobs.put("m1", OGG, "audio/ogg").unwrap();

        let blob = blobs.get("m1").unwrap().unwrap();
        assert_eq!(blob.data, OGG);
        assert_eq!(blob.format_tag, "audio/ogg");
        assert_eq!(blobs.list_ids().unwrap(), vec!["m1"]);
    }

    #[test]
    fn test_generic_tag_is_sniffed_on_read() {
        let blobs = store();
        blobs.put("m1", OGG, "application/octet-stream").unwrap();
        assert_eq!(blobs.get("m1").unwrap().unwrap().format_tag, "audio/ogg");

        blobs.put("m2", b"????", "").unwrap();
        assert_eq!(blobs.get("m2").unwrap().unwrap().format_tag, "");
    }

    #[test]
    fn test_missing_blob_is_none() {
        let blobs = store();
        assert!(blobs.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let blobs = store();
        blobs.put("m1", OGG, "audio/ogg").unwrap();
        assert!(blobs.delete("m1").unwrap());
        assert!(!blobs.delete("m1").unwrap());
        assert!(blobs.get("m1").unwrap().is_none());
    }

    #[test]
    fn test_effective_format() {
        let tagged = StoredBlob {
            data: b"anything".to_vec(),
            format_tag: "Audio/MP4".to_string(),
        };
        assert_eq!(tagged.effective_format().as_deref(), Some("audio/mp4"));

        let untagged = StoredBlob {
            data: OGG.to_vec(),
            format_tag: String::new(),
        };
        assert_eq!(untagged.effective_format().as_deref(), Some("audio/ogg"));

        let opaque = StoredBlob {
            data: b"????".to_vec(),
            format_tag: "application/octet-stream".to_string(),
        };
        assert_eq!(opaque.effective_format(), None);
    }
}
