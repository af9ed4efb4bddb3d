//! SQLite database holding the blob index and labels.

use std::{sync::Arc, time::Duration};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use content::{ContentStore, Digest, Info, Labels};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::Instrument;

use crate::{MetadataError, MetadataStore};

/// Permissions the database file is created with.
pub const DB_FILE_MODE: u32 = 0o655;

/// Handle to the metadata database.
///
/// Cloning the handle shares the underlying connection. The database outlives
/// any [`MetadataStore`] built from it; callers own its lifecycle, e.g. to run
/// [`MetadataDb::compact`] at shutdown.
#[derive(Debug, Clone)]
pub struct MetadataDb {
    path: Option<Utf8PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl MetadataDb {
    /// Open or create the database file at `path`.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, MetadataError> {
        let path = path.into();
        create_db_file(&path)?;

        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let db = Self {
            path: Some(path),
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;

        tracing::debug!(path = ?db.path, "opened metadata database");
        Ok(db)
    }

    /// Open a database which lives only in memory.
    pub fn open_in_memory() -> Result<Self, MetadataError> {
        let db = Self {
            path: None,
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Path of the database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    /// Wrap `inner` so every read and write goes through this index.
    pub fn content_store<S>(&self, inner: S) -> MetadataStore
    where
        S: ContentStore + 'static,
    {
        MetadataStore::new(self.clone(), Arc::new(inner))
    }

    /// Number of indexed blobs.
    pub fn blob_count(&self) -> Result<u64, MetadataError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM blobs", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Checkpoint the write-ahead log and reclaim free pages.
    pub fn compact(&self) -> Result<(), MetadataError> {
        let conn = self.conn.lock();
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        conn.execute_batch("VACUUM")?;
        tracing::debug!(path = ?self.path, "compacted metadata database");
        Ok(())
    }

    fn init_schema(&self) -> Result<(), MetadataError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                digest TEXT PRIMARY KEY,
                size INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS labels (
                digest TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (digest, key)
            );
            "#,
        )?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn run<F, T>(&self, f: F) -> Result<T, MetadataError>
    where
        F: FnOnce(&mut Connection) -> Result<T, MetadataError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .in_current_span()
        .await?
    }
}

#[cfg(unix)]
fn create_db_file(path: &Utf8Path) -> Result<(), MetadataError> {
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(DB_FILE_MODE)
        .open(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_db_file(path: &Utf8Path) -> Result<(), MetadataError> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(())
}

fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn labels_for(conn: &Connection, digest: &str) -> Result<Labels, MetadataError> {
    let mut stmt = conn.prepare("SELECT key, value FROM labels WHERE digest = ?1")?;
    let labels = stmt
        .query_map(params![digest], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Labels, _>>()?;
    Ok(labels)
}

fn info_from_row(
    conn: &Connection,
    digest: String,
    size: i64,
    created_at: i64,
    updated_at: i64,
) -> Result<Info, MetadataError> {
    let labels = labels_for(conn, &digest)?;
    let digest = digest
        .parse::<Digest>()
        .map_err(|err| MetadataError::InvalidRecord(err.to_string()))?;
    Ok(Info {
        digest,
        size: u64::try_from(size).map_err(|_| MetadataError::InvalidRecord(format!("size {size}")))?,
        created_at: timestamp(created_at),
        updated_at: timestamp(updated_at),
        labels,
    })
}

pub(crate) fn get(conn: &Connection, digest: &Digest) -> Result<Option<Info>, MetadataError> {
    let row: Option<(String, i64, i64, i64)> = conn
        .query_row(
            "SELECT digest, size, created_at, updated_at FROM blobs WHERE digest = ?1",
            params![digest.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    row.map(|(digest, size, created, updated)| info_from_row(conn, digest, size, created, updated))
        .transpose()
}

/// Record a committed blob, keeping the original creation time if it was
/// already indexed.
pub(crate) fn insert(
    conn: &Connection,
    digest: &Digest,
    size: u64,
    now: DateTime<Utc>,
) -> Result<Info, MetadataError> {
    let size = i64::try_from(size).map_err(|_| MetadataError::InvalidRecord(format!("size {size}")))?;
    conn.execute(
        r#"
        INSERT INTO blobs (digest, size, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?3)
        ON CONFLICT(digest) DO UPDATE SET
            size = excluded.size,
            updated_at = excluded.updated_at
        "#,
        params![digest.as_str(), size, now.timestamp_millis()],
    )?;

    get(conn, digest)?
        .ok_or_else(|| MetadataError::InvalidRecord(format!("{digest} vanished after insert")))
}

pub(crate) fn update_labels(
    conn: &mut Connection,
    digest: &Digest,
    update: Labels,
    now: DateTime<Utc>,
) -> Result<Option<Info>, MetadataError> {
    let tx = conn.transaction()?;
    let touched = tx.execute(
        "UPDATE blobs SET updated_at = ?1 WHERE digest = ?2",
        params![now.timestamp_millis(), digest.as_str()],
    )?;
    if touched == 0 {
        return Ok(None);
    }

    for (key, value) in update {
        if value.is_empty() {
            tx.execute(
                "DELETE FROM labels WHERE digest = ?1 AND key = ?2",
                params![digest.as_str(), key],
            )?;
        } else {
            tx.execute(
                "INSERT OR REPLACE INTO labels (digest, key, value) VALUES (?1, ?2, ?3)",
                params![digest.as_str(), key, value],
            )?;
        }
    }
    tx.commit()?;

    get(conn, digest)
}

pub(crate) fn remove(conn: &mut Connection, digest: &Digest) -> Result<bool, MetadataError> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM labels WHERE digest = ?1",
        params![digest.as_str()],
    )?;
    let removed = tx.execute(
        "DELETE FROM blobs WHERE digest = ?1",
        params![digest.as_str()],
    )?;
    tx.commit()?;
    Ok(removed > 0)
}

pub(crate) fn list(conn: &Connection) -> Result<Vec<Info>, MetadataError> {
    let mut stmt =
        conn.prepare("SELECT digest, size, created_at, updated_at FROM blobs ORDER BY created_at")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<Vec<(String, i64, i64, i64)>, _>>()?;

    rows.into_iter()
        .map(|(digest, size, created, updated)| info_from_row(conn, digest, size, created, updated))
        .collect()
}
