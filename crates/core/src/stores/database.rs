//! SQLite database behind the vector index and the processed-document ledger.
//!
//! A document's chunks and its ledger row are written in one transaction, so
//! a document is in the ledger exactly when all of its chunks are stored.

use crate::error::StorageError;
use crate::models::{DocumentRecord, PdfChunk};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DATABASE_FILE: &str = "index.sqlite3";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS index_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS documents (
        filename TEXT PRIMARY KEY,
        document_id TEXT NOT NULL UNIQUE,
        source_path TEXT NOT NULL,
        checksum TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        modified_ms INTEGER NOT NULL,
        chunk_count INTEGER NOT NULL,
        ingested_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS chunks (
        chunk_id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        filename TEXT NOT NULL,
        page INTEGER NOT NULL,
        ordinal INTEGER NOT NULL,
        text TEXT NOT NULL,
        embedding BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id);
"#;

const DOCUMENT_COLUMNS: &str =
    "filename, document_id, source_path, checksum, file_size, modified_ms, chunk_count, ingested_at";

/// A chunk together with its embedding, as stored in the `chunks` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub chunk: PdfChunk,
    pub embedding: Vec<f32>,
}

pub struct IndexDatabase {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    recovered: bool,
}

impl IndexDatabase {
    /// Opens or creates `index.sqlite3` inside `dir`. A file SQLite cannot read
    /// is moved aside to `index.sqlite3.corrupt` and replaced by an empty
    /// database.
    pub async fn open(dir: &Path) -> Result<Self, StorageError> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::open_blocking(&dir))
            .await
            .map_err(|error| StorageError::Task(error.to_string()))?
    }

    fn open_blocking(dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir).map_err(|error| StorageError::io(dir, error))?;
        let path = dir.join(DATABASE_FILE);

        let (conn, recovered) = match connect(&path) {
            Ok(conn) => (conn, false),
            Err(error) if is_corruption(&error) => {
                let quarantined = quarantine(&path)?;
                warn!(
                    path = %path.display(),
                    quarantined = %quarantined.display(),
                    error = %error,
                    "index database unreadable, starting a fresh one"
                );
                (connect(&path)?, true)
            }
            Err(error) => return Err(error.into()),
        };

        debug!(path = %path.display(), recovered, "index database opened");
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            recovered,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the file on disk was unreadable and has been replaced.
    pub fn was_recovered(&self) -> bool {
        self.recovered
    }

    /// Runs `work` against the connection on the blocking thread pool.
    pub async fn call<T, F>(&self, work: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            work(&mut guard)
        })
        .await
        .map_err(|error| StorageError::Task(error.to_string()))?
    }
}

fn connect(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))?;
    conn.execute_batch(
        "PRAGMA synchronous=NORMAL;
         PRAGMA temp_store=MEMORY;",
    )?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn is_corruption(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn quarantine(path: &Path) -> Result<PathBuf, StorageError> {
    let target = sibling(path, ".corrupt");
    std::fs::rename(path, &target).map_err(|error| StorageError::io(path, error))?;

    for suffix in ["-wal", "-shm"] {
        let sidecar = sibling(path, suffix);
        match std::fs::remove_file(&sidecar) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(StorageError::io(&sidecar, error)),
        }
    }
    Ok(target)
}

pub(crate) fn read_meta(conn: &Connection) -> Result<HashMap<String, String>, StorageError> {
    let mut stmt = conn.prepare("SELECT key, value FROM index_meta")?;
    let meta = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(meta)
}

/// Empties the chunks and the ledger and stamps the database with `meta`.
pub(crate) fn reset(conn: &mut Connection, meta: &[(&str, String)]) -> Result<(), StorageError> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM chunks", [])?;
    tx.execute("DELETE FROM documents", [])?;
    tx.execute("DELETE FROM index_meta", [])?;
    {
        let mut stmt = tx.prepare("INSERT INTO index_meta (key, value) VALUES (?1, ?2)")?;
        for (key, value) in meta {
            stmt.execute(params![key, value])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub(crate) fn load_chunks(conn: &Connection) -> Result<Vec<StoredChunk>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT chunk_id, document_id, filename, page, ordinal, text, embedding FROM chunks",
    )?;
    let rows = stmt.query_map([], |row| {
        let chunk = PdfChunk {
            chunk_id: row.get(0)?,
            document_id: row.get(1)?,
            filename: row.get(2)?,
            page: row.get(3)?,
            ordinal: row.get::<_, i64>(4)? as u64,
            text: row.get(5)?,
        };
        Ok((chunk, row.get::<_, Vec<u8>>(6)?))
    })?;

    let mut chunks = Vec::new();
    for row in rows {
        let (chunk, bytes) = row?;
        let embedding = decode_vector(&bytes).ok_or_else(|| {
            StorageError::CorruptRow(format!("embedding of chunk {} has {} bytes", chunk.chunk_id, bytes.len()))
        })?;
        chunks.push(StoredChunk { chunk, embedding });
    }
    Ok(chunks)
}

/// Replaces every chunk of `record.document_id` with `chunks` and upserts the
/// ledger row, all in one transaction.
pub(crate) fn replace_document(
    conn: &mut Connection,
    record: &DocumentRecord,
    chunks: &[StoredChunk],
) -> Result<(), StorageError> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM chunks WHERE document_id = ?1",
        params![record.document_id],
    )?;
    tx.execute(
        "DELETE FROM documents WHERE filename = ?1 OR document_id = ?2",
        params![record.filename, record.document_id],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO chunks (chunk_id, document_id, filename, page, ordinal, text, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for stored in chunks {
            let chunk = &stored.chunk;
            stmt.execute(params![
                chunk.chunk_id,
                chunk.document_id,
                chunk.filename,
                chunk.page,
                chunk.ordinal as i64,
                chunk.text,
                encode_vector(&stored.embedding),
            ])?;
        }
    }

    tx.execute(
        &format!("INSERT INTO documents ({DOCUMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            record.filename,
            record.document_id,
            record.source_path,
            record.checksum,
            record.file_size as i64,
            record.modified_ms,
            record.chunk_count as i64,
            record.ingested_at,
        ],
    )?;
    tx.commit()?;
    Ok(())
}

/// Deletes a document's chunks and its ledger row. Returns the number of
/// chunks removed.
pub(crate) fn remove_document(conn: &mut Connection, document_id: &str) -> Result<usize, StorageError> {
    let tx = conn.transaction()?;
    let removed = tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![document_id])?;
    tx.execute("DELETE FROM documents WHERE document_id = ?1", params![document_id])?;
    tx.commit()?;
    Ok(removed)
}

pub(crate) fn document(conn: &Connection, filename: &str) -> Result<Option<DocumentRecord>, StorageError> {
    let record = conn
        .query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE filename = ?1"),
            params![filename],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

pub(crate) fn documents(conn: &Connection) -> Result<Vec<DocumentRecord>, StorageError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY filename"
    ))?;
    let records = stmt
        .query_map([], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub(crate) fn document_count(conn: &Connection) -> Result<usize, StorageError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
    Ok(count as usize)
}

pub(crate) fn update_file_stamp(
    conn: &Connection,
    filename: &str,
    file_size: u64,
    modified_ms: i64,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE documents SET file_size = ?2, modified_ms = ?3 WHERE filename = ?1",
        params![filename, file_size as i64, modified_ms],
    )?;
    Ok(())
}

/// Folds the write-ahead log back into the main database file.
pub(crate) fn checkpoint(conn: &Connection) -> Result<(), StorageError> {
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
    Ok(())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        filename: row.get(0)?,
        document_id: row.get(1)?,
        source_path: row.get(2)?,
        checksum: row.get(3)?,
        file_size: row.get::<_, i64>(4)? as u64,
        modified_ms: row.get(5)?,
        chunk_count: row.get::<_, i64>(6)? as usize,
        ingested_at: row.get(7)?,
    })
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect(),
    )
}
