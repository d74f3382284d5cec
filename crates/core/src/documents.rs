//! The document folder and the ledger of processed documents.
//!
//! Documents are identified by their path relative to the folder. The ledger
//! rows live in the index database next to the chunks and are only written
//! together with them.

use crate::error::StorageError;
use crate::models::{DocumentRecord, DocumentStatus};
use crate::stores::database::{self, IndexDatabase};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Size and modification time of a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub modified_ms: i64,
}

impl FileStamp {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let modified_ms = metadata
            .modified()
            .map(|time| DateTime::<Utc>::from(time).timestamp_millis())
            .unwrap_or(0);
        Ok(Self {
            size: metadata.len(),
            modified_ms,
        })
    }

    /// The file looks unchanged since `record` was ingested.
    pub fn matches(&self, record: &DocumentRecord) -> bool {
        self.size == record.file_size && self.modified_ms == record.modified_ms
    }
}

pub struct DocumentStore {
    folder: PathBuf,
    db: Arc<IndexDatabase>,
}

impl DocumentStore {
    /// Opens the document folder, creating it if needed.
    pub async fn open(folder: impl Into<PathBuf>, db: Arc<IndexDatabase>) -> Result<Self, StorageError> {
        let folder = folder.into();
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|error| StorageError::io(&folder, error))?;

        debug!(folder = %folder.display(), database = %db.path().display(), "document store opened");
        Ok(Self { folder, db })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn discover(&self) -> Vec<PathBuf> {
        discover_pdf_files(&self.folder)
    }

    /// Name of a document relative to the store folder.
    pub fn display_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.folder)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    pub async fn record(&self, filename: &str) -> Result<Option<DocumentRecord>, StorageError> {
        let filename = filename.to_string();
        self.db.call(move |conn| database::document(conn, &filename)).await
    }

    pub async fn records(&self) -> Result<Vec<DocumentRecord>, StorageError> {
        self.db.call(|conn| database::documents(conn)).await
    }

    pub async fn processed_count(&self) -> Result<usize, StorageError> {
        self.db.call(|conn| database::document_count(conn)).await
    }

    /// Records a new size and modification time for a document whose content
    /// did not change.
    pub async fn refresh_stamp(&self, filename: &str, stamp: FileStamp) -> Result<(), StorageError> {
        let filename = filename.to_string();
        self.db
            .call(move |conn| database::update_file_stamp(conn, &filename, stamp.size, stamp.modified_ms))
            .await
    }

    /// Every PDF in the folder with its processed flag. A file counts as
    /// processed when the ledger has it with the same size and modification
    /// time, so listing never reads file contents.
    pub async fn list(&self) -> Result<Vec<DocumentStatus>, StorageError> {
        let folder = self.folder.clone();
        let stamps = tokio::task::spawn_blocking(move || {
            discover_pdf_files(&folder)
                .into_iter()
                .map(|path| {
                    let stamp = match FileStamp::of(&path) {
                        Ok(stamp) => Some(stamp),
                        Err(error) => {
                            warn!(path = %path.display(), error = %error, "unable to stat pdf");
                            None
                        }
                    };
                    (path, stamp)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|error| StorageError::Task(error.to_string()))?;

        let records = self
            .records()
            .await?
            .into_iter()
            .map(|record| (record.filename.clone(), record))
            .collect::<HashMap<_, _>>();

        Ok(stamps
            .into_iter()
            .map(|(path, stamp)| {
                let filename = self.display_name(&path);
                let record = records
                    .get(&filename)
                    .filter(|record| stamp.is_some_and(|stamp| stamp.matches(record)));
                DocumentStatus {
                    processed: record.is_some(),
                    ingested_at: record.map(|record| record.ingested_at),
                    chunk_count: record.map(|record| record.chunk_count).unwrap_or(0),
                    filename,
                }
            })
            .collect())
    }
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Stable id of the document stored under `filename`.
pub fn document_id_for(filename: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    format!("{:x}", hasher.finalize())
}
