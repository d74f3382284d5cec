use crate::documents::{digest_file, document_id_for, DocumentStore, FileStamp};
use crate::embeddings::Embedder;
use crate::extractor::PdfExtractor;
use crate::traits::VectorIndex;
use crate::{build_chunks, DocumentRecord, IngestError, IngestionOptions, PdfChunk, ServiceError};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Documents are embedded in batches of this many chunks.
const EMBEDDING_BATCH: usize = 64;

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub indexed: Vec<DocumentRecord>,
    pub already_processed: Vec<PathBuf>,
    pub skipped_files: Vec<SkippedPdf>,
    /// Documents whose content changed; their old chunks were dropped.
    pub replaced: Vec<String>,
    /// Ledger entries whose file is gone from the folder.
    pub removed: Vec<String>,
    pub chunks_written: usize,
}

impl IngestionReport {
    /// Number of documents indexed by this run.
    pub fn indexed_count(&self) -> usize {
        self.indexed.len()
    }
}

/// Moves unprocessed PDFs from the document store into the vector index.
pub struct Indexer {
    store: Arc<DocumentStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn PdfExtractor>,
    options: IngestionOptions,
}

impl Indexer {
    pub fn new(
        store: Arc<DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn PdfExtractor>,
        options: IngestionOptions,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            extractor,
            options,
        }
    }

    /// Brings the index in line with the store folder. New files are indexed,
    /// files whose content changed are re-indexed in place of their old chunks,
    /// and documents whose file is gone are dropped. A file that fails is
    /// skipped and left unmarked so the next run retries it.
    pub async fn ingest(&self) -> Result<IngestionReport, IngestError> {
        let files = self.store.discover();
        let mut report = IngestionReport::default();
        let mut present = HashSet::with_capacity(files.len());

        info!(
            folder = %self.store.folder().display(),
            discovered = files.len(),
            "scanning for new pdfs"
        );

        for path in files {
            let filename = self.store.display_name(&path);
            present.insert(filename.clone());

            match self.sync_file(&path, &filename, &mut report).await {
                Ok(()) => {}
                Err(IngestError::Storage(error)) => return Err(IngestError::Storage(error)),
                Err(error) => {
                    warn!(path = %path.display(), reason = %error, "skipped pdf");
                    report.skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        for record in self.store.records().await? {
            if present.contains(&record.filename) {
                continue;
            }
            let chunks = self.index.remove_document(&record.document_id).await?;
            info!(document = %record.filename, chunks, "pdf no longer in folder, dropped from index");
            report.removed.push(record.filename);
        }

        info!(
            indexed = report.indexed_count(),
            already_processed = report.already_processed.len(),
            replaced = report.replaced.len(),
            removed = report.removed.len(),
            skipped = report.skipped_files.len(),
            chunks = report.chunks_written,
            "ingestion finished"
        );
        Ok(report)
    }

    async fn sync_file(
        &self,
        path: &Path,
        filename: &str,
        report: &mut IngestionReport,
    ) -> Result<(), IngestError> {
        let stamp = stat(path).await?;
        let previous = self.store.record(filename).await?;

        if let Some(previous) = &previous {
            if stamp.matches(previous) {
                report.already_processed.push(path.to_path_buf());
                return Ok(());
            }
        }

        let checksum = digest(path).await?;
        if let Some(previous) = previous {
            if previous.checksum == checksum {
                debug!(document = %filename, "pdf touched but unchanged");
                self.store.refresh_stamp(filename, stamp).await?;
                report.already_processed.push(path.to_path_buf());
                return Ok(());
            }

            let chunks = self.index.remove_document(&previous.document_id).await?;
            info!(document = %filename, chunks, "pdf content changed, replacing its chunks");
            report.replaced.push(filename.to_string());
        }

        let record = self.ingest_document(path, filename, checksum, stamp).await?;
        info!(
            document = %record.filename,
            chunk_count = record.chunk_count,
            "indexed pdf"
        );
        report.chunks_written += record.chunk_count;
        report.indexed.push(record);
        Ok(())
    }

    async fn ingest_document(
        &self,
        path: &Path,
        filename: &str,
        checksum: String,
        stamp: FileStamp,
    ) -> Result<DocumentRecord, IngestError> {
        let mut record = DocumentRecord {
            document_id: document_id_for(filename),
            filename: filename.to_string(),
            source_path: path.to_string_lossy().to_string(),
            checksum,
            file_size: stamp.size,
            modified_ms: stamp.modified_ms,
            chunk_count: 0,
            ingested_at: Utc::now(),
        };

        let chunks = self.extract_chunks(path, &record).await?;
        if chunks.is_empty() {
            return Err(IngestError::EmptyDocument(path.display().to_string()));
        }

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBEDDING_BATCH) {
            let texts = batch.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != texts.len() {
                return Err(IngestError::Embedding(ServiceError::BadResponse {
                    service: self.embedder.model_id().to_string(),
                    details: format!("{} embeddings for {} texts", vectors.len(), texts.len()),
                }));
            }
            embeddings.extend(vectors);
        }

        record.chunk_count = chunks.len();
        record.ingested_at = Utc::now();
        self.index.index_document(&record, &chunks, &embeddings).await?;
        Ok(record)
    }

    async fn extract_chunks(&self, path: &Path, record: &DocumentRecord) -> Result<Vec<PdfChunk>, IngestError> {
        let extractor = Arc::clone(&self.extractor);
        let owned_path = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || extractor.extract_pages(&owned_path))
            .await
            .map_err(|error| IngestError::PdfParse(format!("extraction task failed: {error}")))??;

        let mut chunks = Vec::new();
        let mut cursor = 0u64;
        for page in pages {
            let (page_chunks, next_cursor) =
                build_chunks(record, page.number, &page.text, &self.options, cursor)?;
            cursor = next_cursor;
            chunks.extend(page_chunks);
        }
        Ok(chunks)
    }
}

async fn stat(path: &Path) -> Result<FileStamp, IngestError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || FileStamp::of(&owned))
        .await
        .map_err(|error| IngestError::PdfParse(format!("stat task failed: {error}")))?
        .map_err(IngestError::Io)
}

async fn digest(path: &Path) -> Result<String, IngestError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || digest_file(&owned))
        .await
        .map_err(|error| IngestError::PdfParse(format!("digest task failed: {error}")))?
        .map_err(IngestError::Io)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::extractor::{PageText, PdfExtractor};
    use crate::IngestError;
    use std::path::Path;

    /// Treats every "PDF" as UTF-8 text with pages separated by form feeds.
    /// Files starting with `%broken` fail like a corrupt PDF.
    #[derive(Debug, Default)]
    pub struct PlainTextExtractor;

    impl PdfExtractor for PlainTextExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
            let content = std::fs::read_to_string(path)?;
            if content.starts_with("%broken") {
                return Err(IngestError::PdfParse(format!("corrupt pdf: {}", path.display())));
            }
            Ok(content
                .split('\u{000c}')
                .enumerate()
                .filter(|(_, text)| !text.trim().is_empty())
                .map(|(index, text)| PageText {
                    number: index as u32 + 1,
                    text: text.to_string(),
                })
                .collect())
        }
    }
}
