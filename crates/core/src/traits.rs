use crate::{DocumentRecord, PdfChunk, ScoredChunk, ServiceError, StorageError};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Stores the chunks of one document in place of any it had before and
    /// records the document as processed, atomically.
    async fn index_document(
        &self,
        record: &DocumentRecord,
        chunks: &[PdfChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), StorageError>;

    /// Drops a document's chunks and its ledger entry. Returns how many chunks went.
    async fn remove_document(&self, document_id: &str) -> Result<usize, StorageError>;

    /// Nearest neighbours by cosine similarity, highest score first.
    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StorageError>;

    async fn chunk_count(&self) -> usize;

    async fn flush(&self) -> Result<(), StorageError>;
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ServiceError>;
}
