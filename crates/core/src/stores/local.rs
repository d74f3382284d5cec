use super::database::{self, IndexDatabase, StoredChunk};
use crate::embeddings::cosine_similarity;
use crate::traits::VectorIndex;
use crate::{DocumentRecord, PdfChunk, ScoredChunk, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const FORMAT_VERSION: u32 = 2;

const META_FORMAT_VERSION: &str = "format_version";
const META_EMBEDDING_MODEL: &str = "embedding_model";
const META_DIMENSIONS: &str = "dimensions";

/// Identifies the embedding space an index was built in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub format_version: u32,
    pub embedding_model: String,
    pub dimensions: usize,
}

impl IndexHeader {
    fn from_meta(meta: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            format_version: meta.get(META_FORMAT_VERSION)?.parse().ok()?,
            embedding_model: meta.get(META_EMBEDDING_MODEL)?.clone(),
            dimensions: meta.get(META_DIMENSIONS)?.parse().ok()?,
        })
    }

    fn to_meta(&self) -> Vec<(&'static str, String)> {
        vec![
            (META_FORMAT_VERSION, self.format_version.to_string()),
            (META_EMBEDDING_MODEL, self.embedding_model.clone()),
            (META_DIMENSIONS, self.dimensions.to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexOpenOutcome {
    Created,
    Loaded { chunks: usize },
    /// The stored index was built by another embedding model, or was unreadable,
    /// and has been emptied together with the ledger. Every document must be
    /// embedded again.
    Reset { previous: Option<IndexHeader> },
}

/// Brute-force cosine index. Chunks live in the index database and are
/// mirrored in memory for search.
pub struct LocalVectorIndex {
    db: Arc<IndexDatabase>,
    header: IndexHeader,
    chunks: RwLock<HashMap<String, StoredChunk>>,
}

impl LocalVectorIndex {
    pub async fn open(
        db: Arc<IndexDatabase>,
        embedding_model: &str,
        dimensions: usize,
    ) -> Result<(Self, IndexOpenOutcome), StorageError> {
        let header = IndexHeader {
            format_version: FORMAT_VERSION,
            embedding_model: embedding_model.to_string(),
            dimensions,
        };
        let recovered = db.was_recovered();

        let wanted = header.clone();
        let (outcome, stored) = db
            .call(move |conn| {
                let meta = database::read_meta(conn)?;
                let previous = IndexHeader::from_meta(&meta);

                match previous {
                    Some(previous) if previous == wanted => match database::load_chunks(conn) {
                        Ok(stored) => Ok((IndexOpenOutcome::Loaded { chunks: stored.len() }, stored)),
                        Err(StorageError::CorruptRow(details)) => {
                            warn!(details = %details, "vector index holds unreadable rows, rebuilding");
                            database::reset(conn, &wanted.to_meta())?;
                            Ok((
                                IndexOpenOutcome::Reset {
                                    previous: Some(previous),
                                },
                                Vec::new(),
                            ))
                        }
                        Err(error) => Err(error),
                    },
                    Some(previous) => {
                        warn!(
                            stored_model = %previous.embedding_model,
                            stored_dimensions = previous.dimensions,
                            configured_model = %wanted.embedding_model,
                            configured_dimensions = wanted.dimensions,
                            "embedding model changed, discarding vector index and ledger"
                        );
                        database::reset(conn, &wanted.to_meta())?;
                        Ok((
                            IndexOpenOutcome::Reset {
                                previous: Some(previous),
                            },
                            Vec::new(),
                        ))
                    }
                    None => {
                        database::reset(conn, &wanted.to_meta())?;
                        let outcome = if recovered || !meta.is_empty() {
                            IndexOpenOutcome::Reset { previous: None }
                        } else {
                            IndexOpenOutcome::Created
                        };
                        Ok((outcome, Vec::new()))
                    }
                }
            })
            .await?;

        let chunks = stored
            .into_iter()
            .map(|entry| (entry.chunk.chunk_id.clone(), entry))
            .collect::<HashMap<_, _>>();

        info!(path = %db.path().display(), outcome = ?outcome, "vector index opened");
        Ok((
            Self {
                db,
                header,
                chunks: RwLock::new(chunks),
            },
            outcome,
        ))
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }
}

#[async_trait]
impl VectorIndex for LocalVectorIndex {
    async fn index_document(
        &self,
        record: &DocumentRecord,
        chunks: &[PdfChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), StorageError> {
        if chunks.len() != embeddings.len() {
            return Err(StorageError::CountMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }

        let expected = self.header.dimensions;
        if let Some(bad) = embeddings.iter().find(|embedding| embedding.len() != expected) {
            return Err(StorageError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let document_id = record.document_id.clone();
        let owned_record = record.clone();
        let stored = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| StoredChunk {
                chunk: chunk.clone(),
                embedding: embedding.clone(),
            })
            .collect::<Vec<_>>();

        let stored = self
            .db
            .call(move |conn| {
                database::replace_document(conn, &owned_record, &stored)?;
                Ok(stored)
            })
            .await?;

        let mut cache = self.chunks.write().await;
        cache.retain(|_, entry| entry.chunk.document_id != document_id);
        for entry in stored {
            cache.insert(entry.chunk.chunk_id.clone(), entry);
        }
        Ok(())
    }

    async fn remove_document(&self, document_id: &str) -> Result<usize, StorageError> {
        let owned_id = document_id.to_string();
        let removed = self
            .db
            .call(move |conn| database::remove_document(conn, &owned_id))
            .await?;

        self.chunks
            .write()
            .await
            .retain(|_, entry| entry.chunk.document_id != document_id);
        Ok(removed)
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, StorageError> {
        if query_vector.len() != self.header.dimensions {
            return Err(StorageError::DimensionMismatch {
                expected: self.header.dimensions,
                actual: query_vector.len(),
            });
        }

        let cache = self.chunks.read().await;
        let mut scored = cache
            .values()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query_vector, &entry.embedding),
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.chunk.chunk_id.cmp(&right.chunk.chunk_id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn chunk_count(&self) -> usize {
        self.chunks.read().await.len()
    }

    async fn flush(&self) -> Result<(), StorageError> {
        self.db.call(|conn| database::checkpoint(conn)).await
    }
}
