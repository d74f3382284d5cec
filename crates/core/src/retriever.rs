use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{ScoredChunk, ServiceError};
use std::sync::Arc;
use tracing::debug;

pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.config.top_k
    }

    /// Up to `k` chunks scoring at least `min_similarity`, best first. An
    /// empty index yields no hits and never reaches the embedding API.
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<ScoredChunk>, ServiceError> {
        if self.index.chunk_count().await == 0 {
            debug!("vector index is empty");
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query_text).await?;
        let mut hits = self.index.search_vector(&query_vector, k.max(1)).await?;
        let retrieved = hits.len();
        hits.retain(|hit| hit.score >= self.config.min_similarity);

        debug!(
            retrieved,
            relevant = hits.len(),
            best = hits.first().map(|hit| hit.score),
            "retrieval finished"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::database::test_support::record;
    use crate::stores::{IndexDatabase, LocalVectorIndex};
    use crate::PdfChunk;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Default)]
    struct CountingEmbedder {
        inner: CharacterNgramEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.inner.embed_text(text))
        }
    }

    fn chunk(id: &str, text: &str) -> PdfChunk {
        PdfChunk {
            chunk_id: id.to_string(),
            document_id: "doc-doc.pdf".to_string(),
            filename: "doc.pdf".to_string(),
            page: 1,
            ordinal: 0,
            text: text.to_string(),
        }
    }

    async fn retriever_with(
        texts: &[(&str, &str)],
        min_similarity: f32,
    ) -> Result<(Retriever, Arc<CountingEmbedder>, tempfile::TempDir), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = Arc::new(CountingEmbedder::default());
        let db = Arc::new(IndexDatabase::open(dir.path()).await?);
        let (index, _) = LocalVectorIndex::open(db, embedder.model_id(), embedder.dimensions()).await?;

        let chunks = texts.iter().map(|(id, text)| chunk(id, text)).collect::<Vec<_>>();
        let embeddings = texts
            .iter()
            .map(|(_, text)| embedder.inner.embed_text(text))
            .collect::<Vec<_>>();
        if !chunks.is_empty() {
            index
                .index_document(&record("doc.pdf", chunks.len()), &chunks, &embeddings)
                .await?;
        }

        let retriever = Retriever::new(
            Arc::new(index),
            embedder.clone(),
            RetrievalConfig {
                top_k: 5,
                min_similarity,
            },
        );
        Ok((retriever, embedder, dir))
    }

    #[tokio::test]
    async fn empty_index_skips_embedding() -> Result<(), Box<dyn std::error::Error>> {
        let (retriever, embedder, _dir) = retriever_with(&[], 0.0).await?;

        let hits = retriever.search("anything at all", 5).await?;

        assert!(hits.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn hits_are_ordered_and_limited() -> Result<(), Box<dyn std::error::Error>> {
        let (retriever, _, _dir) = retriever_with(
            &[
                ("water", "The boiling point of water is 100°C at sea level."),
                ("pump", "Hydraulic pumps must be inspected every 500 operating hours."),
                ("seal", "Replace worn seals promptly."),
            ],
            0.0,
        )
        .await?;

        let hits = retriever.search("What is the boiling point of water?", 2).await?;

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_id, "water");
        assert!(hits[0].score >= hits[1].score);
        Ok(())
    }

    #[tokio::test]
    async fn weak_matches_are_filtered_out() -> Result<(), Box<dyn std::error::Error>> {
        let (retriever, _, _dir) = retriever_with(
            &[("water", "The boiling point of water is 100°C at sea level.")],
            0.55,
        )
        .await?;

        assert!(retriever.search("What is the capital of France?", 5).await?.is_empty());
        assert_eq!(retriever.search("What is the boiling point of water?", 5).await?.len(), 1);
        Ok(())
    }
}
