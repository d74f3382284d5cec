use crate::config::ServiceConfig;
use crate::documents::DocumentStore;
use crate::embeddings::Embedder;
use crate::extractor::PdfExtractor;
use crate::ingest::{Indexer, IngestionReport};
use crate::retriever::Retriever;
use crate::stores::{IndexDatabase, IndexOpenOutcome, LocalVectorIndex};
use crate::traits::{CompletionProvider, VectorIndex};
use crate::composer::AnswerComposer;
use crate::{Answer, DocumentStatus, IngestError, Query, ServiceError, StorageError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ServiceStats {
    pub documents: usize,
    pub chunks: usize,
}

/// Everything a request needs, built once at startup and shared read-only.
pub struct ChatService {
    store: Arc<DocumentStore>,
    index: Arc<LocalVectorIndex>,
    indexer: Indexer,
    retriever: Retriever,
    composer: AnswerComposer,
}

impl ChatService {
    /// Opens the index database, the document store and the vector index.
    /// When the stored index belongs to another embedding model or was
    /// unreadable, the index and ledger start empty so every document gets
    /// embedded again.
    pub async fn open(
        config: &ServiceConfig,
        embedder: Arc<dyn Embedder>,
        completion: Arc<dyn CompletionProvider>,
        extractor: Arc<dyn PdfExtractor>,
    ) -> Result<Self, StorageError> {
        let db = Arc::new(IndexDatabase::open(&config.index_dir).await?);
        let store = Arc::new(DocumentStore::open(&config.pdf_folder, Arc::clone(&db)).await?);
        let (index, outcome) =
            LocalVectorIndex::open(db, embedder.model_id(), embedder.dimensions()).await?;

        if let IndexOpenOutcome::Reset { previous } = &outcome {
            warn!(
                previous_model = previous.as_ref().map(|header| header.embedding_model.as_str()),
                "vector index was reset, every document will be embedded again"
            );
        }

        let index = Arc::new(index);
        let shared_index: Arc<dyn VectorIndex> = index.clone();
        let indexer = Indexer::new(
            Arc::clone(&store),
            Arc::clone(&shared_index),
            Arc::clone(&embedder),
            extractor,
            config.ingestion.clone(),
        );
        let retriever = Retriever::new(shared_index, embedder, config.retrieval);

        info!(
            folder = %config.pdf_folder.display(),
            index_dir = %config.index_dir.display(),
            completion_model = completion.model(),
            "chat service ready"
        );

        Ok(Self {
            store,
            index,
            indexer,
            retriever,
            composer: AnswerComposer::new(completion),
        })
    }

    pub async fn ingest(&self) -> Result<IngestionReport, IngestError> {
        self.indexer.ingest().await
    }

    pub async fn chat(&self, query: &Query) -> Result<Answer, ServiceError> {
        query.validate()?;
        let top_k = query.top_k.unwrap_or_else(|| self.retriever.default_top_k());
        let retrieved = self.retriever.search(&query.text, top_k).await?;
        self.composer.answer(query, &retrieved).await
    }

    pub async fn documents(&self) -> Result<Vec<DocumentStatus>, StorageError> {
        self.store.list().await
    }

    pub async fn stats(&self) -> Result<ServiceStats, StorageError> {
        Ok(ServiceStats {
            documents: self.store.processed_count().await?,
            chunks: self.index.chunk_count().await,
        })
    }

    pub async fn shutdown(&self) -> Result<(), StorageError> {
        self.index.flush().await?;
        info!("index database checkpointed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::test_support::ScriptedCompletion;
    use crate::composer::REFUSAL;
    use crate::config::RetrievalConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::ingest::test_support::PlainTextExtractor;
    use crate::IngestionOptions;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const WATER: &str = "The boiling point of water is 100°C at sea level.";

    fn config(dir: &TempDir) -> ServiceConfig {
        ServiceConfig {
            pdf_folder: dir.path().join("pdf"),
            index_dir: dir.path().join("index"),
            ingestion: IngestionOptions::default(),
            retrieval: RetrievalConfig {
                top_k: 5,
                min_similarity: 0.55,
            },
        }
    }

    async fn open_service(
        dir: &TempDir,
        embedder: CharacterNgramEmbedder,
        completion: Arc<ScriptedCompletion>,
    ) -> Result<ChatService, StorageError> {
        ChatService::open(
            &config(dir),
            Arc::new(embedder),
            completion,
            Arc::new(PlainTextExtractor),
        )
        .await
    }

    #[tokio::test]
    async fn in_scope_question_is_grounded_and_out_of_scope_is_refused() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("pdf"))?;
        fs::write(dir.path().join("pdf/water.pdf"), WATER)?;
        let completion = Arc::new(ScriptedCompletion::replying(
            "The boiling point of water is 100°C at sea level [1].",
        ));

        let service = open_service(&dir, CharacterNgramEmbedder::default(), completion.clone()).await?;
        assert_eq!(service.ingest().await?.indexed_count(), 1);

        let grounded = service.chat(&Query::new("What is the boiling point of water?")).await?;
        assert!(grounded.grounded);
        assert!(grounded.answer.contains("100°C"));
        assert_eq!(grounded.sources.len(), 1);
        assert_eq!(completion.call_count(), 1);

        let refused = service.chat(&Query::new("What is the capital of France?")).await?;
        assert!(!refused.grounded);
        assert_eq!(refused.answer, REFUSAL);
        assert_eq!(completion.call_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn verbatim_chunk_text_is_cited() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("pdf"))?;
        fs::write(
            dir.path().join("pdf/manual.pdf"),
            format!("{WATER}\u{000c}Hydraulic pumps must be inspected every 500 operating hours."),
        )?;
        let completion = Arc::new(ScriptedCompletion::replying("Every 500 operating hours [1]."));
        let service = open_service(&dir, CharacterNgramEmbedder::default(), completion).await?;
        service.ingest().await?;

        let question = "Hydraulic pumps must be inspected every 500 operating hours.";
        let answer = service
            .chat(&Query {
                text: question.to_string(),
                session_id: None,
                top_k: Some(1),
            })
            .await?;

        assert!(answer.grounded);
        let indexed = service.index.search_vector(&CharacterNgramEmbedder::default().embed_text(question), 1).await?;
        assert_eq!(answer.sources, vec![indexed[0].chunk.chunk_id.clone()]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_folder_refuses_every_question() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let completion = Arc::new(ScriptedCompletion::replying("unused"));
        let service = open_service(&dir, CharacterNgramEmbedder::default(), completion.clone()).await?;
        service.ingest().await?;

        let answer = service.chat(&Query::new("What is in the documents?")).await?;

        assert!(!answer.grounded);
        assert_eq!(completion.call_count(), 0);
        assert_eq!(service.stats().await?, ServiceStats { documents: 0, chunks: 0 });
        Ok(())
    }

    #[tokio::test]
    async fn blank_question_is_invalid_input() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let completion = Arc::new(ScriptedCompletion::replying("unused"));
        let service = open_service(&dir, CharacterNgramEmbedder::default(), completion.clone()).await?;

        let result = service.chat(&Query::new("  ")).await;

        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
        assert_eq!(completion.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn changing_the_embedding_model_reembeds_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("pdf"))?;
        fs::write(dir.path().join("pdf/water.pdf"), WATER)?;
        let completion = Arc::new(ScriptedCompletion::replying("unused"));

        {
            let service = open_service(&dir, CharacterNgramEmbedder::new(128), completion.clone()).await?;
            assert_eq!(service.ingest().await?.indexed_count(), 1);
            service.shutdown().await?;
        }

        let service = open_service(&dir, CharacterNgramEmbedder::new(64), completion).await?;
        assert_eq!(service.stats().await?, ServiceStats { documents: 0, chunks: 0 });

        let report = service.ingest().await?;
        assert_eq!(report.indexed_count(), 1);
        assert_eq!(service.stats().await?, ServiceStats { documents: 1, chunks: 1 });
        Ok(())
    }

    #[tokio::test]
    async fn listing_reports_processed_flags() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("pdf"))?;
        fs::write(dir.path().join("pdf/water.pdf"), WATER)?;
        fs::write(dir.path().join("pdf/broken.pdf"), "%broken")?;
        let completion = Arc::new(ScriptedCompletion::replying("unused"));
        let service = open_service(&dir, CharacterNgramEmbedder::default(), completion).await?;
        service.ingest().await?;

        let listing = service.documents().await?;

        assert_eq!(listing.len(), 2);
        for status in listing {
            assert_eq!(status.processed, status.filename == "water.pdf");
        }
        Ok(())
    }

    #[tokio::test]
    async fn replaced_pdf_content_stops_answering_old_questions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("pdf"))?;
        fs::write(dir.path().join("pdf/water.pdf"), WATER)?;
        let completion = Arc::new(ScriptedCompletion::replying("The boiling point of water is 100°C [1]."));
        let service = open_service(&dir, CharacterNgramEmbedder::default(), completion.clone()).await?;
        service.ingest().await?;
        assert!(service.chat(&Query::new("What is the boiling point of water?")).await?.grounded);

        fs::write(
            dir.path().join("pdf/water.pdf"),
            "Hydraulic pumps must be inspected every 500 operating hours.",
        )?;
        let report = service.ingest().await?;
        assert_eq!(report.replaced, vec!["water.pdf".to_string()]);

        let answer = service.chat(&Query::new("What is the boiling point of water?")).await?;
        assert!(!answer.grounded);
        assert_eq!(answer.answer, REFUSAL);
        assert_eq!(completion.call_count(), 1);
        assert_eq!(service.stats().await?, ServiceStats { documents: 1, chunks: 1 });
        assert_eq!(service.documents().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_index_database_is_rebuilt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("pdf"))?;
        fs::create_dir_all(dir.path().join("index"))?;
        fs::write(dir.path().join("pdf/water.pdf"), WATER)?;
        fs::write(
            dir.path().join("index").join(crate::stores::DATABASE_FILE),
            "this is not a database file, just some stray text that is long enough",
        )?;
        let completion = Arc::new(ScriptedCompletion::replying("unused"));

        let service = open_service(&dir, CharacterNgramEmbedder::default(), completion).await?;
        assert_eq!(service.stats().await?, ServiceStats { documents: 0, chunks: 0 });

        assert_eq!(service.ingest().await?.indexed_count(), 1);
        assert_eq!(service.stats().await?, ServiceStats { documents: 1, chunks: 1 });
        assert!(dir
            .path()
            .join("index")
            .join(format!("{}.corrupt", crate::stores::DATABASE_FILE))
            .exists());
        Ok(())
    }
}
