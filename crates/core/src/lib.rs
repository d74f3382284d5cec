pub mod chunking;
pub mod completion;
pub mod composer;
pub mod config;
pub mod documents;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod openai;
pub mod retriever;
pub mod service;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, chunk_by_paragraph, normalize_whitespace, ChunkingConfig};
pub use completion::OpenAiChat;
pub use composer::{AnswerComposer, REFUSAL};
pub use config::{OpenAiConfig, RetrievalConfig, ServiceConfig};
pub use documents::{discover_pdf_files, document_id_for, DocumentStore, FileStamp};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_NGRAM_DIMENSIONS,
};
pub use error::{IngestError, ServiceError, StorageError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use ingest::{Indexer, IngestionReport, SkippedPdf};
pub use models::{
    Answer, DocumentRecord, DocumentStatus, IngestionOptions, PdfChunk, Query, ScoredChunk,
};
pub use retriever::Retriever;
pub use service::{ChatService, ServiceStats};
pub use stores::{IndexDatabase, IndexHeader, IndexOpenOutcome, LocalVectorIndex, DATABASE_FILE};
pub use traits::{CompletionProvider, VectorIndex};
