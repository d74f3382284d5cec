use crate::models::IngestionOptions;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1_536;

/// Settings for the OpenAI-compatible embedding and chat-completion APIs.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub timeout: Duration,
    /// Pause before the single retry of a transient failure.
    pub retry_backoff: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key: None,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Hits scoring below this cosine similarity are treated as irrelevant.
    pub min_similarity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.35,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub pdf_folder: PathBuf,
    pub index_dir: PathBuf,
    pub ingestion: IngestionOptions,
    pub retrieval: RetrievalConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pdf_folder: PathBuf::from("pdf"),
            index_dir: PathBuf::from("tmp/index"),
            ingestion: IngestionOptions::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}
