use crate::error::ServiceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger entry for a document whose chunks are all in the vector index.
/// Keyed by `filename`, the path relative to the document folder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub document_id: String,
    pub filename: String,
    pub source_path: String,
    pub checksum: String,
    pub file_size: u64,
    /// Modification time of the file when it was ingested, in Unix milliseconds.
    pub modified_ms: i64,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentStatus {
    pub filename: String,
    pub processed: bool,
    pub ingested_at: Option<DateTime<Utc>>,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PdfChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub filename: String,
    pub page: u32,
    pub ordinal: u64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: PdfChunk,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Query {
    pub text: String,
    pub session_id: Option<String>,
    pub top_k: Option<usize>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.text.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "question must be a non-empty string".to_string(),
            ));
        }
        if self.top_k == Some(0) {
            return Err(ServiceError::InvalidInput(
                "top_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub answer: String,
    pub grounded: bool,
    pub sources: Vec<String>,
}

impl Answer {
    pub fn refusal(text: impl Into<String>) -> Self {
        Self {
            answer: text.into(),
            grounded: false,
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub min_chunk_chars: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_200,
            chunk_overlap_chars: 120,
            min_chunk_chars: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_question_is_rejected() {
        let query = Query::new("   \n");
        assert!(matches!(query.validate(), Err(ServiceError::InvalidInput(_))));
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let query = Query {
            text: "What is covered?".to_string(),
            session_id: None,
            top_k: Some(0),
        };
        assert!(query.validate().is_err());
        assert!(Query::new("What is covered?").validate().is_ok());
    }
}
