use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("document has no extractable text: {0}")]
    EmptyDocument(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] ServiceError),
}

/// Failures of the index database holding chunks and the processed-document ledger.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding count {embeddings} doesn't match chunk count {chunks}")]
    CountMismatch { chunks: usize, embeddings: usize },

    #[error("background task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Errors on the request path: validation, external model APIs and storage.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{service} timed out")]
    Timeout { service: String },

    #[error("{service} is unreachable: {details}")]
    Unreachable { service: String, details: String },

    #[error("{service} returned {status}: {details}")]
    Rejected {
        service: String,
        status: u16,
        details: String,
    },

    #[error("invalid response from {service}: {details}")]
    BadResponse { service: String, details: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ServiceError {
    pub fn from_reqwest(service: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                service: service.to_string(),
            }
        } else if error.is_connect() || error.is_request() {
            Self::Unreachable {
                service: service.to_string(),
                details: error.to_string(),
            }
        } else if error.is_decode() {
            Self::BadResponse {
                service: service.to_string(),
                details: error.to_string(),
            }
        } else {
            Self::Unreachable {
                service: service.to_string(),
                details: error.to_string(),
            }
        }
    }

    /// Network-level failures and 429/5xx answers. Validation and other 4xx never qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Unreachable { .. } => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
