use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no pages extracted from {0}")]
    NoPages(String),

    #[error("no chunks were created from the extracted pages")]
    NoChunks,

    #[error("could not delete stale collection '{collection}': {source}; make sure no other process is using the store")]
    StaleCollection {
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl From<lopdf::Error> for IngestError {
    fn from(error: lopdf::Error) -> Self {
        IngestError::PdfParse(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store request failed: {0}")]
    Request(String),

    #[error("collection not available: {0}")]
    NotReady(String),

    #[error("vector dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {provider}: {details}")]
    BackendResponse { provider: String, details: String },

    #[error("{0} returned an empty response")]
    EmptyResponse(String),

    #[error("invalid model request: {0}")]
    InvalidRequest(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
