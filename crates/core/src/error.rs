use std::path::PathBuf;
use thiserror::Error;

/// Why a document produced no usable text.
#[derive(Debug, Error)]
pub enum ExtractionFailure {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("pdf could not be parsed ({}): {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("pdf is encrypted and cannot be processed: {}", .0.display())]
    Encrypted(PathBuf),

    #[error("pdf contains no pages: {}", .0.display())]
    Empty(PathBuf),

    #[error("no text could be extracted (image-only or blank pages?): {}", .0.display())]
    NoExtractableText(PathBuf),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding failed for segment {position}: {source}")]
    Embedding {
        position: usize,
        #[source]
        source: EmbedError,
    },

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector for segment {0} contains non-finite values")]
    NonFinite(usize),

    #[error("cannot build an index from zero segments")]
    NoSegments,

    #[error("unsupported index format version {0}")]
    UnsupportedFormat(u32),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Cache problems. Never fatal: callers log these and rebuild.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("stale cache entry: {0}")]
    Stale(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request timed out after {0} seconds")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("generation endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed generation response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("url parse error for {field}: {source}")]
    Url {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("unknown embedding provider: {0}")]
    UnknownProvider(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("http client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failures during one-time index setup. These abort the run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("cannot fingerprint document {}: {source}", .path.display())]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionFailure),

    #[error("chunking produced no segments for {}", .0.display())]
    Chunking(PathBuf),

    #[error("index build failed: {0}")]
    IndexBuild(#[from] IndexError),
}

/// Failures during a single question. The session reports these and continues.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("retrieval failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
