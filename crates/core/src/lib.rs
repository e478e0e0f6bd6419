pub mod answer;
pub mod cache;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod fingerprint;
pub mod index;
pub mod llm;
pub mod models;

pub use answer::{build_prompt, AnswerSynthesizer, SynthesisSettings};
pub use cache::{CacheManifest, IndexCache};
pub use chunking::{reassemble, ChunkingConfig, SentenceChunker};
pub use config::{EmbeddingProvider, RagConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    CacheError, ConfigError, EmbedError, ExtractionFailure, GenerationError, IndexError,
    IngestError, QueryError,
};
pub use extractor::{LopdfParser, PageTextExtractor, ParseFailure, PdfDocument, PdfExtractor, PdfParser};
pub use fingerprint::{fingerprint_file, fingerprint_reader};
pub use index::{IndexEntry, VectorIndex, DEFAULT_TOP_K};
pub use llm::{ChatClientConfig, Generator, OpenRouterClient};
pub use models::{
    Answer, ChatTurn, Fingerprint, GenerationOptions, RetrievalResult, Role, ScoredSegment,
    Segment,
};
