//! Run configuration with documented defaults.
//!
//! Values are static for a run. The binary starts from [`RagConfig::default`],
//! optionally overlays a TOML file, then applies command-line overrides and
//! calls [`RagConfig::validate`] before anything else happens.

use crate::answer::SynthesisSettings;
use crate::chunking::ChunkingConfig;
use crate::embeddings::{CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
use crate::error::ConfigError;
use crate::index::DEFAULT_TOP_K;
use crate::llm::ChatClientConfig;
use crate::models::GenerationOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_LLM_MODEL: &str = "qwen/qwen3-30b-a3b:free";
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_CONTEXT_WINDOW: usize = 41_984;
pub const DEFAULT_MAX_TOKENS: u32 = 4_096;
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CACHE_DIR: &str = ".cache/indexes";
pub const DEFAULT_HTTP_REFERER: &str = "https://github.com/your-repo/your-project";
pub const DEFAULT_X_TITLE: &str = "Context-Aware RAG Chatbot";
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const EMBEDDING_API_KEY_ENV: &str = "PDF_RAG_EMBEDDING_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Offline hashed character trigrams.
    Ngram,
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ngram" => Ok(Self::Ngram),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// `model` and `api_base` only apply to the `http` provider; the n-gram
/// embedder names itself after its dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub api_base: String,
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ngram,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub api_base: String,
    pub context_window: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub http_referer: Option<String>,
    pub x_title: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_LLM_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            http_referer: Some(DEFAULT_HTTP_REFERER.to_string()),
            x_title: Some(DEFAULT_X_TITLE.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub embedding: EmbeddingSettings,
    pub llm: LlmSettings,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalSettings,
    pub cache_dir: PathBuf,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingSettings::default(),
            llm: LlmSettings::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalSettings::default(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
        }
    }
}

impl RagConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;

        if self.retrieval.top_k == 0 {
            return Err(invalid("retrieval.top_k", "must be at least 1"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(invalid("llm.timeout_secs", "must be greater than zero"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid(
                "llm.temperature",
                format!("{} is outside [0.0, 2.0]", self.llm.temperature),
            ));
        }
        if self.llm.max_tokens == 0 || self.llm.max_tokens as usize >= self.llm.context_window {
            return Err(invalid(
                "llm.max_tokens",
                format!(
                    "{} must be positive and below the context window ({})",
                    self.llm.max_tokens, self.llm.context_window
                ),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(invalid("llm.model", "must not be empty"));
        }
        if self.embedding.dimensions == 0 {
            return Err(invalid("embedding.dimensions", "must be greater than zero"));
        }

        Url::parse(&self.llm.api_base).map_err(|source| ConfigError::Url {
            field: "llm.api_base",
            source,
        })?;
        if self.embedding.provider == EmbeddingProvider::Http {
            Url::parse(&self.embedding.api_base).map_err(|source| ConfigError::Url {
                field: "embedding.api_base",
                source,
            })?;
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    pub fn chat_client_config(&self, api_key: String) -> ChatClientConfig {
        ChatClientConfig {
            api_base: self.llm.api_base.clone(),
            api_key,
            model: self.llm.model.clone(),
            timeout: self.timeout(),
            http_referer: self.llm.http_referer.clone(),
            x_title: self.llm.x_title.clone(),
        }
    }

    pub fn synthesis_settings(&self) -> SynthesisSettings {
        SynthesisSettings {
            top_k: self.retrieval.top_k,
            context_window: self.llm.context_window,
            generation: GenerationOptions {
                temperature: self.llm.temperature,
                max_tokens: self.llm.max_tokens,
            },
        }
    }

    /// Key for the embeddings endpoint. An explicit key wins; otherwise the
    /// generation key is reused only when both endpoints share scheme, host
    /// and port, so it is never sent to a different service.
    pub fn embedding_api_key(&self, explicit: Option<String>, generation_key: &str) -> Option<String> {
        if let Some(key) = explicit.filter(|key| !key.trim().is_empty()) {
            return Some(key);
        }
        let same_origin = match (Url::parse(&self.embedding.api_base), Url::parse(&self.llm.api_base)) {
            (Ok(embedding), Ok(llm)) => {
                embedding.host_str().is_some()
                    && embedding.scheme() == llm.scheme()
                    && embedding.host_str() == llm.host_str()
                    && embedding.port_or_known_default() == llm.port_or_known_default()
            }
            _ => false,
        };
        same_origin.then(|| generation_key.to_string())
    }

    /// Builds the configured embedder. `api_key` is only used by the HTTP provider.
    pub fn build_embedder(&self, api_key: Option<String>) -> Result<Box<dyn Embedder>, ConfigError> {
        match self.embedding.provider {
            EmbeddingProvider::Ngram => Ok(Box::new(CharacterNgramEmbedder::new(
                self.embedding.dimensions,
            ))),
            EmbeddingProvider::Http => {
                let embedder = HttpEmbedder::new(
                    &self.embedding.api_base,
                    self.embedding.model.clone(),
                    api_key,
                    self.timeout(),
                )
                .map_err(|error| invalid("embedding", error.to_string()))?;
                Ok(Box::new(embedder))
            }
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
