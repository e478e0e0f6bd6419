mod session;

use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::Parser;
use pdf_rag_core::config::{API_KEY_ENV, EMBEDDING_API_KEY_ENV};
use pdf_rag_core::{
    AnswerSynthesizer, Embedder, EmbeddingProvider, IndexCache, LopdfParser, OpenRouterClient,
    PageTextExtractor, RagConfig, SentenceChunker,
};
use session::{prompt_for_document, validate_document_path, Session, SourcesMode};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "pdf-rag", version, about = "Ask questions about a PDF document")]
struct Cli {
    /// PDF to load. Prompted for when omitted.
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// TOML file with settings; flags below override it.
    #[arg(long, env = "PDF_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Print retrieved passages after every answer instead of asking.
    #[arg(long, default_value_t = false)]
    show_sources: bool,

    /// API key for the generation endpoint.
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Embedding provider: `ngram` (offline) or `http`.
    #[arg(long, env = "PDF_RAG_EMBEDDING_PROVIDER")]
    embedding_provider: Option<EmbeddingProvider>,

    /// API key for the embeddings endpoint (http provider). Without it the
    /// generation key is only used when both endpoints share a host.
    #[arg(long, env = EMBEDDING_API_KEY_ENV, hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Embedding model identifier (http provider).
    #[arg(long)]
    embedding_model: Option<String>,

    /// Base URL of the embeddings API (http provider).
    #[arg(long)]
    embedding_api_base: Option<String>,

    /// Generation model identifier.
    #[arg(long, env = "PDF_RAG_LLM_MODEL")]
    llm_model: Option<String>,

    /// Base URL of the chat-completions API.
    #[arg(long)]
    api_base: Option<String>,

    /// Model context window, in tokens.
    #[arg(long)]
    context_window: Option<usize>,

    /// Maximum tokens to generate per answer.
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature.
    #[arg(long)]
    temperature: Option<f32>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Segment length, in tokens.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Tokens repeated between adjacent segments.
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Number of passages retrieved per question.
    #[arg(long)]
    top_k: Option<usize>,

    /// Directory holding cached indexes.
    #[arg(long, env = "PDF_RAG_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Value for the HTTP-Referer attribution header.
    #[arg(long)]
    http_referer: Option<String>,

    /// Value for the X-Title attribution header.
    #[arg(long)]
    x_title: Option<String>,
}

impl Cli {
    fn resolve_config(&self) -> anyhow::Result<RagConfig> {
        let mut config = match &self.config {
            Some(path) => RagConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => RagConfig::default(),
        };
        self.apply(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn apply(&self, config: &mut RagConfig) {
        if let Some(provider) = self.embedding_provider {
            config.embedding.provider = provider;
        }
        if let Some(model) = &self.embedding_model {
            config.embedding.model = model.clone();
        }
        if let Some(api_base) = &self.embedding_api_base {
            config.embedding.api_base = api_base.clone();
        }
        if let Some(model) = &self.llm_model {
            config.llm.model = model.clone();
        }
        if let Some(api_base) = &self.api_base {
            config.llm.api_base = api_base.clone();
        }
        if let Some(context_window) = self.context_window {
            config.llm.context_window = context_window;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.llm.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            config.llm.temperature = temperature;
        }
        if let Some(timeout_secs) = self.timeout_secs {
            config.llm.timeout_secs = timeout_secs;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunking.chunk_size = chunk_size;
        }
        if let Some(chunk_overlap) = self.chunk_overlap {
            config.chunking.chunk_overlap = chunk_overlap;
        }
        if let Some(top_k) = self.top_k {
            config.retrieval.top_k = top_k;
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = cache_dir.clone();
        }
        if let Some(referer) = &self.http_referer {
            config.llm.http_referer = Some(referer.clone());
        }
        if let Some(title) = &self.x_title {
            config.llm.x_title = Some(title.clone());
        }
    }
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    println!("--- Context-Aware RAG Chatbot Initializing ---");

    let config = cli.resolve_config()?;
    let api_key = cli
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow!("{API_KEY_ENV} is not set; export it or pass --api-key"))?;

    let embedding_key = config.embedding_api_key(cli.embedding_api_key.clone(), &api_key);
    let embedder = config.build_embedder(embedding_key)?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        llm_model = %config.llm.model,
        embedding_provider = ?config.embedding.provider,
        embedding_model = embedder.model_id(),
        cache_dir = %config.cache_dir().display(),
        "pdf-rag boot"
    );

    let generator = OpenRouterClient::new(config.chat_client_config(api_key))?;
    let synthesizer = AnswerSynthesizer::new(generator, config.synthesis_settings());

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout().lock();

    let document = match &cli.pdf {
        Some(path) => validate_document_path(&path.to_string_lossy())?,
        None => match prompt_for_document(&mut input, &mut output)? {
            Some(path) => path,
            None => {
                writeln!(output, "\nNo document selected.")?;
                return Ok(());
            }
        },
    };

    let cache = IndexCache::new(
        config.cache_dir(),
        PageTextExtractor::new(LopdfParser),
        SentenceChunker::new(config.chunking)?,
    );
    let index = cache.get_or_build(&document, embedder.as_ref()).map_err(|failure| {
        error!(error = %failure, "failed to get or build the vector index, cannot proceed");
        anyhow!(failure)
    })?;

    let session = Session {
        index: &index,
        synthesizer: &synthesizer,
        embedder: embedder.as_ref(),
        sources: if cli.show_sources {
            SourcesMode::Always
        } else {
            SourcesMode::Ask
        },
    };
    let summary = session.run(&mut input, &mut output)?;
    info!(answered = summary.answered, failed = summary.failed, "session finished");

    writeln!(output, "\n--- Script Finished ---")?;
    Ok(())
}
