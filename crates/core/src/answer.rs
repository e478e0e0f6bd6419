use crate::embeddings::Embedder;
use crate::error::QueryError;
use crate::index::{VectorIndex, DEFAULT_TOP_K};
use crate::llm::Generator;
use crate::models::{Answer, ChatTurn, GenerationOptions, RetrievalResult, ScoredSegment};
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You answer questions about a single document. \
Use only the context passages supplied with the question. \
If the context does not contain the answer, say that the document does not cover it.";

#[derive(Debug, Clone, Copy)]
pub struct SynthesisSettings {
    pub top_k: usize,
    pub context_window: usize,
    pub generation: GenerationOptions,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            context_window: crate::config::DEFAULT_CONTEXT_WINDOW,
            generation: GenerationOptions {
                temperature: crate::config::DEFAULT_TEMPERATURE,
                max_tokens: crate::config::DEFAULT_MAX_TOKENS,
            },
        }
    }
}

/// Retrieves context for a question and asks the generator for a grounded answer.
pub struct AnswerSynthesizer<G> {
    generator: G,
    settings: SynthesisSettings,
}

impl<G: Generator> AnswerSynthesizer<G> {
    pub fn new(generator: G, settings: SynthesisSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    /// Answers with the configured `top_k`.
    pub fn ask<E>(&self, index: &VectorIndex, question: &str, embedder: &E) -> Result<Answer, QueryError>
    where
        E: Embedder + ?Sized,
    {
        self.answer(index, question, self.settings.top_k, embedder)
    }

    /// `embedder` must be the one the index was built with.
    pub fn answer<E>(
        &self,
        index: &VectorIndex,
        question: &str,
        k: usize,
        embedder: &E,
    ) -> Result<Answer, QueryError>
    where
        E: Embedder + ?Sized,
    {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let query_vector = embedder.embed(question)?;
        let retrieved = index.search(&query_vector, k)?;
        debug!(hits = retrieved.len(), k, "retrieved context");

        let sources = self.fit_context(question, retrieved);
        let turns = build_prompt(question, &sources.hits);

        let text = self
            .generator
            .generate(&turns, &self.settings.generation)
            .inspect_err(|error| warn!(%error, "generation failed"))?;

        info!(sources = sources.len(), chars = text.len(), "answer generated");
        Ok(Answer { text, sources })
    }

    /// Keeps hits in rank order while the prompt fits the context window,
    /// always keeping the best hit.
    fn fit_context(&self, question: &str, retrieved: RetrievalResult) -> RetrievalResult {
        let budget = self
            .settings
            .context_window
            .saturating_sub(self.settings.generation.max_tokens as usize);
        let mut used = estimate_tokens(SYSTEM_PROMPT) + estimate_tokens(question) + PROMPT_OVERHEAD_TOKENS;
        let total = retrieved.hits.len();

        let mut hits = Vec::with_capacity(total);
        for hit in retrieved.hits {
            let cost = estimate_tokens(&hit.segment.text);
            if !hits.is_empty() && used + cost > budget {
                break;
            }
            used += cost;
            hits.push(hit);
        }

        if hits.len() < total {
            warn!(kept = hits.len(), retrieved = total, "context window exceeded, dropping lower-ranked passages");
        }
        RetrievalResult { hits }
    }
}

const PROMPT_OVERHEAD_TOKENS: usize = 32;

fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// System instructions plus one user turn holding the passages and the question.
pub fn build_prompt(question: &str, hits: &[ScoredSegment]) -> Vec<ChatTurn> {
    let context = hits
        .iter()
        .enumerate()
        .map(|(rank, hit)| format!("[{}] {}", rank + 1, hit.segment.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");

    let user = format!(
        "Context information is below.\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {question}\n\
         Answer:"
    );

    vec![ChatTurn::system(SYSTEM_PROMPT), ChatTurn::user(user)]
}
