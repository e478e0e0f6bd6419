//! Sentence-aware splitting of normalized text into overlapping segments.
//!
//! Lengths are counted in tokens, where a token is a whitespace-delimited word
//! together with the whitespace that follows it. Token spans tile the input,
//! so every segment is an exact slice of the text and overlaps can be
//! stripped to reconstruct it.

use crate::error::ConfigError;
use crate::models::Segment;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

const SENTENCE_END_PATTERN: &str = r#"[.!?…]["'”’)\]]*$"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunkConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Token {
    start: usize,
    end: usize,
    ends_sentence: bool,
}

#[derive(Debug, Clone)]
pub struct SentenceChunker {
    config: ChunkingConfig,
    sentence_end: Regex,
}

impl SentenceChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            sentence_end: Regex::new(SENTENCE_END_PATTERN)?,
        })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Splits `text` into ordered segments. Empty, missing or
    /// whitespace-only input gives an empty vector.
    pub fn chunk<'a>(&self, text: impl Into<Option<&'a str>>) -> Vec<Segment> {
        let Some(text) = text.into() else {
            warn!("cannot chunk missing text");
            return Vec::new();
        };

        let tokens = self.tokenize(text);
        if tokens.is_empty() {
            warn!("cannot chunk empty text");
            return Vec::new();
        }

        let units = self.sentence_units(&tokens);
        let size = self.config.chunk_size;
        let mut segments: Vec<Segment> = Vec::new();
        let mut next_unit = 0;
        let mut prev_end = 0;

        while next_unit < units.len() {
            let first = units[next_unit];
            let overlap = match segments.last() {
                Some(previous) => self
                    .config
                    .chunk_overlap
                    .min(size - (first.1 - first.0))
                    .min(previous.token_count),
                None => 0,
            };

            let start = prev_end - overlap;
            let mut end = first.1;
            next_unit += 1;
            while next_unit < units.len() && units[next_unit].1 - start <= size {
                end = units[next_unit].1;
                next_unit += 1;
            }

            let byte_start = tokens[start].start;
            let byte_end = tokens[end - 1].end;
            let overlap_bytes = tokens[prev_end].start.saturating_sub(byte_start);
            segments.push(Segment {
                position: segments.len(),
                text: text[byte_start..byte_end].to_string(),
                token_count: end - start,
                overlap_tokens: overlap,
                overlap_bytes: if overlap == 0 { 0 } else { overlap_bytes },
            });
            prev_end = end;
        }

        debug!(
            segments = segments.len(),
            tokens = tokens.len(),
            chunk_size = size,
            chunk_overlap = self.config.chunk_overlap,
            "split text into segments"
        );
        segments
    }

    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut words: Vec<(usize, usize)> = Vec::new();
        let mut current: Option<usize> = None;

        for (index, ch) in text.char_indices() {
            if ch.is_whitespace() {
                if let Some(start) = current.take() {
                    words.push((start, index));
                }
            } else if current.is_none() {
                current = Some(index);
            }
        }
        if let Some(start) = current {
            words.push((start, text.len()));
        }

        words
            .iter()
            .enumerate()
            .map(|(index, &(word_start, word_end))| {
                let end = words
                    .get(index + 1)
                    .map(|next| next.0)
                    .unwrap_or(text.len());
                let gap = &text[word_end..end];
                Token {
                    start: if index == 0 { 0 } else { word_start },
                    end,
                    ends_sentence: self.sentence_end.is_match(&text[word_start..word_end])
                        || gap.contains("\n\n"),
                }
            })
            .collect()
    }

    /// Token ranges of whole sentences. Sentences longer than `chunk_size`
    /// are cut into pieces that still leave room for the overlap.
    fn sentence_units(&self, tokens: &[Token]) -> Vec<(usize, usize)> {
        let size = self.config.chunk_size;
        let piece = size - self.config.chunk_overlap;
        let mut units = Vec::new();
        let mut sentence_start = 0;

        for (index, token) in tokens.iter().enumerate() {
            let is_last = index + 1 == tokens.len();
            if !token.ends_sentence && !is_last {
                continue;
            }

            let sentence_end = index + 1;
            let mut piece_start = sentence_start;
            if sentence_end - piece_start > size {
                while sentence_end - piece_start > piece {
                    units.push((piece_start, piece_start + piece));
                    piece_start += piece;
                }
            }
            units.push((piece_start, sentence_end));
            sentence_start = sentence_end;
        }

        units
    }
}

/// Rebuilds the source text by dropping each segment's overlap prefix.
pub fn reassemble(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| segment.fresh_text())
        .collect()
}
