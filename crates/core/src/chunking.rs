use crate::embeddings::{count_tokens, EmbeddingProvider};
use crate::error::PipelineError;
use crate::models::{Chunk, Document, EmbeddingVector};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Neighbouring windows embedded together with each window on either side.
    pub chunk_buffer_size: usize,
    pub breakpoint_percentile: f64,
    /// Hard token cap for a single base window.
    pub base_window_token_limit: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_buffer_size: 1,
            breakpoint_percentile: 95.0,
            base_window_token_limit: 512,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.breakpoint_percentile > 0.0 && self.breakpoint_percentile <= 100.0) {
            return Err(PipelineError::Config(format!(
                "breakpoint_percentile must be in (0, 100], got {}",
                self.breakpoint_percentile
            )));
        }
        if self.base_window_token_limit == 0 {
            return Err(PipelineError::Config(
                "base_window_token_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits text on sentence punctuation and blank lines.
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    boundary: Regex,
}

impl SentenceSplitter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            boundary: Regex::new(r#"[.!?]+["')\]]*\s+|\n\s*\n"#)?,
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for boundary in self.boundary.find_iter(text) {
            push_sentence(&mut sentences, &text[start..boundary.end()]);
            start = boundary.end();
        }
        push_sentence(&mut sentences, &text[start..]);

        sentences
    }

    /// Sentences of `text` packed into windows of at most `token_limit`
    /// tokens. A sentence over the limit is hard-split into consecutive
    /// pieces and never shares a window.
    pub fn base_windows(&self, text: &str, token_limit: usize) -> Vec<String> {
        let limit = token_limit.max(1);
        let mut windows = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_tokens = 0;

        for sentence in self.split(text) {
            let tokens = count_tokens(&sentence);
            if tokens > limit {
                flush_window(&mut windows, &mut current, &mut current_tokens);
                let words: Vec<&str> = sentence.split_whitespace().collect();
                for piece in words.chunks(limit) {
                    windows.push(piece.join(" "));
                }
                continue;
            }
            if current_tokens + tokens > limit {
                flush_window(&mut windows, &mut current, &mut current_tokens);
            }
            current_tokens += tokens;
            current.push(sentence);
        }
        flush_window(&mut windows, &mut current, &mut current_tokens);

        windows
    }
}

fn flush_window(windows: &mut Vec<String>, current: &mut Vec<String>, current_tokens: &mut usize) {
    if !current.is_empty() {
        windows.push(current.join(" "));
        current.clear();
    }
    *current_tokens = 0;
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let normalized = normalize_whitespace(raw);
    if !normalized.is_empty() {
        sentences.push(normalized);
    }
}

/// Groups sentences into chunks whose boundaries follow topic shifts
/// detected from embedding dissimilarity.
pub struct SemanticChunker {
    embedder: Arc<dyn EmbeddingProvider>,
    config: ChunkingConfig,
    splitter: SentenceSplitter,
}

impl SemanticChunker {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        config: ChunkingConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            embedder,
            config,
            splitter: SentenceSplitter::new()?,
        })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub async fn chunk(&self, documents: &[Document]) -> Result<Vec<Chunk>, PipelineError> {
        let mut chunks = Vec::new();
        for document in documents {
            chunks.extend(self.chunk_document(document).await?);
        }
        Ok(chunks)
    }

    pub async fn chunk_document(&self, document: &Document) -> Result<Vec<Chunk>, PipelineError> {
        let windows = self
            .splitter
            .base_windows(&document.text, self.config.base_window_token_limit);

        if windows.is_empty() {
            return Ok(Vec::new());
        }

        let total_tokens: usize = windows.iter().map(|window| count_tokens(window)).sum();
        if windows.len() == 1 || total_tokens <= self.config.base_window_token_limit {
            return Ok(vec![Chunk {
                text: windows.join(" "),
                origin_document_id: document.id.clone(),
                sequence_index: 0,
            }]);
        }

        let buffered = buffer_windows(&windows, self.config.chunk_buffer_size);
        let embeddings = self.embedder.embed_batch(&buffered).await?;
        let distances = consecutive_distances(&embeddings);
        let threshold = percentile(&distances, self.config.breakpoint_percentile);

        let breakpoints: Vec<usize> = distances
            .iter()
            .enumerate()
            .filter(|(_, distance)| **distance > threshold)
            .map(|(index, _)| index)
            .collect();

        debug!(
            document_id = %document.id,
            windows = windows.len(),
            breakpoints = breakpoints.len(),
            threshold,
            "semantic breakpoints detected"
        );

        Ok(merge_windows(&windows, &breakpoints, &document.id))
    }
}

/// Each window joined with up to `buffer` neighbours on both sides.
fn buffer_windows(windows: &[String], buffer: usize) -> Vec<String> {
    (0..windows.len())
        .map(|index| {
            let start = index.saturating_sub(buffer);
            let end = index.saturating_add(buffer).min(windows.len() - 1);
            windows[start..=end].join(" ")
        })
        .collect()
}

fn consecutive_distances(embeddings: &[EmbeddingVector]) -> Vec<f64> {
    embeddings
        .windows(2)
        .map(|pair| 1.0 - cosine_similarity(pair[0].as_slice(), pair[1].as_slice()))
        .collect()
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right.iter()) {
        let (a, b) = (*a as f64, *b as f64);
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return f64::INFINITY;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|left, right| left.total_cmp(right));

    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// A breakpoint `i` closes a chunk after window `i`.
fn merge_windows(windows: &[String], breakpoints: &[usize], document_id: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut start = 0;

    let ends = breakpoints
        .iter()
        .copied()
        .chain(std::iter::once(windows.len() - 1));

    for end in ends {
        if end < start {
            continue;
        }
        chunks.push(Chunk {
            text: windows[start..=end].join(" "),
            origin_document_id: document_id.to_string(),
            sequence_index: chunks.len() as u64,
        });
        start = end + 1;
    }

    chunks
}
