//! Relevance curation of scraped documents.
//!
//! Documents are split into chunks, each chunk is scored against the
//! sub-query, chunks under the similarity threshold are discarded and the
//! rest are packed into a character budget best-first.

use async_trait::async_trait;
use futures::future::join_all;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use super::aggregator::{CallKind, CostMeter};
use super::query::{ContextChunk, ScrapedDocument};
use crate::config::{CuratorConfig, ResearchConfig};
use crate::embeddings::{Embedder, cosine_similarity};
use crate::error::ScoreError;

/// Similarity between a query and a passage, in `[0, 1]`.
#[async_trait]
pub trait SimilarityScorer: Send + Sync {
    async fn score(&self, query: &str, text: &str) -> Result<f32, ScoreError>;
}

/// Cosine similarity over an [`Embedder`], clamped to `[0, 1]`.
pub struct EmbeddingScorer {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl SimilarityScorer for EmbeddingScorer {
    async fn score(&self, query: &str, text: &str) -> Result<f32, ScoreError> {
        let vectors = self.embedder.embed_batch(&[query, text]);
        match vectors.as_slice() {
            [q, t] if q.len() == t.len() => Ok(cosine_similarity(q, t).clamp(0.0, 1.0)),
            [q, t] => Err(ScoreError::DimensionMismatch {
                left: q.len(),
                right: t.len(),
            }),
            _ => Err(ScoreError::Provider {
                message: format!(
                    "{} returned {} embeddings for 2 inputs",
                    self.embedder.provider_name(),
                    vectors.len()
                ),
            }),
        }
    }
}

pub struct ContextCurator {
    scorer: Arc<dyn SimilarityScorer>,
    threshold: f32,
    char_budget: usize,
    chunk_size: usize,
    min_chunk_chars: usize,
}

impl ContextCurator {
    pub fn new(
        scorer: Arc<dyn SimilarityScorer>,
        research: &ResearchConfig,
        curator: &CuratorConfig,
    ) -> Self {
        Self {
            scorer,
            threshold: research.similarity_threshold,
            char_budget: research.context_char_budget,
            chunk_size: curator.chunk_size.max(1),
            min_chunk_chars: curator.min_chunk_chars,
        }
    }

    /// Score, threshold, rank and budget-truncate the chunks of `documents`.
    ///
    /// Ties on score keep the earlier document (by retriever rank) and then
    /// the earlier chunk. A chunk that would overflow the budget is skipped;
    /// later, smaller chunks may still fit. Returns an empty list when
    /// nothing clears the threshold.
    pub async fn filter(
        &self,
        documents: &[ScrapedDocument],
        sub_query: &str,
        meter: &CostMeter,
    ) -> Vec<ContextChunk> {
        let pending: Vec<(&ScrapedDocument, usize, String)> = documents
            .iter()
            .filter(|d| d.is_fetched())
            .flat_map(|doc| {
                chunk_text(&doc.raw_text, self.chunk_size, self.min_chunk_chars)
                    .into_iter()
                    .enumerate()
                    .map(move |(chunk_index, text)| (doc, chunk_index, text))
            })
            .collect();

        let scores = join_all(pending.iter().map(|(doc, _, text)| async move {
            let score = match self.scorer.score(sub_query, text).await {
                Ok(score) if score.is_finite() => score.clamp(0.0, 1.0),
                Ok(_) => 0.0,
                Err(e) => {
                    warn!(
                        url = %doc.url,
                        sub_query,
                        error = %e,
                        "Scoring failed, treating chunk as irrelevant"
                    );
                    0.0
                }
            };
            meter.charge(CallKind::Similarity);
            score
        }))
        .await;

        let mut scored: Vec<ContextChunk> = pending
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| *score >= self.threshold && *score > 0.0)
            .map(|((doc, chunk_index, text), score)| ContextChunk {
                url: doc.url.clone(),
                title: doc.title.clone(),
                text,
                score,
                sub_query: sub_query.to_string(),
                rank: doc.rank,
                chunk_index,
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.rank.cmp(&b.rank))
                .then(a.chunk_index.cmp(&b.chunk_index))
        });

        let candidates = scored.len();
        let mut used = 0usize;
        let kept: Vec<ContextChunk> = scored
            .into_iter()
            .filter(|chunk| {
                let len = chunk.text.chars().count();
                if used + len <= self.char_budget {
                    used += len;
                    true
                } else {
                    false
                }
            })
            .collect();

        debug!(
            sub_query,
            documents = documents.len(),
            candidates,
            kept = kept.len(),
            chars = used,
            "Curated context"
        );
        kept
    }
}

/// Split text into chunks of at most `chunk_size` characters.
///
/// Paragraphs are packed together while they fit; oversized paragraphs are
/// split on sentence ends and, failing that, hard-wrapped. Chunks shorter
/// than `min_chars` are dropped.
pub fn chunk_text(text: &str, chunk_size: usize, min_chars: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut pieces = Vec::new();
    for paragraph in text.split('\n').map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.chars().count() <= chunk_size {
            pieces.push(paragraph.to_string());
        } else {
            for sentence in split_sentences(paragraph) {
                if sentence.chars().count() <= chunk_size {
                    pieces.push(sentence.to_string());
                } else {
                    pieces.extend(hard_wrap(sentence, chunk_size));
                }
            }
        }
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for piece in pieces {
        let len = piece.chars().count();
        let joined_len = if current.is_empty() { len } else { current_len + 1 + len };
        if joined_len > chunk_size && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(&piece);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks.retain(|c| c.chars().count() >= min_chars);
    chunks
}

fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some((next_idx, next)) = chars.peek() {
                if next.is_whitespace() {
                    let sentence = paragraph[start..idx + c.len_utf8()].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = *next_idx;
                }
            }
        }
    }
    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn hard_wrap(text: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(width)
        .map(|c| c.iter().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
