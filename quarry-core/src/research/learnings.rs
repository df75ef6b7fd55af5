//! Learning extraction: short findings distilled from a sub-query's curated
//! context, used to seed the next level of planning.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use super::planner::parse_string_list;
use super::query::{ContextChunk, normalize_text};
use crate::brain::LlmProvider;
use crate::error::PlannerError;
use crate::types::CompletionRequest;

#[async_trait]
pub trait LearningExtractor: Send + Sync {
    async fn extract(
        &self,
        sub_query: &str,
        chunks: &[ContextChunk],
        external_context: &str,
    ) -> Result<Vec<String>, PlannerError>;

    /// Whether calls should be charged to the cost meter.
    fn is_metered(&self) -> bool {
        true
    }
}

/// Takes the leading sentence of the best chunks and of the tool context.
#[derive(Debug, Clone)]
pub struct HeuristicLearningExtractor {
    max_learnings: usize,
    min_chars: usize,
}

impl HeuristicLearningExtractor {
    pub fn new(max_learnings: usize) -> Self {
        Self {
            max_learnings,
            min_chars: 20,
        }
    }
}

impl Default for HeuristicLearningExtractor {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl LearningExtractor for HeuristicLearningExtractor {
    async fn extract(
        &self,
        _sub_query: &str,
        chunks: &[ContextChunk],
        external_context: &str,
    ) -> Result<Vec<String>, PlannerError> {
        let mut seen = HashSet::new();
        let sources = chunks
            .iter()
            .map(|c| c.text.as_str())
            .chain(external_context.split("\n\n"));
        let learnings = sources
            .filter_map(|text| leading_sentence(text, self.min_chars))
            .filter(|sentence| seen.insert(normalize_text(sentence)))
            .take(self.max_learnings)
            .collect();
        Ok(learnings)
    }

    fn is_metered(&self) -> bool {
        false
    }
}

/// First sentence of `text` at least `min_chars` long, skipping tool headers.
fn leading_sentence(text: &str, min_chars: usize) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !(line.starts_with('[') && line.ends_with(']')))
        .flat_map(|line| line.split_inclusive(['.', '!', '?']))
        .map(str::trim)
        .find(|sentence| sentence.chars().count() >= min_chars)
        .map(str::to_string)
}

const LEARNING_SYSTEM_PROMPT: &str = "You extract key findings from research notes. Reply with a JSON array of short, \
self-contained factual statements and nothing else. Include numbers, names and dates where present.";

/// Extractor backed by an LLM provider.
pub struct LlmLearningExtractor {
    provider: Arc<dyn LlmProvider>,
    max_learnings: usize,
}

impl LlmLearningExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, max_learnings: usize) -> Self {
        Self {
            provider,
            max_learnings,
        }
    }
}

#[async_trait]
impl LearningExtractor for LlmLearningExtractor {
    async fn extract(
        &self,
        sub_query: &str,
        chunks: &[ContextChunk],
        external_context: &str,
    ) -> Result<Vec<String>, PlannerError> {
        let mut notes: Vec<String> = chunks
            .iter()
            .map(|c| format!("Source: {}\n{}", c.url, c.text))
            .collect();
        if !external_context.trim().is_empty() {
            notes.push(external_context.to_string());
        }
        let prompt = format!(
            "Research question: {sub_query}\n\nNotes:\n{}\n\nList at most {} findings.",
            notes.join("\n\n"),
            self.max_learnings
        );
        let response = self
            .provider
            .complete(CompletionRequest::prompt(LEARNING_SYSTEM_PROMPT, prompt))
            .await?;
        let mut learnings = parse_string_list(&response.message.text)?;
        learnings.truncate(self.max_learnings);
        Ok(learnings)
    }
}
