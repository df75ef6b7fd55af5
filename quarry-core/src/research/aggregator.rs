//! Shared research state and the cost meter.
//!
//! Concurrent sub-query tasks never touch the state directly. They claim URLs
//! and submit finished outcomes through the [`Aggregator`], which serializes
//! every write behind one mutex.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::query::{
    Citation, ContextChunk, ResearchCorpus, SubQuery, Termination, normalize_text, normalize_url,
};
use crate::config::CostModel;

/// Kinds of collaborator call the meter distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Search,
    Scrape,
    Similarity,
    Plan,
    Tool,
    Learning,
}

impl CallKind {
    pub const ALL: [CallKind; 6] = [
        CallKind::Search,
        CallKind::Scrape,
        CallKind::Similarity,
        CallKind::Plan,
        CallKind::Tool,
        CallKind::Learning,
    ];

    fn index(self) -> usize {
        match self {
            CallKind::Search => 0,
            CallKind::Scrape => 1,
            CallKind::Similarity => 2,
            CallKind::Plan => 3,
            CallKind::Tool => 4,
            CallKind::Learning => 5,
        }
    }
}

impl CostModel {
    pub fn weight(&self, kind: CallKind) -> f64 {
        match kind {
            CallKind::Search => self.search,
            CallKind::Scrape => self.scrape,
            CallKind::Similarity => self.similarity,
            CallKind::Plan => self.plan,
            CallKind::Tool => self.tool,
            CallKind::Learning => self.learning,
        }
    }
}

/// Lock-free running cost. The total is an `f64` stored as raw bits.
#[derive(Debug)]
pub struct CostMeter {
    model: CostModel,
    total_bits: AtomicU64,
    calls: [AtomicUsize; 6],
}

impl CostMeter {
    pub fn new(model: CostModel) -> Self {
        Self {
            model,
            total_bits: AtomicU64::new(0f64.to_bits()),
            calls: Default::default(),
        }
    }

    /// Record one completed call of `kind`.
    pub fn charge(&self, kind: CallKind) {
        self.calls[kind.index()].fetch_add(1, Ordering::SeqCst);
        let weight = self.model.weight(kind);
        if weight == 0.0 {
            return;
        }
        let _ = self
            .total_bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + weight).to_bits())
            });
    }

    pub fn total(&self) -> f64 {
        f64::from_bits(self.total_bits.load(Ordering::SeqCst))
    }

    pub fn calls(&self, kind: CallKind) -> usize {
        self.calls[kind.index()].load(Ordering::SeqCst)
    }
}

impl Default for CostMeter {
    fn default() -> Self {
        Self::new(CostModel::default())
    }
}

/// Everything one sub-query task produced.
#[derive(Debug, Clone)]
pub struct SubQueryOutcome {
    pub sub_query: SubQuery,
    pub chunks: Vec<ContextChunk>,
    pub external_context: String,
    pub learnings: Vec<String>,
}

/// What a `record` call added to the state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSummary {
    /// Learnings not seen before, in submission order.
    pub new_learnings: Vec<String>,
    pub new_citations: usize,
}

#[derive(Debug, Default)]
struct ResearchState {
    learnings: Vec<String>,
    learning_keys: HashSet<String>,
    visited: Vec<String>,
    visited_set: HashSet<String>,
    citations: Vec<Citation>,
    citation_urls: HashSet<String>,
    sections: Vec<String>,
    chunks: Vec<ContextChunk>,
    sub_queries: Vec<SubQuery>,
}

/// Single writer for the run's [`ResearchState`].
#[derive(Debug)]
pub struct Aggregator {
    query: String,
    state: Mutex<ResearchState>,
    meter: CostMeter,
}

impl Aggregator {
    pub fn new(query: impl Into<String>, costs: CostModel) -> Self {
        Self {
            query: query.into(),
            state: Mutex::new(ResearchState::default()),
            meter: CostMeter::new(costs),
        }
    }

    pub fn meter(&self) -> &CostMeter {
        &self.meter
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ResearchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically mark URLs as visited. Returns the URLs this caller now
    /// owns, as given (trimmed) and in input order. The normalized form is
    /// only the dedup key; anything whose key was already claimed is skipped.
    pub fn claim_urls<S: AsRef<str>>(&self, urls: &[S]) -> Vec<String> {
        let mut state = self.state();
        let mut claimed = Vec::new();
        for url in urls {
            let url = url.as_ref().trim();
            let key = normalize_url(url);
            if key.is_empty() {
                continue;
            }
            if state.visited_set.insert(key) {
                state.visited.push(url.to_string());
                claimed.push(url.to_string());
            }
        }
        claimed
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.state().visited_set.contains(&normalize_url(url))
    }

    /// Remember sub-queries as planned, for the corpus trace.
    pub fn note_planned(&self, sub_queries: &[SubQuery]) {
        self.state().sub_queries.extend(sub_queries.iter().cloned());
    }

    /// Merge one finished sub-query into the state.
    pub fn record(&self, outcome: SubQueryOutcome) -> RecordSummary {
        let mut state = self.state();
        let mut summary = RecordSummary::default();

        for learning in outcome.learnings {
            let learning = learning.trim().to_string();
            if learning.is_empty() {
                continue;
            }
            if state.learning_keys.insert(normalize_text(&learning)) {
                state.learnings.push(learning.clone());
                summary.new_learnings.push(learning);
            }
        }

        for chunk in &outcome.chunks {
            let key = normalize_url(&chunk.url);
            if state.citation_urls.insert(key) {
                state.citations.push(Citation {
                    url: chunk.url.clone(),
                    title: chunk.title.clone(),
                });
                summary.new_citations += 1;
            }
        }

        if let Some(section) = render_section(
            &outcome.sub_query.text,
            &outcome.chunks,
            &outcome.external_context,
        ) {
            state.sections.push(section);
        }
        state.chunks.extend(outcome.chunks);

        debug!(
            sub_query = %outcome.sub_query.text,
            new_learnings = summary.new_learnings.len(),
            new_citations = summary.new_citations,
            "Recorded sub-query outcome"
        );
        summary
    }

    /// Deduplicated learnings gathered so far.
    pub fn snapshot_learnings(&self) -> Vec<String> {
        self.state().learnings.clone()
    }

    pub fn visited_count(&self) -> usize {
        self.state().visited.len()
    }

    /// Immutable snapshot for the report writer.
    pub fn finalize(&self, levels_completed: usize, termination: Termination) -> ResearchCorpus {
        let state = self.state();
        ResearchCorpus {
            query: self.query.clone(),
            context: state.sections.join("\n\n"),
            chunks: state.chunks.clone(),
            citations: state.citations.clone(),
            visited_urls: state.visited.clone(),
            cost: self.meter.total(),
            learnings: state.learnings.clone(),
            sub_queries: state.sub_queries.clone(),
            levels_completed,
            termination,
        }
    }
}

fn render_section(sub_query: &str, chunks: &[ContextChunk], external: &str) -> Option<String> {
    let external = external.trim();
    if chunks.is_empty() && external.is_empty() {
        return None;
    }
    let mut section = format!("## {sub_query}");
    if !external.is_empty() {
        section.push_str("\n\nExternal tools:\n");
        section.push_str(external);
    }
    for chunk in chunks {
        section.push_str(&format!(
            "\n\nSource: {}\nTitle: {}\nContent: {}",
            chunk.url, chunk.title, chunk.text
        ));
    }
    Some(section)
}
