//! Data model for a research run: queries, search hits, scraped documents,
//! curated chunks and the final corpus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ResearchConfig;

/// The root research question and the limits it runs under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub text: String,
    pub max_sub_queries: usize,
    pub max_depth: usize,
    pub breadth: usize,
    pub concurrency_limit: usize,
}

impl Query {
    pub fn new(text: impl Into<String>, config: &ResearchConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into().trim().to_string(),
            max_sub_queries: config.max_sub_queries,
            max_depth: config.max_depth,
            breadth: config.breadth,
            concurrency_limit: config.concurrency_limit,
        }
    }
}

/// A narrower, independently searchable question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuery {
    pub id: Uuid,
    pub text: String,
    /// 1-based research level that produced this sub-query.
    pub depth: usize,
    /// The sub-query this one was expanded from. Tracing only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,
}

impl SubQuery {
    /// A first-level sub-query planned directly from the root question.
    pub fn root(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            depth: 1,
            parent: None,
        }
    }

    /// A follow-up planned from `parent` one level deeper.
    pub fn child_of(parent: &SubQuery, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            depth: parent.depth + 1,
            parent: Some(parent.id),
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Backend that produced the hit.
    pub source: String,
}

/// Outcome of fetching a single URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchStatus {
    Fetched,
    Failed { reason: String },
}

/// Extracted content of one fetched page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedDocument {
    pub url: String,
    pub title: String,
    pub raw_text: String,
    pub images: Vec<String>,
    pub fetch_status: FetchStatus,
    /// Position of the URL in the retriever output; earlier wins score ties.
    pub rank: usize,
}

impl ScrapedDocument {
    pub fn is_fetched(&self) -> bool {
        matches!(self.fetch_status, FetchStatus::Fetched)
    }
}

/// A relevance-scored excerpt of a scraped document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub url: String,
    pub title: String,
    pub text: String,
    pub score: f32,
    /// Sub-query the score was computed against.
    pub sub_query: String,
    pub rank: usize,
    pub chunk_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
}

/// Why the expansion loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The configured number of levels ran.
    MaxDepth,
    /// A level produced no new learnings, or nothing was left to plan.
    Converged,
    /// Time or cost budget ran out between levels.
    BudgetExhausted,
    /// The run planned `max_sub_queries` sub-queries.
    SubQueryCap,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::MaxDepth => write!(f, "max depth reached"),
            Termination::Converged => write!(f, "converged"),
            Termination::BudgetExhausted => write!(f, "budget exhausted"),
            Termination::SubQueryCap => write!(f, "sub-query cap reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorpusStatus {
    /// Nothing usable was gathered. Callers treat this as a failed run.
    Empty,
    Populated,
}

/// Immutable result of one run, handed to the report writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchCorpus {
    pub query: String,
    /// Curated context sections joined in completion order.
    pub context: String,
    pub chunks: Vec<ContextChunk>,
    /// Unique by URL, in first-seen order.
    pub citations: Vec<Citation>,
    /// Every URL claimed for scraping, unique, in claim order.
    pub visited_urls: Vec<String>,
    pub cost: f64,
    pub learnings: Vec<String>,
    pub sub_queries: Vec<SubQuery>,
    pub levels_completed: usize,
    pub termination: Termination,
}

impl ResearchCorpus {
    pub fn status(&self) -> CorpusStatus {
        if self.context.trim().is_empty() && self.citations.is_empty() {
            CorpusStatus::Empty
        } else {
            CorpusStatus::Populated
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status() == CorpusStatus::Empty
    }
}

/// Canonical form used for URL dedup: fragment dropped, scheme and host
/// lowercased, a lone trailing slash on the path removed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let mut out = parsed.to_string();
            if parsed.query().is_none() && out.ends_with('/') && parsed.path() != "/" {
                out.pop();
            }
            out
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Canonical form used for text dedup of learnings and planned sub-queries.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '.' | '?' | '!' | ';' | ':'))
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_copies_limits() {
        let config = ResearchConfig {
            breadth: 4,
            max_depth: 3,
            ..Default::default()
        };
        let query = Query::new("  what is quantum annealing?  ", &config);
        assert_eq!(query.text, "what is quantum annealing?");
        assert_eq!(query.breadth, 4);
        assert_eq!(query.max_depth, 3);
    }

    #[test]
    fn test_child_sub_query_depth_and_parent() {
        let root = SubQuery::root("battery chemistry");
        let child = SubQuery::child_of(&root, "solid state electrolytes");
        assert_eq!(root.depth, 1);
        assert_eq!(child.depth, 2);
        assert_eq!(child.parent, Some(root.id));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/a/b/#section"),
            "https://example.com/a/b"
        );
        assert_eq!(normalize_url("https://example.com"), "https://example.com/");
        assert_eq!(
            normalize_url("https://example.com/a?x=1"),
            "https://example.com/a?x=1"
        );
        assert_eq!(normalize_url(" not a url "), "not a url");
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            normalize_text("  Rust   is FAST. "),
            normalize_text("rust is fast")
        );
        assert_eq!(normalize_text("Why?"), "why");
    }

    #[test]
    fn test_corpus_status() {
        let mut corpus = ResearchCorpus {
            query: "q".into(),
            context: String::new(),
            chunks: vec![],
            citations: vec![],
            visited_urls: vec!["https://a.example/".into()],
            cost: 3.0,
            learnings: vec![],
            sub_queries: vec![],
            levels_completed: 1,
            termination: Termination::Converged,
        };
        assert_eq!(corpus.status(), CorpusStatus::Empty);
        corpus.context = "Source: https://a.example/".into();
        assert_eq!(corpus.status(), CorpusStatus::Populated);
    }

    #[test]
    fn test_fetch_status_serialization() {
        let json = serde_json::to_string(&FetchStatus::Failed {
            reason: "timeout".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"failed","reason":"timeout"}"#);
    }
}
