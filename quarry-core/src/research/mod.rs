//! Research orchestration.
//!
//! A run moves through these stages for every sub-query:
//! 1. **Plan**: the root question is decomposed into sub-queries
//! 2. **Retrieve**: search backends are fanned out in parallel
//! 3. **Scrape**: claimed URLs are fetched through a bounded pool
//! 4. **Curate**: chunks are scored against the sub-query and budgeted
//! 5. **Expand**: new learnings seed the next level until a stop condition
//!
//! External tools run beside retrieval under the configured cache policy.

pub mod aggregator;
pub mod curator;
pub mod engine;
pub mod expander;
pub mod learnings;
pub mod observer;
pub mod planner;
pub mod query;
pub mod retriever;
pub mod scraper;
pub mod tool_cache;

pub use aggregator::{Aggregator, CallKind, CostMeter, RecordSummary, SubQueryOutcome};
pub use curator::{ContextCurator, EmbeddingScorer, SimilarityScorer, chunk_text};
pub use engine::ResearchEngine;
pub use expander::{ExpansionLimits, ExpansionReport, LevelRunner, RecursiveExpander};
pub use learnings::{HeuristicLearningExtractor, LearningExtractor, LlmLearningExtractor};
pub use observer::{NoOpObserver, ResearchObserver};
pub use planner::{HeuristicPlanner, LlmQueryPlanner, QueryPlanner, plan_sub_queries};
pub use query::{
    CandidateItem, Citation, ContextChunk, CorpusStatus, FetchStatus, Query, ResearchCorpus,
    ScrapedDocument, SubQuery, Termination, normalize_text, normalize_url,
};
pub use retriever::{RetrieverSet, SourceRetriever};
pub use scraper::{ScrapeExecutor, ScrapedPage, Scraper};
pub use tool_cache::{
    CacheEntry, DeepPolicy, DisabledPolicy, ExternalTool, FastPolicy, ToolCachePolicy, ToolSet,
    policy_for,
};
