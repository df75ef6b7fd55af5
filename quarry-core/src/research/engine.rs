//! Research engine: wires the collaborators into one run.
//!
//! A run plans the root question, hands the first level to the
//! [`RecursiveExpander`], and returns the aggregator's snapshot. All state
//! (visited URLs, learnings, the `fast` tool cache, the cost meter) is
//! created fresh per run.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aggregator::{Aggregator, CallKind, RecordSummary, SubQueryOutcome};
use super::curator::{ContextCurator, SimilarityScorer};
use super::expander::{ExpansionLimits, LevelRunner, RecursiveExpander};
use super::learnings::{HeuristicLearningExtractor, LearningExtractor};
use super::observer::{NoOpObserver, ResearchObserver};
use super::planner::{QueryPlanner, plan_sub_queries};
use super::query::{ContextChunk, Query, ResearchCorpus, SubQuery};
use super::retriever::RetrieverSet;
use super::scraper::ScrapeExecutor;
use super::tool_cache::{ExternalTool, ToolCachePolicy, ToolSet, policy_for};
use crate::config::{CostModel, CuratorConfig, ResearchConfig};
use crate::error::ResearchError;

/// The research orchestration engine.
pub struct ResearchEngine {
    planner: Arc<dyn QueryPlanner>,
    retrievers: RetrieverSet,
    scraper: Arc<ScrapeExecutor>,
    scorer: Arc<dyn SimilarityScorer>,
    tools: ToolSet,
    extractor: Arc<dyn LearningExtractor>,
    costs: CostModel,
    curator: CuratorConfig,
    domains: Vec<String>,
    observer: Arc<dyn ResearchObserver>,
}

impl ResearchEngine {
    pub fn new(
        planner: Arc<dyn QueryPlanner>,
        retrievers: RetrieverSet,
        scraper: ScrapeExecutor,
        scorer: Arc<dyn SimilarityScorer>,
    ) -> Self {
        Self {
            planner,
            retrievers,
            scraper: Arc::new(scraper),
            scorer,
            tools: ToolSet::default(),
            extractor: Arc::new(HeuristicLearningExtractor::default()),
            costs: CostModel::default(),
            curator: CuratorConfig::default(),
            domains: Vec::new(),
            observer: Arc::new(NoOpObserver),
        }
    }

    /// External tools consulted according to the run's `mcp_strategy`.
    pub fn with_tools(mut self, tools: Vec<Arc<dyn ExternalTool>>, timeout: Duration) -> Self {
        self.tools = ToolSet::new(tools, timeout);
        self
    }

    pub fn with_learning_extractor(mut self, extractor: Arc<dyn LearningExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_costs(mut self, costs: CostModel) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_curator_config(mut self, curator: CuratorConfig) -> Self {
        self.curator = curator;
        self
    }

    /// Restrict every search to these domains.
    pub fn with_domains(mut self, domains: Vec<String>) -> Self {
        self.domains = domains;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResearchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn planner_name(&self) -> &str {
        self.planner.name()
    }

    /// Run one research session to completion.
    pub async fn run(
        &self,
        question: &str,
        config: &ResearchConfig,
    ) -> Result<ResearchCorpus, ResearchError> {
        self.run_with_cancel(question, config, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), aborting with [`ResearchError::Cancelled`]
    /// once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        question: &str,
        config: &ResearchConfig,
        cancel: CancellationToken,
    ) -> Result<ResearchCorpus, ResearchError> {
        config
            .ensure_valid()
            .map_err(|e| ResearchError::InvalidConfig {
                message: e.to_string(),
            })?;
        let query = Query::new(question, config);
        if query.text.is_empty() {
            return Err(ResearchError::NoSubQueries { query: query.text });
        }
        info!(
            query_id = %query.id,
            query = %query.text,
            max_depth = query.max_depth,
            breadth = query.breadth,
            strategy = %config.mcp_strategy,
            "Starting research run"
        );

        let run = Arc::new(RunContext {
            root: query.text.clone(),
            domains: self.domains.clone(),
            planner: self.planner.clone(),
            retrievers: self.retrievers.clone(),
            scraper: self.scraper.clone(),
            curator: ContextCurator::new(self.scorer.clone(), config, &self.curator),
            tools: policy_for(config.mcp_strategy, self.tools.clone()),
            extractor: self.extractor.clone(),
            aggregator: Aggregator::new(query.text.clone(), self.costs.clone()),
            observer: self.observer.clone(),
        });

        // Fast tool context is filled alongside root planning so no
        // sub-query task deadline can cut the shared call short.
        let first_level = tokio::select! {
            (planned, ()) = async {
                tokio::join!(
                    run.plan_root(&query, config.include_root_query),
                    run.tools.prime(&run.root, run.aggregator.meter()),
                )
            } => planned,
            _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
        };
        if first_level.is_empty() {
            warn!(query = %query.text, "Root planning produced no sub-queries");
            return Err(ResearchError::NoSubQueries { query: query.text });
        }

        let expander = RecursiveExpander::new(ExpansionLimits::from(config))
            .with_observer(self.observer.clone());
        let report = expander.run(run.clone(), first_level, &cancel).await?;

        run.aggregator.note_planned(&report.planned);
        let corpus = run
            .aggregator
            .finalize(report.levels_completed, report.termination);
        if corpus.is_empty() {
            warn!(query = %query.text, "Research produced an empty corpus");
        }
        info!(
            query_id = %query.id,
            levels = corpus.levels_completed,
            termination = %corpus.termination,
            citations = corpus.citations.len(),
            visited = corpus.visited_urls.len(),
            learnings = corpus.learnings.len(),
            cost = corpus.cost,
            "Research run complete"
        );
        Ok(corpus)
    }
}

/// Per-run state shared by every sub-query task.
struct RunContext {
    root: String,
    domains: Vec<String>,
    planner: Arc<dyn QueryPlanner>,
    retrievers: RetrieverSet,
    scraper: Arc<ScrapeExecutor>,
    curator: ContextCurator,
    tools: Arc<dyn ToolCachePolicy>,
    extractor: Arc<dyn LearningExtractor>,
    aggregator: Aggregator,
    observer: Arc<dyn ResearchObserver>,
}

impl RunContext {
    /// Level one: up to `breadth` planned sub-queries, with the literal
    /// question taking one slot when `include_root` is set.
    async fn plan_root(&self, query: &Query, include_root: bool) -> Vec<SubQuery> {
        let slots = query.breadth.min(query.max_sub_queries);
        let count = if include_root { slots.saturating_sub(1) } else { slots };
        let mut planned = self.plan(&query.text, &[], count, None).await;
        if include_root {
            planned.push(SubQuery::root(query.text.clone()));
        }
        planned
    }

    async fn plan(
        &self,
        query: &str,
        learnings: &[String],
        count: usize,
        parent: Option<&SubQuery>,
    ) -> Vec<SubQuery> {
        if count == 0 {
            return Vec::new();
        }
        let planned =
            plan_sub_queries(self.planner.as_ref(), query, learnings, count, parent).await;
        if self.planner.is_metered() {
            self.aggregator.meter().charge(CallKind::Plan);
        }
        planned
    }

    async fn extract_learnings(
        &self,
        sub_query: &SubQuery,
        chunks: &[ContextChunk],
        external: &str,
    ) -> Vec<String> {
        if chunks.is_empty() && external.trim().is_empty() {
            return Vec::new();
        }
        let result = self.extractor.extract(&sub_query.text, chunks, external).await;
        if self.extractor.is_metered() {
            self.aggregator.meter().charge(CallKind::Learning);
        }
        match result {
            Ok(learnings) => learnings,
            Err(e) => {
                warn!(sub_query = %sub_query.text, error = %e, "Learning extraction failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl LevelRunner for RunContext {
    async fn run_sub_query(&self, sub_query: SubQuery) -> RecordSummary {
        let meter = self.aggregator.meter();
        let (external, candidates) = tokio::join!(
            self.tools.get_or_compute(&self.root, &sub_query.text, meter),
            self.retrievers.search(&sub_query.text, &self.domains, meter),
        );

        let urls: Vec<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
        let claimed = self.aggregator.claim_urls(&urls);
        debug!(
            sub_query = %sub_query.text,
            candidates = candidates.len(),
            claimed = claimed.len(),
            "Claimed URLs for scraping"
        );

        let mut documents = self.scraper.fetch(&claimed, meter).await;
        for doc in documents.iter_mut().filter(|d| d.title.trim().is_empty()) {
            if let Some(candidate) = candidates.iter().find(|c| c.url.trim() == doc.url) {
                doc.title = candidate.title.clone();
            }
        }

        let chunks = self.curator.filter(&documents, &sub_query.text, meter).await;
        let learnings = self.extract_learnings(&sub_query, &chunks, &external).await;
        let chunk_count = chunks.len();

        let summary = self.aggregator.record(SubQueryOutcome {
            sub_query: sub_query.clone(),
            chunks,
            external_context: external,
            learnings,
        });
        self.observer
            .on_sub_query_complete(&sub_query, chunk_count, summary.new_learnings.len());
        summary
    }

    async fn plan_follow_ups(
        &self,
        parent: &SubQuery,
        learnings: &[String],
        count: usize,
    ) -> Vec<SubQuery> {
        self.plan(&parent.text, learnings, count, Some(parent)).await
    }

    fn cost_spent(&self) -> f64 {
        self.aggregator.meter().total()
    }
}
