//! Level-by-level recursive expansion.
//!
//! Each level's batch runs as one task per sub-query behind a semaphore of
//! width `concurrency_limit`. The level ends at a barrier, after which the
//! stop conditions are checked in a fixed order and, if none applies, the
//! next batch is planned from the sub-queries that produced new learnings.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aggregator::RecordSummary;
use super::observer::{NoOpObserver, ResearchObserver};
use super::query::{SubQuery, Termination, normalize_text};
use crate::config::ResearchConfig;
use crate::error::ResearchError;

/// Work the expander schedules. Implemented by the engine for one run.
#[async_trait]
pub trait LevelRunner: Send + Sync + 'static {
    /// Run the full pipeline for one sub-query and record its outcome.
    async fn run_sub_query(&self, sub_query: SubQuery) -> RecordSummary;

    /// Plan up to `count` follow-ups of `parent` from its new learnings.
    async fn plan_follow_ups(
        &self,
        parent: &SubQuery,
        learnings: &[String],
        count: usize,
    ) -> Vec<SubQuery>;

    /// Cost charged so far in this run.
    fn cost_spent(&self) -> f64;
}

/// Bounds the expansion runs under.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionLimits {
    pub max_depth: usize,
    pub breadth: usize,
    pub max_sub_queries: usize,
    pub concurrency_limit: usize,
    pub task_timeout: Duration,
    pub time_budget: Duration,
    pub cost_budget: Option<f64>,
}

impl From<&ResearchConfig> for ExpansionLimits {
    fn from(config: &ResearchConfig) -> Self {
        Self {
            max_depth: config.max_depth.max(1),
            breadth: config.breadth.max(1),
            max_sub_queries: config.max_sub_queries.max(1),
            concurrency_limit: config.concurrency_limit.max(1),
            task_timeout: config.task_timeout(),
            time_budget: config.time_budget(),
            cost_budget: config.cost_budget,
        }
    }
}

/// How an expansion ended.
#[derive(Debug, Clone)]
pub struct ExpansionReport {
    pub levels_completed: usize,
    pub termination: Termination,
    /// Every sub-query dispatched, in planning order.
    pub planned: Vec<SubQuery>,
}

pub struct RecursiveExpander {
    limits: ExpansionLimits,
    observer: Arc<dyn ResearchObserver>,
}

impl RecursiveExpander {
    pub fn new(limits: ExpansionLimits) -> Self {
        Self {
            limits,
            observer: Arc::new(NoOpObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResearchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn limits(&self) -> &ExpansionLimits {
        &self.limits
    }

    /// Run levels starting from `first_level` until a stop condition holds.
    ///
    /// Only cancellation is an error. The first level is truncated to
    /// `max_sub_queries`.
    pub async fn run<R: LevelRunner>(
        &self,
        runner: Arc<R>,
        first_level: Vec<SubQuery>,
        cancel: &CancellationToken,
    ) -> Result<ExpansionReport, ResearchError> {
        let started = Instant::now();
        let budget_deadline = started + self.limits.time_budget;

        let mut planned_keys = HashSet::new();
        let mut batch: Vec<SubQuery> = first_level
            .into_iter()
            .filter(|sq| planned_keys.insert(normalize_text(&sq.text)))
            .take(self.limits.max_sub_queries)
            .collect();
        let mut planned = batch.clone();
        let mut level = 1;

        let termination = loop {
            if cancel.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }

            info!(level, sub_queries = batch.len(), "Starting research level");
            self.observer.on_level_start(level, batch.len());
            let completed = self
                .run_level(&runner, &batch, budget_deadline, cancel)
                .await?;
            let new_learnings: usize = completed
                .iter()
                .map(|(_, summary)| summary.new_learnings.len())
                .sum();
            self.observer.on_level_complete(level, new_learnings);
            info!(
                level,
                completed = completed.len(),
                new_learnings,
                elapsed_ms = started.elapsed().as_millis() as u64,
                cost = runner.cost_spent(),
                "Research level complete"
            );

            if level >= self.limits.max_depth {
                break Termination::MaxDepth;
            }
            if new_learnings == 0 {
                break Termination::Converged;
            }
            if self.budget_exhausted(budget_deadline, runner.cost_spent()) {
                break Termination::BudgetExhausted;
            }
            if planned.len() >= self.limits.max_sub_queries {
                break Termination::SubQueryCap;
            }

            let next = self
                .plan_next_level(runner.as_ref(), &completed, planned.len(), &mut planned_keys)
                .await;
            if cancel.is_cancelled() {
                return Err(ResearchError::Cancelled);
            }
            if next.is_empty() {
                break Termination::Converged;
            }
            planned.extend(next.iter().cloned());
            batch = next;
            level += 1;
        };

        info!(levels = level, %termination, "Research expansion finished");
        self.observer.on_finish(termination);
        Ok(ExpansionReport {
            levels_completed: level,
            termination,
            planned,
        })
    }

    fn budget_exhausted(&self, deadline: Instant, cost: f64) -> bool {
        let out_of_time = Instant::now() >= deadline;
        let out_of_money = self.limits.cost_budget.is_some_and(|budget| cost >= budget);
        out_of_time || out_of_money
    }

    /// Run one batch and wait for all of it. Returns the sub-queries that
    /// finished within their deadline, in batch order.
    async fn run_level<R: LevelRunner>(
        &self,
        runner: &Arc<R>,
        batch: &[SubQuery],
        budget_deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<(SubQuery, RecordSummary)>, ResearchError> {
        let semaphore = Arc::new(Semaphore::new(self.limits.concurrency_limit));
        let task_timeout = self.limits.task_timeout;

        let handles: Vec<_> = batch
            .iter()
            .cloned()
            .map(|sub_query| {
                let runner = runner.clone();
                let sem = semaphore.clone();
                tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.ok()?;
                    let remaining = budget_deadline.saturating_duration_since(Instant::now());
                    let deadline = task_timeout.min(remaining);
                    match tokio::time::timeout(deadline, runner.run_sub_query(sub_query.clone()))
                        .await
                    {
                        Ok(summary) => Some((sub_query, summary)),
                        Err(_) => {
                            warn!(
                                sub_query = %sub_query.text,
                                timeout_ms = deadline.as_millis() as u64,
                                "Sub-query task timed out, discarding its results"
                            );
                            None
                        }
                    }
                })
            })
            .collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let joined = tokio::select! {
            joined = join_all(handles) => joined,
            _ = cancel.cancelled() => {
                for abort in &aborts {
                    abort.abort();
                }
                warn!(in_flight = aborts.len(), "Research cancelled, aborting level");
                return Err(ResearchError::Cancelled);
            }
        };

        let mut completed = Vec::with_capacity(joined.len());
        for result in joined {
            match result {
                Ok(Some(done)) => completed.push(done),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Sub-query task failed"),
            }
        }
        Ok(completed)
    }

    /// One planning call per productive sub-query, deduplicated against
    /// everything planned so far and capped by the run total.
    async fn plan_next_level<R: LevelRunner>(
        &self,
        runner: &R,
        completed: &[(SubQuery, RecordSummary)],
        already_planned: usize,
        planned_keys: &mut HashSet<String>,
    ) -> Vec<SubQuery> {
        let room = self.limits.max_sub_queries.saturating_sub(already_planned);
        let count = self.limits.breadth.min(room);
        let calls = completed
            .iter()
            .filter(|(_, summary)| !summary.new_learnings.is_empty())
            .map(|(parent, summary)| runner.plan_follow_ups(parent, &summary.new_learnings, count));
        let plans = join_all(calls).await;

        let next: Vec<SubQuery> = plans
            .into_iter()
            .flat_map(|plan| plan.into_iter().take(count))
            .filter(|sq| planned_keys.insert(normalize_text(&sq.text)))
            .take(room)
            .collect();
        debug!(planned = next.len(), room, "Planned next research level");
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Every sub-query yields one learning named after it; follow-ups are
    /// `"{parent}/{i}"`.
    #[derive(Default)]
    struct TreeRunner {
        ran: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay_ms: u64,
        barren_from_depth: Option<usize>,
        cost_per_query: f64,
    }

    #[async_trait]
    impl LevelRunner for TreeRunner {
        async fn run_sub_query(&self, sub_query: SubQuery) -> RecordSummary {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.ran.lock().unwrap().push(sub_query.text.clone());
            let barren = self
                .barren_from_depth
                .is_some_and(|depth| sub_query.depth >= depth);
            RecordSummary {
                new_learnings: if barren {
                    vec![]
                } else {
                    vec![format!("learned {}", sub_query.text)]
                },
                new_citations: 0,
            }
        }

        async fn plan_follow_ups(
            &self,
            parent: &SubQuery,
            _learnings: &[String],
            count: usize,
        ) -> Vec<SubQuery> {
            (0..count)
                .map(|i| SubQuery::child_of(parent, format!("{}/{i}", parent.text)))
                .collect()
        }

        fn cost_spent(&self) -> f64 {
            self.ran.lock().unwrap().len() as f64 * self.cost_per_query
        }
    }

    fn limits(max_depth: usize, breadth: usize) -> ExpansionLimits {
        ExpansionLimits {
            max_depth,
            breadth,
            max_sub_queries: 100,
            concurrency_limit: 4,
            task_timeout: Duration::from_secs(30),
            time_budget: Duration::from_secs(300),
            cost_budget: None,
        }
    }

    fn roots(n: usize) -> Vec<SubQuery> {
        (0..n).map(|i| SubQuery::root(format!("q{i}"))).collect()
    }

    #[tokio::test]
    async fn test_depth_and_breadth_bound() {
        let runner = Arc::new(TreeRunner::default());
        let report = RecursiveExpander::new(limits(2, 3))
            .run(runner.clone(), roots(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::MaxDepth);
        assert_eq!(report.levels_completed, 2);
        assert_eq!(runner.ran.lock().unwrap().len(), 12);
        assert!(report.planned.iter().all(|sq| sq.depth <= 2));
    }

    #[tokio::test]
    async fn test_single_level_never_expands() {
        let runner = Arc::new(TreeRunner::default());
        let report = RecursiveExpander::new(limits(1, 3))
            .run(runner.clone(), roots(2), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.levels_completed, 1);
        assert_eq!(runner.ran.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_converges_on_barren_level() {
        let runner = Arc::new(TreeRunner {
            barren_from_depth: Some(2),
            ..Default::default()
        });
        let report = RecursiveExpander::new(limits(5, 2))
            .run(runner.clone(), roots(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::Converged);
        assert_eq!(report.levels_completed, 2);
        assert_eq!(runner.ran.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cost_budget_stops_between_levels() {
        let runner = Arc::new(TreeRunner {
            cost_per_query: 1.0,
            ..Default::default()
        });
        let mut lim = limits(3, 2);
        lim.cost_budget = Some(2.0);
        let report = RecursiveExpander::new(lim)
            .run(runner.clone(), roots(2), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::BudgetExhausted);
        assert_eq!(report.levels_completed, 1);
        assert_eq!(runner.ran.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cost_under_budget_keeps_expanding() {
        let runner = Arc::new(TreeRunner {
            cost_per_query: 1.0,
            ..Default::default()
        });
        let mut lim = limits(3, 2);
        lim.cost_budget = Some(5.0);
        let report = RecursiveExpander::new(lim)
            .run(runner.clone(), roots(2), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::BudgetExhausted);
        assert_eq!(report.levels_completed, 2);
        assert_eq!(runner.ran.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_sub_query_cap() {
        let runner = Arc::new(TreeRunner::default());
        let mut lim = limits(10, 3);
        lim.max_sub_queries = 5;
        let report = RecursiveExpander::new(lim)
            .run(runner.clone(), roots(2), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.planned.len(), 5);
        assert_eq!(report.termination, Termination::SubQueryCap);
        assert_eq!(runner.ran.lock().unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound() {
        let runner = Arc::new(TreeRunner {
            delay_ms: 100,
            ..Default::default()
        });
        let mut lim = limits(1, 3);
        lim.concurrency_limit = 2;
        RecursiveExpander::new(lim)
            .run(runner.clone(), roots(7), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
        assert_eq!(runner.ran.lock().unwrap().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_task_discarded() {
        let runner = Arc::new(TreeRunner {
            delay_ms: 5_000,
            ..Default::default()
        });
        let mut lim = limits(3, 2);
        lim.task_timeout = Duration::from_secs(1);
        let report = RecursiveExpander::new(lim)
            .run(runner.clone(), roots(2), &CancellationToken::new())
            .await
            .unwrap();
        assert!(runner.ran.lock().unwrap().is_empty());
        assert_eq!(report.termination, Termination::Converged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_budget_stops_between_levels() {
        let runner = Arc::new(TreeRunner {
            delay_ms: 2_000,
            ..Default::default()
        });
        let mut lim = limits(5, 1);
        lim.concurrency_limit = 1;
        lim.time_budget = Duration::from_secs(3);
        let report = RecursiveExpander::new(lim)
            .run(runner.clone(), roots(2), &CancellationToken::new())
            .await
            .unwrap();
        // The second task only gets the remaining second and is cut off.
        assert_eq!(*runner.ran.lock().unwrap(), vec!["q0".to_string()]);
        assert_eq!(report.termination, Termination::BudgetExhausted);
        assert_eq!(report.levels_completed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = RecursiveExpander::new(limits(2, 2))
            .run(Arc::new(TreeRunner::default()), roots(1), &cancel)
            .await;
        assert!(matches!(result, Err(ResearchError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_level_aborts() {
        let runner = Arc::new(TreeRunner {
            delay_ms: 10_000,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });
        let result = RecursiveExpander::new(limits(2, 2))
            .run(runner.clone(), roots(2), &cancel)
            .await;
        assert!(matches!(result, Err(ResearchError::Cancelled)));
        assert!(runner.ran.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_follow_ups_dropped() {
        struct EchoRunner;

        #[async_trait]
        impl LevelRunner for EchoRunner {
            async fn run_sub_query(&self, sub_query: SubQuery) -> RecordSummary {
                RecordSummary {
                    new_learnings: vec![sub_query.text],
                    new_citations: 0,
                }
            }

            async fn plan_follow_ups(
                &self,
                parent: &SubQuery,
                _learnings: &[String],
                _count: usize,
            ) -> Vec<SubQuery> {
                vec![
                    SubQuery::child_of(parent, "Shared follow-up"),
                    SubQuery::child_of(parent, "q0"),
                ]
            }

            fn cost_spent(&self) -> f64 {
                0.0
            }
        }

        let report = RecursiveExpander::new(limits(2, 2))
            .run(Arc::new(EchoRunner), roots(2), &CancellationToken::new())
            .await
            .unwrap();
        let texts: Vec<&str> = report.planned.iter().map(|sq| sq.text.as_str()).collect();
        assert_eq!(texts, vec!["q0", "q1", "Shared follow-up"]);
    }
}
