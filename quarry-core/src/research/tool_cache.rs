//! External tool invocation and its reuse policy.
//!
//! The policy is picked once per run from [`McpStrategy`]:
//!
//! - `disabled` never calls a tool.
//! - `fast` calls every tool once with the root query and hands the same
//!   context to every sub-query. A failed first call is cached as empty.
//!   The engine primes it before the first level, outside any per-task
//!   deadline, so a slow tool is never restarted by a cancelled task.
//! - `deep` calls every tool with each sub-query and caches nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::aggregator::{CallKind, CostMeter};
use crate::config::McpStrategy;
use crate::error::ToolError;

/// A specialized data source queried alongside web search.
#[async_trait]
pub trait ExternalTool: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, query: &str) -> Result<String, ToolError>;
}

/// The single cached value of a `fast` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Root query the value was computed for.
    pub key: String,
    pub strategy: McpStrategy,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// Every configured tool, invoked concurrently.
#[derive(Clone)]
pub struct ToolSet {
    tools: Vec<Arc<dyn ExternalTool>>,
    timeout: Duration,
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new(Vec::new(), Duration::from_secs(60))
    }
}

impl ToolSet {
    pub fn new(tools: Vec<Arc<dyn ExternalTool>>, timeout: Duration) -> Self {
        Self { tools, timeout }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Invoke every tool with `query`; failures contribute nothing.
    pub async fn invoke_all(&self, query: &str, meter: &CostMeter) -> String {
        let calls = self.tools.iter().map(|tool| async move {
            let result = match tokio::time::timeout(self.timeout, tool.invoke(query)).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout {
                    name: tool.name().to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }),
            };
            meter.charge(CallKind::Tool);
            match result {
                Ok(text) if text.trim().is_empty() => None,
                Ok(text) => Some(format!("[{}]\n{}", tool.name(), text.trim())),
                Err(e) => {
                    warn!(tool = tool.name(), query, error = %e, "External tool failed");
                    None
                }
            }
        });
        join_all(calls)
            .await
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// How external tool context is obtained for a sub-query.
#[async_trait]
pub trait ToolCachePolicy: Send + Sync {
    fn strategy(&self) -> McpStrategy;

    async fn get_or_compute(
        &self,
        root_query: &str,
        sub_query: &str,
        meter: &CostMeter,
    ) -> String;

    /// Warm any run-wide cache before sub-queries start.
    async fn prime(&self, _root_query: &str, _meter: &CostMeter) {}

    /// The cached entry, for policies that keep one.
    fn cache_entry(&self) -> Option<CacheEntry> {
        None
    }
}

#[derive(Debug, Default)]
pub struct DisabledPolicy;

#[async_trait]
impl ToolCachePolicy for DisabledPolicy {
    fn strategy(&self) -> McpStrategy {
        McpStrategy::Disabled
    }

    async fn get_or_compute(
        &self,
        _root_query: &str,
        _sub_query: &str,
        _meter: &CostMeter,
    ) -> String {
        String::new()
    }
}

/// Run-scoped cache keyed by the root query.
pub struct FastPolicy {
    tools: ToolSet,
    entry: OnceCell<CacheEntry>,
}

impl FastPolicy {
    pub fn new(tools: ToolSet) -> Self {
        Self {
            tools,
            entry: OnceCell::new(),
        }
    }

    async fn entry(&self, root_query: &str, meter: &CostMeter) -> &CacheEntry {
        self.entry
            .get_or_init(|| async {
                let value = self.tools.invoke_all(root_query, meter).await;
                info!(
                    tools = self.tools.len(),
                    chars = value.len(),
                    "Cached external tool context for root query"
                );
                CacheEntry {
                    key: root_query.to_string(),
                    strategy: McpStrategy::Fast,
                    value,
                    created_at: Utc::now(),
                }
            })
            .await
    }
}

#[async_trait]
impl ToolCachePolicy for FastPolicy {
    fn strategy(&self) -> McpStrategy {
        McpStrategy::Fast
    }

    async fn get_or_compute(
        &self,
        root_query: &str,
        sub_query: &str,
        meter: &CostMeter,
    ) -> String {
        let entry = self.entry(root_query, meter).await;
        if entry.key != root_query {
            warn!(
                cached = %entry.key,
                requested = root_query,
                "Fast tool cache is scoped to one root query; reusing cached value"
            );
        }
        debug!(sub_query, "Serving cached external tool context");
        entry.value.clone()
    }

    async fn prime(&self, root_query: &str, meter: &CostMeter) {
        self.entry(root_query, meter).await;
    }

    fn cache_entry(&self) -> Option<CacheEntry> {
        self.entry.get().cloned()
    }
}

/// No caching: every sub-query gets its own tool calls.
pub struct DeepPolicy {
    tools: ToolSet,
}

impl DeepPolicy {
    pub fn new(tools: ToolSet) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl ToolCachePolicy for DeepPolicy {
    fn strategy(&self) -> McpStrategy {
        McpStrategy::Deep
    }

    async fn get_or_compute(
        &self,
        _root_query: &str,
        sub_query: &str,
        meter: &CostMeter,
    ) -> String {
        self.tools.invoke_all(sub_query, meter).await
    }
}

/// Build a fresh policy for one run.
pub fn policy_for(strategy: McpStrategy, tools: ToolSet) -> Arc<dyn ToolCachePolicy> {
    if tools.is_empty() {
        return Arc::new(DisabledPolicy);
    }
    match strategy {
        McpStrategy::Disabled => Arc::new(DisabledPolicy),
        McpStrategy::Fast => Arc::new(FastPolicy::new(tools)),
        McpStrategy::Deep => Arc::new(DeepPolicy::new(tools)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingTool {
        calls: AtomicUsize,
        queries: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ExternalTool for RecordingTool {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn invoke(&self, query: &str) -> Result<String, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().unwrap().push(query.to_string());
            tokio::task::yield_now().await;
            if self.fail {
                Err(ToolError::Invocation {
                    name: "recorder".into(),
                    message: "server crashed".into(),
                })
            } else {
                Ok(format!("facts about {query}"))
            }
        }
    }

    fn toolset(tool: &Arc<RecordingTool>) -> ToolSet {
        ToolSet::new(
            vec![tool.clone() as Arc<dyn ExternalTool>],
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_disabled_never_invokes() {
        let tool = Arc::new(RecordingTool::default());
        let policy = policy_for(McpStrategy::Disabled, toolset(&tool));
        let meter = CostMeter::default();
        for i in 0..5 {
            let ctx = policy.get_or_compute("root", &format!("sub {i}"), &meter).await;
            assert!(ctx.is_empty());
        }
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
        assert!(policy.cache_entry().is_none());
    }

    #[tokio::test]
    async fn test_fast_invokes_once_with_root_query() {
        let tool = Arc::new(RecordingTool::default());
        let policy = policy_for(McpStrategy::Fast, toolset(&tool));
        let meter = CostMeter::default();
        let results = join_all((0..5).map(|i| {
            let policy = policy.clone();
            let meter = &meter;
            async move { policy.get_or_compute("root", &format!("sub {i}"), meter).await }
        }))
        .await;

        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*tool.queries.lock().unwrap(), vec!["root".to_string()]);
        assert!(results.iter().all(|r| r == "[recorder]\nfacts about root"));
        let entry = policy.cache_entry().unwrap();
        assert_eq!(entry.key, "root");
        assert_eq!(entry.strategy, McpStrategy::Fast);
        assert_eq!(meter.calls(CallKind::Tool), 1);
    }

    #[tokio::test]
    async fn test_fast_failure_cached_as_empty() {
        let tool = Arc::new(RecordingTool {
            fail: true,
            ..Default::default()
        });
        let policy = policy_for(McpStrategy::Fast, toolset(&tool));
        let meter = CostMeter::default();
        assert!(policy.get_or_compute("root", "a", &meter).await.is_empty());
        assert!(policy.get_or_compute("root", "b", &meter).await.is_empty());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_primed_cache_serves_without_waiting() {
        let tool = Arc::new(RecordingTool::default());
        let policy = policy_for(McpStrategy::Fast, toolset(&tool));
        let meter = CostMeter::default();
        policy.prime("root", &meter).await;
        let cut_short = tokio::time::timeout(
            Duration::from_millis(1),
            policy.get_or_compute("root", "a", &meter),
        )
        .await;
        assert_eq!(cut_short.unwrap(), "[recorder]\nfacts about root");
        let later = policy.get_or_compute("root", "b", &meter).await;
        assert_eq!(later, "[recorder]\nfacts about root");
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prime_is_noop_for_uncached_policies() {
        let tool = Arc::new(RecordingTool::default());
        let meter = CostMeter::default();
        for strategy in [McpStrategy::Disabled, McpStrategy::Deep] {
            policy_for(strategy, toolset(&tool)).prime("root", &meter).await;
        }
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deep_invokes_per_sub_query() {
        let tool = Arc::new(RecordingTool::default());
        let policy = policy_for(McpStrategy::Deep, toolset(&tool));
        let meter = CostMeter::default();
        for i in 0..5 {
            let ctx = policy.get_or_compute("root", &format!("sub {i}"), &meter).await;
            assert_eq!(ctx, format!("[recorder]\nfacts about sub {i}"));
        }
        assert_eq!(tool.calls.load(Ordering::SeqCst), 5);
        assert!(policy.cache_entry().is_none());
    }

    #[tokio::test]
    async fn test_no_tools_means_disabled() {
        let policy = policy_for(McpStrategy::Deep, ToolSet::default());
        assert_eq!(policy.strategy(), McpStrategy::Disabled);
    }

    #[tokio::test]
    async fn test_toolset_skips_failing_tool() {
        let good = Arc::new(RecordingTool::default());
        let bad = Arc::new(RecordingTool {
            fail: true,
            ..Default::default()
        });
        let set = ToolSet::new(
            vec![
                good.clone() as Arc<dyn ExternalTool>,
                bad.clone() as Arc<dyn ExternalTool>,
            ],
            Duration::from_secs(5),
        );
        let ctx = set.invoke_all("q", &CostMeter::default()).await;
        assert_eq!(ctx, "[recorder]\nfacts about q");
    }
}
