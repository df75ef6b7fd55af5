//! Search backends and the per-sub-query fan-out across them.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::aggregator::{CallKind, CostMeter};
use super::query::{CandidateItem, normalize_url};
use crate::config::RetrievalConfig;
use crate::error::RetrieverError;

/// One search backend.
#[async_trait]
pub trait SourceRetriever: Send + Sync {
    fn name(&self) -> &str;

    /// Search for `query`, optionally restricted to `domains`.
    async fn search(
        &self,
        query: &str,
        domains: &[String],
    ) -> Result<Vec<CandidateItem>, RetrieverError>;
}

impl RetrieverError {
    /// Whether a single retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RetrieverError::Request { .. } | RetrieverError::Timeout { .. }
        )
    }
}

/// All configured backends, searched in parallel.
#[derive(Clone)]
pub struct RetrieverSet {
    backends: Vec<Arc<dyn SourceRetriever>>,
    timeout: Duration,
    max_results: usize,
}

impl RetrieverSet {
    pub fn new(
        backends: Vec<Arc<dyn SourceRetriever>>,
        timeout: Duration,
        max_results: usize,
    ) -> Self {
        Self {
            backends,
            timeout,
            max_results: max_results.max(1),
        }
    }

    pub fn from_config(backends: Vec<Arc<dyn SourceRetriever>>, config: &RetrievalConfig) -> Self {
        Self::new(backends, config.timeout(), config.max_results_per_query)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Query every backend concurrently.
    ///
    /// Results are concatenated in backend order, deduplicated by normalized
    /// URL (first occurrence wins) and truncated to `max_results`. A failing
    /// backend contributes nothing.
    pub async fn search(
        &self,
        query: &str,
        domains: &[String],
        meter: &CostMeter,
    ) -> Vec<CandidateItem> {
        let searches = self
            .backends
            .iter()
            .map(|backend| self.search_backend(backend.as_ref(), query, domains, meter));
        let per_backend = join_all(searches).await;

        let mut seen = HashSet::new();
        let merged: Vec<CandidateItem> = per_backend
            .into_iter()
            .flatten()
            .filter(|item| !item.url.trim().is_empty())
            .filter(|item| seen.insert(normalize_url(&item.url)))
            .take(self.max_results)
            .collect();

        debug!(
            sub_query = query,
            backends = self.backends.len(),
            results = merged.len(),
            "Search fan-out complete"
        );
        merged
    }

    async fn search_backend(
        &self,
        backend: &dyn SourceRetriever,
        query: &str,
        domains: &[String],
        meter: &CostMeter,
    ) -> Vec<CandidateItem> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let search = backend.search(query, domains);
            let result = match tokio::time::timeout(self.timeout, search).await {
                Ok(result) => result,
                Err(_) => Err(RetrieverError::Timeout {
                    backend: backend.name().to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }),
            };
            meter.charge(CallKind::Search);

            match result {
                Ok(items) => return items,
                Err(e) if e.is_transient() && attempt == 1 => {
                    debug!(
                        backend = backend.name(),
                        sub_query = query,
                        error = %e,
                        "Transient search failure, retrying once"
                    );
                }
                Err(e) => {
                    warn!(
                        backend = backend.name(),
                        sub_query = query,
                        error = %e,
                        "Search backend failed, skipping"
                    );
                    return Vec::new();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn backend(r: impl SourceRetriever + 'static) -> Arc<dyn SourceRetriever> {
        Arc::new(r)
    }

    struct FixedBackend {
        name: &'static str,
        urls: Vec<&'static str>,
    }

    #[async_trait]
    impl SourceRetriever for FixedBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(
            &self,
            _query: &str,
            _domains: &[String],
        ) -> Result<Vec<CandidateItem>, RetrieverError> {
            Ok(self
                .urls
                .iter()
                .map(|url| CandidateItem {
                    title: format!("{} hit", self.name),
                    url: url.to_string(),
                    snippet: String::new(),
                    source: self.name.to_string(),
                })
                .collect())
        }
    }

    struct FlakyBackend {
        calls: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl SourceRetriever for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn search(
            &self,
            query: &str,
            _domains: &[String],
        ) -> Result<Vec<CandidateItem>, RetrieverError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(RetrieverError::Request {
                    backend: "flaky".into(),
                    message: "connection reset".into(),
                });
            }
            Ok(vec![CandidateItem {
                title: query.to_string(),
                url: "https://flaky.example/".into(),
                snippet: String::new(),
                source: "flaky".into(),
            }])
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl SourceRetriever for SlowBackend {
        fn name(&self) -> &str {
            "slow"
        }

        async fn search(
            &self,
            _query: &str,
            _domains: &[String],
        ) -> Result<Vec<CandidateItem>, RetrieverError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_concatenates_in_backend_order_and_dedups() {
        let set = RetrieverSet::new(
            vec![
                backend(FixedBackend {
                    name: "first",
                    urls: vec!["https://a.example/", "https://b.example/"],
                }),
                backend(FixedBackend {
                    name: "second",
                    urls: vec!["https://b.example/#dup", "https://c.example/"],
                }),
            ],
            Duration::from_secs(5),
            10,
        );
        let meter = CostMeter::default();
        let items = set.search("q", &[], &meter).await;
        let urls: Vec<&str> = items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://a.example/", "https://b.example/", "https://c.example/"]
        );
        assert_eq!(items[1].source, "first");
        assert_eq!(meter.calls(CallKind::Search), 2);
    }

    #[tokio::test]
    async fn test_truncates_to_max_results() {
        let set = RetrieverSet::new(
            vec![backend(FixedBackend {
                name: "many",
                urls: vec!["https://1.example/", "https://2.example/", "https://3.example/"],
            })],
            Duration::from_secs(5),
            2,
        );
        let items = set.search("q", &[], &CostMeter::default()).await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_transient_error_retried_once() {
        let flaky = Arc::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_times: 1,
        });
        let set = RetrieverSet::new(
            vec![flaky.clone() as Arc<dyn SourceRetriever>],
            Duration::from_secs(5),
            5,
        );
        let meter = CostMeter::default();
        let items = set.search("q", &[], &meter).await;
        assert_eq!(items.len(), 1);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        assert_eq!(meter.calls(CallKind::Search), 2);
    }

    #[tokio::test]
    async fn test_persistent_error_degrades_to_empty() {
        let flaky = Arc::new(FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_times: usize::MAX,
        });
        let set = RetrieverSet::new(
            vec![
                flaky.clone() as Arc<dyn SourceRetriever>,
                backend(FixedBackend {
                    name: "healthy",
                    urls: vec!["https://ok.example/"],
                }),
            ],
            Duration::from_secs(5),
            5,
        );
        let items = set.search("q", &[], &CostMeter::default()).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, "healthy");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_isolated_to_backend() {
        let set = RetrieverSet::new(
            vec![
                backend(SlowBackend),
                backend(FixedBackend {
                    name: "fast",
                    urls: vec!["https://fast.example/"],
                }),
            ],
            Duration::from_millis(100),
            5,
        );
        let items = set.search("q", &[], &CostMeter::default()).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, "fast");
    }
}
