//! Bounded scrape pool.
//!
//! The executor does not deduplicate: callers claim URLs through the
//! aggregator first, so a URL reaches `fetch` at most once per run.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::aggregator::{CallKind, CostMeter};
use super::query::{FetchStatus, ScrapedDocument};
use crate::config::ScraperConfig;
use crate::error::ScrapeError;

/// Text and images extracted from one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapedPage {
    pub title: String,
    pub text: String,
    pub images: Vec<String>,
}

/// Fetches and extracts a single URL.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ScrapedPage, ScrapeError>;
}

pub struct ScrapeExecutor {
    scraper: Arc<dyn Scraper>,
    concurrency: usize,
    timeout: Duration,
    retry_transient: bool,
    max_content_chars: usize,
}

impl ScrapeExecutor {
    pub fn new(scraper: Arc<dyn Scraper>, config: &ScraperConfig) -> Self {
        Self {
            scraper,
            concurrency: config.concurrency.max(1),
            timeout: config.timeout(),
            retry_transient: config.retry_transient,
            max_content_chars: config.max_content_chars,
        }
    }

    /// Fetch `urls` and return only the successful documents, in input order.
    pub async fn fetch(&self, urls: &[String], meter: &CostMeter) -> Vec<ScrapedDocument> {
        self.fetch_all(urls, meter)
            .await
            .into_iter()
            .filter(ScrapedDocument::is_fetched)
            .collect()
    }

    /// Fetch `urls` with at most `concurrency` requests in flight, keeping
    /// failed entries with their reason. Output order matches input order.
    pub async fn fetch_all(&self, urls: &[String], meter: &CostMeter) -> Vec<ScrapedDocument> {
        let owned: Vec<(usize, String)> = urls.iter().cloned().enumerate().collect();
        stream::iter(owned)
            .map(|(rank, url)| async move { self.fetch_one(rank, &url, meter).await })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await
    }

    async fn fetch_one(&self, rank: usize, url: &str, meter: &CostMeter) -> ScrapedDocument {
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.timeout, self.scraper.fetch(url)).await {
                Ok(result) => result,
                Err(_) => Err(ScrapeError::Timeout {
                    url: url.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }),
            };
            meter.charge(CallKind::Scrape);

            match result {
                Err(e) if self.retry_transient && attempt == 1 && e.is_transient() => {
                    debug!(url, error = %e, "Transient scrape failure, retrying once");
                }
                other => break other,
            }
        };

        match outcome {
            Ok(page) => ScrapedDocument {
                url: url.to_string(),
                title: page.title,
                raw_text: truncate_chars(page.text, self.max_content_chars),
                images: page.images,
                fetch_status: FetchStatus::Fetched,
                rank,
            },
            Err(e) => {
                warn!(url, error = %e, "Scrape failed, dropping document");
                ScrapedDocument {
                    url: url.to_string(),
                    title: String::new(),
                    raw_text: String::new(),
                    images: Vec::new(),
                    fetch_status: FetchStatus::Failed {
                        reason: e.to_string(),
                    },
                    rank,
                }
            }
        }
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text,
    }
}
