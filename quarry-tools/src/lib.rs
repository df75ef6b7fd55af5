//! # Quarry Tools
//!
//! Concrete web backends for the Quarry research engine: a DuckDuckGo
//! search retriever and an HTTP scraper with HTML text extraction.

pub mod web;

use quarry_core::config::{RetrievalConfig, ScraperConfig};
use quarry_core::research::{Scraper, SourceRetriever};
use std::sync::Arc;

pub use web::{DuckDuckGoRetriever, HttpScraper};

/// Build the search backends named in `config.backends`, in order.
///
/// Unknown names and backends whose client cannot be built are skipped
/// with a warning.
pub fn build_retrievers(config: &RetrievalConfig) -> Vec<Arc<dyn SourceRetriever>> {
    let mut backends: Vec<Arc<dyn SourceRetriever>> = Vec::new();
    for name in &config.backends {
        match name.trim().to_ascii_lowercase().as_str() {
            "duckduckgo" | "ddg" => match DuckDuckGoRetriever::new(config) {
                Ok(retriever) => backends.push(Arc::new(retriever)),
                Err(e) => {
                    tracing::warn!(backend = %name, error = %e, "Failed to build search backend")
                }
            },
            other => tracing::warn!(backend = other, "Unknown search backend, skipping"),
        }
    }
    backends
}

/// Build the default HTTP scraper.
pub fn build_scraper(config: &ScraperConfig) -> Result<Arc<dyn Scraper>, reqwest::Error> {
    Ok(Arc::new(HttpScraper::new(config)?))
}
