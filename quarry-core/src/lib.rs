//! # Quarry Core
//!
//! Core library for the Quarry research engine.
//! Provides query planning, retrieval fan-out, scraping, relevance curation,
//! external tool caching, recursive expansion, configuration and the shared
//! error types.

pub mod brain;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod research;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{
    CostModel, CuratorConfig, McpStrategy, QuarryConfig, ResearchConfig, RetrievalConfig,
    ScraperConfig, ToolServerConfig, ToolsConfig, load_config,
};
pub use embeddings::{Embedder, EmbeddingConfig, LocalEmbedder, create_embedder};
pub use error::ResearchError;
pub use research::{CorpusStatus, ResearchCorpus, ResearchEngine, Termination};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
