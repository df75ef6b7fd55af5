//! Error types for the Quarry research core.
//!
//! Uses `thiserror` for public API error types. Each collaborator domain
//! (search backends, scrapers, planners, tools, scoring, LLM providers,
//! configuration) has its own enum so that callers can decide which failures
//! degrade to an empty result and which abort a run. Only [`ResearchError`]
//! escapes a run; binaries wrap it with `anyhow`.

/// Run-level failures. Everything else degrades to an empty value.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("Planning produced no sub-queries for: {query}")]
    NoSubQueries { query: String },

    #[error("Research run was cancelled")]
    Cancelled,

    #[error("Invalid research configuration: {message}")]
    InvalidConfig { message: String },
}

/// Errors from a single search backend.
#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    #[error("Search request to '{backend}' failed: {message}")]
    Request { backend: String, message: String },

    #[error("Search backend '{backend}' timed out after {timeout_secs}s")]
    Timeout { backend: String, timeout_secs: u64 },

    #[error("Search backend '{backend}' returned an unreadable response: {message}")]
    ResponseParse { backend: String, message: String },
}

/// Errors from fetching a single URL.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("Fetch of {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Fetch of {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("Fetch of {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Unsupported content type '{content_type}' at {url}")]
    UnsupportedContent { url: String, content_type: String },
}

impl ScrapeError {
    /// Whether a single retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::Request { .. } | ScrapeError::Timeout { .. } => true,
            ScrapeError::Status { status, .. } => *status == 429 || *status >= 500,
            ScrapeError::InvalidUrl { .. } | ScrapeError::UnsupportedContent { .. } => false,
        }
    }
}

/// Errors from sub-query planning.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("Planner LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Planner output could not be parsed: {message}")]
    Parse { message: String },
}

/// Errors from external tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool '{name}' invocation failed: {message}")]
    Invocation { name: String, message: String },

    #[error("Tool '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },

    #[error("Tool '{name}' is not available")]
    Unavailable { name: String },
}

/// Errors from similarity scoring.
#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("Embedding provider failed: {message}")]
    Provider { message: String },

    #[error("Embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}
