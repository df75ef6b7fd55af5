//! Configuration system for Quarry.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/quarry/config.toml` and/or `.quarry/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::embeddings::EmbeddingConfig;
use crate::error::ConfigError;

/// Top-level configuration for Quarry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuarryConfig {
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub curator: CuratorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub costs: CostModel,
}

impl QuarryConfig {
    /// Collect every configuration problem, prefixed by section.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        problems.extend(self.research.validate());
        problems.extend(self.retrieval.validate());
        problems.extend(self.scraper.validate());
        problems.extend(self.curator.validate());
        for server in &self.tools.servers {
            if server.command.trim().is_empty() {
                problems.push(format!("tools.servers[{}].command is empty", server.name));
            }
        }
        problems
    }

    /// Fail with the first batch of problems, if any.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        into_result(self.validate())
    }
}

fn into_result(problems: Vec<String>) -> Result<(), ConfigError> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            message: problems.join("; "),
        })
    }
}

/// How external tool results are reused across sub-queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpStrategy {
    /// Invoke once with the root query and share the result with every sub-query.
    #[default]
    Fast,
    /// Invoke once per sub-query with the sub-query text.
    Deep,
    /// Never invoke external tools.
    Disabled,
}

impl std::fmt::Display for McpStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpStrategy::Fast => write!(f, "fast"),
            McpStrategy::Deep => write!(f, "deep"),
            McpStrategy::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for McpStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(McpStrategy::Fast),
            "deep" => Ok(McpStrategy::Deep),
            "disabled" | "off" | "none" => Ok(McpStrategy::Disabled),
            other => Err(ConfigError::ParseError {
                message: format!("unknown mcp strategy '{other}' (expected fast, deep or disabled)"),
            }),
        }
    }
}

/// Run-shaping limits for one research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Hard cap on sub-queries planned across the whole run.
    #[serde(default = "default_max_sub_queries")]
    pub max_sub_queries: usize,
    /// Number of research levels. `1` runs the root plan only.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum sub-queries produced by one planning call.
    #[serde(default = "default_breadth")]
    pub breadth: usize,
    /// Maximum sub-query tasks in flight at once.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default)]
    pub mcp_strategy: McpStrategy,
    /// Minimum similarity (0..=1) for a chunk to enter the corpus.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Character budget for curated context per sub-query.
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,
    /// Wall-clock budget for the whole run, checked between levels.
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,
    /// Upper bound on a single sub-query task.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Optional ceiling on the accumulated cost meter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_budget: Option<f64>,
    /// Also research the literal root question alongside its sub-queries.
    #[serde(default)]
    pub include_root_query: bool,
}

fn default_max_sub_queries() -> usize {
    20
}

fn default_max_depth() -> usize {
    2
}

fn default_breadth() -> usize {
    3
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_similarity_threshold() -> f32 {
    0.42
}

fn default_context_char_budget() -> usize {
    25_000
}

fn default_time_budget_secs() -> u64 {
    300
}

fn default_task_timeout_secs() -> u64 {
    120
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_sub_queries: default_max_sub_queries(),
            max_depth: default_max_depth(),
            breadth: default_breadth(),
            concurrency_limit: default_concurrency_limit(),
            mcp_strategy: McpStrategy::default(),
            similarity_threshold: default_similarity_threshold(),
            context_char_budget: default_context_char_budget(),
            time_budget_secs: default_time_budget_secs(),
            task_timeout_secs: default_task_timeout_secs(),
            cost_budget: None,
            include_root_query: false,
        }
    }
}

impl ResearchConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_sub_queries == 0 {
            problems.push("research.max_sub_queries must be at least 1".to_string());
        }
        if self.max_depth == 0 {
            problems.push("research.max_depth must be at least 1".to_string());
        }
        if self.breadth == 0 {
            problems.push("research.breadth must be at least 1".to_string());
        }
        if self.concurrency_limit == 0 {
            problems.push("research.concurrency_limit must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            problems.push(format!(
                "research.similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            ));
        }
        if self.context_char_budget == 0 {
            problems.push("research.context_char_budget must be positive".to_string());
        }
        if self.time_budget_secs == 0 {
            problems.push("research.time_budget_secs must be positive".to_string());
        }
        if let Some(budget) = self.cost_budget {
            if budget.is_nan() || budget < 0.0 {
                problems.push(format!(
                    "research.cost_budget must be non-negative, got {budget}"
                ));
            }
        }
        problems
    }

    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        into_result(self.validate())
    }
}

/// Search backend selection and per-backend limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Backend names, searched in this order.
    pub backends: Vec<String>,
    /// Results kept per sub-query after URL dedup.
    pub max_results_per_query: usize,
    pub timeout_secs: u64,
    /// Optional domain allowlist forwarded to every backend.
    pub domains: Vec<String>,
    pub user_agent: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backends: vec!["duckduckgo".to_string()],
            max_results_per_query: 5,
            timeout_secs: 15,
            domains: Vec::new(),
            user_agent: format!("Quarry/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_results_per_query == 0 {
            problems.push("retrieval.max_results_per_query must be at least 1".to_string());
        }
        if self.timeout_secs == 0 {
            problems.push("retrieval.timeout_secs must be positive".to_string());
        }
        problems
    }
}

/// Scrape pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Concurrent fetches per scrape batch.
    pub concurrency: usize,
    pub timeout_secs: u64,
    /// Retry a transient failure once before giving up.
    pub retry_transient: bool,
    /// Extracted text beyond this many characters is discarded.
    pub max_content_chars: usize,
    /// Response bodies are read no further than this many bytes.
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            timeout_secs: 20,
            retry_transient: true,
            max_content_chars: 50_000,
            max_body_bytes: 2 * 1024 * 1024,
            user_agent: format!("Quarry/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ScraperConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.concurrency == 0 {
            problems.push("scraper.concurrency must be at least 1".to_string());
        }
        if self.timeout_secs == 0 {
            problems.push("scraper.timeout_secs must be positive".to_string());
        }
        if self.max_body_bytes == 0 {
            problems.push("scraper.max_body_bytes must be positive".to_string());
        }
        problems
    }
}

/// Chunking parameters for relevance curation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CuratorConfig {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Chunks shorter than this are ignored.
    pub min_chunk_chars: usize,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            min_chunk_chars: 40,
        }
    }
}

impl CuratorConfig {
    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.chunk_size == 0 {
            problems.push("curator.chunk_size must be positive".to_string());
        }
        if self.min_chunk_chars > self.chunk_size {
            problems.push(format!(
                "curator.min_chunk_chars ({}) exceeds chunk_size ({})",
                self.min_chunk_chars, self.chunk_size
            ));
        }
        problems
    }
}

/// External tool servers consulted alongside web search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub servers: Vec<ToolServerConfig>,
}

/// One external tool server launched over stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Tool to call. When unset the first tool accepting a `query` argument is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_enabled() -> bool {
    true
}

impl ToolServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Weight charged to the cost meter for each completed collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CostModel {
    pub search: f64,
    pub scrape: f64,
    pub similarity: f64,
    pub plan: f64,
    pub tool: f64,
    pub learning: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            search: 1.0,
            scrape: 1.0,
            similarity: 1.0,
            plan: 1.0,
            tool: 1.0,
            learning: 1.0,
        }
    }
}

/// Load configuration from all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&QuarryConfig>,
) -> Result<QuarryConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(QuarryConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "quarry", "quarry") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".quarry").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // QUARRY_RESEARCH__BREADTH, QUARRY_RESEARCH__MCP_STRATEGY, ...
    figment = figment.merge(Env::prefixed("QUARRY_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = QuarryConfig::default();
        assert_eq!(config.research.max_depth, 2);
        assert_eq!(config.research.breadth, 3);
        assert_eq!(config.research.mcp_strategy, McpStrategy::Fast);
        assert!(!config.research.include_root_query);
        assert_eq!(config.retrieval.backends, vec!["duckduckgo".to_string()]);
        assert!(config.tools.servers.is_empty());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_mcp_strategy_display_and_parse() {
        for strategy in [McpStrategy::Fast, McpStrategy::Deep, McpStrategy::Disabled] {
            let parsed: McpStrategy = strategy.to_string().parse().unwrap();
            assert_eq!(parsed, strategy);
        }
        assert_eq!("OFF".parse::<McpStrategy>().unwrap(), McpStrategy::Disabled);
        assert!("sometimes".parse::<McpStrategy>().is_err());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = QuarryConfig::default();
        config.research.cost_budget = Some(40.0);
        config.research.mcp_strategy = McpStrategy::Deep;
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: QuarryConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.research.cost_budget, Some(40.0));
        assert_eq!(deserialized.research.mcp_strategy, McpStrategy::Deep);
        assert_eq!(deserialized.costs, config.costs);
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let config: QuarryConfig = toml::from_str(
            r#"
[research]
breadth = 5
mcp_strategy = "disabled"
"#,
        )
        .unwrap();
        assert_eq!(config.research.breadth, 5);
        assert_eq!(config.research.max_depth, 2);
        assert_eq!(config.research.mcp_strategy, McpStrategy::Disabled);
        assert_eq!(config.scraper.concurrency, 8);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = QuarryConfig::default();
        config.research.breadth = 0;
        config.research.similarity_threshold = 1.5;
        config.scraper.concurrency = 0;
        let problems = config.validate();
        assert_eq!(problems.len(), 3);
        let err = config.ensure_valid().unwrap_err();
        assert!(err.to_string().contains("research.breadth"));
    }

    #[test]
    fn test_negative_cost_budget_rejected() {
        let config = ResearchConfig {
            cost_budget: Some(-1.0),
            ..Default::default()
        };
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = QuarryConfig::default();
        overrides.research.max_depth = 4;
        overrides.research.concurrency_limit = 2;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.research.max_depth, 4);
        assert_eq!(config.research.concurrency_limit, 2);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let quarry_dir = dir.path().join(".quarry");
        std::fs::create_dir_all(&quarry_dir).unwrap();
        std::fs::write(
            quarry_dir.join("config.toml"),
            r#"
[research]
max_depth = 3
breadth = 2
similarity_threshold = 0.5

[retrieval]
backends = ["duckduckgo", "wikipedia"]
domains = ["example.org"]

[[tools.servers]]
name = "papers"
command = "papers-mcp"
args = ["--stdio"]
tool = "search_papers"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.research.max_depth, 3);
        assert_eq!(config.research.breadth, 2);
        assert_eq!(config.retrieval.backends.len(), 2);
        assert_eq!(config.retrieval.domains, vec!["example.org".to_string()]);
        assert_eq!(config.tools.servers.len(), 1);
        let server = &config.tools.servers[0];
        assert_eq!(server.tool.as_deref(), Some("search_papers"));
        assert_eq!(server.timeout_secs, 60);
        assert!(server.enabled);
    }
}
