//! Subcommand handlers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quarry_core::QuarryConfig;
use quarry_core::embeddings::{Embedder, create_embedder};
use quarry_core::research::{
    EmbeddingScorer, HeuristicLearningExtractor, HeuristicPlanner, ResearchEngine,
    ResearchObserver, RetrieverSet, ScrapeExecutor, SubQuery, Termination,
};

use crate::output;
use crate::{Commands, ConfigAction, ResearchArgs};

/// Dispatch a parsed subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Research(args) => handle_research(args, workspace).await,
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path) -> anyhow::Result<QuarryConfig> {
    quarry_core::config::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".quarry");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&QuarryConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace)?;
            for problem in config.validate() {
                warn!(problem = %problem, "Configuration problem");
            }
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Fold command-line flags into the loaded configuration.
fn apply_overrides(config: &mut QuarryConfig, args: &ResearchArgs) {
    if let Some(depth) = args.depth {
        config.research.max_depth = depth;
    }
    if let Some(breadth) = args.breadth {
        config.research.breadth = breadth;
    }
    if let Some(strategy) = args.strategy {
        config.research.mcp_strategy = strategy;
    }
    if let Some(cap) = args.max_sub_queries {
        config.research.max_sub_queries = cap;
    }
    if args.include_root {
        config.research.include_root_query = true;
    }
}

/// Wire the web backends, the local embedder and the MCP tool servers.
fn build_engine(config: &QuarryConfig) -> anyhow::Result<ResearchEngine> {
    let backends = quarry_tools::build_retrievers(&config.retrieval);
    if backends.is_empty() {
        anyhow::bail!(
            "No usable search backend in retrieval.backends ({})",
            config.retrieval.backends.join(", ")
        );
    }
    let retrievers = RetrieverSet::from_config(backends, &config.retrieval);

    let scraper = quarry_tools::build_scraper(&config.scraper)
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
    let scraper = ScrapeExecutor::new(scraper, &config.scraper);

    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding));
    let scorer = Arc::new(EmbeddingScorer::new(embedder));

    let tools = quarry_mcp::build_tools(&config.tools);
    let tool_timeout = config
        .tools
        .servers
        .iter()
        .filter(|server| server.enabled)
        .map(|server| server.timeout())
        .max()
        .unwrap_or(Duration::from_secs(60));

    Ok(ResearchEngine::new(
        Arc::new(HeuristicPlanner::new()),
        retrievers,
        scraper,
        scorer,
    )
    .with_tools(tools, tool_timeout)
    .with_learning_extractor(Arc::new(HeuristicLearningExtractor::default()))
    .with_costs(config.costs.clone())
    .with_curator_config(config.curator.clone())
    .with_domains(config.retrieval.domains.clone())
    .with_observer(Arc::new(ProgressLogger)))
}

async fn handle_research(args: ResearchArgs, workspace: &Path) -> anyhow::Result<()> {
    let mut config = load(workspace)?;
    apply_overrides(&mut config, &args);
    config.ensure_valid()?;

    let engine = build_engine(&config)?;
    info!(
        question = %args.question,
        depth = config.research.max_depth,
        breadth = config.research.breadth,
        strategy = %config.research.mcp_strategy,
        planner = engine.planner_name(),
        "Starting research"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling research");
            on_signal.cancel();
        }
    });

    let corpus = engine
        .run_with_cancel(&args.question, &config.research, cancel)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&corpus)?);
    } else {
        print!("{}", output::render_text(&corpus));
    }

    if corpus.is_empty() {
        anyhow::bail!("No usable evidence was gathered for \"{}\"", corpus.query);
    }
    Ok(())
}

/// Reports run progress through the log.
struct ProgressLogger;

impl ResearchObserver for ProgressLogger {
    fn on_level_start(&self, level: usize, sub_queries: usize) {
        info!(level, sub_queries, "Research level started");
    }

    fn on_sub_query_complete(&self, sub_query: &SubQuery, chunks: usize, new_learnings: usize) {
        info!(
            level = sub_query.depth,
            sub_query = %sub_query.text,
            chunks,
            new_learnings,
            "Sub-query finished"
        );
    }

    fn on_level_complete(&self, level: usize, new_learnings: usize) {
        info!(level, new_learnings, "Research level complete");
    }

    fn on_finish(&self, termination: Termination) {
        info!(%termination, "Research finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_core::{McpStrategy, ToolServerConfig};
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, dir.path()).await.unwrap();

        let config_path = dir.path().join(".quarry").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: QuarryConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.research.breadth, QuarryConfig::default().research.breadth);
    }

    #[tokio::test]
    async fn test_config_init_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".quarry");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[research]\nbreadth = 7\n").unwrap();

        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            dir.path(),
        )
        .await
        .unwrap();

        let content = std::fs::read_to_string(config_dir.join("config.toml")).unwrap();
        assert_eq!(content, "[research]\nbreadth = 7\n");
    }

    #[tokio::test]
    async fn test_config_show_reads_workspace_file() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".quarry");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[research]\nbreadth = 7\n").unwrap();

        let config = load(dir.path()).unwrap();
        assert_eq!(config.research.breadth, 7);
        handle_command(
            Commands::Config {
                action: ConfigAction::Show,
            },
            dir.path(),
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = QuarryConfig::default();
        let args = ResearchArgs {
            question: "q".into(),
            depth: Some(4),
            breadth: Some(2),
            strategy: Some(McpStrategy::Disabled),
            max_sub_queries: Some(9),
            include_root: true,
            json: false,
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.research.max_depth, 4);
        assert_eq!(config.research.breadth, 2);
        assert_eq!(config.research.mcp_strategy, McpStrategy::Disabled);
        assert_eq!(config.research.max_sub_queries, 9);
        assert!(config.research.include_root_query);
    }

    #[test]
    fn test_apply_overrides_keeps_unset_values() {
        let mut config = QuarryConfig::default();
        config.research.max_depth = 5;
        apply_overrides(
            &mut config,
            &ResearchArgs {
                question: "q".into(),
                ..Default::default()
            },
        );
        assert_eq!(config.research.max_depth, 5);
        assert!(!config.research.include_root_query);
    }

    #[test]
    fn test_build_engine_with_tool_servers() {
        let mut config = QuarryConfig::default();
        config.tools.servers.push(ToolServerConfig {
            name: "papers".into(),
            command: "papers-mcp".into(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
            tool: None,
            timeout_secs: 15,
            enabled: true,
        });
        let engine = build_engine(&config).unwrap();
        assert_eq!(engine.planner_name(), "heuristic");
    }

    #[test]
    fn test_build_engine_without_backends_fails() {
        let mut config = QuarryConfig::default();
        config.retrieval.backends = vec!["altavista".into()];
        let err = build_engine(&config).err().unwrap();
        assert!(err.to_string().contains("No usable search backend"));
    }
}
