//! Exposes one tool of an external MCP server as a research tool.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use quarry_core::config::{ToolServerConfig, ToolsConfig};
use quarry_core::error::ToolError;
use quarry_core::research::ExternalTool;

use crate::client::McpClient;
use crate::error::McpError;
use crate::protocol::McpTool;
use crate::transport::{ProcessTransport, Transport};

struct Session {
    transport: Box<dyn Transport>,
    client: McpClient,
    tool: McpTool,
}

/// An [`ExternalTool`] backed by a stdio MCP server.
///
/// The server is spawned on first use. A connection failure drops the
/// session so the next call spawns a fresh process.
pub struct McpToolRetriever {
    name: String,
    server: Option<ToolServerConfig>,
    preferred_tool: Option<String>,
    timeout: Duration,
    pending: Mutex<Option<Box<dyn Transport>>>,
    session: Mutex<Option<Session>>,
}

impl McpToolRetriever {
    pub fn from_config(config: &ToolServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            server: Some(config.clone()),
            preferred_tool: config.tool.clone(),
            timeout: config.timeout(),
            pending: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// Use an already connected transport instead of spawning a process.
    pub fn with_transport(
        name: impl Into<String>,
        tool: Option<String>,
        transport: Box<dyn Transport>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            server: None,
            preferred_tool: tool,
            timeout,
            pending: Mutex::new(Some(transport)),
            session: Mutex::new(None),
        }
    }

    /// Name of the selected tool, once connected.
    pub async fn selected_tool(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.tool.name.clone())
    }

    /// Close the server connection, if one is open.
    pub async fn shutdown(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            if let Err(e) = session.transport.close().await {
                debug!(tool = %self.name, error = %e, "Error closing MCP transport");
            }
        }
    }

    async fn connect(&self) -> Result<Session, McpError> {
        let mut transport = match self.pending.lock().await.take() {
            Some(transport) => transport,
            None => {
                let server = self.server.as_ref().ok_or_else(|| McpError::TransportError {
                    message: "connection closed and no server command to respawn".into(),
                })?;
                let spawned = ProcessTransport::spawn(
                    &server.command,
                    &server.args,
                    &server.env,
                    server.working_dir.as_deref(),
                )
                .await?;
                Box::new(spawned) as Box<dyn Transport>
            }
        };

        let mut client = McpClient::new();
        client.initialize(transport.as_mut()).await?;
        let tools = client.discover_tools(transport.as_mut()).await?;
        let tool = select_tool(&tools, self.preferred_tool.as_deref())?;

        info!(
            server = %self.name,
            tool = %tool.name,
            argument = %tool.query_argument(),
            "Connected to MCP tool server"
        );
        Ok(Session {
            transport,
            client,
            tool,
        })
    }

    async fn call(&self, query: &str) -> Result<String, McpError> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(McpError::NotInitialized);
        };

        let mut arguments = serde_json::Map::new();
        arguments.insert(session.tool.query_argument(), json!(query));
        let tool_name = session.tool.name.clone();
        let result = session
            .client
            .call_tool(session.transport.as_mut(), &tool_name, arguments.into())
            .await;

        match result {
            Ok(result) => Ok(result.text()),
            Err(e) => {
                if e.is_connection_error() {
                    warn!(tool = %self.name, error = %e, "MCP connection lost");
                    *guard = None;
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ExternalTool for McpToolRetriever {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, query: &str) -> Result<String, ToolError> {
        match tokio::time::timeout(self.timeout, self.call(query)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(McpError::ToolNotFound { name })) => Err(ToolError::Unavailable {
                name: format!("{}/{}", self.name, name),
            }),
            Ok(Err(e)) => Err(ToolError::Invocation {
                name: self.name.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(ToolError::Timeout {
                name: self.name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Pick the configured tool, else the first accepting `query`, else the first.
pub fn select_tool(tools: &[McpTool], preferred: Option<&str>) -> Result<McpTool, McpError> {
    let chosen = match preferred {
        Some(name) => tools.iter().find(|t| t.name == name),
        None => tools
            .iter()
            .find(|t| t.accepts_query())
            .or_else(|| tools.first()),
    };
    chosen.cloned().ok_or_else(|| McpError::ToolNotFound {
        name: preferred.unwrap_or("<any>").to_string(),
    })
}

/// One tool per enabled server; processes are spawned lazily.
pub fn build_tools(config: &ToolsConfig) -> Vec<Arc<dyn ExternalTool>> {
    config
        .servers
        .iter()
        .filter(|server| {
            if !server.enabled {
                debug!(server = %server.name, "Skipping disabled MCP server");
            }
            server.enabled
        })
        .map(|server| Arc::new(McpToolRetriever::from_config(server)) as Arc<dyn ExternalTool>)
        .collect()
}
