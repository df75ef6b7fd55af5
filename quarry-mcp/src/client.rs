//! MCP client: connects to an external server, performs the handshake,
//! discovers tools and calls them.

use serde_json::{Value, json};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::protocol::{
    CallToolParams, CallToolResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, MCP_PROTOCOL_VERSION, McpTool, RequestId, ServerInfo,
};
use crate::transport::Transport;

/// MCP client state for one connection.
pub struct McpClient {
    initialized: bool,
    server_info: Option<ServerInfo>,
    available_tools: Vec<McpTool>,
    next_id: AtomicI64,
}

impl McpClient {
    pub fn new() -> Self {
        Self {
            initialized: false,
            server_info: None,
            available_tools: Vec::new(),
            next_id: AtomicI64::new(1),
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Tools returned by the last [`McpClient::discover_tools`] call.
    pub fn available_tools(&self) -> &[McpTool] {
        &self.available_tools
    }

    /// Perform the initialization handshake with the server.
    pub async fn initialize<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<ServerInfo, McpError> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "quarry",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = self.request(transport, "initialize", params).await?;
        let server_info = ServerInfo::from_initialize_result(&result);

        info!(
            server = %server_info.name,
            version = %server_info.version,
            "MCP client initialized"
        );

        let notification = JsonRpcNotification::new("notifications/initialized");
        transport
            .write_message(&serde_json::to_string(&notification)?)
            .await?;

        self.server_info = Some(server_info.clone());
        self.initialized = true;
        Ok(server_info)
    }

    /// Discover tools from the connected server.
    pub async fn discover_tools<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<Vec<McpTool>, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let result = self.request(transport, "tools/list", json!({})).await?;
        let listed: ListToolsResult =
            serde_json::from_value(result).map_err(|e| McpError::InternalError {
                message: format!("tools/list result is malformed: {e}"),
            })?;

        debug!(count = listed.tools.len(), "Discovered tools from MCP server");
        self.available_tools = listed.tools.clone();
        Ok(listed.tools)
    }

    /// Call a tool on the connected server.
    ///
    /// A result flagged `isError` is returned as [`McpError::ToolError`].
    pub async fn call_tool<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        tool_name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let params = serde_json::to_value(CallToolParams {
            name: tool_name.to_string(),
            arguments: Some(arguments),
        })?;
        let result = self.request(transport, "tools/call", params).await?;
        let result: CallToolResult =
            serde_json::from_value(result).map_err(|e| McpError::InternalError {
                message: format!("Tool '{}' returned a malformed result: {}", tool_name, e),
            })?;

        if result.is_error() {
            return Err(McpError::ToolError {
                message: format!("Tool '{}' failed: {}", tool_name, result.text()),
            });
        }
        Ok(result)
    }

    /// Send a request and wait for the response carrying the same id.
    async fn request<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        method: &str,
        params: Value,
    ) -> Result<Value, McpError> {
        let id = self.next_id();
        let request = JsonRpcRequest::new(id.clone(), method, params);
        transport
            .write_message(&serde_json::to_string(&request)?)
            .await?;

        let response = self.read_response(transport, &id).await?;
        if let Some(error) = response.error {
            warn!(
                method,
                code = error.code,
                message = %error.message,
                "MCP server returned error"
            );
            return Err(McpError::from_code(error.code, error.message));
        }
        response.result.ok_or_else(|| McpError::InternalError {
            message: format!("{method} response has no result"),
        })
    }

    /// Read messages until the response to `id` arrives.
    ///
    /// Server-initiated notifications and stale responses are skipped.
    async fn read_response<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        id: &RequestId,
    ) -> Result<JsonRpcResponse, McpError> {
        loop {
            let raw = transport
                .read_message()
                .await?
                .ok_or_else(|| McpError::TransportError {
                    message: "Transport closed while waiting for response".into(),
                })?;

            debug!(raw = %raw, "Received MCP message");

            let value: Value = serde_json::from_str(&raw).map_err(|e| McpError::ParseError {
                message: format!("Invalid JSON-RPC message: {}", e),
            })?;
            if value.get("result").is_none() && value.get("error").is_none() {
                debug!(method = ?value.get("method"), "Skipping server notification");
                continue;
            }

            let response: JsonRpcResponse =
                serde_json::from_value(value).map_err(|e| McpError::ParseError {
                    message: format!("Invalid JSON-RPC response: {}", e),
                })?;
            if &response.id != id {
                debug!(expected = ?id, got = ?response.id, "Skipping unmatched response");
                continue;
            }
            return Ok(response);
        }
    }
}

impl Default for McpClient {
    fn default() -> Self {
        Self::new()
    }
}
