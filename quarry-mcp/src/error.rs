//! MCP-specific error types.

/// Errors raised while talking to an external MCP server.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("JSON-RPC parse error: {message}")]
    ParseError { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Tool execution failed: {message}")]
    ToolError { message: String },

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Transport error: {message}")]
    TransportError { message: String },

    #[error("Server not initialized")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Convert to a JSON-RPC error code.
    pub fn error_code(&self) -> i64 {
        match self {
            McpError::ParseError { .. } => -32700,
            McpError::InvalidRequest { .. } => -32600,
            McpError::MethodNotFound { .. } => -32601,
            McpError::InvalidParams { .. } => -32602,
            McpError::InternalError { .. } => -32603,
            McpError::ToolError { .. } => -32000,
            McpError::ToolNotFound { .. } => -32001,
            McpError::TransportError { .. } => -32002,
            McpError::NotInitialized => -32003,
            McpError::Io(_) => -32603,
            McpError::Json(_) => -32700,
        }
    }

    /// Map a JSON-RPC error object received from a server back into an error.
    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            -32700 => McpError::ParseError { message },
            -32600 => McpError::InvalidRequest { message },
            -32601 => McpError::MethodNotFound { method: message },
            -32602 => McpError::InvalidParams { message },
            -32603 => McpError::InternalError { message },
            _ => McpError::ToolError {
                message: format!("{message} (code {code})"),
            },
        }
    }

    /// Errors after which the connection can no longer be trusted.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            McpError::TransportError { .. } | McpError::Io(_) | McpError::NotInitialized
        )
    }
}
