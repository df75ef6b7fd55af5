//! # Quarry MCP
//!
//! Client side of the Model Context Protocol. Quarry spawns configured tool
//! servers over stdio and exposes one tool from each as an
//! [`ExternalTool`](quarry_core::research::ExternalTool) consulted during
//! research.

pub mod client;
pub mod error;
pub mod protocol;
pub mod retriever;
pub mod transport;

pub use client::McpClient;
pub use error::McpError;
pub use protocol::{CallToolResult, McpTool, ServerInfo, ToolContent};
pub use retriever::{McpToolRetriever, build_tools, select_tool};
pub use transport::{ChannelTransport, ProcessTransport, Transport};
