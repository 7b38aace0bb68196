// MCP (Model Context Protocol) client
//
// Discovers and invokes the airline tools exposed by the MCP tool server.

pub mod client;
pub mod config;
pub mod connection;

pub use client::{inject_context, normalize_call_result, McpClient, McpToolHandler};
pub use config::McpEndpoint;
pub use connection::{McpConnection, McpServerInfo, PROTOCOL_VERSION};
