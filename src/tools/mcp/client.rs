// MCP client for the tool server
//
// Every operation opens a fresh session, mirroring how the tool server
// treats clients as short-lived. Results are normalized into
// `{"status": "ok", "result": ...}` or `{"status": "error", "error": ...}`.

use super::config::McpEndpoint;
use super::connection::McpConnection;
use crate::tools::types::{ExecutionContext, ToolDefinition, ToolHandler};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Credential keys copied from the execution context into tool arguments
pub const CONTEXT_KEYS: [&str; 3] = ["jwt_token", "group_id", "usuario_id"];

pub struct McpClient {
    endpoint: McpEndpoint,
    http: reqwest::Client,
}

impl McpClient {
    pub fn new(endpoint: McpEndpoint) -> Result<Self> {
        endpoint.validate()?;
        let http = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .context("Failed to build MCP HTTP client")?;
        tracing::info!(url = %endpoint.url(), timeout_secs = endpoint.timeout.as_secs(), "MCP client configured");
        Ok(Self { endpoint, http })
    }

    pub fn endpoint(&self) -> &McpEndpoint {
        &self.endpoint
    }

    async fn connect(&self) -> Result<McpConnection> {
        McpConnection::connect(self.http.clone(), &self.endpoint).await
    }

    /// Whether a session can be initialized
    pub async fn test_connection(&self) -> bool {
        match self.connect().await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "MCP connection test failed");
                false
            }
        }
    }

    async fn fetch_tools(&self) -> Result<Vec<ToolDefinition>> {
        let conn = self.connect().await?;
        let response = conn.send_request("tools/list", None).await?;
        let tools = response
            .get("tools")
            .cloned()
            .unwrap_or_else(|| json!([]));
        let tools: Vec<ToolDefinition> =
            serde_json::from_value(tools).context("Failed to parse tools list")?;
        Ok(tools.into_iter().filter(|t| !t.name.is_empty()).collect())
    }

    /// List tools, retrying with exponential backoff
    ///
    /// Returns an empty list once every attempt has failed.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let attempts = self.endpoint.list_retries.max(1);
        for attempt in 0..attempts {
            match self.fetch_tools().await {
                Ok(tools) => {
                    tracing::info!(count = tools.len(), attempt = attempt + 1, "MCP tools listed");
                    return tools;
                }
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.endpoint.retry_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Listing MCP tools failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(attempts, error = %e, "Listing MCP tools failed");
                }
            }
        }
        Vec::new()
    }

    /// Invoke a tool; transport and protocol failures become `status: error`
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        match self.try_call_tool(name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(tool = name, error = %e, "MCP tool call failed");
                json!({"status": "error", "error": format!("{:#}", e)})
            }
        }
    }

    async fn try_call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let conn = self.connect().await?;
        let response = conn
            .send_request("tools/call", Some(json!({"name": name, "arguments": arguments})))
            .await?;
        Ok(normalize_call_result(&response))
    }
}

/// Flatten a `tools/call` result
pub fn normalize_call_result(response: &Value) -> Value {
    let parts: Vec<Value> = response
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if response.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        let message = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");
        let message = if message.is_empty() {
            "Error executing tool".to_string()
        } else {
            message
        };
        return json!({"status": "error", "error": message});
    }

    if let Some(structured) = response.get("structuredContent") {
        let empty = match structured {
            Value::Null => true,
            Value::Object(o) => o.is_empty(),
            _ => false,
        };
        if !empty {
            return json!({"status": "ok", "result": structured});
        }
    }

    let json_parts: Vec<&Value> = parts
        .iter()
        .filter(|p| p.get("type").and_then(Value::as_str) == Some("json"))
        .filter_map(|p| p.get("json"))
        .collect();
    if json_parts.len() == 1 {
        return json!({"status": "ok", "result": json_parts[0]});
    }

    if parts.len() == 1 {
        if let Some(text) = parts[0].get("text").and_then(Value::as_str) {
            let result = serde_json::from_str::<Value>(text).unwrap_or_else(|_| json!(text));
            return json!({"status": "ok", "result": result});
        }
    }

    match response.get("content") {
        Some(_) => json!({"status": "ok", "result": parts}),
        None => json!({"status": "ok", "result": Value::Null}),
    }
}

/// Runs one remote tool through the shared client
pub struct McpToolHandler {
    client: Arc<McpClient>,
    tool_name: String,
}

impl McpToolHandler {
    pub fn new(client: Arc<McpClient>, tool_name: impl Into<String>) -> Self {
        Self {
            client,
            tool_name: tool_name.into(),
        }
    }
}

/// Add caller credentials to `arguments` without overriding explicit values
pub fn inject_context(arguments: Value, context: &ExecutionContext) -> Value {
    let Value::Object(mut args) = arguments else {
        return arguments;
    };
    let values = [&context.jwt_token, &context.group_id, &context.usuario_id];
    for (key, value) in CONTEXT_KEYS.iter().zip(values) {
        if let Some(value) = value {
            args.entry(key.to_string()).or_insert_with(|| json!(value));
        }
    }
    Value::Object(args)
}

/// Whether the server could not be reached at all
///
/// Refused connections and client timeouts qualify; HTTP statuses and
/// JSON-RPC errors mean the server answered.
fn is_transport_failure(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(|e| e.is_connect() || e.is_timeout())
}

#[async_trait]
impl ToolHandler for McpToolHandler {
    /// Call the tool on the MCP server
    ///
    /// Transport failures are returned as `Err` so the tool manager retries
    /// them. Any answer from the server, errors included, comes back as
    /// `Ok` with `status: ok` or `status: error` and is not retried.
    async fn call(&self, arguments: Value, context: &ExecutionContext) -> Result<Value> {
        let args = inject_context(arguments, context);
        tracing::info!(tool = %self.tool_name, "Calling MCP tool");
        match self.client.try_call_tool(&self.tool_name, args).await {
            Ok(result) => {
                tracing::debug!(tool = %self.tool_name, status = %result["status"], "MCP tool returned");
                Ok(result)
            }
            Err(e) if is_transport_failure(&e) => {
                tracing::warn!(tool = %self.tool_name, error = %format!("{:#}", e), "MCP server unreachable");
                Err(e)
            }
            Err(e) => {
                tracing::error!(tool = %self.tool_name, error = %e, "MCP tool call failed");
                Ok(json!({"status": "error", "error": format!("{:#}", e)}))
            }
        }
    }
}
