// MCP session over streamable HTTP
//
// JSON-RPC 2.0 requests are POSTed to a single endpoint. The server may
// answer with plain JSON or with an SSE stream whose `data:` lines carry
// the response. A `Mcp-Session-Id` header, when present, is echoed back.

use super::config::McpEndpoint;
use anyhow::{bail, Context, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SESSION_HEADER: &str = "mcp-session-id";

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// MCP server implementation info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// One initialized MCP session
pub struct McpConnection {
    http: reqwest::Client,
    url: String,
    session_id: Mutex<Option<String>>,
    server_info: Option<McpServerInfo>,
    next_id: AtomicU64,
}

impl McpConnection {
    /// Open a session: `initialize` then `notifications/initialized`
    pub async fn connect(http: reqwest::Client, endpoint: &McpEndpoint) -> Result<Self> {
        let mut conn = Self {
            http,
            url: endpoint.url(),
            session_id: Mutex::new(None),
            server_info: None,
            next_id: AtomicU64::new(1),
        };
        conn.initialize().await?;
        Ok(conn)
    }

    async fn initialize(&mut self) -> Result<()> {
        let response = self
            .send_request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "aerodesk",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await
            .context("MCP initialize failed")?;

        if let Some(info) = response.get("serverInfo") {
            self.server_info = serde_json::from_value(info.clone()).ok();
        }
        tracing::debug!(url = %self.url, server = ?self.server_info, "MCP session initialized");

        self.send_notification("notifications/initialized", None).await
    }

    pub fn server_info(&self) -> Option<&McpServerInfo> {
        self.server_info.as_ref()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(id) = self.session_id() {
            request = request.header(SESSION_HEADER, id);
        }
        request
    }

    fn remember_session(&self, response: &reqwest::Response) {
        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.lock() {
                *slot = Some(id.to_string());
            }
        }
    }

    /// Send a JSON-RPC request and return its `result`
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = serde_json::to_value(JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })?;
        tracing::debug!(method, id, "MCP request");

        let response = self
            .post(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach MCP server at {}", self.url))?;
        self.remember_session(&response);

        let status = response.status();
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);
        let body = response.text().await.context("Failed to read MCP response")?;

        if !status.is_success() {
            bail!("MCP server returned HTTP {}: {}", status.as_u16(), body.trim());
        }

        let response = parse_response(&body, is_sse)?;
        if let Some(error) = response.error {
            bail!("MCP error {}: {}", error.code, error.message);
        }
        tracing::trace!(method, id = ?response.id, "MCP response");
        response.result.context("No result in JSON-RPC response")
    }

    /// Send a JSON-RPC notification (no response expected)
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }

        let response = self
            .post(&notification)
            .send()
            .await
            .with_context(|| format!("Failed to send MCP notification '{}'", method))?;
        self.remember_session(&response);

        if !response.status().is_success() {
            bail!("MCP notification '{}' rejected: HTTP {}", method, response.status().as_u16());
        }
        Ok(())
    }
}

/// Decode a plain JSON body or the first JSON-RPC message in an SSE stream
fn parse_response(body: &str, is_sse: bool) -> Result<JsonRpcResponse> {
    let trimmed = body.trim_start();
    if !is_sse && !trimmed.starts_with("data:") && !trimmed.starts_with("event:") {
        return serde_json::from_str(body).context("Failed to parse JSON-RPC response");
    }

    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        if let Ok(message) = serde_json::from_str::<JsonRpcResponse>(data.trim()) {
            if message.result.is_some() || message.error.is_some() {
                return Ok(message);
            }
        }
    }
    bail!("No JSON-RPC response in event stream")
}
