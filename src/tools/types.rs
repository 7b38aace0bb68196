// Core types for the tool execution system
//
// Tool definitions mirror the MCP `tools/list` shape (name, description,
// inputSchema). Handlers are async and return raw JSON results.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool definition as announced by the tool server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object", rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Caller identity forwarded to tools
///
/// MCP handlers inject the credentials into the tool arguments so the
/// downstream services can authorize the call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub jwt_token: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub usuario_id: Option<String>,
}

impl ExecutionContext {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }
}

/// Something that can run a tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute with already validated arguments
    async fn call(&self, arguments: Value, context: &ExecutionContext) -> Result<Value>;
}

/// Outcome class of a tool execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
    ValidationError,
    NotFound,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::ValidationError => "validation_error",
            ExecutionStatus::NotFound => "not_found",
        }
    }
}

/// Result of running a tool through the manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Seconds
    pub execution_time: f64,
    pub tool_name: String,
    pub arguments: Value,
    pub retry_count: u32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExecutionResult {
    pub fn success(tool_name: &str, arguments: Value, result: Value) -> Self {
        Self {
            status: ExecutionStatus::Success,
            result: Some(result),
            error: None,
            execution_time: 0.0,
            tool_name: tool_name.to_string(),
            arguments,
            retry_count: 0,
            metadata: Map::new(),
        }
    }

    pub fn failure(status: ExecutionStatus, tool_name: &str, arguments: Value, error: impl Into<String>) -> Self {
        Self {
            status,
            result: None,
            error: Some(error.into()),
            execution_time: 0.0,
            tool_name: tool_name.to_string(),
            arguments,
            retry_count: 0,
            metadata: Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Compact form appended to memory as a tool observation
    pub fn to_observation(&self) -> Value {
        serde_json::json!({
            "tool_result": {
                "tool": self.tool_name,
                "status": self.status.as_str(),
                "result": self.result,
                "error": self.error,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_definition_from_mcp_listing() {
        let def: ToolDefinition = serde_json::from_value(json!({
            "name": "vuelos_listar",
            "description": "Lista vuelos",
            "inputSchema": {"type": "object", "properties": {}}
        }))
        .unwrap();
        assert_eq!(def.name, "vuelos_listar");
        assert_eq!(def.input_schema["type"], "object");
    }

    #[test]
    fn test_tool_definition_defaults() {
        let def: ToolDefinition = serde_json::from_value(json!({"name": "x"})).unwrap();
        assert!(def.description.is_empty());
        assert!(def.input_schema.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(ExecutionStatus::ValidationError).unwrap(),
            json!("validation_error")
        );
        assert_eq!(ExecutionStatus::NotFound.as_str(), "not_found");
    }

    #[test]
    fn test_observation_shape() {
        let result = ExecutionResult::success("pagos_listar", json!({}), json!([1, 2]));
        let obs = result.to_observation();
        assert_eq!(obs["tool_result"]["tool"], "pagos_listar");
        assert_eq!(obs["tool_result"]["status"], "success");
        assert_eq!(obs["tool_result"]["result"], json!([1, 2]));
        assert!(obs["tool_result"]["error"].is_null());
    }
}
