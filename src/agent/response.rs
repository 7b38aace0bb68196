// Agent replies and tool outcome messages

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::{ExecutionResult, ExecutionStatus};

static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{.*\}").expect("valid object regex"));

/// What the agent is doing for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Processing,
    ExecutingTool,
    Error,
    Disabled,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Processing => "processing",
            AgentStatus::ExecutingTool => "executing_tool",
            AgentStatus::Error => "error",
            AgentStatus::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub message: String,
    /// conversation, clarification, tool_execution, tool_disabled or error
    pub action_taken: String,
    pub tool_used: Option<String>,
    pub reasoning: String,
    pub confidence: f64,
    /// Seconds
    pub execution_time: f64,
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentResponse {
    pub fn new(
        message: impl Into<String>,
        action_taken: &str,
        reasoning: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            message: message.into(),
            action_taken: action_taken.to_string(),
            tool_used: None,
            reasoning: reasoning.into(),
            confidence,
            execution_time: 0.0,
            session_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool_used = Some(tool.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_error(&self) -> bool {
        self.action_taken == "error"
    }
}

/// User-facing text for a successful tool run
pub fn format_tool_success(tool: &str, result: Option<&Value>) -> String {
    let message = match result {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(map)) => map
            .get("message")
            .or_else(|| map.get("result").and_then(|r| r.get("message")))
            .map(|m| match m {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        _ => None,
    };
    match message {
        Some(message) => format!("Listo. {}", message),
        None => format!("Listo. Ejecuté {} correctamente.", tool),
    }
}

/// User-facing text for a failed tool run
///
/// Errors carrying an HTTP error body (`{"code", "message", "path",
/// "details"}`), either already parsed into the result metadata or embedded
/// in the error text, are rendered from that body.
pub fn format_tool_error(tool: &str, execution: &ExecutionResult) -> String {
    let error = execution.error.as_deref().unwrap_or("error desconocido");
    match execution.status {
        ExecutionStatus::NotFound => return format!("No encontré la herramienta '{}'.", tool),
        ExecutionStatus::ValidationError => {
            return format!("Datos incompletos o inválidos para {}: {}", tool, error)
        }
        ExecutionStatus::Timeout => {
            return format!("La herramienta {} tardó demasiado en responder.", tool)
        }
        _ => {}
    }

    let body = if execution.metadata.contains_key("message") {
        Some(Value::Object(execution.metadata.clone()))
    } else {
        JSON_OBJECT
            .find(error)
            .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
            .filter(Value::is_object)
    };
    let Some(body) = body else {
        return format!("Error en {}: {}", tool, error);
    };

    let mut parts = Vec::new();
    if let Some(code) = body.get("code").or_else(|| body.get("status")).and_then(scalar_text) {
        parts.push(format!("HTTP {}", code));
    }
    if let Some(path) = body.get("path").and_then(scalar_text) {
        parts.push(path);
    }

    let mut text = format!("Error en {}", tool);
    if !parts.is_empty() {
        text.push_str(&format!(" ({})", parts.join(" - ")));
    }
    if let Some(message) = body.get("message").and_then(scalar_text) {
        text.push_str(&format!(": {}", message));
    }
    if let Some(details) = body.get("details").and_then(Value::as_array).filter(|d| !d.is_empty()) {
        for detail in details {
            text.push('\n');
            text.push_str(&scalar_text(detail).unwrap_or_else(|| detail.to_string()));
        }
    }
    text
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `"Para {tool}, necesito: ..."`, listing at most five fields
pub fn clarification_message(tool: &str, missing: &[String]) -> String {
    if missing.is_empty() {
        return "Faltan parámetros requeridos para completar la operación.".to_string();
    }
    let fields = if missing.len() > 5 {
        format!("{} y {} más", missing[..5].join(", "), missing.len() - 5)
    } else {
        missing.join(", ")
    };
    format!(
        "Para {}, necesito: {}. Por favor proporciona esta información.",
        tool, fields
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_messages() {
        assert_eq!(
            format_tool_success("reservas_crear", Some(&json!({"message": "Reserva 12 creada"}))),
            "Listo. Reserva 12 creada"
        );
        assert_eq!(
            format_tool_success("reservas_crear", Some(&json!("hecho"))),
            "Listo. hecho"
        );
        assert_eq!(
            format_tool_success("vuelos_listar", Some(&json!({"status": "ok", "result": [1, 2]}))),
            "Listo. Ejecuté vuelos_listar correctamente."
        );
        assert_eq!(
            format_tool_success("vuelos_listar", None),
            "Listo. Ejecuté vuelos_listar correctamente."
        );
    }

    fn failed(status: ExecutionStatus, error: &str) -> ExecutionResult {
        ExecutionResult::failure(status, "x", json!({}), error)
    }

    #[test]
    fn test_status_specific_errors() {
        assert_eq!(
            format_tool_error("x", &failed(ExecutionStatus::NotFound, "n/a")),
            "No encontré la herramienta 'x'."
        );
        assert_eq!(
            format_tool_error("x", &failed(ExecutionStatus::Timeout, "n/a")),
            "La herramienta x tardó demasiado en responder."
        );
        assert_eq!(
            format_tool_error("x", &failed(ExecutionStatus::ValidationError, "falta id")),
            "Datos incompletos o inválidos para x: falta id"
        );
    }

    #[test]
    fn test_http_error_in_text() {
        let error = r#"HTTP 404: {"code": 404, "message": "Reserva no encontrada", "path": "/api/reservas/9", "details": ["id=9"]}"#;
        assert_eq!(
            format_tool_error("reservas_obtener", &failed(ExecutionStatus::Error, error)),
            "Error en reservas_obtener (HTTP 404 - /api/reservas/9): Reserva no encontrada\nid=9"
        );
    }

    #[test]
    fn test_http_error_from_metadata() {
        let mut execution = failed(ExecutionStatus::Error, "400: Datos inválidos");
        execution.metadata.insert("code".to_string(), json!("400"));
        execution.metadata.insert("message".to_string(), json!("Datos inválidos"));
        execution.metadata.insert("details".to_string(), json!([]));
        execution.metadata.insert("path".to_string(), Value::Null);
        assert_eq!(
            format_tool_error("pagos_crear", &execution),
            "Error en pagos_crear (HTTP 400): Datos inválidos"
        );
    }

    #[test]
    fn test_plain_error() {
        assert_eq!(
            format_tool_error("pagos_crear", &failed(ExecutionStatus::Error, "connection refused")),
            "Error en pagos_crear: connection refused"
        );
    }

    #[test]
    fn test_clarification_message_truncates() {
        let fields: Vec<String> = (1..=7).map(|i| format!("f{}", i)).collect();
        assert_eq!(
            clarification_message("reservas_crear", &fields),
            "Para reservas_crear, necesito: f1, f2, f3, f4, f5 y 2 más. Por favor proporciona esta información."
        );
        assert_eq!(
            clarification_message("t", &["a".to_string()]),
            "Para t, necesito: a. Por favor proporciona esta información."
        );
    }
}
