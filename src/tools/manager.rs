// Tool manager
//
// Owns the handlers, validates arguments against each tool's schema and
// runs calls with timeout and linear backoff retries. Keeps per-tool
// execution counters.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ToolsConfig;
use crate::tools::schema::{properties_of, property_type, value_matches_type, SchemaAnalysis};
use crate::tools::types::{ExecutionContext, ExecutionResult, ExecutionStatus, ToolHandler};

const RETRY_STEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub avg_execution_time: f64,
    pub last_executed: Option<String>,
    pub description: String,
}

impl ToolStats {
    fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, success: bool, execution_time: f64) {
        self.total_executions += 1;
        self.last_executed = Some(Utc::now().to_rfc3339());
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        let n = self.total_executions as f64;
        self.avg_execution_time = (self.avg_execution_time * (n - 1.0) + execution_time) / n;
    }
}

struct RegisteredTool {
    handler: Arc<dyn ToolHandler>,
    schema: Option<Value>,
}

pub struct ToolManager {
    tools: DashMap<String, RegisteredTool>,
    stats: DashMap<String, ToolStats>,
    max_retries: u32,
    timeout: Duration,
    enable_validation: bool,
}

impl ToolManager {
    pub fn new(max_retries: u32, timeout: Duration, enable_validation: bool) -> Self {
        info!(max_retries, timeout_secs = timeout.as_secs(), "ToolManager initialized");
        Self {
            tools: DashMap::new(),
            stats: DashMap::new(),
            max_retries,
            timeout,
            enable_validation,
        }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_secs(config.timeout_secs),
            config.enable_validation,
        )
    }

    pub fn register_tool(
        &self,
        name: &str,
        handler: Arc<dyn ToolHandler>,
        schema: Option<Value>,
        description: &str,
    ) {
        self.tools
            .insert(name.to_string(), RegisteredTool { handler, schema });
        self.stats.insert(name.to_string(), ToolStats::new(description));
        info!(tool = name, "Tool handler registered");
    }

    pub fn unregister_tool(&self, name: &str) -> bool {
        let removed = self.tools.remove(name).is_some();
        self.stats.remove(name);
        if removed {
            info!(tool = name, "Tool handler unregistered");
        }
        removed
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn available_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn tool_schema(&self, name: &str) -> Option<Value> {
        self.tools.get(name).and_then(|t| t.schema.clone())
    }

    /// Validate, normalize and run a tool
    pub async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
        context: &ExecutionContext,
    ) -> ExecutionResult {
        let started = Instant::now();

        let (handler, schema) = match self.tools.get(name) {
            Some(entry) => (entry.handler.clone(), entry.schema.clone()),
            None => {
                return ExecutionResult::failure(
                    ExecutionStatus::NotFound,
                    name,
                    arguments,
                    format!("Herramienta '{}' no encontrada", name),
                )
            }
        };

        let arguments = match &schema {
            Some(schema) => normalize_arguments(schema, arguments),
            None => arguments,
        };

        if self.enable_validation {
            if let Some(schema) = &schema {
                if let Err(message) = validate_arguments(name, schema, &arguments) {
                    debug!(tool = name, error = %message, "Argument validation failed");
                    return ExecutionResult::failure(
                        ExecutionStatus::ValidationError,
                        name,
                        arguments,
                        message,
                    );
                }
            }
        }

        let mut attempt: u32 = 0;
        loop {
            debug!(tool = name, attempt = attempt + 1, "Executing tool");
            let outcome = tokio::time::timeout(self.timeout, handler.call(arguments.clone(), context)).await;
            let elapsed = started.elapsed().as_secs_f64();

            let failure = match outcome {
                Ok(Ok(result)) => {
                    let mut execution = match tool_error(&result) {
                        Some((message, metadata)) => {
                            self.record(name, false, elapsed);
                            let mut failed =
                                ExecutionResult::failure(ExecutionStatus::Error, name, arguments, message);
                            failed.metadata = metadata;
                            failed
                        }
                        None => {
                            self.record(name, true, elapsed);
                            ExecutionResult::success(name, arguments, result)
                        }
                    };
                    execution.execution_time = elapsed;
                    execution.retry_count = attempt;
                    return execution;
                }
                Ok(Err(e)) => {
                    error!(tool = name, attempt = attempt + 1, error = %e, "Tool execution failed");
                    (ExecutionStatus::Error, e.to_string())
                }
                Err(_) => {
                    warn!(tool = name, timeout_secs = self.timeout.as_secs(), "Tool execution timed out");
                    (
                        ExecutionStatus::Timeout,
                        format!("Timeout después de {} segundos", self.timeout.as_secs()),
                    )
                }
            };

            if attempt >= self.max_retries {
                self.record(name, false, elapsed);
                let mut execution = ExecutionResult::failure(failure.0, name, arguments, failure.1);
                execution.execution_time = elapsed;
                execution.retry_count = attempt;
                return execution;
            }

            attempt += 1;
            tokio::time::sleep(RETRY_STEP * attempt).await;
        }
    }

    fn record(&self, name: &str, success: bool, execution_time: f64) {
        if let Some(mut stats) = self.stats.get_mut(name) {
            stats.record(success, execution_time);
        }
    }

    pub fn tool_stats(&self, name: &str) -> Option<ToolStats> {
        self.stats.get(name).map(|s| s.clone())
    }

    /// Per-tool stats plus a summary
    pub fn execution_stats(&self) -> Value {
        let mut tools = Map::new();
        let (mut executions, mut successes, mut failures) = (0u64, 0u64, 0u64);
        for entry in self.stats.iter() {
            executions += entry.total_executions;
            successes += entry.successful_executions;
            failures += entry.failed_executions;
            tools.insert(entry.key().clone(), json!(entry.value()));
        }
        json!({
            "tools": tools,
            "summary": {
                "total_tools": self.tools.len(),
                "total_executions": executions,
                "total_successes": successes,
                "total_failures": failures,
            }
        })
    }

    /// Reset counters for one tool, or all when `name` is `None`
    pub fn clear_stats(&self, name: Option<&str>) {
        match name {
            Some(name) => {
                if let Some(mut stats) = self.stats.get_mut(name) {
                    *stats = ToolStats::new(&stats.description);
                }
            }
            None => {
                for mut stats in self.stats.iter_mut() {
                    *stats = ToolStats::new(&stats.description);
                }
            }
        }
        info!(tool = name.unwrap_or("all"), "Execution stats cleared");
    }
}

/// Detect error payloads returned as successful results
///
/// Returns the cleaned message and metadata (`code`, `message`, `details`,
/// `path`) when the body carries a structured error.
fn tool_error(result: &Value) -> Option<(String, Map<String, Value>)> {
    if let Some(obj) = result.as_object() {
        let status_error = obj
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.eq_ignore_ascii_case("error"))
            .unwrap_or(false);
        let has_error = obj.get("error").map(is_truthy).unwrap_or(false);

        if status_error || has_error {
            let body = obj
                .get("body")
                .filter(|b| is_truthy(b))
                .or_else(|| obj.get("error"))
                .cloned()
                .unwrap_or_else(|| result.clone());
            return Some(parse_error_body(&body));
        }
        if let Some(items) = obj.get("result").and_then(Value::as_array) {
            return text_error(items).map(|t| (t, Map::new()));
        }
        return None;
    }
    result
        .as_array()
        .and_then(|items| text_error(items))
        .map(|t| (t, Map::new()))
}

fn text_error(items: &[Value]) -> Option<String> {
    let first = items.first()?;
    if first.get("type").and_then(Value::as_str) != Some("text") {
        return None;
    }
    let text = first.get("text").and_then(Value::as_str).unwrap_or("");
    text.contains("Error executing tool").then(|| text.to_string())
}

fn parse_error_body(body: &Value) -> (String, Map<String, Value>) {
    let parsed = match body {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => v,
            _ => return (s.clone(), Map::new()),
        },
        Value::Object(_) => body.clone(),
        other => return (other.to_string(), Map::new()),
    };

    let code = parsed
        .get("code")
        .or_else(|| parsed.get("status"))
        .filter(|c| !c.is_null())
        .map(|c| match c {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    let message = parsed
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Error en la herramienta")
        .to_string();

    let mut metadata = Map::new();
    if let Some(code) = &code {
        metadata.insert("code".to_string(), json!(code));
    }
    metadata.insert("message".to_string(), json!(message));
    metadata.insert(
        "details".to_string(),
        parsed.get("details").cloned().unwrap_or_else(|| json!([])),
    );
    metadata.insert(
        "path".to_string(),
        parsed.get("path").cloned().unwrap_or(Value::Null),
    );

    let cleaned = match code {
        Some(code) => format!("{}: {}", code, message),
        None => message,
    };
    (cleaned, metadata)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check arguments against the tool schema
///
/// Error messages are shown to end users and stay in Spanish.
pub fn validate_arguments(tool: &str, schema: &Value, arguments: &Value) -> Result<(), String> {
    let analysis = SchemaAnalysis::analyze(schema);
    let empty = Map::new();

    if let Some(root) = analysis.root_key() {
        let root_val = arguments.get(root);
        let Some(fields) = root_val.and_then(Value::as_object) else {
            return Err(format!(
                "La herramienta '{}' requiere objeto raíz '{}' de tipo dict. Faltan: {}",
                tool,
                root,
                analysis.required_fields.join(", ")
            ));
        };
        let props = analysis.properties().unwrap_or(&empty);
        let missing: Vec<String> = analysis
            .required_fields
            .iter()
            .filter(|f| !fields.contains_key(f.as_str()))
            .map(|f| {
                let ty = props.get(f).map(property_type).unwrap_or("string");
                format!("{}:{}", f, ty)
            })
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "La herramienta '{}' requiere los siguientes campos internos: {}",
                tool,
                missing.join(", ")
            ));
        }
        check_types(fields, props, Some(root))
    } else {
        let fields = arguments.as_object().unwrap_or(&empty);
        let missing: Vec<&str> = analysis
            .required_fields
            .iter()
            .filter(|f| !fields.contains_key(f.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "La herramienta '{}' requiere los siguientes campos: {} (estructura: flat)",
                tool,
                missing.join(", ")
            ));
        }
        check_types(fields, properties_of(schema).unwrap_or(&empty), None)
    }
}

fn check_types(fields: &Map<String, Value>, props: &Map<String, Value>, root: Option<&str>) -> Result<(), String> {
    for (key, value) in fields {
        let Some(expected) = props.get(key).and_then(|p| p.get("type")).and_then(Value::as_str) else {
            continue;
        };
        if !value_matches_type(value, expected) {
            let field = match root {
                Some(root) => format!("{}.{}", root, key),
                None => key.clone(),
            };
            return Err(format!(
                "Campo '{}' debe ser de tipo {} pero es {}",
                field,
                expected,
                json_type_name(value)
            ));
        }
    }
    Ok(())
}

/// Spellings a schema key may arrive under
fn key_variants(key: &str) -> Vec<String> {
    let lower = key.to_lowercase();
    let alnum: String = lower.chars().filter(|c| c.is_ascii_alphanumeric()).collect();

    let mut camel_split = String::new();
    let mut prev_lower = false;
    for c in key.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            camel_split.push(' ');
        }
        prev_lower = c.is_ascii_lowercase();
        camel_split.push(c);
    }
    let camel_split = camel_split.to_lowercase();
    let camel_joined: String = camel_split.split_whitespace().collect();

    let mut variants = vec![key.to_string(), lower, alnum, camel_split, camel_joined];
    let mut seen = std::collections::HashSet::new();
    variants.retain(|v| seen.insert(v.clone()));
    variants
}

/// Wrap flat arguments under the root key of an object-root schema
///
/// Only applies when the root key is absent. Flat keys are matched
/// case-insensitively against variants of the inner keys; matched keys
/// are moved under the root, everything else is left as is.
pub fn normalize_arguments(schema: &Value, arguments: Value) -> Value {
    let analysis = SchemaAnalysis::analyze(schema);
    let Some(root) = analysis.root_key() else {
        return arguments;
    };
    let Value::Object(mut args) = arguments else {
        return arguments;
    };
    if args.contains_key(root) {
        return Value::Object(args);
    }

    let by_lower: std::collections::HashMap<String, String> =
        args.keys().map(|k| (k.to_lowercase(), k.clone())).collect();

    let mut order: Vec<&String> = analysis.required_fields.iter().collect();
    if let Some(props) = analysis.properties() {
        order.extend(props.keys().filter(|k| !analysis.required_fields.contains(*k)));
    }

    let mut collected = Map::new();
    let mut consumed = Vec::new();
    for key in order {
        if collected.contains_key(key.as_str()) {
            continue;
        }
        let hit = key_variants(key)
            .into_iter()
            .find_map(|variant| by_lower.get(&variant).cloned());
        if let Some(original) = hit {
            if let Some(value) = args.get(&original) {
                collected.insert(key.clone(), value.clone());
                consumed.push(original);
            }
        }
    }

    if collected.is_empty() {
        return Value::Object(args);
    }
    for key in consumed {
        args.remove(&key);
    }
    debug!(root, fields = collected.len(), "Wrapped flat arguments under root");
    args.insert(root.to_string(), Value::Object(collected));
    Value::Object(args)
}
