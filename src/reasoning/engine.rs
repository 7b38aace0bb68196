// Reasoning engine
//
// Wraps LLM function calling to decide, per message, between calling a
// tool, answering conversationally or asking for clarification.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::function_calling::to_function_declarations;
use super::json_repair::safe_parse_json;
use super::prompts;
use super::types::{ActionType, ReasoningResult};
use crate::config::LlmConfig;
use crate::extraction::SchemaExtractor;
use crate::providers::{GenerateRequest, LlmProvider};
use crate::tools::schema::required_list;

const STRUCTURED_KEYS: [&str; 3] = ["action", "reasoning", "confidence"];
/// Extracted strings longer than this share of the message are echoes
const MAX_VALUE_SHARE: f64 = 0.8;

pub struct ReasoningEngine {
    provider: Arc<dyn LlmProvider>,
    extractor: SchemaExtractor,
    temperature: f32,
    max_tokens: u32,
}

impl ReasoningEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, llm: &LlmConfig) -> Self {
        info!(provider = provider.name(), model = provider.model(), "Reasoning engine ready");
        Self {
            provider,
            extractor: SchemaExtractor::new(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
        }
    }

    /// Ask the model which tool (if any) fits the message
    ///
    /// `tools` are dicts with name, description, parameters and optionally
    /// `preselection_score`; `context` holds `{role, content}` messages.
    pub async fn analyze_intent(
        &self,
        message: &str,
        tools: &[Value],
        context: &[Value],
    ) -> ReasoningResult {
        let start = Instant::now();
        let mut result = match self.analyze(message, tools, context).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Intent analysis failed");
                ReasoningResult::conversation(
                    format!("Error en análisis cognitivo: {}. Respondiendo conversacionalmente.", e),
                    0.1,
                )
                .with_raw_response(format!("ERROR: {}", e))
            }
        };
        result.processing_time = start.elapsed().as_secs_f64();
        info!(
            action = result.action.as_str(),
            tool = ?result.tool_name,
            confidence = result.confidence,
            "Intent analyzed"
        );
        result
    }

    async fn analyze(
        &self,
        message: &str,
        tools: &[Value],
        context: &[Value],
    ) -> anyhow::Result<ReasoningResult> {
        let request = GenerateRequest::new(prompts::intent_prompt(message, tools, context))
            .with_system(prompts::system_prompt(tools))
            .with_tools(to_function_declarations(tools))
            .with_temperature(self.temperature);
        let reply = self.provider.generate(&request).await?;
        let assistant_text = reply.text_or_empty().trim().to_string();

        let Some(call) = reply.function_call else {
            let message = if assistant_text.is_empty() {
                "Después de analizar las herramientas disponibles, no encontré una coincidencia suficientemente clara para ejecutar una acción.".to_string()
            } else {
                assistant_text.clone()
            };
            return Ok(ReasoningResult::conversation(
                format!("Análisis contextual completado. {}", message),
                0.78,
            )
            .with_message(message)
            .with_raw_response(assistant_text));
        };

        debug!(tool = %call.name, args = %call.args, "LLM selected tool");
        if let Some(fallback) = self.check_extractability(message, &call.name, tools) {
            return Ok(fallback);
        }

        let arguments = match call.args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut reasoning = format!(
            "Análisis semántico completado. La herramienta '{}' fue seleccionada por su relevancia frente al mensaje y la viabilidad de extraer sus parámetros.",
            call.name
        );
        if !assistant_text.is_empty() {
            reasoning.push_str(&format!(" Justificación adicional: {}", assistant_text));
        }
        Ok(ReasoningResult::tool_call(call.name, arguments, reasoning, 0.92))
    }

    /// Reject a selection whose required values cannot be found in the
    /// message, trying the other candidates before giving up
    fn check_extractability(
        &self,
        message: &str,
        tool_name: &str,
        tools: &[Value],
    ) -> Option<ReasoningResult> {
        let schema = tools
            .iter()
            .find(|t| t.get("name").and_then(Value::as_str) == Some(tool_name))
            .and_then(|t| t.get("parameters"))
            .filter(|s| s.as_object().map(|o| !o.is_empty()).unwrap_or(false))?;

        let extracted = self.extractor.extract_arguments(schema, message, tool_name);
        let required = required_list(schema);
        if required.is_empty() || (!extracted.is_empty() && values_are_specific(&extracted, message)) {
            return None;
        }
        warn!(tool = tool_name, "Selected tool has required parameters that cannot be extracted");

        for tool in tools {
            let Some(name) = tool.get("name").and_then(Value::as_str) else {
                continue;
            };
            let Some(alt_schema) = tool.get("parameters").filter(|s| s.is_object()) else {
                continue;
            };
            if name == tool_name || required_list(alt_schema).is_empty() {
                continue;
            }
            let args = self.extractor.extract_arguments(alt_schema, message, name);
            if !args.is_empty() && values_are_specific(&args, message) {
                info!(tool = name, "Using alternative tool with extractable parameters");
                return Some(ReasoningResult::tool_call(
                    name,
                    args,
                    "Herramienta alternativa seleccionada tras validar que sus parámetros se pueden extraer del mensaje",
                    0.75,
                ));
            }
        }

        Some(
            ReasoningResult::conversation(
                "Validación de extracción fallida: ninguna herramienta tiene parámetros extraíbles del mensaje.",
                0.6,
            )
            .with_message("Entiendo lo que necesitas, pero me falta información específica para procesar tu solicitud. ¿Podrías darme los datos concretos?"),
        )
    }

    /// Interpret a JSON decision written by the model as text
    pub fn parse_structured_response(&self, text: &str) -> ReasoningResult {
        let parsed = match safe_parse_json(text, &STRUCTURED_KEYS, true) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!("Structured response is not a JSON object");
                return ReasoningResult::conversation(
                    "Respuesta JSON malformada del modelo. Usando respuesta conversacional.",
                    0.2,
                )
                .with_raw_response(text);
            }
        };

        let action_name = parsed.get("action").and_then(Value::as_str).unwrap_or("");
        let tool_name = parsed
            .get("tool_name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let action = match ActionType::parse(action_name) {
            Some(ActionType::ToolCall) if tool_name.is_none() => None,
            other => other,
        };
        let Some(action) = action else {
            warn!(action = action_name, "Invalid action in structured response");
            return ReasoningResult::conversation(
                format!("Acción inválida en la respuesta del modelo: '{}'", action_name),
                0.3,
            )
            .with_raw_response(text);
        };

        let text_field = |key: &str| {
            parsed
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };
        let confidence = parsed
            .get("confidence")
            .and_then(|c| c.as_f64().or_else(|| c.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let reasoning = Some(text_field("reasoning"))
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "Sin explicación proporcionada".to_string());

        let mut result = match action {
            ActionType::ToolCall => {
                let arguments = match parsed.get("arguments") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Map::new(),
                };
                ReasoningResult::tool_call(tool_name.unwrap_or_default(), arguments, reasoning, confidence)
            }
            ActionType::Clarify => {
                ReasoningResult::clarify(text_field("clarification_question"), reasoning, confidence)
            }
            ActionType::Conversation => ReasoningResult::conversation(reasoning, confidence),
        };
        result.assistant_message = text_field("assistant_message");
        result.raw_response = text.to_string();
        result
    }

    async fn complete(&self, prompt: String) -> anyhow::Result<String> {
        let request = GenerateRequest::new(prompt).with_temperature(self.temperature);
        let reply = self.provider.generate(&request).await?;
        match reply.text {
            Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            _ => anyhow::bail!("Empty response from model"),
        }
    }

    /// A question asking the user for `missing`
    pub async fn generate_clarification(&self, message: &str, missing: &str) -> String {
        match self.complete(prompts::clarification_prompt(message, missing)).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to generate clarification");
                format!(
                    "Necesito más información sobre: {}. ¿Podrías ser más específico?",
                    missing
                )
            }
        }
    }

    /// A user-facing explanation of a failure
    pub async fn handle_error_recovery(&self, error: &str, message: &str) -> String {
        match self.complete(prompts::error_recovery_prompt(error, message)).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Error recovery failed");
                "Ha ocurrido un error interno. Por favor, intenta reformular tu solicitud.".to_string()
            }
        }
    }

    /// Free-form reply over the last three turns
    pub async fn generate_conversational_response(&self, message: &str, context: &[Value]) -> String {
        let start = context.len().saturating_sub(3);
        let mut history: Vec<String> = context[start..]
            .iter()
            .map(|m| {
                let role = match m.get("role").and_then(Value::as_str) {
                    Some("user") => "Usuario",
                    _ => "Asistente",
                };
                format!("{}: {}", role, m.get("content").and_then(Value::as_str).unwrap_or(""))
            })
            .collect();
        let last_is_message = context
            .last()
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            == Some(message);
        if !last_is_message {
            history.push(format!("Usuario: {}", message));
        }

        let prompt = prompts::conversational_prompt(&(history.join("\n") + "\n"));
        match self.provider.generate(&GenerateRequest::new(prompt)).await {
            Ok(reply) => match reply.text {
                Some(text) if !text.trim().is_empty() => text.trim().to_string(),
                _ => "Entiendo. ¿En qué más puedo ayudarte?".to_string(),
            },
            Err(e) => {
                error!(error = %e, "Failed to generate conversational response");
                "Disculpa, tuve un problema generando la respuesta. ¿Podrías reformular tu pregunta?".to_string()
            }
        }
    }

    pub fn engine_status(&self) -> Value {
        json!({
            "provider": self.provider.name(),
            "model_name": self.provider.model(),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "status": "active",
            "api_configured": true,
        })
    }
}

/// Whether no extracted string merely echoes the message
fn values_are_specific(args: &Map<String, Value>, message: &str) -> bool {
    let message = message.trim();
    let limit = message.chars().count() as f64 * MAX_VALUE_SHARE;
    let lower = message.to_lowercase();

    fn check(value: &Value, lower: &str, limit: f64) -> bool {
        match value {
            Value::String(s) => {
                s.to_lowercase() != lower && (s.trim().chars().count() as f64) <= limit
            }
            Value::Object(map) => map.values().all(|v| check(v, lower, limit)),
            Value::Array(items) => items.iter().all(|v| check(v, lower, limit)),
            _ => true,
        }
    }
    args.values().all(|v| check(v, &lower, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LlmReply;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<VecDeque<anyhow::Result<LlmReply>>>,
        prompts: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<anyhow::Result<LlmReply>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<LlmReply> {
            self.prompts.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(LlmReply::default()))
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    fn engine(provider: Arc<ScriptedProvider>) -> ReasoningEngine {
        ReasoningEngine::new(provider, &LlmConfig::default())
    }

    fn tools() -> Vec<Value> {
        vec![
            json!({
                "name": "reservas_obtener",
                "description": "Obtener una reserva por id",
                "parameters": {
                    "type": "object",
                    "required": ["id_reserva"],
                    "properties": {"id_reserva": {"type": "integer"}}
                },
                "preselection_score": 0.8
            }),
            json!({
                "name": "vuelos_listar",
                "description": "Listar vuelos",
                "parameters": {"type": "object", "properties": {}},
                "preselection_score": 0.4
            }),
        ]
    }

    #[tokio::test]
    async fn test_function_call_with_extractable_values() {
        let provider = ScriptedProvider::new(vec![Ok(LlmReply::call(
            "reservas_obtener",
            json!({"id_reserva": 42}),
        ))]);
        let engine = engine(provider.clone());
        let result = engine
            .analyze_intent("muéstrame la reserva con id_reserva 42", &tools(), &[])
            .await;

        assert_eq!(result.action, ActionType::ToolCall);
        assert_eq!(result.tool_name.as_deref(), Some("reservas_obtener"));
        assert_eq!(result.arguments["id_reserva"], 42);
        assert_eq!(result.confidence, 0.92);

        let request = provider.prompts.lock().unwrap()[0].clone();
        assert!(request.tools.is_some());
        assert!(request.messages[0]
            .content
            .contains("- reservas_obtener (relevancia semántica: 0.80): Obtener una reserva por id"));
    }

    #[tokio::test]
    async fn test_function_call_without_values_becomes_conversation() {
        let provider = ScriptedProvider::new(vec![Ok(LlmReply::call(
            "reservas_obtener",
            json!({}),
        ))]);
        let result = engine(provider)
            .analyze_intent("quiero ver una reserva", &tools(), &[])
            .await;
        assert_eq!(result.action, ActionType::Conversation);
        assert_eq!(result.confidence, 0.6);
        assert!(!result.assistant_message.is_empty());
    }

    #[tokio::test]
    async fn test_text_reply_is_conversation() {
        let provider = ScriptedProvider::new(vec![Ok(LlmReply::text("¡Hola! ¿En qué te ayudo?"))]);
        let result = engine(provider).analyze_intent("hola", &tools(), &[]).await;
        assert_eq!(result.action, ActionType::Conversation);
        assert_eq!(result.confidence, 0.78);
        assert_eq!(result.assistant_message, "¡Hola! ¿En qué te ayudo?");
    }

    #[tokio::test]
    async fn test_provider_error_is_low_confidence_conversation() {
        let provider = ScriptedProvider::new(vec![Err(anyhow::anyhow!("quota exceeded"))]);
        let result = engine(provider).analyze_intent("hola", &tools(), &[]).await;
        assert_eq!(result.action, ActionType::Conversation);
        assert_eq!(result.confidence, 0.1);
        assert!(result.raw_response.starts_with("ERROR:"));
    }

    #[test]
    fn test_parse_structured_response() {
        let engine = engine(ScriptedProvider::new(vec![]));

        let ok = engine.parse_structured_response(
            r#"```json
{"action": "tool_call", "tool_name": "vuelos_listar", "arguments": {}, "reasoning": "pide vuelos", "confidence": 0.9}
```"#,
        );
        assert_eq!(ok.action, ActionType::ToolCall);
        assert_eq!(ok.tool_name.as_deref(), Some("vuelos_listar"));
        assert_eq!(ok.confidence, 0.9);

        let clarify = engine.parse_structured_response(
            r#"{"action": "clarify", "clarification_question": "¿Qué vuelo?", "reasoning": "", "confidence": "0.7"}"#,
        );
        assert!(clarify.requires_clarification);
        assert_eq!(clarify.clarification_question, "¿Qué vuelo?");
        assert_eq!(clarify.confidence, 0.7);

        let unknown = engine.parse_structured_response(r#"{"action": "dance", "reasoning": "", "confidence": 1}"#);
        assert_eq!(unknown.action, ActionType::Conversation);
        assert_eq!(unknown.confidence, 0.3);

        let broken = engine.parse_structured_response("no es json");
        assert_eq!(broken.confidence, 0.2);
    }

    #[tokio::test]
    async fn test_conversational_fallback_on_error() {
        let provider = ScriptedProvider::new(vec![Err(anyhow::anyhow!("down"))]);
        let text = engine(provider)
            .generate_conversational_response("hola", &[])
            .await;
        assert!(text.starts_with("Disculpa"));
    }

    #[tokio::test]
    async fn test_clarification_fallback_mentions_missing() {
        let provider = ScriptedProvider::new(vec![Ok(LlmReply::default())]);
        let text = engine(provider)
            .generate_clarification("crea un avión", "modelo, capacidad")
            .await;
        assert!(text.contains("modelo, capacidad"));
    }

    #[tokio::test]
    async fn test_error_recovery_explains_failure() {
        let provider = ScriptedProvider::new(vec![Ok(LlmReply::text(
            "  No pude consultar la reserva. Intenta de nuevo en unos minutos.  ",
        ))]);
        let text = engine(Arc::clone(&provider))
            .handle_error_recovery("HTTP 503", "consulta la reserva 77")
            .await;
        assert_eq!(text, "No pude consultar la reserva. Intenta de nuevo en unos minutos.");

        let prompts = provider.prompts.lock().unwrap();
        let prompt = &prompts[0].messages[0].content;
        assert!(prompt.contains("Error: HTTP 503"));
        assert!(prompt.contains("Mensaje original: \"consulta la reserva 77\""));
    }

    #[tokio::test]
    async fn test_error_recovery_fallback() {
        let provider = ScriptedProvider::new(vec![Err(anyhow::anyhow!("down"))]);
        let text = engine(provider)
            .handle_error_recovery("timeout", "lista vuelos")
            .await;
        assert_eq!(
            text,
            "Ha ocurrido un error interno. Por favor, intenta reformular tu solicitud."
        );
    }

    #[test]
    fn test_values_are_specific() {
        let mut args = Map::new();
        args.insert("nombre".into(), json!("Ana"));
        assert!(values_are_specific(&args, "crea el usuario Ana con correo"));
        args.insert("nota".into(), json!("crea el usuario Ana con correo"));
        assert!(!values_are_specific(&args, "crea el usuario Ana con correo"));
    }
}
