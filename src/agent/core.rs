// Agent core
//
// Drives one user message through reasoning, tool execution and reply
// generation. The core is shared by every session; conversational state
// lives in the `AgentSession` handed to `process_message`.

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::planner::DependencyPlanner;
use super::response::{
    clarification_message, format_tool_error, format_tool_success, AgentResponse, AgentStatus,
};
use super::session::AgentSession;
use crate::config::{Config, FlowConfig, ReasoningConfig};
use crate::extraction::SchemaExtractor;
use crate::providers::{create_provider, ChatRole};
use crate::reasoning::{ActionType, ReasoningEngine, ReasoningResult};
use crate::selection::SemanticSelector;
use crate::tools::mcp::{McpClient, McpEndpoint, McpToolHandler};
use crate::tools::{
    ExecutionContext, SchemaAnalysis, SemanticRegistry, ToolDefinition, ToolHandler, ToolManager,
};

const FALLBACK_REPLY: &str = "Entiendo tu mensaje. ¿En qué más puedo ayudarte?";
const CLARIFY_CANDIDATES: usize = 3;
const CONVERSATION_TURNS: usize = 3;

#[derive(Debug, Default)]
struct ToolLoadState {
    loaded: bool,
    last_failure: Option<Instant>,
}

pub struct AgentCore {
    flow: FlowConfig,
    reasoning: ReasoningConfig,
    tools_enabled: bool,
    manager: Arc<ToolManager>,
    registry: RwLock<SemanticRegistry>,
    selector: SemanticSelector,
    engine: Option<ReasoningEngine>,
    extractor: SchemaExtractor,
    mcp: Option<Arc<McpClient>>,
    planner: RwLock<DependencyPlanner>,
    mcp_tools: RwLock<BTreeMap<String, ToolDefinition>>,
    tool_load: Mutex<ToolLoadState>,
    reload_cooldown: Duration,
}

impl AgentCore {
    pub fn new(
        config: &Config,
        engine: Option<ReasoningEngine>,
        selector: SemanticSelector,
        mcp: Option<Arc<McpClient>>,
    ) -> Self {
        info!(
            reasoning = engine.is_some(),
            embeddings = selector.embeddings_enabled(),
            mcp = mcp.is_some(),
            tools_enabled = config.tools.enabled,
            "Agent core initialized"
        );
        Self {
            flow: config.flow.clone(),
            reasoning: config.reasoning.clone(),
            tools_enabled: config.tools.enabled,
            manager: Arc::new(ToolManager::from_config(&config.tools)),
            registry: RwLock::new(SemanticRegistry::from_config(&config.semantic)),
            selector,
            engine,
            extractor: SchemaExtractor::new(),
            mcp,
            planner: RwLock::new(DependencyPlanner::new()),
            mcp_tools: RwLock::new(BTreeMap::new()),
            tool_load: Mutex::new(ToolLoadState::default()),
            reload_cooldown: Duration::from_secs(config.mcp.reload_cooldown_secs),
        }
    }

    /// Wire every component from configuration
    ///
    /// The reasoning engine needs an API key and `enable_llm_reasoning`;
    /// the MCP client needs `mcp.enabled`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = if config.reasoning.enable_llm_reasoning {
            create_provider(config)?.map(|provider| ReasoningEngine::new(provider, &config.llm))
        } else {
            None
        };
        let selector = SemanticSelector::from_config(config).context("Failed to build semantic selector")?;
        let mcp = if config.mcp.enabled {
            let endpoint = McpEndpoint::from_settings(&config.mcp);
            Some(Arc::new(McpClient::new(endpoint).context("Failed to create MCP client")?))
        } else {
            None
        };
        Ok(Self::new(config, engine, selector, mcp))
    }

    pub fn manager(&self) -> &Arc<ToolManager> {
        &self.manager
    }

    fn idle_status(&self) -> AgentStatus {
        if self.tools_enabled {
            AgentStatus::Idle
        } else {
            AgentStatus::Disabled
        }
    }

    /// Handle one user message end to end
    ///
    /// Tool calls loop back into reasoning with the tool observation in
    /// memory, up to `flow.max_iterations` times. Never fails: internal
    /// errors become an `error` response.
    pub async fn process_message(
        &self,
        session: &mut AgentSession,
        message: &str,
        context: &ExecutionContext,
    ) -> AgentResponse {
        let started = Instant::now();
        session.status = AgentStatus::Processing;
        session.touch();
        session.memory.add_message(ChatRole::User, message, None);

        let outcome = self.run_turn(session, message, context).await;
        let execution_time = started.elapsed().as_secs_f64();

        match outcome {
            Ok(mut response) => {
                let mut metadata = Map::new();
                metadata.insert("action".to_string(), json!(response.action_taken));
                metadata.insert("tool_used".to_string(), json!(response.tool_used));
                metadata.insert("confidence".to_string(), json!(response.confidence));
                session
                    .memory
                    .add_message(ChatRole::Assistant, response.message.clone(), Some(metadata));

                response.execution_time = execution_time;
                response.session_id = Some(session.id.clone());
                session.stats.record_message(execution_time, !response.is_error());
                session.status = self.idle_status();
                info!(
                    session_id = %session.id,
                    action = %response.action_taken,
                    tool = ?response.tool_used,
                    duration_ms = (execution_time * 1000.0) as u64,
                    response_length = response.message.chars().count(),
                    "Query processed"
                );
                response
            }
            Err(e) => {
                error!(session_id = %session.id, error = %format!("{:#}", e), "Message processing failed");
                session.status = AgentStatus::Error;
                session.stats.record_message(execution_time, false);
                let mut response = AgentResponse::new(
                    format!("Lo siento, ocurrió un error procesando tu mensaje: {}", e),
                    "error",
                    "Error interno del sistema",
                    0.0,
                )
                .with_metadata("error", json!(e.to_string()));
                response.execution_time = execution_time;
                response.session_id = Some(session.id.clone());
                response
            }
        }
    }

    /// The reasoning/action loop
    ///
    /// Once a tool has run, the turn ends when reasoning proposes no new
    /// tool call or repeats one already made this turn; the last tool
    /// outcome is the reply.
    async fn run_turn(
        &self,
        session: &mut AgentSession,
        message: &str,
        context: &ExecutionContext,
    ) -> Result<AgentResponse> {
        let mut executed: Vec<(String, Map<String, Value>)> = Vec::new();
        let mut last_tool_response: Option<AgentResponse> = None;

        for iteration in 0..self.flow.max_iterations.max(1) {
            let decision = self.perform_reasoning(session, message).await;
            info!(
                iteration = iteration + 1,
                action = decision.action.as_str(),
                tool = ?decision.tool_name,
                confidence = decision.confidence,
                "Agentic loop iteration"
            );

            let proposed = decision
                .tool_name
                .clone()
                .filter(|_| decision.action == ActionType::ToolCall);
            let tool_name = match proposed {
                Some(name) => name,
                None => {
                    if let Some(response) = last_tool_response {
                        return Ok(response);
                    }
                    return Ok(self.respond(session, message, decision).await);
                }
            };

            let arguments = self.wrap_root_arguments(&tool_name, decision.arguments.clone());
            if executed.iter().any(|(t, a)| *t == tool_name && *a == arguments) {
                debug!(tool = %tool_name, "Repeated tool call, ending turn");
                break;
            }
            executed.push((tool_name.clone(), arguments.clone()));

            let deps = self.planner.read().await.dependencies(&tool_name).to_vec();
            info!(tool = %tool_name, dependencies = ?deps, "Tools requested");
            self.planner
                .read()
                .await
                .execute_dependencies(&self.manager, &tool_name, context)
                .await;

            let response = self
                .execute_tool_action(session, &tool_name, arguments, &decision, context)
                .await?;
            last_tool_response = Some(response);
        }

        Ok(last_tool_response.unwrap_or_else(|| {
            AgentResponse::new(
                "Lo siento, ocurrió un error interno al procesar tu solicitud.",
                "error",
                "Error interno: el ciclo de razonamiento no produjo respuesta",
                0.0,
            )
        }))
    }

    /// Decide what to do with the message
    async fn perform_reasoning(&self, session: &mut AgentSession, message: &str) -> ReasoningResult {
        if !self.tools_enabled {
            return ReasoningResult::conversation("Herramientas no habilitadas", 0.4);
        }
        session.stats.reasoning_calls += 1;

        if let Some(engine) = &self.engine {
            let conversation = session.memory.context_for_llm(Some(self.flow.max_context_messages));
            let tools = {
                let registry = self.registry.read().await;
                let ranked = self
                    .selector
                    .rank_tools(message, &registry, Some(self.reasoning.max_candidates))
                    .await;
                self.selector.prepare_llm_tools_context(&ranked)
            };
            debug!(available = tools.len(), context = conversation.len(), "Reasoning with LLM");
            let result = engine.analyze_intent(message, &tools, &conversation).await;
            if result.action != ActionType::Conversation {
                return result;
            }
        }

        self.semantic_fallback(message).await
    }

    /// Top semantic tool plus rule-based extraction
    async fn semantic_fallback(&self, message: &str) -> ReasoningResult {
        let threshold = self.selector.thresholds().direct as f64;
        let top = {
            let registry = self.registry.read().await;
            self.selector
                .rank_tools(message, &registry, Some(1))
                .await
                .into_iter()
                .next()
        };
        let Some(top) = top.filter(|t| t.score as f64 >= threshold) else {
            return ReasoningResult::conversation("Sin decisión del LLM; respuesta conversacional", 0.6);
        };
        let score = top.score as f64;

        let schema = self
            .manager
            .tool_schema(&top.name)
            .unwrap_or_else(|| top.tool.parameters.clone());
        let extracted = self.extractor.extract_arguments(&schema, message, &top.name);
        let analysis = SchemaAnalysis::analyze(&schema);

        let is_provided = |field: &str| {
            let nested = analysis
                .root_key()
                .and_then(|root| extracted.get(root))
                .and_then(Value::as_object)
                .map(|inner| inner.contains_key(field))
                .unwrap_or(false);
            nested || extracted.contains_key(field)
        };
        let required = &analysis.required_fields;
        let missing: Vec<String> = required.iter().filter(|f| !is_provided(f)).cloned().collect();
        let coverage = if required.is_empty() {
            1.0
        } else {
            (required.len() - missing.len()) as f64 / required.len() as f64
        };

        debug!(
            tool = %top.name,
            score,
            coverage,
            extracted = extracted.len(),
            "Semantic fallback"
        );

        let executable = !extracted.is_empty() || required.is_empty();
        if executable && coverage >= self.reasoning.min_coverage_for_execution {
            return ReasoningResult::tool_call(
                top.name.clone(),
                extracted,
                format!("Fallback semántico (score={:.3})", score),
                (0.6 + (score - threshold)).min(0.8),
            );
        }

        let mut result = ReasoningResult::clarify(
            clarification_message(&top.name, &missing),
            format!("Fallback de aclaración (score={:.3})", score),
            0.5,
        );
        result.tool_name = Some(top.name);
        result.arguments = extracted;
        result
    }

    /// Move flat inner fields under the object root when the model left
    /// the root out
    fn wrap_root_arguments(&self, tool: &str, mut args: Map<String, Value>) -> Map<String, Value> {
        let Some(schema) = self.manager.tool_schema(tool) else {
            return args;
        };
        let analysis = SchemaAnalysis::analyze(&schema);
        let Some(root) = analysis.root_key() else {
            return args;
        };
        if args.contains_key(root) {
            return args;
        }

        let mut keys: Vec<String> = analysis.required_fields.clone();
        if let Some(props) = analysis.properties() {
            let optional: Vec<String> = props.keys().filter(|k| !keys.contains(k)).cloned().collect();
            keys.extend(optional);
        }
        let mut inner = Map::new();
        for key in keys {
            if let Some(value) = args.remove(&key) {
                inner.insert(key, value);
            }
        }
        if !inner.is_empty() {
            debug!(tool, root, fields = inner.len(), "Wrapped flat arguments into root object");
            args.insert(root.to_string(), Value::Object(inner));
        }
        args
    }

    async fn execute_tool_action(
        &self,
        session: &mut AgentSession,
        tool: &str,
        arguments: Map<String, Value>,
        decision: &ReasoningResult,
        context: &ExecutionContext,
    ) -> Result<AgentResponse> {
        if !self.tools_enabled {
            return Ok(AgentResponse::new(
                "Las herramientas están deshabilitadas en este agente.",
                "tool_disabled",
                "Herramientas no disponibles",
                0.0,
            ));
        }

        session.status = AgentStatus::ExecutingTool;
        info!(tool, arguments_count = arguments.len(), "Executing tool");
        let execution = self
            .manager
            .execute_tool(tool, Value::Object(arguments.clone()), context)
            .await;
        session.stats.tools_executed += 1;

        let (message, confidence) = if execution.is_success() {
            self.registry.write().await.update_tool_usage(tool);
            info!(tool, time = execution.execution_time, "Tool execution succeeded");
            (
                format_tool_success(tool, execution.result.as_ref()),
                (decision.confidence + 0.1).min(1.0),
            )
        } else {
            warn!(
                tool,
                status = execution.status.as_str(),
                error = ?execution.error,
                time = execution.execution_time,
                "Tool execution failed"
            );
            (
                format_tool_error(tool, &execution),
                (decision.confidence - 0.2).max(0.0),
            )
        };

        let observation = serde_json::to_string(&execution.to_observation())
            .context("Failed to encode tool observation")?;
        session.memory.add_message(ChatRole::User, observation, None);

        let execution_value =
            serde_json::to_value(&execution).context("Failed to encode execution result")?;
        Ok(AgentResponse::new(message, "tool_execution", decision.reasoning.clone(), confidence)
            .with_tool(tool)
            .with_metadata("execution_result", execution_value)
            .with_metadata("tool_arguments", Value::Object(arguments)))
    }

    /// Reply for clarification and conversation decisions
    async fn respond(&self, session: &AgentSession, message: &str, decision: ReasoningResult) -> AgentResponse {
        match decision.action {
            ActionType::Clarify => {
                let mut text = decision.clarification_question.clone();
                let fields = self.clarification_fields(decision.tool_name.as_deref(), message).await;
                if !fields.is_empty() {
                    text = format!("{} Para continuar, necesito: {}.", text, fields.join(", "));
                }
                let mut response = AgentResponse::new(
                    text.trim(),
                    "clarification",
                    decision.reasoning,
                    decision.confidence,
                );
                response.tool_used = decision.tool_name;
                response
            }
            _ => match &self.engine {
                Some(engine) => {
                    let context = session.memory.context_for_llm(Some(CONVERSATION_TURNS));
                    let reply = engine.generate_conversational_response(message, &context).await;
                    AgentResponse::new(reply, "conversation", decision.reasoning, decision.confidence)
                }
                None => AgentResponse::new(
                    FALLBACK_REPLY,
                    "conversation",
                    "Respuesta conversacional genérica",
                    0.3,
                ),
            },
        }
    }

    /// Sorted required fields of the tool a clarification is about
    ///
    /// Without a known tool, the best of the top candidates is used,
    /// preferring object-root tools with inner required fields, then any
    /// tool with required fields.
    async fn clarification_fields(&self, tool: Option<&str>, message: &str) -> Vec<String> {
        let chosen = match tool.filter(|t| self.manager.has_tool(t)) {
            Some(tool) => Some(tool.to_string()),
            None => {
                let registry = self.registry.read().await;
                let ranked = self
                    .selector
                    .rank_tools(message, &registry, Some(CLARIFY_CANDIDATES))
                    .await;
                let analyses: Vec<(String, SchemaAnalysis)> = ranked
                    .iter()
                    .filter_map(|r| {
                        self.manager
                            .tool_schema(&r.name)
                            .map(|schema| (r.name.clone(), SchemaAnalysis::analyze(&schema)))
                    })
                    .collect();
                analyses
                    .iter()
                    .find(|(_, a)| a.is_object_root() && !a.required_fields.is_empty())
                    .or_else(|| analyses.iter().find(|(_, a)| !a.required_fields.is_empty()))
                    .map(|(name, _)| name.clone())
                    .or_else(|| ranked.first().map(|r| r.name.clone()))
            }
        };

        let Some(schema) = chosen.and_then(|name| self.manager.tool_schema(&name)) else {
            return Vec::new();
        };
        let mut fields = SchemaAnalysis::analyze(&schema).required_fields;
        fields.sort();
        fields.dedup();
        fields
    }

    /// Register a tool with the manager and the semantic registry
    ///
    /// A schema without `required` and exactly one object property gets
    /// that property marked required, so it is treated as an object root.
    pub async fn register_tool(
        &self,
        name: &str,
        handler: Arc<dyn ToolHandler>,
        description: &str,
        schema: Option<Value>,
        example: Option<&str>,
        category: Option<&str>,
    ) -> bool {
        if !self.tools_enabled {
            warn!(tool = name, "Tools disabled, registration skipped");
            return false;
        }

        let mut schema = schema.unwrap_or_else(|| json!({}));
        promote_single_object_root(&mut schema);

        let manager_schema = schema
            .as_object()
            .filter(|s| !s.is_empty())
            .map(|_| schema.clone());
        self.manager.register_tool(name, handler, manager_schema, description);

        let example = example
            .map(str::to_string)
            .unwrap_or_else(|| format!("Usar {}", name));
        self.registry.write().await.register_tool(
            name,
            description,
            schema,
            &example,
            Some(category.unwrap_or("general")),
        );
        true
    }

    /// Discover the MCP tools, register them and refresh the index and
    /// planner
    ///
    /// Returns the number of registered tools.
    pub async fn load_tools_from_mcp(&self) -> Result<usize> {
        let Some(client) = &self.mcp else {
            anyhow::bail!("MCP client not configured");
        };
        let started = Instant::now();
        let tools = client.list_tools().await;
        if tools.is_empty() {
            warn!("No tools obtained from the MCP server");
        }

        let mut registered = 0;
        for tool in tools {
            let handler: Arc<dyn ToolHandler> =
                Arc::new(McpToolHandler::new(Arc::clone(client), tool.name.clone()));
            let example = (!tool.description.is_empty())
                .then(|| format!("Usar {} para {}", tool.name, tool.description));
            let ok = self
                .register_tool(
                    &tool.name,
                    handler,
                    &tool.description,
                    Some(tool.input_schema.clone()),
                    example.as_deref(),
                    None,
                )
                .await;
            if ok {
                registered += 1;
                self.mcp_tools.write().await.insert(tool.name.clone(), tool);
            }
        }

        let indexed = {
            let registry = self.registry.read().await;
            self.selector.build_index(&registry).await
        };
        self.rebuild_planner().await;
        info!(
            registered,
            indexed,
            duration_ms = started.elapsed().as_millis() as u64,
            "MCP tools loaded"
        );
        Ok(registered)
    }

    /// Load MCP tools once; later calls are no-ops after a successful load
    ///
    /// A failed or empty load is retried only after `reload_cooldown`. A
    /// caller that finds a load already running goes on without tools.
    pub async fn ensure_tools_loaded(&self) {
        if self.mcp.is_none() || !self.tools_enabled {
            return;
        }
        let Ok(mut state) = self.tool_load.try_lock() else {
            debug!("MCP tool load in progress, continuing without waiting");
            return;
        };
        if state.loaded {
            return;
        }
        if let Some(failed_at) = state.last_failure {
            let since = failed_at.elapsed();
            if since < self.reload_cooldown {
                debug!(
                    retry_in_ms = self.reload_cooldown.saturating_sub(since).as_millis() as u64,
                    "Skipping MCP tool load during cooldown"
                );
                return;
            }
        }
        match self.load_tools_from_mcp().await {
            Ok(count) if count > 0 => {
                state.loaded = true;
                state.last_failure = None;
            }
            Ok(_) => {
                state.last_failure = Some(Instant::now());
                warn!(
                    cooldown_secs = self.reload_cooldown.as_secs(),
                    "MCP tool load returned nothing"
                );
            }
            Err(e) => {
                state.last_failure = Some(Instant::now());
                warn!(error = %format!("{:#}", e), "MCP tool load failed");
            }
        }
    }

    /// Put a session back to rest after its turn was cut short
    ///
    /// Used when the caller stops waiting on `process_message`. A user
    /// message left unanswered in memory gets an assistant note so the
    /// history stays paired.
    pub fn abandon_turn(&self, session: &mut AgentSession, elapsed: f64) {
        let unanswered = session
            .memory
            .recent_messages(1)
            .first()
            .is_some_and(|m| m.role == ChatRole::User);
        if unanswered {
            let mut metadata = Map::new();
            metadata.insert("action".to_string(), json!("timeout"));
            session.memory.add_message(
                ChatRole::Assistant,
                "La solicitud excedió el tiempo máximo de procesamiento.",
                Some(metadata),
            );
        }
        session.stats.record_message(elapsed, false);
        session.status = self.idle_status();
        warn!(session_id = %session.id, duration_ms = (elapsed * 1000.0) as u64, "Turn abandoned");
    }

    pub async fn rebuild_planner(&self) {
        let tools: Vec<(String, Value)> = self
            .manager
            .available_tools()
            .into_iter()
            .map(|name| {
                let schema = self.manager.tool_schema(&name).unwrap_or_else(|| json!({}));
                (name, schema)
            })
            .collect();
        let registry = self.registry.read().await;
        self.planner.write().await.rebuild(&tools, &registry);
    }

    /// Build the embedding index now instead of on the first query
    pub async fn prewarm(&self) -> usize {
        self.ensure_tools_loaded().await;
        let registry = self.registry.read().await;
        self.selector.build_index(&registry).await
    }

    pub fn session_info(&self, session: &AgentSession) -> Value {
        json!({
            "session_id": session.id,
            "status": session.status.as_str(),
            "created_at": session.created_at.to_rfc3339(),
            "last_activity": session.last_activity.to_rfc3339(),
            "components": {
                "reasoning_enabled": self.reasoning.enable_llm_reasoning,
                "tools_enabled": self.tools_enabled,
                "reasoning_engine": self.engine.as_ref().map(ReasoningEngine::engine_status),
                "embeddings": self.selector.embeddings_enabled(),
                "mcp_client": self.mcp.is_some(),
            },
            "stats": session.stats,
            "memory": {
                "total_messages": session.memory.len(),
                "recent_messages": session.memory.recent_messages(5).len(),
            },
            "available_tools": self.available_tools(),
        })
    }

    pub fn clear_memory(&self, session: &mut AgentSession) {
        session.memory.clear();
        info!(session_id = %session.id, "Conversation memory cleared");
    }

    pub fn available_tools(&self) -> Vec<String> {
        self.manager.available_tools()
    }

    pub fn tool_schema(&self, name: &str) -> Option<Value> {
        self.manager.tool_schema(name)
    }

    /// Tools known to the manager and the registry, and where they differ
    pub async fn tools_status(&self) -> Value {
        let manager_tools = self.manager.available_tools();
        let registry_tools = self.registry.read().await.list_all_tools();
        let only_manager: Vec<&String> = manager_tools
            .iter()
            .filter(|t| !registry_tools.contains(t))
            .collect();
        let only_registry: Vec<&String> = registry_tools
            .iter()
            .filter(|t| !manager_tools.contains(t))
            .collect();
        json!({
            "status": "ok",
            "tool_manager": {"count": manager_tools.len(), "tools": manager_tools},
            "semantic_registry": {"count": registry_tools.len(), "tools": registry_tools},
            "discrepancies": {
                "in_tool_manager_not_in_semantic": only_manager,
                "in_semantic_not_in_tool_manager": only_registry,
            },
            "mcp_tools": self.mcp_tools.read().await.len(),
            "execution": self.manager.execution_stats(),
        })
    }
}

/// Mark the only object-typed property required when `required` is absent
fn promote_single_object_root(schema: &mut Value) {
    let Some(obj) = schema.as_object_mut() else {
        return;
    };
    let has_required = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|r| !r.is_empty())
        .unwrap_or(false);
    if has_required {
        return;
    }
    let object_keys: Vec<String> = obj
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .filter(|(_, p)| p.get("type").and_then(Value::as_str) == Some("object"))
                .map(|(k, _)| k.clone())
                .collect()
        })
        .unwrap_or_default();
    if let [root] = object_keys.as_slice() {
        obj.insert("required".to_string(), json!([root]));
    }
}
