// Dependency planner
//
// Information-gathering tools (nothing required) are run ahead of a tool
// whose required fields they are semantically close to, so the tool server
// has fresh lookups cached before the main call.

use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::tools::{ExecutionContext, ExecutionResult, SchemaAnalysis, SemanticRegistry, ToolManager};

const DEPENDENCY_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct DependencyPlanner {
    info_tools: BTreeSet<String>,
    dependency_map: BTreeMap<String, Vec<String>>,
}

impl DependencyPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute info tools and dependencies from `(name, schema)` pairs
    pub fn rebuild(&mut self, tools: &[(String, Value)], registry: &SemanticRegistry) {
        let analyses: Vec<(&String, SchemaAnalysis)> = tools
            .iter()
            .map(|(name, schema)| (name, SchemaAnalysis::analyze(schema)))
            .collect();

        self.info_tools = analyses
            .iter()
            .filter(|(_, a)| a.required_fields.is_empty())
            .map(|(name, _)| (*name).clone())
            .collect();

        self.dependency_map.clear();
        for (name, analysis) in &analyses {
            if analysis.required_fields.is_empty() {
                continue;
            }
            let query = analysis.required_fields.join(" ");
            let deps: BTreeSet<String> = registry
                .find_top_tools(&query, DEPENDENCY_CANDIDATES)
                .into_iter()
                .map(|hit| hit.tool.name)
                .filter(|dep| self.info_tools.contains(dep))
                .collect();
            self.dependency_map
                .insert((*name).clone(), deps.into_iter().collect());
        }

        info!(
            info_tools = self.info_tools.len(),
            planned = self.dependency_map.len(),
            "Dependency planner rebuilt"
        );
    }

    pub fn is_info_tool(&self, name: &str) -> bool {
        self.info_tools.contains(name)
    }

    /// Info tools to run before `tool`, sorted
    pub fn dependencies(&self, tool: &str) -> &[String] {
        self.dependency_map.get(tool).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run the dependencies of `tool` concurrently with empty arguments
    pub async fn execute_dependencies(
        &self,
        manager: &ToolManager,
        tool: &str,
        context: &ExecutionContext,
    ) -> Vec<ExecutionResult> {
        let deps: Vec<&String> = self
            .dependencies(tool)
            .iter()
            .filter(|dep| manager.has_tool(dep))
            .collect();
        if deps.is_empty() {
            return Vec::new();
        }

        info!(tool, group_size = deps.len(), "Executing dependent tools in parallel");
        let results = join_all(
            deps.iter()
                .map(|dep| manager.execute_tool(dep, json!({}), context)),
        )
        .await;
        for result in &results {
            debug!(dependency = %result.tool_name, status = result.status.as_str(), "Dependency finished");
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolHandler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn catalog() -> Vec<(String, Value)> {
        vec![
            (
                "vuelos_listar".to_string(),
                json!({"type": "object", "properties": {"origen": {"type": "string"}}}),
            ),
            (
                "aviones_listar".to_string(),
                json!({
                    "type": "object",
                    "required": ["filtro"],
                    "properties": {"filtro": {"type": "object", "properties": {"modelo": {"type": "string"}}}}
                }),
            ),
            (
                "reservas_crear".to_string(),
                json!({
                    "type": "object",
                    "required": ["reserva"],
                    "properties": {"reserva": {
                        "type": "object",
                        "required": ["id_vuelo", "usuario"],
                        "properties": {"id_vuelo": {"type": "string"}, "usuario": {"type": "string"}}
                    }}
                }),
            ),
        ]
    }

    fn registry(tools: &[(String, Value)]) -> SemanticRegistry {
        let mut registry = SemanticRegistry::default();
        let descriptions = [
            "Listar vuelos disponibles con su id_vuelo",
            "Listar aviones de la flota",
            "Crear una reserva de vuelo para un usuario",
        ];
        for ((name, schema), desc) in tools.iter().zip(descriptions) {
            registry.register_tool(name, desc, schema.clone(), &format!("Usar {}", name), None);
        }
        registry
    }

    #[test]
    fn test_info_tools_detection() {
        let tools = catalog();
        let mut planner = DependencyPlanner::new();
        planner.rebuild(&tools, &registry(&tools));

        assert!(planner.is_info_tool("vuelos_listar"));
        assert!(planner.is_info_tool("aviones_listar"));
        assert!(!planner.is_info_tool("reservas_crear"));
        assert!(planner.dependencies("vuelos_listar").is_empty());
    }

    #[test]
    fn test_dependencies_are_info_tools_sorted() {
        let tools = catalog();
        let mut planner = DependencyPlanner::new();
        planner.rebuild(&tools, &registry(&tools));

        let deps = planner.dependencies("reservas_crear");
        assert!(deps.iter().all(|d| planner.is_info_tool(d)));
        let mut sorted = deps.to_vec();
        sorted.sort();
        assert_eq!(deps, sorted.as_slice());
        assert!(!deps.contains(&"reservas_crear".to_string()));
    }

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl ToolHandler for Counter {
        async fn call(&self, _arguments: Value, _context: &ExecutionContext) -> anyhow::Result<Value> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"status": "ok"}))
        }
    }

    #[tokio::test]
    async fn test_execute_dependencies_runs_registered_deps() {
        let mut planner = DependencyPlanner::new();
        planner.dependency_map.insert(
            "reservas_crear".to_string(),
            vec!["aviones_listar".to_string(), "vuelos_listar".to_string()],
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ToolManager::new(0, Duration::from_secs(5), true);
        manager.register_tool("vuelos_listar", Arc::new(Counter(calls.clone())), None, "Listar vuelos");

        let results = planner
            .execute_dependencies(&manager, "reservas_crear", &ExecutionContext::default())
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(planner
            .execute_dependencies(&manager, "vuelos_listar", &ExecutionContext::default())
            .await
            .is_empty());
    }
}
