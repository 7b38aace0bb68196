// Semantic tool registry
//
// Catalog of the tools the agent can call, searchable by TF-IDF cosine
// similarity over a text built from each tool's name, description, example
// and parameter schema.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::SemanticConfig;
use crate::tools::schema::{properties_of, required_list, SchemaAnalysis};
use crate::tools::tfidf::TfIdfIndex;

pub const VECTORIZER_NAME: &str = "TF-IDF";

/// A registered tool with its searchable text and usage counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEntry {
    pub name: String,
    pub description: String,
    pub example: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub text_content: String,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl ToolEntry {
    /// Shape handed to the LLM as context
    pub fn to_context(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "example": self.example,
            "parameters": self.parameters,
            "category": self.category,
        })
    }
}

/// Registry hit with its similarity
#[derive(Debug, Clone)]
pub struct ScoredTool {
    pub tool: ToolEntry,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageCount {
    pub name: String,
    pub usage_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_tools: usize,
    pub categories: BTreeMap<String, usize>,
    pub most_used: Vec<UsageCount>,
    pub vectorizer: String,
    pub similarity_threshold: f32,
    pub max_context_tools: usize,
}

/// Build the text a tool is indexed under
///
/// Parameter names, descriptions and types are appended so queries that
/// mention a field ("capacidad", "id_vuelo") land on the right tool.
pub fn build_text_content(
    name: &str,
    description: &str,
    example: &str,
    category: Option<&str>,
    parameters: &Value,
) -> String {
    let mut text = format!("{} {} {}", name, description, example);
    if let Some(category) = category {
        text.push(' ');
        text.push_str(category);
    }

    let required = required_list(parameters);
    let outer = param_triplets(&required, properties_of(parameters));
    if !outer.is_empty() {
        text.push_str(" parametros requeridos: ");
        text.push_str(&outer.join(" "));
    }

    let analysis = SchemaAnalysis::analyze(parameters);
    let inner_required = if analysis.is_object_root() {
        analysis.required_fields.clone()
    } else {
        Vec::new()
    };

    if !inner_required.is_empty() {
        let inner = param_triplets(&inner_required, analysis.properties());
        if !inner.is_empty() {
            text.push_str(" campos internos: ");
            text.push_str(&inner.join(" "));
        }
    }

    if !required.is_empty() {
        text.push_str(" contexto_parametros: ");
        text.push_str(&required.join(" "));
    }

    if !inner_required.is_empty() {
        text.push_str(" estructura_interna: ");
        text.push_str(&inner_required.join(" "));
    }

    text
}

/// `"{name} {description} {type}"` for each key present in `props`
fn param_triplets(keys: &[String], props: Option<&Map<String, Value>>) -> Vec<String> {
    let Some(props) = props else {
        return Vec::new();
    };
    keys.iter()
        .filter_map(|key| {
            props.get(key).map(|prop| {
                let desc = prop.get("description").and_then(Value::as_str).unwrap_or("");
                let ty = prop.get("type").and_then(Value::as_str).unwrap_or("");
                format!("{} {} {}", key, desc, ty)
            })
        })
        .collect()
}

#[derive(Debug)]
pub struct SemanticRegistry {
    tools: Vec<ToolEntry>,
    index: TfIdfIndex,
    similarity_threshold: f32,
    max_context_tools: usize,
}

impl Default for SemanticRegistry {
    fn default() -> Self {
        Self::from_config(&SemanticConfig::default())
    }
}

impl SemanticRegistry {
    pub fn new(similarity_threshold: f32, max_context_tools: usize, stem_language: &str) -> Self {
        Self {
            tools: Vec::new(),
            index: TfIdfIndex::new(stem_language),
            similarity_threshold,
            max_context_tools,
        }
    }

    pub fn from_config(config: &SemanticConfig) -> Self {
        Self::new(
            config.registry_threshold as f32,
            config.max_context_tools,
            &config.stem_language,
        )
    }

    /// Register (or replace) a tool and rebuild the index
    pub fn register_tool(
        &mut self,
        name: &str,
        description: &str,
        parameters: Value,
        example: &str,
        category: Option<&str>,
    ) -> &ToolEntry {
        let text_content = build_text_content(name, description, example, category, &parameters);
        let entry = ToolEntry {
            name: name.to_string(),
            description: description.to_string(),
            example: example.to_string(),
            parameters,
            category: category.map(str::to_string),
            text_content,
            usage_count: 0,
            last_used: None,
        };

        let pos = match self.tools.iter().position(|t| t.name == name) {
            Some(pos) => {
                self.tools[pos] = entry;
                pos
            }
            None => {
                self.tools.push(entry);
                self.tools.len() - 1
            }
        };
        self.rebuild_index();

        info!(tool = name, "Tool registered");
        &self.tools[pos]
    }

    fn rebuild_index(&mut self) {
        let texts: Vec<String> = self.tools.iter().map(|t| t.text_content.clone()).collect();
        self.index.fit(&texts);
    }

    fn scored(&self, query: &str) -> Vec<ScoredTool> {
        if self.tools.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<ScoredTool> = self
            .index
            .similarities(query)
            .into_iter()
            .zip(&self.tools)
            .map(|(score, tool)| ScoredTool {
                tool: tool.clone(),
                score,
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    /// Tools scoring at or above the threshold, best first
    pub fn find_relevant_tools(
        &self,
        query: &str,
        max_results: Option<usize>,
        threshold: Option<f32>,
    ) -> Vec<ScoredTool> {
        if self.tools.is_empty() {
            warn!("No tools registered");
            return Vec::new();
        }
        let threshold = threshold.unwrap_or(self.similarity_threshold);
        let max_results = max_results.unwrap_or(self.max_context_tools);

        let mut hits: Vec<ScoredTool> = self
            .scored(query)
            .into_iter()
            .filter(|hit| hit.score >= threshold)
            .collect();
        hits.truncate(max_results);

        debug!(
            query = %query.chars().take(50).collect::<String>(),
            found = hits.len(),
            "Relevant tools"
        );
        hits
    }

    /// Best `top_k` tools regardless of threshold
    pub fn find_top_tools(&self, query: &str, top_k: usize) -> Vec<ScoredTool> {
        let mut hits = self.scored(query);
        hits.truncate(top_k);
        hits
    }

    pub fn tools_for_llm_context(&self, query: &str, max_tools: Option<usize>) -> Vec<Value> {
        self.find_relevant_tools(query, max_tools, None)
            .into_iter()
            .map(|hit| hit.tool.to_context())
            .collect()
    }

    pub fn update_tool_usage(&mut self, name: &str) {
        if let Some(tool) = self.tools.iter_mut().find(|t| t.name == name) {
            tool.usage_count += 1;
            tool.last_used = Some(Utc::now());
            debug!(tool = name, usage = tool.usage_count, "Tool usage updated");
        }
    }

    pub fn tool_definition(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn list_all_tools(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn tools(&self) -> &[ToolEntry] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn remove_tool(&mut self, name: &str) -> bool {
        let before = self.tools.len();
        self.tools.retain(|t| t.name != name);
        if self.tools.len() == before {
            return false;
        }
        self.rebuild_index();
        info!(tool = name, "Tool removed from registry");
        true
    }

    pub fn registry_stats(&self) -> RegistryStats {
        let mut categories = BTreeMap::new();
        for tool in &self.tools {
            if let Some(category) = &tool.category {
                *categories.entry(category.clone()).or_insert(0) += 1;
            }
        }

        let mut by_usage: Vec<&ToolEntry> = self.tools.iter().collect();
        by_usage.sort_by(|a, b| b.usage_count.cmp(&a.usage_count).then_with(|| a.name.cmp(&b.name)));
        let most_used = by_usage
            .into_iter()
            .take(5)
            .map(|t| UsageCount {
                name: t.name.clone(),
                usage_count: t.usage_count,
            })
            .collect();

        RegistryStats {
            total_tools: self.tools.len(),
            categories,
            most_used,
            vectorizer: VECTORIZER_NAME.to_string(),
            similarity_threshold: self.similarity_threshold,
            max_context_tools: self.max_context_tools,
        }
    }

    pub fn export_registry(&self) -> Value {
        let tools: Map<String, Value> = self
            .tools
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "example": t.example,
                        "parameters": t.parameters,
                        "category": t.category,
                        "usage_count": t.usage_count,
                        "last_used": t.last_used.map(|ts| ts.to_rfc3339()),
                    }),
                )
            })
            .collect();

        json!({
            "tools": tools,
            "config": {
                "vectorizer": VECTORIZER_NAME,
                "max_tools_in_context": self.max_context_tools,
                "similarity_threshold": self.similarity_threshold,
                "stem_language": self.index.language(),
            },
            "exported_at": Utc::now().to_rfc3339(),
        })
    }

    /// Restore tools and their usage from `export_registry` output
    pub fn load_registry(&mut self, data: &Value) -> Result<usize> {
        let tools = data
            .get("tools")
            .and_then(Value::as_object)
            .context("Registry export has no tools object")?;

        for (key, raw) in tools {
            let entry: ToolEntry = serde_json::from_value(raw.clone())
                .with_context(|| format!("Invalid registry entry '{}'", key))?;
            let text_content = build_text_content(
                &entry.name,
                &entry.description,
                &entry.example,
                entry.category.as_deref(),
                &entry.parameters,
            );
            let restored = ToolEntry { text_content, ..entry };
            match self.tools.iter().position(|t| t.name == restored.name) {
                Some(pos) => self.tools[pos] = restored,
                None => self.tools.push(restored),
            }
        }
        self.rebuild_index();

        info!(count = tools.len(), "Registry loaded");
        Ok(tools.len())
    }
}
