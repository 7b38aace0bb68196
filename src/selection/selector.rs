// Semantic tool selection
//
// Ranks registry tools by cosine similarity between the query embedding and
// each tool's embedding, then decides whether the best tool is clear enough
// to run directly, needs confirmation, or the turn stays conversational.

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::embeddings::{EmbeddingCache, EmbeddingIndex, EmbeddingProvider, GeminiEmbedder};
use crate::config::Config;
use crate::tools::registry::{SemanticRegistry, ToolEntry};
use crate::tools::schema::{properties_of, required_list, SchemaAnalysis};

const NORM_EPSILON: f32 = 1e-12;
const FALLBACK_BASE_SCORE: f32 = 0.3;
const SCHEMA_MATCH_CAP: f32 = 0.4;

#[derive(Debug, Clone, Serialize)]
pub struct RankedTool {
    pub name: String,
    pub score: f32,
    pub tool: ToolEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Direct,
    Confirm,
    Conversation,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Direct => "direct",
            Decision::Confirm => "confirm",
            Decision::Conversation => "conversation",
        }
    }
}

/// Score cut-offs for `decide`
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub direct: f32,
    pub confirm: f32,
    pub min_gap_direct: f32,
    pub min_gap_confirm: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            direct: 0.70,
            confirm: 0.40,
            min_gap_direct: 0.15,
            min_gap_confirm: 0.10,
        }
    }
}

pub struct SemanticSelector {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    cache: Option<EmbeddingCache>,
    index: RwLock<EmbeddingIndex>,
    thresholds: Thresholds,
    max_candidates: usize,
}

impl SemanticSelector {
    pub fn new(
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        cache: Option<EmbeddingCache>,
        thresholds: Thresholds,
        max_candidates: usize,
    ) -> Self {
        let index = cache.as_ref().map(EmbeddingCache::load).unwrap_or_default();
        Self {
            embedder,
            cache,
            index: RwLock::new(index),
            thresholds,
            max_candidates: max_candidates.max(1),
        }
    }

    /// Selector wired from configuration
    ///
    /// Embeddings are used only with the `gemini` provider and an API key;
    /// otherwise ranking goes straight to the TF-IDF fallback.
    pub fn from_config(config: &Config) -> Result<Self> {
        let semantic = &config.semantic;
        let embedder: Option<Arc<dyn EmbeddingProvider>> =
            if semantic.embedding_provider == "gemini" && config.llm.has_api_key() {
                Some(Arc::new(GeminiEmbedder::new(&config.llm, &config.retry)?))
            } else {
                info!(provider = %semantic.embedding_provider, "Embeddings disabled, using TF-IDF ranking");
                None
            };
        let cache = semantic.resolved_cache_path().map(EmbeddingCache::new);
        let thresholds = Thresholds {
            direct: semantic.direct_threshold as f32,
            confirm: semantic.confirm_threshold as f32,
            min_gap_direct: semantic.min_score_gap_direct as f32,
            min_gap_confirm: semantic.min_score_gap_confirm as f32,
        };
        Ok(Self::new(embedder, cache, thresholds, semantic.max_similarity_candidates))
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    pub async fn indexed_count(&self) -> usize {
        self.index.read().await.len()
    }

    /// Embed new or changed tools and drop vanished ones
    ///
    /// Returns the number of indexed tools.
    pub async fn build_index(&self, registry: &SemanticRegistry) -> usize {
        let Some(embedder) = &self.embedder else {
            return 0;
        };
        let mut index = self.index.write().await;

        let before = index.len();
        index
            .embeddings
            .retain(|name, _| registry.tool_definition(name).is_some());
        index.texts.retain(|name, _| registry.tool_definition(name).is_some());
        let mut changed = index.len() != before;

        let mut updated = 0;
        for tool in registry.tools() {
            let stale = !index.embeddings.contains_key(&tool.name)
                || index.texts.get(&tool.name) != Some(&tool.text_content);
            if !stale {
                continue;
            }
            match embedder.embed_document(&tool.text_content).await {
                Ok(vector) => {
                    index.embeddings.insert(tool.name.clone(), vector);
                    index.texts.insert(tool.name.clone(), tool.text_content.clone());
                    updated += 1;
                }
                Err(e) => warn!(tool = %tool.name, error = %e, "Failed to embed tool"),
            }
        }
        changed |= updated > 0;

        if changed {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.save(&index) {
                    warn!(error = %e, "Failed to save embedding cache");
                }
            }
        }
        info!(updated, total = index.len(), "Semantic index built");
        index.len()
    }

    /// Rank tools by embedding similarity, falling back to TF-IDF
    pub async fn rank_tools(
        &self,
        query: &str,
        registry: &SemanticRegistry,
        top_k: Option<usize>,
    ) -> Vec<RankedTool> {
        if query.trim().is_empty() || registry.is_empty() {
            return Vec::new();
        }
        let Some(embedder) = &self.embedder else {
            return self.rank_tools_with_fallback(query, registry, top_k);
        };

        self.build_index(registry).await;
        let query_vec = match embedder.embed_query(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Query embedding failed, using TF-IDF ranking");
                return self.rank_tools_with_fallback(query, registry, top_k);
            }
        };

        let mismatch = self
            .index
            .read()
            .await
            .embeddings
            .values()
            .any(|v| v.len() != query_vec.len());
        if mismatch {
            warn!(dimension = query_vec.len(), "Cached embeddings have a different dimension, rebuilding index");
            self.index.write().await.clear();
            self.build_index(registry).await;
        }

        let query_norm = l2_normalize(&query_vec);
        let index = self.index.read().await;
        let mut ranked: Vec<RankedTool> = index
            .embeddings
            .iter()
            .filter(|(_, v)| v.len() == query_vec.len())
            .filter_map(|(name, v)| {
                let tool = registry.tool_definition(name)?;
                let score = dot(&query_norm, &l2_normalize(v));
                Some(RankedTool {
                    name: name.clone(),
                    score,
                    tool: tool.clone(),
                })
            })
            .collect();
        drop(index);

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k.unwrap_or(self.max_candidates));

        let summary: Vec<String> = ranked
            .iter()
            .map(|r| format!("{}:{:.3}", r.name, r.score))
            .collect();
        info!(query = %truncate(query, 80), top = %summary.join(", "), "Semantic search");

        if ranked.is_empty() {
            return self.rank_tools_with_fallback(query, registry, top_k);
        }
        ranked
    }

    /// TF-IDF ranking with a schema-keyword bonus
    pub fn rank_tools_with_fallback(
        &self,
        query: &str,
        registry: &SemanticRegistry,
        top_k: Option<usize>,
    ) -> Vec<RankedTool> {
        registry
            .find_top_tools(query, top_k.unwrap_or(self.max_candidates))
            .into_iter()
            .map(|hit| RankedTool {
                name: hit.tool.name.clone(),
                score: FALLBACK_BASE_SCORE + schema_match_score(query, &hit.tool.parameters),
                tool: hit.tool,
            })
            .collect()
    }

    /// Rank with the previous user turns folded into the query
    pub async fn rank_tools_with_context(
        &self,
        query: &str,
        history: &[Value],
        registry: &SemanticRegistry,
        top_k: Option<usize>,
    ) -> Vec<RankedTool> {
        let start = history.len().saturating_sub(3);
        let recent: Vec<&str> = history[start..]
            .iter()
            .filter(|m| m.get("role").and_then(Value::as_str) == Some("user"))
            .filter_map(|m| m.get("content").and_then(Value::as_str))
            .collect();
        let recent = &recent[recent.len().saturating_sub(2)..];

        if recent.is_empty() {
            return self.rank_tools(query, registry, top_k).await;
        }
        let enhanced = format!("{} | contexto_previo: {}", query, recent.join(" "));
        debug!(enhanced = %truncate(&enhanced, 80), "Ranking with conversation context");
        self.rank_tools(&enhanced, registry, top_k).await
    }

    /// Decide how to act on a ranking, using the score gap to the runner-up
    pub fn decide<'a>(&self, ranked: &'a [RankedTool]) -> (Decision, Option<&'a RankedTool>) {
        let Some(best) = ranked.first() else {
            info!(decision = "conversation", "No candidates");
            return (Decision::Conversation, None);
        };
        let second = ranked.get(1).map(|r| r.score).unwrap_or(0.0);
        let gap = best.score - second;
        let t = &self.thresholds;

        let decision = if best.score < t.confirm {
            Decision::Conversation
        } else if best.score >= t.direct && gap >= t.min_gap_direct {
            Decision::Direct
        } else if gap >= t.min_gap_confirm {
            Decision::Confirm
        } else {
            Decision::Conversation
        };

        info!(
            decision = decision.as_str(),
            tool = %best.name,
            score = best.score,
            second,
            gap,
            "Selection decision"
        );
        (decision, Some(best))
    }

    /// Tool dicts for the LLM, enriched with a readable parameter summary
    pub fn prepare_llm_tools_context(&self, ranked: &[RankedTool]) -> Vec<Value> {
        ranked
            .iter()
            .map(|r| {
                let mut context = r.tool.to_context();
                context["semantic_context"] = json!(semantic_context(&r.tool));
                context["preselection_score"] = json!(r.score);
                context
            })
            .collect()
    }
}

fn semantic_context(tool: &ToolEntry) -> String {
    let mut text = format!("Tool: {}. Description: {}", tool.name, tool.description);
    let required = required_list(&tool.parameters);
    if let Some(props) = properties_of(&tool.parameters) {
        let params: Vec<String> = props
            .iter()
            .map(|(name, prop)| {
                let kind = if required.contains(name) { "required" } else { "optional" };
                let desc = prop.get("description").and_then(Value::as_str).unwrap_or("");
                format!(
                    "Parameter '{}' ({}, {}): {}",
                    name,
                    prop.get("type").and_then(Value::as_str).unwrap_or("unknown"),
                    kind,
                    desc
                )
            })
            .collect();
        if !params.is_empty() {
            text.push_str(" Parameters: ");
            text.push_str(&params.join("; "));
        }
    }
    text
}

/// Fraction of required field names the query mentions as whole words,
/// scaled into [0, 0.4]
pub fn schema_match_score(query: &str, schema: &Value) -> f32 {
    let keys = SchemaAnalysis::analyze(schema).required_fields;
    if keys.is_empty() {
        return 0.0;
    }
    let hits = keys
        .iter()
        .filter(|k| {
            Regex::new(&format!(r"(?i)\b{}\b", regex::escape(k)))
                .map(|re| re.is_match(query))
                .unwrap_or(false)
        })
        .count();
    let fraction = hits as f32 / keys.len() as f32;
    (fraction * SCHEMA_MATCH_CAP).min(SCHEMA_MATCH_CAP)
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt() + NORM_EPSILON;
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
