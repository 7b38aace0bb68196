// Embedding providers and the on-disk embedding cache

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{LlmConfig, RetryConfig};
use crate::providers::types::ProviderError;
use crate::providers::{with_retry, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    RetrievalQuery,
    RetrievalDocument,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::RetrievalQuery => "RETRIEVAL_QUERY",
            TaskType::RetrievalDocument => "RETRIEVAL_DOCUMENT",
        }
    }
}

/// Turns text into dense vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a search query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed one document (a tool description)
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_document(text).await?);
        }
        Ok(out)
    }

    fn model(&self) -> &str;
}

/// Gemini `embedContent` client
pub struct GeminiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl GeminiEmbedder {
    pub fn new(llm: &LlmConfig, retry: &RetryConfig) -> Result<Self> {
        if !llm.has_api_key() {
            return Err(ProviderError::MissingApiKey.into());
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        let model = if llm.embedding_model.starts_with("models/") {
            llm.embedding_model.clone()
        } else {
            format!("models/{}", llm.embedding_model)
        };
        Ok(Self {
            client,
            api_key: llm.api_key.clone(),
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            model,
            retry: RetryPolicy::from_config(retry),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn embed_once(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        let url = format!("{}/{}:embedContent?key={}", self.base_url, self.model, self.api_key);
        let body = json!({
            "model": self.model,
            "content": {"parts": [{"text": text}]},
            "taskType": task.as_str(),
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("Failed to send embedding request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let payload: Value = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        parse_embedding(&payload)
    }

    async fn embed(&self, text: &str, task: TaskType) -> Result<Vec<f32>> {
        with_retry(&self.retry, || self.embed_once(text, task)).await
    }
}

/// Read `embedding.values` (or the first of `embeddings[].values`)
pub fn parse_embedding(payload: &Value) -> Result<Vec<f32>> {
    let values = payload
        .pointer("/embedding/values")
        .or_else(|| payload.pointer("/embeddings/0/values"))
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::InvalidResponse("no embedding values".to_string()))?;

    let vector: Vec<f32> = values
        .iter()
        .filter_map(Value::as_f64)
        .map(|v| v as f32)
        .collect();
    if vector.is_empty() {
        return Err(ProviderError::InvalidResponse("empty embedding".to_string()).into());
    }
    Ok(vector)
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, TaskType::RetrievalQuery).await
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, TaskType::RetrievalDocument).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Tool embeddings plus the text each one was computed from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingIndex {
    #[serde(default)]
    pub embeddings: BTreeMap<String, Vec<f32>>,
    #[serde(default)]
    pub texts: BTreeMap<String, String>,
}

impl EmbeddingIndex {
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn clear(&mut self) {
        self.embeddings.clear();
        self.texts.clear();
    }
}

/// JSON file holding an `EmbeddingIndex`
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    path: PathBuf,
}

impl EmbeddingCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the index; a missing or unreadable file yields an empty one
    pub fn load(&self) -> EmbeddingIndex {
        if !self.path.exists() {
            return EmbeddingIndex::default();
        }
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read embedding cache");
                return EmbeddingIndex::default();
            }
        };
        match serde_json::from_str::<EmbeddingIndex>(&content) {
            Ok(index) => {
                tracing::info!(path = %self.path.display(), tools = index.len(), "Embedding cache loaded");
                index
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Embedding cache is corrupt, starting empty");
                EmbeddingIndex::default()
            }
        }
    }

    /// Write the index under an exclusive lock, atomically via rename
    pub fn save(&self, index: &EmbeddingIndex) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let lock_path = self.path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context("Failed to open embedding cache lock")?;
        lock_file.lock_exclusive()?;

        let temp_path = self.path.with_extension("tmp");
        let json = serde_json::to_string(index)?;
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &self.path)?;

        tracing::debug!(path = %self.path.display(), tools = index.len(), "Embedding cache saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use tempfile::TempDir;

    #[test]
    fn test_missing_cache_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::new(dir.path().join("index.json"));
        assert!(cache.load().is_empty());
    }

    #[test]
    fn test_corrupt_cache_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "{\"embeddings\": {\"a\": [0.1, ").unwrap();
        assert!(EmbeddingCache::new(path).load().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::new(dir.path().join("nested").join("index.json"));
        let mut index = EmbeddingIndex::default();
        index.embeddings.insert("vuelos_listar".into(), vec![0.5, 0.25]);
        index.texts.insert("vuelos_listar".into(), "listar vuelos".into());
        cache.save(&index).unwrap();

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(cache.path()).unwrap()).unwrap();
        assert!(raw["embeddings"]["vuelos_listar"].is_array());
        assert_eq!(raw["texts"]["vuelos_listar"], "listar vuelos");

        let loaded = cache.load();
        assert_eq!(loaded.embeddings["vuelos_listar"], vec![0.5, 0.25]);
    }

    #[test]
    fn test_parse_embedding_shapes() {
        assert_eq!(
            parse_embedding(&json!({"embedding": {"values": [1.0, 2.0]}})).unwrap(),
            vec![1.0, 2.0]
        );
        assert_eq!(
            parse_embedding(&json!({"embeddings": [{"values": [3.0]}]})).unwrap(),
            vec![3.0]
        );
        assert!(parse_embedding(&json!({"embedding": {}})).is_err());
    }

    #[tokio::test]
    async fn test_gemini_embed_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "POST",
                Matcher::Regex(r"^/models/text-embedding-004:embedContent".to_string()),
            )
            .match_body(Matcher::PartialJson(json!({"taskType": "RETRIEVAL_QUERY"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"embedding": {"values": [0.1, 0.2, 0.3]}}).to_string())
            .create_async()
            .await;

        let llm = LlmConfig {
            api_key: "k".into(),
            base_url: server.url(),
            ..LlmConfig::default()
        };
        let embedder = GeminiEmbedder::new(&llm, &RetryConfig::default())
            .unwrap()
            .with_retry_policy(RetryPolicy::none());
        let v = embedder.embed_query("vuelos a Lima").await.unwrap();
        assert_eq!(v.len(), 3);
        mock.assert_async().await;
    }
}
