// Configuration structs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Embedding backends accepted by `semantic.embedding_provider`
pub const EMBEDDING_PROVIDERS: &[&str] = &["gemini", "tfidf", "none"];

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub mcp: McpSettings,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub security: SecurityConfig,
    pub semantic: SemanticConfig,
    pub flow: FlowConfig,
    pub reasoning: ReasoningConfig,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds allowed for a whole /query request
    pub request_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_sessions: usize,
    pub session_timeout_minutes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            request_timeout_secs: 30,
            read_timeout_secs: 60,
            max_sessions: 100,
            session_timeout_minutes: 30,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where the MCP tool server lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    pub base_url: String,
    pub endpoint_path: String,
    pub timeout_secs: u64,
    /// Attempts made by `tools/list` before giving up
    pub list_retries: u32,
    /// Seconds to wait after a failed or empty tool load before trying again
    pub reload_cooldown_secs: u64,
    pub enabled: bool,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            endpoint_path: "/mcp".to_string(),
            timeout_secs: 30,
            list_retries: 3,
            reload_cooldown_secs: 30,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            embedding_model: "models/text-embedding-004".to_string(),
            timeout_secs: 30,
            max_tokens: 1000,
            temperature: 0.1,
            top_p: 0.95,
            top_k: 40,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl LlmConfig {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub require_api_key: bool,
    pub api_key_header: String,
    pub api_keys: Vec<String>,
    pub max_input_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_api_key: false,
            api_key_header: "X-API-Key".to_string(),
            api_keys: vec![],
            max_input_length: 10_000,
        }
    }
}

/// Tool ranking and decision thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// One of `EMBEDDING_PROVIDERS`
    pub embedding_provider: String,
    pub similarity_threshold: f64,
    pub max_similarity_candidates: usize,
    pub direct_threshold: f64,
    pub confirm_threshold: f64,
    pub min_score_gap_direct: f64,
    pub min_score_gap_confirm: f64,
    pub cache_embeddings: bool,
    pub index_cache_path: Option<PathBuf>,
    /// Threshold used by the TF-IDF registry search
    pub registry_threshold: f64,
    pub max_context_tools: usize,
    /// Snowball language for TF-IDF terms, or "none"
    pub stem_language: String,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            embedding_provider: "gemini".to_string(),
            similarity_threshold: 0.5,
            max_similarity_candidates: 5,
            direct_threshold: 0.70,
            confirm_threshold: 0.40,
            min_score_gap_direct: 0.15,
            min_score_gap_confirm: 0.10,
            cache_embeddings: true,
            index_cache_path: None,
            registry_threshold: 0.15,
            max_context_tools: 3,
            stem_language: "spanish".to_string(),
        }
    }
}

impl SemanticConfig {
    /// Cache file location, defaulting to ~/.aerodesk/semantic_index.json
    pub fn resolved_cache_path(&self) -> Option<PathBuf> {
        if !self.cache_embeddings {
            return None;
        }
        self.index_cache_path.clone().or_else(|| {
            dirs::home_dir().map(|home| home.join(".aerodesk").join("semantic_index.json"))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub confidence_threshold: f64,
    pub max_context_messages: usize,
    pub max_iterations: usize,
    pub memory_size: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            max_context_messages: 5,
            max_iterations: 10,
            memory_size: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub enable_llm_reasoning: bool,
    pub object_root_multiplier: f64,
    pub min_coverage_for_execution: f64,
    pub max_candidates: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            enable_llm_reasoning: true,
            object_root_multiplier: 1.5,
            min_coverage_for_execution: 1.0,
            max_candidates: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// When false the agent only converses
    pub enabled: bool,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub enable_validation: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            timeout_secs: 30,
            enable_validation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Whether any enabled feature needs the Gemini API key
    pub fn needs_api_key(&self) -> bool {
        self.reasoning.enable_llm_reasoning || self.semantic.embedding_provider == "gemini"
    }

    /// Collect every configuration problem instead of failing on the first
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.needs_api_key() && !self.llm.has_api_key() {
            errors.push(
                "GOOGLE_API_KEY or GEMINI_API_KEY is required when LLM reasoning or Gemini embeddings are enabled"
                    .to_string(),
            );
        }
        if self.server.port == 0 {
            errors.push(format!("Invalid port: {}", self.server.port));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            errors.push(format!(
                "Temperature must be between 0 and 2, got {}",
                self.llm.temperature
            ));
        }
        if !(0.0..=1.0).contains(&self.flow.confidence_threshold) {
            errors.push(format!(
                "Confidence threshold must be between 0 and 1, got {}",
                self.flow.confidence_threshold
            ));
        }
        if self.security.max_input_length < 1 {
            errors.push("max_input_length must be at least 1".to_string());
        }
        if !EMBEDDING_PROVIDERS.contains(&self.semantic.embedding_provider.as_str()) {
            errors.push(format!(
                "Unknown embedding provider '{}', expected one of: {}",
                self.semantic.embedding_provider,
                EMBEDDING_PROVIDERS.join(", ")
            ));
        }
        if self.semantic.max_similarity_candidates < 1 {
            errors.push("max_similarity_candidates must be at least 1".to_string());
        }
        if self.reasoning.max_candidates < 1 {
            errors.push("reasoning.max_candidates must be at least 1".to_string());
        }
        for (name, value) in [
            ("direct_threshold", self.semantic.direct_threshold),
            ("confirm_threshold", self.semantic.confirm_threshold),
            ("similarity_threshold", self.semantic.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{} must be between 0 and 1, got {}", name, value));
            }
        }
        if self.semantic.confirm_threshold > self.semantic.direct_threshold {
            errors.push(format!(
                "confirm_threshold ({}) cannot exceed direct_threshold ({})",
                self.semantic.confirm_threshold, self.semantic.direct_threshold
            ));
        }
        if self.semantic.min_score_gap_direct < 0.0 || self.semantic.min_score_gap_confirm < 0.0 {
            errors.push("Score gaps cannot be negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.reasoning.min_coverage_for_execution) {
            errors.push(format!(
                "min_coverage_for_execution must be between 0 and 1, got {}",
                self.reasoning.min_coverage_for_execution
            ));
        }
        if self.flow.max_iterations == 0 {
            errors.push("flow.max_iterations must be at least 1".to_string());
        }

        errors
    }

    /// Fail with every validation message joined together
    pub fn ensure_valid(&self) -> anyhow::Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            return Ok(());
        }
        anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.llm.api_key = "test-key".to_string();
        config
    }

    #[test]
    fn test_defaults_match_service() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.mcp.base_url, "http://localhost:3001");
        assert_eq!(config.semantic.direct_threshold, 0.70);
        assert_eq!(config.semantic.confirm_threshold, 0.40);
        assert_eq!(config.flow.max_iterations, 10);
        assert_eq!(config.security.api_key_header, "X-API-Key");
    }

    #[test]
    fn test_valid_config_has_no_errors() {
        assert!(valid_config().validate().is_empty());
        assert!(valid_config().ensure_valid().is_ok());
    }

    #[test]
    fn test_missing_api_key_reported() {
        let config = Config::default();
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("GOOGLE_API_KEY"));
    }

    #[test]
    fn test_api_key_not_needed_without_gemini_features() {
        let mut config = Config::default();
        config.reasoning.enable_llm_reasoning = false;
        config.semantic.embedding_provider = "tfidf".to_string();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_threshold_ordering() {
        let mut config = valid_config();
        config.semantic.confirm_threshold = 0.9;
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("cannot exceed")));
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut config = valid_config();
        config.llm.temperature = 3.0;
        config.semantic.embedding_provider = "word2vec".to_string();
        config.semantic.min_score_gap_direct = -0.1;
        config.reasoning.min_coverage_for_execution = 1.5;
        assert_eq!(config.validate().len(), 4);

        let err = config.ensure_valid().unwrap_err().to_string();
        assert!(err.contains("word2vec"));
        assert!(err.contains("Temperature"));
    }

    #[test]
    fn test_cache_path_disabled() {
        let mut config = SemanticConfig::default();
        config.cache_embeddings = false;
        assert!(config.resolved_cache_path().is_none());

        config.cache_embeddings = true;
        config.index_cache_path = Some(PathBuf::from("/tmp/index.json"));
        assert_eq!(
            config.resolved_cache_path(),
            Some(PathBuf::from("/tmp/index.json"))
        );
    }

    #[test]
    fn test_toml_sections_are_optional() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [semantic]
            direct_threshold = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.semantic.direct_threshold, 0.8);
        assert_eq!(config.semantic.confirm_threshold, 0.40);
    }
}
