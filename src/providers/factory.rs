// Provider factory
//
// Creates the LLM provider from configuration

use anyhow::Result;
use std::sync::Arc;

use super::gemini::GeminiProvider;
use super::LlmProvider;
use crate::config::Config;

/// Create the configured provider, or `None` when no API key is set
pub fn create_provider(config: &Config) -> Result<Option<Arc<dyn LlmProvider>>> {
    if !config.llm.has_api_key() {
        tracing::warn!("No LLM API key configured; LLM reasoning disabled");
        return Ok(None);
    }
    let provider = GeminiProvider::new(&config.llm, &config.retry)?;
    tracing::info!(model = %config.llm.model, "LLM provider ready");
    Ok(Some(Arc::new(provider)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_key_means_no_provider() {
        let config = Config::default();
        assert!(create_provider(&config).unwrap().is_none());
    }

    #[test]
    fn test_create_gemini_provider() {
        let mut config = Config::default();
        config.llm.api_key = "test-key".to_string();
        let provider = create_provider(&config).unwrap().unwrap();
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.model(), "gemini-1.5-flash");
    }
}
