// MCP endpoint configuration

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::McpSettings;

/// Where and how to reach the MCP tool server
#[derive(Debug, Clone)]
pub struct McpEndpoint {
    /// Server origin, without trailing slash
    pub base_url: String,
    /// JSON-RPC path on the server
    pub endpoint_path: String,
    pub timeout: Duration,
    /// Attempts made by `list_tools` before giving up
    pub list_retries: u32,
    /// First backoff step for `list_tools`, doubled on each attempt
    pub retry_base_delay: Duration,
}

impl Default for McpEndpoint {
    fn default() -> Self {
        Self::from_settings(&McpSettings::default())
    }
}

impl McpEndpoint {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn from_settings(settings: &McpSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            endpoint_path: settings.endpoint_path.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
            list_retries: settings.list_retries.max(1),
            retry_base_delay: Duration::from_secs(2),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Full JSON-RPC URL
    pub fn url(&self) -> String {
        let path = self.endpoint_path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Backoff before retry number `attempt` (0-based): base * 2^attempt
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay * 2u32.saturating_pow(attempt)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            bail!("MCP base URL must be http(s): '{}'", self.base_url);
        }
        if self.timeout.is_zero() {
            bail!("MCP timeout must be greater than zero");
        }
        Ok(())
    }
}
