// Configuration loader
// Layers defaults, ~/.aerodesk/config.toml (or an explicit file) and the environment

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use super::settings::Config;

/// Environment variables kept for compatibility with existing deployments,
/// mapped onto their configuration keys
const ENV_ALIASES: &[(&str, &str)] = &[
    ("GEMINI_API_KEY", "llm.api_key"),
    ("GOOGLE_API_KEY", "llm.api_key"),
    ("GEMINI_MODEL", "llm.model"),
    ("MCP_SERVER_URL", "mcp.base_url"),
    ("DIRECT_THRESHOLD", "semantic.direct_threshold"),
    ("CONFIRM_THRESHOLD", "semantic.confirm_threshold"),
    ("EMBEDDING_PROVIDER", "semantic.embedding_provider"),
    ("SEMANTIC_INDEX_CACHE_PATH", "semantic.index_cache_path"),
    ("ENABLE_LLM_REASONING", "reasoning.enable_llm_reasoning"),
    ("MAX_INPUT_LENGTH", "security.max_input_length"),
    ("REQUIRE_API_KEY", "security.require_api_key"),
    ("LOG_LEVEL", "logging.level"),
];

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".aerodesk").join("config.toml"))
}

/// Load configuration from the config file and environment
///
/// Precedence (lowest first): built-in defaults, the TOML file, `AERODESK_*`
/// variables (`AERODESK_SERVER__PORT=8080`), then the legacy aliases above.
/// A missing file is not an error; an explicit path that does not exist is.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut builder = config::Config::builder();

    match path {
        Some(explicit) => {
            if !explicit.exists() {
                anyhow::bail!("Config file not found: {}", explicit.display());
            }
            builder = builder.add_source(File::from(explicit).format(FileFormat::Toml));
        }
        None => {
            if let Some(default_path) = default_config_path() {
                builder = builder.add_source(
                    File::from(default_path.as_path())
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("AERODESK")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    // Later aliases win, so GOOGLE_API_KEY beats GEMINI_API_KEY
    for (var, key) in ENV_ALIASES {
        let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        builder = builder
            .set_override_option(*key, value)
            .with_context(|| format!("Failed to apply {}", var))?;
    }

    let config: Config = builder
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    tracing::debug!(
        mcp_url = %config.mcp.base_url,
        embedding_provider = %config.semantic.embedding_provider,
        "Configuration loaded"
    );

    Ok(config)
}
