// Aerodesk - HTTP API
// Serves the agent over axum, one session per client

mod handlers;
mod metrics;
mod middleware;

pub use handlers::{create_router, health_check};
pub use metrics::ServerMetrics;
pub use middleware::{api_key_auth, request_context, REQUEST_ID_HEADER};

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::{AgentCore, SessionManager};
use crate::config::Config;

/// Main agent server structure
pub struct AgentServer {
    /// Shared agent (tools, selector, reasoning engine)
    agent: Arc<AgentCore>,
    sessions: SessionManager,
    metrics: ServerMetrics,
    config: Config,
}

impl AgentServer {
    /// Create a server around an already built agent
    ///
    /// Must be called inside a tokio runtime (the session sweep is spawned).
    pub fn new(config: Config, agent: AgentCore) -> Result<Self> {
        let sessions = SessionManager::new(
            config.server.max_sessions,
            config.server.session_timeout_minutes,
            config.flow.memory_size,
        );
        Ok(Self {
            agent: Arc::new(agent),
            sessions,
            metrics: ServerMetrics::new()?,
            config,
        })
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let agent = AgentCore::from_config(&config).context("Failed to initialize agent")?;
        Self::new(config, agent)
    }

    /// Router with every route and layer, ready for `axum::serve`
    pub fn into_router(self) -> axum::Router {
        create_router(Arc::new(self))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve until the process stops
    ///
    /// MCP tools and the semantic index are loaded in the background so the
    /// first query does not pay for them.
    pub async fn serve(self, bind: Option<&str>) -> Result<()> {
        let address = bind
            .map(str::to_string)
            .unwrap_or_else(|| self.config.server.bind_address());
        let addr: SocketAddr = address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", address))?;

        let agent = Arc::clone(&self.agent);
        tokio::spawn(async move {
            let indexed = agent.prewarm().await;
            tracing::info!(tools = agent.available_tools().len(), indexed, "Agent prewarmed");
        });

        let app = self.into_router();

        tracing::info!("Starting aerodesk agent server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    pub fn agent(&self) -> &Arc<AgentCore> {
        &self.agent
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
