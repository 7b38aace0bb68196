// Aerodesk - natural-language agent over airline MCP tools
// Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use aerodesk::agent::{AgentCore, AgentSession};
use aerodesk::config::{load_config, Config, LoggingConfig};
use aerodesk::server::AgentServer;
use aerodesk::tools::ExecutionContext;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "aerodesk")]
#[command(about = "Natural-language agent that routes airline requests to MCP tools", version)]
struct Args {
    /// Config file (default: ~/.aerodesk/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Bind address (default: server.host:server.port)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Answer a single query and print the response as JSON
    Query {
        /// Query text
        text: String,
    },
    /// List the tools discovered on the MCP server
    Tools,
    /// Validate the configuration and print every problem found
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    init_tracing(&config.logging);

    match args.command {
        Command::Serve { bind } => run_server(config, bind).await,
        Command::Query { text } => run_query(config, &text).await,
        Command::Tools => run_tools(config).await,
        Command::CheckConfig => check_config(&config),
    }
}

/// Initialize tracing
///
/// The level comes from config, `RUST_LOG` overrides it. `logging.format`
/// selects human-readable or JSON lines.
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }

    // Bridge log crate → tracing (for dependencies using log crate)
    tracing_log::LogTracer::init().ok();
}

async fn run_server(config: Config, bind: Option<String>) -> Result<()> {
    config.ensure_valid()?;
    let server = AgentServer::from_config(config)?;
    server.serve(bind.as_deref()).await
}

async fn run_query(config: Config, text: &str) -> Result<()> {
    config.ensure_valid()?;
    let agent = AgentCore::from_config(&config)?;
    agent.ensure_tools_loaded().await;

    let mut session = AgentSession::new(uuid::Uuid::new_v4().to_string(), config.flow.memory_size);
    let context = ExecutionContext::for_session(session.id.clone());
    let response = agent.process_message(&mut session, text, &context).await;

    let output = serde_json::to_string_pretty(&response).context("Failed to encode response")?;
    println!("{}", output);
    Ok(())
}

async fn run_tools(config: Config) -> Result<()> {
    let agent = AgentCore::from_config(&config)?;
    let count = agent
        .load_tools_from_mcp()
        .await
        .context("Failed to load tools from the MCP server")?;

    println!("{} tools available at {}", count, config.mcp.base_url);
    for name in agent.available_tools() {
        println!("  {}", name);
    }
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        println!("Configuration OK");
        return Ok(());
    }
    for error in &errors {
        eprintln!("  - {}", error);
    }
    anyhow::bail!("{} configuration problem(s) found", errors.len())
}
