// End-to-end agent tests against a mocked MCP tool server
//
// Tools are discovered over JSON-RPC, ranked with TF-IDF and executed with
// arguments extracted from the message.

use aerodesk::agent::{AgentCore, AgentSession};
use aerodesk::config::Config;
use aerodesk::selection::{SemanticSelector, Thresholds};
use aerodesk::tools::mcp::{McpClient, McpEndpoint};
use aerodesk::tools::ExecutionContext;
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn mock_handshake(server: &mut mockito::ServerGuard) {
    server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({"method": "initialize"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("mcp-session-id", "s-1")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"protocolVersion": "2024-11-05", "serverInfo": {"name": "airline-tools"}}
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({"method": "notifications/initialized"})))
        .with_status(202)
        .create_async()
        .await;
}

async fn mock_tool_list(server: &mut mockito::ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({"method": "tools/list"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": {"tools": [{
                    "name": "reservas_obtener",
                    "description": "Consultar una reserva por su id",
                    "inputSchema": {
                        "type": "object",
                        "required": ["id_reserva"],
                        "properties": {"id_reserva": {"type": "integer"}}
                    }
                }]}
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await
}

fn agent_for(url: &str) -> AgentCore {
    agent_with(url, 30, Duration::from_millis(10))
}

fn agent_with(url: &str, reload_cooldown_secs: u64, retry_delay: Duration) -> AgentCore {
    let mut config = Config::default();
    config.reasoning.enable_llm_reasoning = false;
    config.mcp.reload_cooldown_secs = reload_cooldown_secs;
    let thresholds = Thresholds {
        direct: 0.3,
        ..Thresholds::default()
    };
    let selector = SemanticSelector::new(None, None, thresholds, 5);
    let endpoint = McpEndpoint::new(url).with_retry_delay(retry_delay);
    let client = Arc::new(McpClient::new(endpoint).unwrap());
    AgentCore::new(&config, None, selector, Some(client))
}

/// URL of a local port with nothing listening on it
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_discovers_and_executes_mcp_tool() {
    let mut server = mockito::Server::new_async().await;
    mock_handshake(&mut server).await;
    let list = mock_tool_list(&mut server).await;
    let call = server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({
            "method": "tools/call",
            "params": {"name": "reservas_obtener", "arguments": {"id_reserva": 77}}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": {"structuredContent": {"id": 77, "estado": "CONFIRMADA"}}
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let agent = agent_for(&server.url());
    agent.ensure_tools_loaded().await;
    assert_eq!(agent.available_tools(), vec!["reservas_obtener".to_string()]);

    let mut session = AgentSession::new("cliente-7", 20);
    let response = agent
        .process_message(
            &mut session,
            "consulta la reserva con id reserva 77",
            &ExecutionContext::for_session("cliente-7"),
        )
        .await;

    assert_eq!(response.action_taken, "tool_execution");
    assert_eq!(response.tool_used.as_deref(), Some("reservas_obtener"));
    assert_eq!(response.message, "Listo. Ejecuté reservas_obtener correctamente.");
    assert_eq!(
        response.metadata["execution_result"]["result"]["result"]["estado"],
        "CONFIRMADA"
    );
    assert_eq!(session.stats.tools_executed, 1);

    // Loaded once; a second call does not list again
    agent.ensure_tools_loaded().await;
    list.assert_async().await;
    call.assert_async().await;
}

#[tokio::test]
async fn test_missing_id_asks_for_it() {
    let mut server = mockito::Server::new_async().await;
    mock_handshake(&mut server).await;
    mock_tool_list(&mut server).await;
    let call = server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({"method": "tools/call"})))
        .expect(0)
        .create_async()
        .await;

    let agent = agent_for(&server.url());
    agent.ensure_tools_loaded().await;

    let mut session = AgentSession::new("cliente-8", 20);
    let response = agent
        .process_message(&mut session, "quiero ver mi reserva", &ExecutionContext::default())
        .await;

    assert_eq!(response.action_taken, "clarification");
    assert!(response.message.contains("id_reserva"));
    assert!(response.message.ends_with("Para continuar, necesito: id_reserva."));
    call.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_mcp_keeps_agent_conversational() {
    let agent = agent_for("http://127.0.0.1:9");
    agent.ensure_tools_loaded().await;
    assert!(agent.available_tools().is_empty());

    let mut session = AgentSession::new("cliente-9", 20);
    let response = agent
        .process_message(&mut session, "hola", &ExecutionContext::default())
        .await;
    assert_eq!(response.action_taken, "conversation");
    assert_eq!(session.memory.len(), 2);
}

#[tokio::test]
async fn test_failed_tool_load_waits_for_cooldown() {
    // Three attempts with 150ms + 300ms backoff between them
    let agent = agent_with(&closed_port_url(), 30, Duration::from_millis(150));

    let started = Instant::now();
    agent.ensure_tools_loaded().await;
    assert!(started.elapsed() >= Duration::from_millis(400));

    let started = Instant::now();
    agent.ensure_tools_loaded().await;
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(agent.available_tools().is_empty());
}

#[tokio::test]
async fn test_concurrent_request_does_not_wait_for_tool_load() {
    let agent = agent_with(&closed_port_url(), 30, Duration::from_millis(150));

    let (_, waited) = tokio::join!(agent.ensure_tools_loaded(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        agent.ensure_tools_loaded().await;
        started.elapsed()
    });

    assert!(waited < Duration::from_millis(100));
}

#[tokio::test]
async fn test_tool_load_retried_after_cooldown() {
    let agent = agent_with(&closed_port_url(), 0, Duration::from_millis(100));

    agent.ensure_tools_loaded().await;
    let started = Instant::now();
    agent.ensure_tools_loaded().await;
    assert!(started.elapsed() >= Duration::from_millis(250));
}
