// Integration tests for the MCP client against a mocked tool server
//
// Covers the session handshake, tool discovery with retries and the
// normalization of tools/call results.

use aerodesk::tools::mcp::{McpClient, McpEndpoint, McpToolHandler};
use aerodesk::tools::{ExecutionContext, ToolHandler};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn endpoint(url: &str) -> McpEndpoint {
    McpEndpoint::new(url).with_retry_delay(Duration::from_millis(10))
}

async fn mock_handshake(server: &mut mockito::ServerGuard) -> (mockito::Mock, mockito::Mock) {
    let init = server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({"method": "initialize"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("mcp-session-id", "session-123")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {"name": "airline-tools", "version": "1.0"},
                    "capabilities": {"tools": {}}
                }
            })
            .to_string(),
        )
        .expect_at_least(1)
        .create_async()
        .await;

    let initialized = server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({"method": "notifications/initialized"})))
        .match_header("mcp-session-id", "session-123")
        .with_status(202)
        .expect_at_least(1)
        .create_async()
        .await;

    (init, initialized)
}

#[tokio::test]
async fn test_list_tools_plain_json() {
    let mut server = mockito::Server::new_async().await;
    let (init, initialized) = mock_handshake(&mut server).await;
    let list = server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({"method": "tools/list"})))
        .match_header("mcp-session-id", "session-123")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": {"tools": [
                    {
                        "name": "reservas_crear",
                        "description": "Crear una reserva",
                        "inputSchema": {
                            "type": "object",
                            "required": ["reserva"],
                            "properties": {"reserva": {"type": "object"}}
                        }
                    },
                    {"name": "pagos_listar", "description": "Listar pagos"}
                ]}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = McpClient::new(endpoint(&server.url())).unwrap();
    let tools = client.list_tools().await;

    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].name, "reservas_crear");
    assert_eq!(tools[0].input_schema["required"], json!(["reserva"]));
    assert!(tools[1].input_schema.as_object().unwrap().is_empty());

    init.assert_async().await;
    initialized.assert_async().await;
    list.assert_async().await;
}

#[tokio::test]
async fn test_list_tools_sse_framed() {
    let mut server = mockito::Server::new_async().await;
    let _handshake = mock_handshake(&mut server).await;
    let body = format!(
        "event: message\ndata: {}\n\n",
        json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": [{"name": "vuelos_listar"}]}})
    );
    let _list = server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({"method": "tools/list"})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let client = McpClient::new(endpoint(&server.url())).unwrap();
    let tools = client.list_tools().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "vuelos_listar");
}

#[tokio::test]
async fn test_list_tools_returns_empty_after_retries() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("POST", "/mcp")
        .with_status(503)
        .with_body("unavailable")
        .expect(3)
        .create_async()
        .await;

    let client = McpClient::new(endpoint(&server.url())).unwrap();
    assert!(client.list_tools().await.is_empty());
    failing.assert_async().await;
}

#[tokio::test]
async fn test_call_tool_structured_content() {
    let mut server = mockito::Server::new_async().await;
    let _handshake = mock_handshake(&mut server).await;
    let call = server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({
            "method": "tools/call",
            "params": {"name": "reservas_obtener", "arguments": {"id_reserva": 7}}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": {
                    "content": [{"type": "text", "text": "{\"id\":7}"}],
                    "structuredContent": {"id": 7, "estado": "CONFIRMADA"}
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = McpClient::new(endpoint(&server.url())).unwrap();
    let result = client.call_tool("reservas_obtener", json!({"id_reserva": 7})).await;
    assert_eq!(
        result,
        json!({"status": "ok", "result": {"id": 7, "estado": "CONFIRMADA"}})
    );
    call.assert_async().await;
}

#[tokio::test]
async fn test_call_tool_rpc_error_becomes_error_status() {
    let mut server = mockito::Server::new_async().await;
    let _handshake = mock_handshake(&mut server).await;
    let _call = server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({"method": "tools/call"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "error": {"code": -32602, "message": "Unknown tool"}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = McpClient::new(endpoint(&server.url())).unwrap();
    let result = client.call_tool("nope", json!({})).await;
    assert_eq!(result["status"], "error");
    assert!(result["error"].as_str().unwrap().contains("Unknown tool"));
}

#[tokio::test]
async fn test_handler_injects_credentials() {
    let mut server = mockito::Server::new_async().await;
    let _handshake = mock_handshake(&mut server).await;
    let call = server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({
            "method": "tools/call",
            "params": {
                "name": "pagos_listar",
                "arguments": {"jwt_token": "jwt-abc", "usuario_id": "u-9"}
            }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": {"content": [{"type": "text", "text": "[]"}]}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = Arc::new(McpClient::new(endpoint(&server.url())).unwrap());
    let handler = McpToolHandler::new(client, "pagos_listar");
    let ctx = ExecutionContext {
        session_id: Some("s".into()),
        jwt_token: Some("jwt-abc".into()),
        group_id: None,
        usuario_id: Some("u-9".into()),
    };

    let result = handler.call(json!({}), &ctx).await.unwrap();
    assert_eq!(result, json!({"status": "ok", "result": []}));
    call.assert_async().await;
}

#[tokio::test]
async fn test_unreachable_server() {
    let client = McpClient::new(endpoint("http://127.0.0.1:9")).unwrap();
    assert!(!client.test_connection().await);
    let result = client.call_tool("x", json!({})).await;
    assert_eq!(result["status"], "error");
}

#[tokio::test]
async fn test_handler_surfaces_unreachable_server_as_error() {
    let client = Arc::new(McpClient::new(endpoint("http://127.0.0.1:9")).unwrap());
    let handler = McpToolHandler::new(client, "vuelos_listar");

    let result = handler.call(json!({}), &ExecutionContext::default()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_handler_keeps_server_errors_as_status() {
    let mut server = mockito::Server::new_async().await;
    let _handshake = mock_handshake(&mut server).await;
    let _call = server
        .mock("POST", "/mcp")
        .match_body(Matcher::PartialJson(json!({"method": "tools/call"})))
        .with_status(503)
        .with_body("mantenimiento")
        .create_async()
        .await;

    let client = Arc::new(McpClient::new(endpoint(&server.url())).unwrap());
    let handler = McpToolHandler::new(client, "vuelos_listar");

    let result = handler.call(json!({}), &ExecutionContext::default()).await.unwrap();
    assert_eq!(result["status"], "error");
    assert!(result["error"].as_str().unwrap().contains("HTTP 503"));
}
