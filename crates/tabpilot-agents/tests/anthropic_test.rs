use std::convert::Infallible;
use std::net::SocketAddr;

use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive};
use axum::{
    Router,
    extract::Json,
    response::{IntoResponse, Sse},
    routing::post,
};
use futures::stream::{self, StreamExt};
use serde_json::{Value, json};
use tabpilot_agents::{
    AnthropicProvider, ChatMessage, ContentBlock, LlmProvider, LlmRequest, StreamEvent,
    ToolDefinition,
};
use tokio::sync::oneshot;

async fn start_mock_server() -> (SocketAddr, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();

    let app = Router::new().route("/v1/messages", post(mock_messages));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                rx.await.ok();
            })
            .await
            .unwrap();
    });

    (addr, tx)
}

fn sse(events: Vec<Value>) -> axum::response::Response {
    let stream = stream::iter(
        events
            .into_iter()
            .map(|e| Ok::<_, Infallible>(Event::default().data(e.to_string()))),
    );
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn message_start() -> Value {
    json!({
        "type": "message_start",
        "message": {
            "id": "msg_123",
            "type": "message",
            "role": "assistant",
            "content": [],
            "model": "claude-test",
            "stop_reason": null,
            "usage": {"input_tokens": 10, "output_tokens": 1}
        }
    })
}

async fn mock_messages(headers: HeaderMap, Json(payload): Json<Value>) -> impl IntoResponse {
    if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
        return (StatusCode::UNAUTHORIZED, "invalid x-api-key").into_response();
    }
    assert_eq!(payload["stream"], json!(true));

    let wants_tool = payload["tools"]
        .as_array()
        .is_some_and(|tools| !tools.is_empty());

    if wants_tool {
        return sse(vec![
            message_start(),
            json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "bash", "input": {}}
            }),
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "input_json_delta", "partial_json": "{\"command\": "}
            }),
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "input_json_delta", "partial_json": "\"ls\"}"}
            }),
            json!({"type": "content_block_stop", "index": 0}),
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": "tool_use"},
                "usage": {"output_tokens": 12}
            }),
            json!({"type": "message_stop"}),
        ]);
    }

    sse(vec![
        message_start(),
        json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "text", "text": ""}
        }),
        json!({"type": "ping"}),
        json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "Hel"}
        }),
        json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "lo"}
        }),
        json!({"type": "content_block_stop", "index": 0}),
        json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn"},
            "usage": {"output_tokens": 5}
        }),
        json!({"type": "message_stop"}),
    ])
}

fn request(tools: Vec<ToolDefinition>) -> LlmRequest {
    LlmRequest {
        model: "claude-test".to_string(),
        messages: vec![ChatMessage::user("Hello")],
        system: Some("be brief".to_string()),
        max_tokens: Some(100),
        tools,
    }
}

#[tokio::test]
async fn streams_text_deltas_then_completed() {
    let (addr, _shutdown_tx) = start_mock_server().await;
    let provider = AnthropicProvider::new("test-key".to_string())
        .with_base_url(format!("http://{addr}/v1/messages"));

    let events: Vec<StreamEvent> = provider
        .stream(&request(vec![]))
        .await
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
        .await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], StreamEvent::TextDelta("Hel".into()));
    assert_eq!(events[1], StreamEvent::TextDelta("lo".into()));
    let StreamEvent::Completed(response) = &events[2] else {
        panic!("expected completed response, got {:?}", events[2]);
    };
    assert_eq!(response.text(), "Hello");
    assert_eq!(response.model, "claude-test");
    assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
    let usage = response.usage.unwrap();
    assert_eq!(usage.input_tokens, 10);
    assert_eq!(usage.output_tokens, 5);
}

#[tokio::test]
async fn assembles_tool_use_input_from_json_deltas() {
    let (addr, _shutdown_tx) = start_mock_server().await;
    let provider = AnthropicProvider::new("test-key".to_string())
        .with_base_url(format!("http://{addr}/v1/messages"));

    let tool = ToolDefinition {
        name: "bash".into(),
        description: "run a command".into(),
        input_schema: json!({"type": "object"}),
    };
    let mut stream = provider.stream(&request(vec![tool])).await.unwrap();

    let Some(Ok(StreamEvent::Completed(response))) = stream.next().await else {
        panic!("expected a completed response with no text deltas");
    };
    assert!(stream.next().await.is_none());
    assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));
    assert_eq!(
        response.content,
        vec![ContentBlock::ToolUse {
            id: "toolu_1".into(),
            name: "bash".into(),
            input: json!({"command": "ls"}),
        }]
    );
}

#[tokio::test]
async fn non_success_status_is_an_error() {
    let (addr, _shutdown_tx) = start_mock_server().await;
    let provider = AnthropicProvider::new("wrong-key".to_string())
        .with_base_url(format!("http://{addr}/v1/messages"));

    let err = match provider.stream(&request(vec![])).await {
        Ok(_) => panic!("expected an error"),
        Err(e) => e,
    };
    let message = err.to_string();
    assert!(message.contains("401"), "{message}");
    assert!(message.contains("invalid x-api-key"), "{message}");
}
