//! HTTP-level tests for the Anthropic gateway.

use serde_json::json;
use std::time::{Duration, Instant};
use tendril_provider::{
    AnthropicGateway, CompletionRequest, FailureDetail, Message, ModelTier, Outcome,
    ResponseGateway, TokenCount, TokenCountRequest,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(server: &MockServer) -> AnthropicGateway {
    AnthropicGateway::with_base_url("test-key", &server.uri())
        .unwrap()
        .with_poll_interval(Duration::from_millis(20))
}

fn request() -> CompletionRequest {
    CompletionRequest::new(
        ModelTier::Sonnet,
        "system prompt",
        vec![Message::user("hello")],
        vec![],
    )
}

#[tokio::test]
async fn test_tool_use_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "thinking", "thinking": "let me look", "signature": "abc"},
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "bash_tool", "input": {"command": "ls"}}
            ],
            "stop_reason": "tool_use",
            "usage": {
                "input_tokens": 100,
                "output_tokens": 20,
                "cache_creation_input_tokens": 50,
                "cache_read_input_tokens": 0
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = gateway(&server)
        .complete(request(), &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, Outcome::ToolUse);
    assert_eq!(result.model, ModelTier::Sonnet);
    let requests = result.tool_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].name, "bash_tool");
    assert_eq!(requests[0].input, json!({"command": "ls"}));

    let usage = result.usage();
    assert_eq!(usage.input_tokens, 100);
    assert_eq!(usage.cache_write_tokens, 50);
    assert!(usage.cost > 0.0);
}

#[tokio::test]
async fn test_http_error_preserves_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .mount(&server)
        .await;

    let result = gateway(&server)
        .complete(request(), &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, Outcome::HttpError);
    match &result.failure {
        Some(FailureDetail::Http { status, body }) => {
            assert_eq!(*status, 503);
            assert!(body.contains("overloaded_error"));
        }
        other => panic!("unexpected failure detail: {other:?}"),
    }
    assert!(result.usage().is_empty());
}

#[tokio::test]
async fn test_connection_failure_is_exception() {
    // Nothing listens on this port once the listener is dropped.
    let uri = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };
    let gateway = AnthropicGateway::with_base_url("test-key", &uri).unwrap();

    let result = gateway.complete(request(), &CancellationToken::new()).await;

    assert_eq!(result.outcome, Outcome::Exception);
    assert!(matches!(result.failure, Some(FailureDetail::Exception { .. })));
}

#[tokio::test]
async fn test_cancellation_interrupts_outstanding_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "content": [{"type": "text", "text": "slow"}],
                    "stop_reason": "end_turn"
                }))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = gateway(&server).complete(request(), &cancel).await;

    assert_eq!(result.outcome, Outcome::Interrupted);
    assert_eq!(
        result.content[0].as_text(),
        Some("🛑 Response cancelled by user")
    );
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_count_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages/count_tokens"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"input_tokens": 4242})))
        .mount(&server)
        .await;

    let count = gateway(&server)
        .count_tokens(TokenCountRequest {
            model: ModelTier::Sonnet,
            system: "sys".into(),
            messages: vec![Message::user("hi")],
            tools: vec![],
        })
        .await;

    assert_eq!(count, TokenCount::Counted(4242));
}

#[tokio::test]
async fn test_count_tokens_failure_is_sentinel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages/count_tokens"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let count = gateway(&server)
        .count_tokens(TokenCountRequest {
            model: ModelTier::Opus,
            system: String::new(),
            messages: vec![Message::user("hi")],
            tools: vec![],
        })
        .await;

    assert_eq!(count, TokenCount::Failed);
    assert_eq!(count.as_i64(), -1);
}
