//! Gateway tests against a wiremock chat-completions endpoint.

use maestro::error::EngineError;
use maestro::gateway::openai::OpenAiGateway;
use maestro::gateway::{ChatMessage, ModelGateway, ModelRequest};
use maestro::{ModelParams, Settings};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(server: &MockServer) -> OpenAiGateway {
    let mut settings = Settings::default();
    settings.llm.api_base = server.uri();
    OpenAiGateway::new("test-key".to_string(), settings)
}

fn request() -> ModelRequest {
    ModelRequest {
        messages: vec![ChatMessage::user("what next?")],
        params: ModelParams::default(),
    }
}

#[tokio::test]
async fn test_invoke_parses_decision_and_usage() {
    let server = MockServer::start().await;
    let content = json!({
        "thought": "need to compute",
        "action": {"tool": "calculator", "input": {"op": "add", "a": 1, "b": 2}},
        "is_final": false,
        "final_answer": null,
        "confidence": 0.4
    })
    .to_string();
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": content}}],
            "usage": {"total_tokens": 21}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = gateway_for(&server).invoke(request()).await.unwrap();

    assert!(!reply.is_final);
    assert_eq!(reply.text, "need to compute");
    let call = reply.tool_call.unwrap();
    assert_eq!(call.tool, "calculator");
    assert_eq!(reply.confidence, Some(0.4));
    assert_eq!(reply.tokens_used, Some(21));
}

#[tokio::test]
async fn test_rate_limit_maps_to_quota_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let err = gateway_for(&server).invoke(request()).await.unwrap_err();
    assert!(matches!(err, EngineError::ProviderQuota(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend down"))
        .mount(&server)
        .await;

    let err = gateway_for(&server).invoke(request()).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_client_error_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let err = gateway_for(&server).invoke(request()).await.unwrap_err();
    assert!(matches!(err, EngineError::Provider { retryable: false, .. }));
}

#[tokio::test]
async fn test_empty_choices_is_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = gateway_for(&server).invoke(request()).await.unwrap_err();
    assert!(matches!(err, EngineError::Provider { .. }));
}
