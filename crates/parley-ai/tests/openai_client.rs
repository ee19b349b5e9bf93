//! OpenAI-compatible client against a local mock server

use parley_ai::{AiError, CompletionRequest, LlmClient, Message, OpenAIClient, Role};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn disable_system_proxy_for_tests() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        // Safety: set once for the process before any HTTP clients are built.
        unsafe {
            std::env::set_var("PARLEY_DISABLE_SYSTEM_PROXY", "1");
        }
    });
}

#[tokio::test]
async fn test_complete_returns_first_choice() {
    disable_system_proxy_for_tests();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "messages": [
                { "role": "system", "content": "be brief" },
                { "role": "user", "content": "alice:hello" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "role": "assistant", "content": "Hello=<|>=World" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAIClient::new("test-key")
        .with_model("test-model")
        .with_base_url(format!("{}/v1", server.uri()));

    let response = client
        .complete(CompletionRequest::new(vec![
            Message::system("be brief"),
            Message::user("alice:hello"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.content.as_deref(), Some("Hello=<|>=World"));
    assert_eq!(response.usage.map(|u| u.total_tokens), Some(16));
}

#[tokio::test]
async fn test_complete_sends_image_parts() {
    disable_system_proxy_for_tests();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": "bob:what is this" },
                    { "type": "image_url", "image_url": { "url": "https://cdn.example/x.png", "detail": "auto" } }
                ]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "a cat" }, "finish_reason": "stop" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAIClient::new("k").with_base_url(server.uri());
    let images = vec!["https://cdn.example/x.png".to_string()];
    let response = client
        .complete(CompletionRequest::new(vec![Message::with_images(
            Role::User,
            "bob:what is this",
            &images,
        )]))
        .await
        .unwrap();

    assert_eq!(response.content.as_deref(), Some("a cat"));
}

#[tokio::test]
async fn test_error_status_is_not_retried() {
    disable_system_proxy_for_tests();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAIClient::new("k").with_base_url(server.uri());
    let err = client
        .complete(CompletionRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap_err();

    match err {
        AiError::Api {
            status, message, ..
        } => {
            assert_eq!(status, 503);
            assert_eq!(message, "overloaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_choices_is_an_error() {
    disable_system_proxy_for_tests();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let client = OpenAIClient::new("k").with_base_url(server.uri());
    let err = client
        .complete(CompletionRequest::new(vec![Message::user("hi")]))
        .await
        .unwrap_err();

    assert!(matches!(err, AiError::Llm(_)));
}
