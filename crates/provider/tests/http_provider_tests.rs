//! OpenAI-compatible adapter against a local HTTP mock

use mockito::{Matcher, Server};
use serde_json::json;
use tune_provider::{
    ChatParams, Message, ModelTurn, OpenAiCompatProvider, Provider, ProviderError, Tool,
};

fn params() -> ChatParams {
    ChatParams {
        model: "llama-3.3-70b-versatile".to_string(),
        messages: vec![Message::user("Search for jazz tracks")],
        tools: vec![Tool::new(
            "search_tracks",
            "Search for tracks",
            json!({"type": "object"}),
        )],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_chat_parses_tool_calls() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer gsk_test")
        .match_body(Matcher::PartialJson(json!({"tool_choice": "auto"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_9",
                            "type": "function",
                            "function": {"name": "search_tracks", "arguments": "{\"query\":\"jazz\",\"limit\":5}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let provider = OpenAiCompatProvider::new("gsk_test", Some(server.url()), None);
    let response = provider.chat(params()).await.unwrap();
    mock.assert_async().await;

    assert_eq!(response.usage.total_tokens, 15);
    match response.into_turn().unwrap() {
        ModelTurn::ToolRequest { calls, .. } => {
            assert_eq!(calls[0].id, "call_9");
            assert_eq!(calls[0].arguments["limit"], 5);
        }
        other => panic!("expected tool request, got {:?}", other),
    }
}

#[tokio::test]
async fn test_chat_maps_429_to_rate_limited() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_body("{}")
        .create_async()
        .await;

    let provider = OpenAiCompatProvider::new("gsk_test", Some(server.url()), None);
    let result = provider.chat(params()).await;
    assert!(matches!(result, Err(ProviderError::RateLimited)));
}

#[tokio::test]
async fn test_chat_maps_error_status_and_message() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(400)
        .with_body(json!({"error": {"message": "bad tool schema"}}).to_string())
        .create_async()
        .await;

    let provider = OpenAiCompatProvider::new("gsk_test", Some(server.url()), None);
    match provider.chat(params()).await {
        Err(ProviderError::Api { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "bad tool schema");
        }
        other => panic!("expected api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_chat_rejects_non_json_body() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body("<html>gateway</html>")
        .create_async()
        .await;

    let provider = OpenAiCompatProvider::new("gsk_test", Some(server.url()), None);
    let result = provider.chat(params()).await;
    assert!(matches!(result, Err(ProviderError::Json(_))));
}
