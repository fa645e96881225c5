//! Mock Provider Tests
//!
//! The agent loop holds providers as trait objects; these tests check the
//! trait mocks cleanly and that responses classify into model turns.

use async_trait::async_trait;
use mockall::mock;
use serde_json::json;
use tune_provider::{
    ChatParams, ChatResponse, Message, ModelTurn, Provider, ProviderError, Role, ToolCall,
};

mock! {
    pub Provider {}

    #[async_trait]
    impl Provider for Provider {
        async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

#[tokio::test]
async fn test_mock_provider_final_answer() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Ok(ChatResponse::text("Here are five jazz tracks")));

    let turn = mock
        .chat(ChatParams::default())
        .await
        .unwrap()
        .into_turn()
        .unwrap();
    assert_eq!(
        turn,
        ModelTurn::Final {
            text: "Here are five jazz tracks".to_string()
        }
    );
}

#[tokio::test]
async fn test_mock_provider_tool_request_sees_history() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .withf(|params| {
            params.messages.len() == 1
                && params.messages[0].role == Role::User
                && params.messages[0].content == "Search for jazz tracks"
        })
        .returning(|_| {
            Ok(ChatResponse::tools(vec![ToolCall::new(
                "call_1",
                "search_tracks",
                json!({"query": "jazz", "limit": 5}),
            )]))
        });

    let params = ChatParams {
        messages: vec![Message::user("Search for jazz tracks")],
        ..Default::default()
    };
    match mock.chat(params).await.unwrap().into_turn().unwrap() {
        ModelTurn::ToolRequest { calls, .. } => {
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].name, "search_tracks");
        }
        other => panic!("expected tool request, got {:?}", other),
    }
}

#[tokio::test]
async fn test_mock_provider_errors_pass_through() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Err(ProviderError::RateLimited));

    let result = mock.chat(ChatParams::default()).await;
    assert!(matches!(result, Err(ProviderError::RateLimited)));
}

#[tokio::test]
async fn test_mock_provider_as_trait_object() {
    let mut mock = MockProvider::new();
    mock.expect_is_configured().returning(|| true);
    mock.expect_default_model()
        .returning(|| "llama-3.3-70b-versatile".to_string());

    let provider: Box<dyn Provider> = Box::new(mock);
    assert!(provider.is_configured());
    assert_eq!(provider.default_model(), "llama-3.3-70b-versatile");
}
