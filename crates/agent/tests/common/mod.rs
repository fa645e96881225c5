//! Shared fixtures for agent integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use mockall::mock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tune_agent::{
    AgentLoop, AgentSettings, CredentialCache, CredentialProvider, ExecutorSettings, RetryPolicy,
    SpotifyClient, StaticCredentials, ToolDefinition, ToolError, ToolHandler, ToolRegistry,
};
use tune_checkpoint::{CheckpointStore, MemoryCheckpointStore};
use tune_provider::{
    ChatParams, ChatResponse, Message, Provider, ProviderError, Role, ToolCall,
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

/// Settings with millisecond backoff so retry tests stay fast
pub fn fast_settings(max_round_trips: u32) -> AgentSettings {
    AgentSettings {
        model: "test-model".to_string(),
        temperature: 0.0,
        max_tokens: 512,
        model_timeout: Duration::from_secs(5),
        max_round_trips,
        executor: ExecutorSettings {
            max_in_flight: 4,
            tool_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        },
    }
}

pub fn agent(
    provider: MockProvider,
    registry: ToolRegistry,
    store: Arc<MemoryCheckpointStore>,
    max_round_trips: u32,
) -> AgentLoop {
    AgentLoop::new(
        Arc::new(provider),
        Arc::new(registry),
        store,
        fast_settings(max_round_trips),
    )
}

/// Tool messages visible to the model, excluding the system prompt
pub fn tool_messages(params: &ChatParams) -> Vec<&Message> {
    params
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect()
}

pub fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args)
}

/// Records every invocation and answers with its arguments
pub struct RecordingTool {
    pub calls: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl ToolHandler for RecordingTool {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(args.clone());
        }
        Ok(json!({ "echo": args }))
    }
}

/// Sleeps for `delayMs` then returns `tag`
pub struct SlowTool;

#[async_trait]
impl ToolHandler for SlowTool {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let delay = args["delayMs"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(json!({ "tag": args["tag"] }))
    }
}

/// Fails with an auth error for the first `failures` calls
pub struct AuthThenOk {
    pub failures: usize,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolHandler for AuthThenOk {
    async fn call(&self, _args: Value) -> Result<Value, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(ToolError::Auth("no Spotify credential available".to_string()))
        } else {
            Ok(json!({ "ok": true }))
        }
    }
}

pub fn echo_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "query": { "type": "string", "minLength": 1 } },
        "required": ["query"]
    })
}

pub fn recording_registry() -> (ToolRegistry, Arc<Mutex<Vec<Value>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry
        .register(
            ToolDefinition::new(
                "echo",
                "Echo the query back",
                echo_schema(),
                RecordingTool {
                    calls: calls.clone(),
                },
            )
            .idempotent(true),
        )
        .unwrap();
    (registry, calls)
}

pub fn recorded(calls: &Arc<Mutex<Vec<Value>>>) -> Vec<Value> {
    calls.lock().unwrap().clone()
}

pub fn memory_store() -> Arc<MemoryCheckpointStore> {
    Arc::new(MemoryCheckpointStore::new())
}

pub async fn stored(store: &MemoryCheckpointStore, thread_id: &str) -> Vec<Message> {
    store.get(thread_id).await.unwrap().messages
}

/// Spotify client against a mock server with a fixed token
pub fn spotify_client(base_url: &str, creds: Option<(&str, Option<&str>)>) -> Arc<SpotifyClient> {
    let provider: Arc<dyn CredentialProvider> = match creds {
        Some((token, user)) => Arc::new(StaticCredentials::new(token, user.map(String::from))),
        None => Arc::new(StaticCredentials::none()),
    };
    Arc::new(SpotifyClient::new(
        base_url,
        Arc::new(CredentialCache::new(provider)),
    ))
}

/// Spotify search payload with `n` tracks
pub fn search_body(n: usize) -> String {
    let items: Vec<Value> = (1..=n)
        .map(|i| {
            json!({
                "id": format!("trk{i}"),
                "uri": format!("spotify:track:trk{i}"),
                "name": format!("Jazz Track {i}"),
                "artists": [{ "name": format!("Artist {i}") }],
                "album": { "name": "Blue Album" },
                "duration_ms": 200_000 + i as u64
            })
        })
        .collect();
    json!({ "tracks": { "items": items, "total": n } }).to_string()
}
