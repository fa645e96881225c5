//! Language model provider and conversation data model
//!
//! Messages, tool calls and tool schemas shared by the checkpoint store and
//! the agent loop, plus the `Provider` trait the loop invokes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

pub mod openai;

pub use openai::OpenAiCompatProvider;

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("no api key configured")]
    NoApiKey,

    #[error("malformed response: {0}")]
    InvalidResponse(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("model call timed out after {0}s")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Failure classes surfaced to callers and recorded on tool results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    AuthError,
    ValidationError,
    UnknownToolError,
    ToolExecutionError,
    ModelInvocationError,
    TurnBudgetExceeded,
    Cancelled,
    CheckpointError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthError => "AuthError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::UnknownToolError => "UnknownToolError",
            ErrorKind::ToolExecutionError => "ToolExecutionError",
            ErrorKind::ModelInvocationError => "ModelInvocationError",
            ErrorKind::TurnBudgetExceeded => "TurnBudgetExceeded",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::CheckpointError => "CheckpointError",
        }
    }

    /// Whether a tool result carrying this kind is handed back to the model
    pub fn is_recoverable_in_band(&self) -> bool {
        matches!(
            self,
            ErrorKind::ValidationError
                | ErrorKind::UnknownToolError
                | ErrorKind::ToolExecutionError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Structured error attached to a tool message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ErrorKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One entry of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Assistant message requesting tool calls
    pub fn tool_request(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.tool_calls = calls;
        msg
    }

    /// Successful tool result
    pub fn tool(
        call_id: impl Into<String>,
        name: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        let mut msg = Self::with_role(Role::Tool, result);
        msg.tool_call_id = Some(call_id.into());
        msg.name = Some(name.into());
        msg
    }

    /// Error-carrying tool result; the content mirrors the failure for the model
    pub fn tool_error(
        call_id: impl Into<String>,
        name: impl Into<String>,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        let detail = detail.into();
        let content = serde_json::json!({
            "error": { "kind": kind.as_str(), "detail": &detail }
        })
        .to_string();
        let mut msg = Self::tool(call_id, name, content);
        msg.error = Some(ToolFailure { kind, detail });
        msg
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Assistant message that closes a turn
    pub fn is_final_answer(&self) -> bool {
        self.role == Role::Assistant && self.tool_calls.is_empty()
    }
}

/// Tool specification sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Function schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Resource consumption
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Raw provider response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    pub fn tools(calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls: calls,
            finish_reason: "tool_calls".to_string(),
            usage: Usage::default(),
        }
    }

    /// Classify into a final answer or a tool request.
    ///
    /// Duplicate call ids within one response are a malformed response.
    pub fn into_turn(self) -> Result<ModelTurn> {
        if self.tool_calls.is_empty() {
            return Ok(ModelTurn::Final {
                text: self.content.unwrap_or_default(),
            });
        }

        let mut seen = HashSet::new();
        for call in &self.tool_calls {
            if call.name.is_empty() {
                return Err(ProviderError::InvalidResponse(format!(
                    "tool call {} has no name",
                    call.id
                )));
            }
            if !seen.insert(call.id.as_str()) {
                return Err(ProviderError::InvalidResponse(format!(
                    "duplicate tool call id {}",
                    call.id
                )));
            }
        }

        Ok(ModelTurn::ToolRequest {
            content: self.content.unwrap_or_default(),
            calls: self.tool_calls,
        })
    }
}

/// What the model wants next
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    Final { text: String },
    ToolRequest { content: String, calls: Vec<ToolCall> },
}

/// Request parameters
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tool_choice: ToolChoice,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            max_tokens: 4096,
            temperature: 0.0,
            tool_choice: ToolChoice::Auto,
        }
    }
}

/// Tool selection mode
#[derive(Debug, Clone)]
pub enum ToolChoice {
    Auto,
    Required(String),
    None,
}

/// Model invoker
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse>;
    fn default_model(&self) -> String;
    fn is_configured(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_error_display() {
        assert_eq!(ProviderError::NoApiKey.to_string(), "no api key configured");
        let err = ProviderError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "provider returned 500: boom");
        assert_eq!(
            ProviderError::Timeout(30).to_string(),
            "model call timed out after 30s"
        );
    }

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::AuthError.to_string(), "AuthError");
        assert_eq!(
            serde_json::to_value(ErrorKind::TurnBudgetExceeded).unwrap(),
            json!("TurnBudgetExceeded")
        );
    }

    #[test]
    fn test_error_kind_recoverability() {
        assert!(ErrorKind::ValidationError.is_recoverable_in_band());
        assert!(ErrorKind::UnknownToolError.is_recoverable_in_band());
        assert!(ErrorKind::ToolExecutionError.is_recoverable_in_band());
        assert!(!ErrorKind::AuthError.is_recoverable_in_band());
        assert!(!ErrorKind::Cancelled.is_recoverable_in_band());
        assert!(!ErrorKind::ModelInvocationError.is_recoverable_in_band());
    }

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("Search for jazz tracks");
        assert_eq!(msg.role, Role::User);
        assert!(!msg.has_tool_calls());
        assert!(!msg.is_final_answer());

        let msg = Message::assistant("Done");
        assert!(msg.is_final_answer());

        let msg = Message::tool_request("", vec![ToolCall::new("c1", "search_tracks", json!({}))]);
        assert!(msg.has_tool_calls());
        assert!(!msg.is_final_answer());
    }

    #[test]
    fn test_tool_error_message_content() {
        let msg = Message::tool_error("c1", "create_playlist", ErrorKind::ValidationError, "name: too short");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("c1"));
        let failure = msg.error.as_ref().unwrap();
        assert_eq!(failure.kind, ErrorKind::ValidationError);

        let body: Value = serde_json::from_str(&msg.content).unwrap();
        assert_eq!(body["error"]["kind"], "ValidationError");
        assert_eq!(body["error"]["detail"], "name: too short");
    }

    #[test]
    fn test_message_serde_skips_empty_fields() {
        let msg = Message::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("error").is_none());

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_into_turn_final() {
        let turn = ChatResponse::text("Here you go").into_turn().unwrap();
        assert_eq!(
            turn,
            ModelTurn::Final {
                text: "Here you go".to_string()
            }
        );
    }

    #[test]
    fn test_into_turn_tool_request_keeps_order() {
        let response = ChatResponse::tools(vec![
            ToolCall::new("b", "search_tracks", json!({"query": "jazz"})),
            ToolCall::new("a", "search_tracks", json!({"query": "blues"})),
        ]);
        match response.into_turn().unwrap() {
            ModelTurn::ToolRequest { calls, .. } => {
                assert_eq!(calls[0].id, "b");
                assert_eq!(calls[1].id, "a");
            }
            other => panic!("expected tool request, got {:?}", other),
        }
    }

    #[test]
    fn test_into_turn_rejects_duplicate_ids() {
        let response = ChatResponse::tools(vec![
            ToolCall::new("same", "search_tracks", json!({})),
            ToolCall::new("same", "create_playlist", json!({})),
        ]);
        assert!(matches!(
            response.into_turn(),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_into_turn_rejects_nameless_call() {
        let response = ChatResponse::tools(vec![ToolCall::new("c1", "", json!({}))]);
        assert!(response.into_turn().is_err());
    }

    #[test]
    fn test_tool_new() {
        let tool = Tool::new("search_tracks", "Search", json!({"type": "object"}));
        assert_eq!(tool.tool_type, "function");
        assert_eq!(tool.function.name, "search_tracks");
    }

    #[test]
    fn test_chat_params_default() {
        let params = ChatParams::default();
        assert!(params.messages.is_empty());
        assert_eq!(params.temperature, 0.0);
        assert!(matches!(params.tool_choice, ToolChoice::Auto));
    }
}
