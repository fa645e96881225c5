//! Tool registry
//!
//! Definitions are registered once at startup and the registry is shared
//! read-only afterwards.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use tune_provider::Tool;

/// Registration and lookup failures
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),

    #[error("unknown tool '{0}'")]
    Unknown(String),

    #[error("tool '{name}' has an invalid input schema: {reason}")]
    InvalidSchema { name: String, reason: String },
}

/// Failure reported by a tool handler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// Missing or rejected credential
    #[error("{0}")]
    Auth(String),

    #[error("rate limited (HTTP 429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error (HTTP {status}): {detail}")]
    Server { status: u16, detail: String },

    /// The request never left this process
    #[error("request not sent: {0}")]
    NotSent(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{}", format_failed(.status, .detail))]
    Failed { status: Option<u16>, detail: String },
}

fn format_failed(status: &Option<u16>, detail: &str) -> String {
    match status {
        Some(status) => format!("HTTP {status}: {detail}"),
        None => detail.to_string(),
    }
}

impl ToolError {
    pub fn failed(detail: impl Into<String>) -> Self {
        ToolError::Failed {
            status: None,
            detail: detail.into(),
        }
    }

    /// Whether another attempt is allowed for a tool with this idempotency
    pub fn is_retryable(&self, idempotent: bool) -> bool {
        match self {
            ToolError::RateLimited { .. } | ToolError::NotSent(_) => true,
            ToolError::Server { .. } | ToolError::Timeout(_) => idempotent,
            ToolError::Auth(_) | ToolError::Failed { .. } => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ToolError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Capability invoked with validated arguments
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// A named, schema-described action
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Safe to re-send after a server error or timeout
    pub idempotent: bool,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            idempotent: false,
            handler: Arc::new(handler),
        }
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Schema view handed to the model, without the handler
    pub fn to_tool(&self) -> Tool {
        Tool::new(&self.name, &self.description, self.input_schema.clone())
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("idempotent", &self.idempotent)
            .finish_non_exhaustive()
    }
}

/// Definition plus its compiled schema
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl RegisteredTool {
    /// Check arguments, joining every violation as `path: message`
    pub fn validate(&self, args: &Value) -> std::result::Result<(), String> {
        if self.validator.is_valid(args) {
            return Ok(());
        }
        let errors: Vec<String> = self
            .validator
            .iter_errors(args)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        Err(errors.join("; "))
    }
}

/// Tool registry
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), RegistryError> {
        if self.tools.contains_key(&definition.name) {
            return Err(RegistryError::Duplicate(definition.name));
        }
        let validator = jsonschema::Validator::new(&definition.input_schema).map_err(|e| {
            RegistryError::InvalidSchema {
                name: definition.name.clone(),
                reason: e.to_string(),
            }
        })?;

        debug!("registered tool {}", definition.name);
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                validator,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&RegisteredTool, RegistryError> {
        self.tools
            .get(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool schemas sorted by name
    pub fn definitions(&self) -> Vec<Tool> {
        let mut tools: Vec<&RegisteredTool> = self.tools.values().collect();
        tools.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        tools.into_iter().map(|t| t.definition.to_tool()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let limited = ToolError::RateLimited { retry_after: None };
        assert!(limited.is_retryable(false));
        assert!(ToolError::NotSent("refused".into()).is_retryable(false));

        let server = ToolError::Server {
            status: 503,
            detail: "unavailable".into(),
        };
        assert!(server.is_retryable(true));
        assert!(!server.is_retryable(false));
        assert!(!ToolError::Timeout(Duration::from_secs(1)).is_retryable(false));

        assert!(!ToolError::Auth("no token".into()).is_retryable(true));
        assert!(!ToolError::failed("bad request").is_retryable(true));
    }

    #[test]
    fn test_failed_display_keeps_status() {
        let err = ToolError::Failed {
            status: Some(404),
            detail: "Invalid playlist Id".into(),
        };
        assert_eq!(err.to_string(), "HTTP 404: Invalid playlist Id");
        assert_eq!(ToolError::failed("boom").to_string(), "boom");
    }

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let limited = ToolError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(ToolError::NotSent("x".into()).retry_after(), None);
    }
}
