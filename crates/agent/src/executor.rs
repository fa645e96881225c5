//! Tool executor
//!
//! Validates and dispatches tool calls with a per-attempt timeout, retrying
//! transient failures with exponential backoff. Calls from one model response
//! run concurrently up to a bound and come back in call order.

use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tune_config::{AgentConfig, RetryConfig};
use tune_provider::{ErrorKind, Message, ToolCall, ToolFailure};

use crate::tools::{ToolError, ToolRegistry};

/// Exponential backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub max_in_flight: usize,
    pub tool_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ExecutorSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight_tools.max(1),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

/// Outcome of one tool call, tagged with the call it answers
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub outcome: Result<Value, ToolFailure>,
}

impl ToolResult {
    fn success(call: &ToolCall, value: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: Ok(value),
        }
    }

    fn failure(call: &ToolCall, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: Err(ToolFailure {
                kind,
                detail: detail.into(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.outcome.as_ref().err().map(|f| f.kind)
    }

    /// Failures that end the turn instead of going back to the model
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.error_kind(),
            Some(ErrorKind::AuthError) | Some(ErrorKind::Cancelled)
        )
    }

    pub fn into_message(self) -> Message {
        match self.outcome {
            Ok(value) => {
                let content = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Message::tool(self.call_id, self.name, content)
            }
            Err(failure) => {
                Message::tool_error(self.call_id, self.name, failure.kind, failure.detail)
            }
        }
    }
}

/// Runs tool calls against a shared registry
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    settings: ExecutorSettings,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, settings: ExecutorSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Execute every call, at most `max_in_flight` at once, results in call order
    pub async fn execute_all(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        // Collected first so the returned future stays Send
        let pending: Vec<_> = calls.iter().map(|call| self.execute(call, cancel)).collect();
        stream::iter(pending)
            .buffered(self.settings.max_in_flight.max(1))
            .collect()
            .await
    }

    /// Execute one call; never fails, errors become error-carrying results
    pub async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        if cancel.is_cancelled() {
            return ToolResult::failure(call, ErrorKind::Cancelled, "turn cancelled");
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("tool call {} cancelled", call.id);
                ToolResult::failure(call, ErrorKind::Cancelled, "turn cancelled")
            }
            result = self.dispatch(call) => result,
        }
    }

    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let tool = match self.registry.lookup(&call.name) {
            Ok(tool) => tool,
            Err(e) => {
                warn!("model requested unknown tool {}", call.name);
                return ToolResult::failure(call, ErrorKind::UnknownToolError, e.to_string());
            }
        };

        if let Err(detail) = tool.validate(&call.arguments) {
            debug!("invalid arguments for {}: {}", call.name, detail);
            return ToolResult::failure(call, ErrorKind::ValidationError, detail);
        }

        let definition = &tool.definition;
        let policy = self.settings.retry;
        let mut attempt = 1;

        loop {
            debug!("executing {} ({}), attempt {}", call.name, call.id, attempt);
            let result = tokio::time::timeout(
                self.settings.tool_timeout,
                definition.handler.call(call.arguments.clone()),
            )
            .await
            .unwrap_or(Err(ToolError::Timeout(self.settings.tool_timeout)));

            let err = match result {
                Ok(value) => return ToolResult::success(call, value),
                Err(ToolError::Auth(detail)) => {
                    return ToolResult::failure(call, ErrorKind::AuthError, detail)
                }
                Err(err) => err,
            };

            if !err.is_retryable(definition.idempotent) {
                return ToolResult::failure(call, ErrorKind::ToolExecutionError, err.to_string());
            }
            if attempt >= policy.max_attempts {
                return ToolResult::failure(
                    call,
                    ErrorKind::ToolExecutionError,
                    format!("{} (gave up after {} attempts)", err, attempt),
                );
            }

            let delay = err
                .retry_after()
                .map(|d| d.min(policy.max_delay))
                .unwrap_or_else(|| policy.delay_for(attempt));
            warn!(
                "{} failed on attempt {}: {}; retrying in {:?}",
                call.name, attempt, err, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
