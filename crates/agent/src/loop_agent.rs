//! Agent loop - resumable turn driver
//!
//! Every message is checkpointed as soon as it exists, so a turn interrupted
//! at any point can be picked up again by calling `run_turn` with the same
//! thread id and input.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tune_checkpoint::{CheckpointError, CheckpointStore, Thread};
use tune_config::Config;
use tune_provider::{
    ChatParams, ErrorKind, Message, ModelTurn, Provider, ProviderError, Role, ToolCall, ToolChoice,
};

use crate::context::ContextBuilder;
use crate::executor::{ExecutorSettings, ToolExecutor};
use crate::router::{RouteState, Router};
use crate::tools::ToolRegistry;
use crate::{AgentError, Result};

const SUPERSEDED: &str = "superseded by a new user message before it ran";

#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Empty means the provider's default model
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub model_timeout: Duration,
    pub max_round_trips: u32,
    pub executor: ExecutorSettings,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.default_model(),
            temperature: config.model.temperature,
            max_tokens: config.model.max_tokens,
            model_timeout: Duration::from_secs(config.model.timeout_secs),
            max_round_trips: config.agent.max_round_trips,
            executor: ExecutorSettings::from_config(&config.agent),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Successful end of a turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReply {
    pub text: String,
    /// Router states visited during this call
    pub path: Vec<RouteState>,
    /// The answer came from the checkpoint without any model or tool call
    pub replayed: bool,
}

/// Where a turn picks up given the stored history
#[derive(Debug, PartialEq)]
enum Resume {
    Replay(String),
    Tools { calls: Vec<ToolCall>, round_trips: u32 },
    Agent { round_trips: u32 },
    Fresh { superseded: Vec<ToolCall> },
}

/// A turn continues when the latest user message equals the input.
fn plan_resume(messages: &[Message], input: &str) -> Resume {
    let last_user = messages.iter().rposition(|m| m.role == Role::User);

    match last_user {
        Some(idx) if messages[idx].content == input => {
            let tail = &messages[idx + 1..];
            if let Some(last) = tail.last().filter(|m| m.is_final_answer()) {
                return Resume::Replay(last.content.clone());
            }
            let round_trips = tail.iter().filter(|m| m.has_tool_calls()).count() as u32;
            let calls = unresolved_calls(tail);
            if calls.is_empty() {
                Resume::Agent { round_trips }
            } else {
                Resume::Tools { calls, round_trips }
            }
        }
        Some(idx) => Resume::Fresh {
            superseded: unresolved_calls(&messages[idx + 1..]),
        },
        None => Resume::Fresh {
            superseded: unresolved_calls(messages),
        },
    }
}

/// Calls of the latest tool request that have no result yet, in call order
fn unresolved_calls(messages: &[Message]) -> Vec<ToolCall> {
    let Some(pos) = messages.iter().rposition(|m| m.has_tool_calls()) else {
        return Vec::new();
    };
    let answered: HashSet<&str> = messages[pos + 1..]
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    messages[pos]
        .tool_calls
        .iter()
        .filter(|c| !answered.contains(c.id.as_str()))
        .cloned()
        .collect()
}

/// The agent loop drives model and tools for one thread at a time
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    store: Arc<dyn CheckpointStore>,
    executor: ToolExecutor,
    context: ContextBuilder,
    settings: AgentSettings,
    thread_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn CheckpointStore>,
        settings: AgentSettings,
    ) -> Self {
        let executor = ToolExecutor::new(registry, settings.executor.clone());
        Self {
            provider,
            store,
            executor,
            context: ContextBuilder::default(),
            settings,
            thread_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_context(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.executor.registry()
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Run (or resume) one turn
    pub async fn run_turn(&self, thread_id: &str, input: &str) -> Result<TurnReply> {
        self.run_turn_with_cancel(thread_id, input, CancellationToken::new())
            .await
    }

    pub async fn run_turn_with_cancel(
        &self,
        thread_id: &str,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<TurnReply> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            guard = lock.lock() => guard,
        };

        info!("turn start on thread {}", thread_id);
        let result = self.drive(thread_id, input, &cancel).await;
        match &result {
            Ok(reply) => info!(
                "turn end on thread {} via {:?}{}",
                thread_id,
                reply.path,
                if reply.replayed { " (replayed)" } else { "" }
            ),
            Err(e) => warn!("turn on thread {} failed: {}: {}", thread_id, e.kind(), e),
        }
        result
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.thread_locks.lock().await;
        locks.entry(thread_id.to_string()).or_default().clone()
    }

    async fn drive(
        &self,
        thread_id: &str,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnReply> {
        let thread = match self.store.get(thread_id).await {
            Ok(thread) => thread,
            Err(CheckpointError::NotFound(_)) => Thread::new(thread_id),
            Err(e) => return Err(e.into()),
        };
        let mut history = thread.messages;
        let max = self.settings.max_round_trips;

        let mut router = match plan_resume(&history, input) {
            Resume::Replay(text) => {
                info!("thread {} already answered this input, replaying", thread_id);
                return Ok(TurnReply {
                    text,
                    path: vec![RouteState::End],
                    replayed: true,
                });
            }
            Resume::Tools { calls, round_trips } => {
                info!(
                    "resuming thread {} with {} unresolved tool calls",
                    thread_id,
                    calls.len()
                );
                let mut router = Router::resume(RouteState::Tools, round_trips, max);
                self.run_tools(thread_id, &mut history, &calls, cancel)
                    .await?;
                router.on_tools_complete();
                router
            }
            Resume::Agent { round_trips } => {
                debug!("resuming thread {} at the model step", thread_id);
                Router::resume(RouteState::Agent, round_trips, max)
            }
            Resume::Fresh { superseded } => {
                for call in superseded {
                    warn!("closing unresolved tool call {} ({})", call.id, call.name);
                    let closed =
                        Message::tool_error(call.id, call.name, ErrorKind::Cancelled, SUPERSEDED);
                    self.append(thread_id, &mut history, closed).await?;
                }
                self.append(thread_id, &mut history, Message::user(input))
                    .await?;
                Router::new(max)
            }
        };

        loop {
            let turn = self.invoke_model(&history, cancel).await?;
            router.on_model_output(&turn)?;

            match turn {
                ModelTurn::Final { text } => {
                    self.append(thread_id, &mut history, Message::assistant(&text))
                        .await?;
                    return Ok(TurnReply {
                        text,
                        path: router.path().to_vec(),
                        replayed: false,
                    });
                }
                ModelTurn::ToolRequest { content, calls } => {
                    debug!(
                        "round trip {}/{}: {} tool calls",
                        router.round_trips(),
                        max,
                        calls.len()
                    );
                    let request = Message::tool_request(content, calls.clone());
                    self.append(thread_id, &mut history, request).await?;
                    self.run_tools(thread_id, &mut history, &calls, cancel)
                        .await?;
                    router.on_tools_complete();
                }
            }
        }
    }

    /// Execute calls and checkpoint every non-fatal result in call order.
    /// A fatal result is left unrecorded so a retried turn runs it again.
    async fn run_tools(
        &self,
        thread_id: &str,
        history: &mut Vec<Message>,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let results = self.executor.execute_all(calls, cancel).await;

        let mut fatal = None;
        for result in results {
            if result.is_fatal() {
                if fatal.is_none() {
                    fatal = result.outcome.err();
                }
                continue;
            }
            if let Some(kind) = result.error_kind() {
                warn!("tool {} returned {}", result.name, kind);
            }
            self.append(thread_id, history, result.into_message())
                .await?;
        }

        match fatal {
            Some(failure) if failure.kind == ErrorKind::AuthError => {
                Err(AgentError::Auth(failure.detail))
            }
            Some(_) => Err(AgentError::Cancelled),
            None => Ok(()),
        }
    }

    async fn invoke_model(
        &self,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<ModelTurn> {
        let tools = self.executor.registry().definitions();
        let params = ChatParams {
            model: self.settings.model.clone(),
            messages: self.context.build_messages(history, &tools),
            tools,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            tool_choice: ToolChoice::Auto,
        };
        debug!("invoking model with {} messages", params.messages.len());

        let timeout = self.settings.model_timeout;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = tokio::time::timeout(timeout, self.provider.chat(params)) => match result {
                Ok(response) => response?,
                Err(_) => return Err(ProviderError::Timeout(timeout.as_secs()).into()),
            },
        };
        Ok(response.into_turn()?)
    }

    async fn append(
        &self,
        thread_id: &str,
        history: &mut Vec<Message>,
        message: Message,
    ) -> Result<()> {
        self.store
            .append(thread_id, history.len(), message.clone())
            .await?;
        history.push(message);
        Ok(())
    }
}
