//! Playlist agent core
//!
//! Tool registry, executor, router and the resumable agent loop that drives a
//! language model against the Spotify Web API.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tune_checkpoint::CheckpointError;
use tune_provider::{ErrorKind, ProviderError};

pub mod context;
pub mod credentials;
pub mod executor;
pub mod loop_agent;
pub mod router;
pub mod spotify;
pub mod tools;

pub use context::ContextBuilder;
pub use credentials::{
    AccessToken, CredentialCache, CredentialError, CredentialProvider, SpotifyRefreshCredentials,
    StaticCredentials,
};
pub use executor::{ExecutorSettings, RetryPolicy, ToolExecutor, ToolResult};
pub use loop_agent::{AgentLoop, AgentSettings, TurnReply};
pub use router::{RouteError, RouteState, Router};
pub use spotify::{register_spotify_tools, SpotifyClient};
pub use tools::{RegistryError, ToolDefinition, ToolError, ToolHandler, ToolRegistry};

/// Turn-fatal errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("{0}")]
    Auth(String),

    #[error("model invocation failed: {0}")]
    Model(#[from] ProviderError),

    #[error("turn exceeded the budget of {0} tool round trips")]
    TurnBudgetExceeded(u32),

    #[error("turn cancelled")]
    Cancelled,

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Auth(_) => ErrorKind::AuthError,
            AgentError::Model(_) => ErrorKind::ModelInvocationError,
            AgentError::TurnBudgetExceeded(_) => ErrorKind::TurnBudgetExceeded,
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::Checkpoint(_) => ErrorKind::CheckpointError,
        }
    }

    pub fn to_turn_error(&self) -> TurnError {
        TurnError {
            kind: self.kind(),
            detail: self.to_string(),
        }
    }
}

impl From<RouteError> for AgentError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::BudgetExceeded(max) => AgentError::TurnBudgetExceeded(max),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// User-visible failure of a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl std::fmt::Display for TurnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for TurnError {}

impl From<AgentError> for TurnError {
    fn from(err: AgentError) -> Self {
        err.to_turn_error()
    }
}
