//! Thread checkpoints for resumable conversations
//!
//! A thread's history is append-only. Stores accept an append only when the
//! caller's view of the history length matches the stored one, so two writers
//! can never interleave messages into the same thread.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tune_provider::Message;

pub mod file;
pub mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

/// Checkpoint store errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("thread not found: {0}")]
    NotFound(String),

    #[error("conflicting append to {thread_id}: expected {expected} messages, found {actual}")]
    Conflict {
        thread_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid thread id: {0}")]
    InvalidId(String),

    #[error("thread {0} is locked by another writer")]
    Locked(String),

    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint decode error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// A resumable conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub messages: Vec<Message>,
    /// Completed turns (final answers) in this thread
    #[serde(default)]
    pub turn_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            turn_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Append a message, keeping the turn count in step
    pub fn push(&mut self, message: Message) {
        if message.is_final_answer() {
            self.turn_count += 1;
        }
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Apply an append after checking the caller's expected length
    pub fn append_checked(&mut self, expected_len: usize, message: Message) -> Result<usize> {
        if self.messages.len() != expected_len {
            return Err(CheckpointError::Conflict {
                thread_id: self.id.clone(),
                expected: expected_len,
                actual: self.messages.len(),
            });
        }
        self.push(message);
        Ok(self.messages.len())
    }
}

/// Durable mapping from thread id to ordered history
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load a thread, `NotFound` if it was never written
    async fn get(&self, thread_id: &str) -> Result<Thread>;

    /// Append one message; `expected_len` is the history length the caller
    /// built on. Creates the thread when `expected_len` is zero. Returns the
    /// new length.
    async fn append(&self, thread_id: &str, expected_len: usize, message: Message)
        -> Result<usize>;

    /// Known thread ids
    async fn list(&self) -> Result<Vec<String>>;

    /// Remove a thread, returning whether it existed
    async fn delete(&self, thread_id: &str) -> Result<bool>;
}

/// Reject ids that are empty or unsafe as file names
pub fn validate_thread_id(thread_id: &str) -> Result<()> {
    if thread_id.is_empty() {
        return Err(CheckpointError::InvalidId(
            "thread id cannot be empty".to_string(),
        ));
    }
    if thread_id.starts_with('.') {
        return Err(CheckpointError::InvalidId(format!(
            "thread id cannot start with '.': {thread_id:?}"
        )));
    }
    if thread_id.contains('/')
        || thread_id.contains('\\')
        || thread_id.contains("..")
        || thread_id.chars().any(|c| c.is_control())
    {
        return Err(CheckpointError::InvalidId(format!(
            "thread id contains invalid characters: {thread_id:?}"
        )));
    }
    Ok(())
}
