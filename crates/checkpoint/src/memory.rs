use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use tune_provider::Message;

use crate::{validate_thread_id, CheckpointError, CheckpointStore, Result, Thread};

/// In-memory store for tests and one-shot sessions.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    threads: RwLock<HashMap<String, Thread>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Thread> {
        let threads = self.threads.read().await;
        threads
            .get(thread_id)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(thread_id.to_string()))
    }

    async fn append(
        &self,
        thread_id: &str,
        expected_len: usize,
        message: Message,
    ) -> Result<usize> {
        validate_thread_id(thread_id)?;
        let mut threads = self.threads.write().await;
        if expected_len > 0 && !threads.contains_key(thread_id) {
            return Err(CheckpointError::Conflict {
                thread_id: thread_id.to_string(),
                expected: expected_len,
                actual: 0,
            });
        }
        let thread = threads
            .entry(thread_id.to_string())
            .or_insert_with(|| Thread::new(thread_id));
        let len = thread.append_checked(expected_len, message)?;
        debug!("checkpoint {} at {} messages", thread_id, len);
        Ok(len)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let threads = self.threads.read().await;
        let mut ids: Vec<String> = threads.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        let mut threads = self.threads.write().await;
        Ok(threads.remove(thread_id).is_some())
    }
}
