use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tune_provider::Message;

use crate::{validate_thread_id, CheckpointError, CheckpointStore, Result, Thread};

/// How long to wait for another writer's lock file
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
/// Lock files older than this were left by a crashed writer
const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);
const LOCK_POLL: Duration = Duration::from_millis(5);

/// Exclusive `.{id}.lock` file, removed on drop
struct ThreadLock {
    path: PathBuf,
}

impl ThreadLock {
    async fn acquire(path: PathBuf, thread_id: &str) -> Result<Self> {
        let started = Instant::now();
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            if Self::is_stale(&path).await {
                warn!("removing stale lock {}", path.display());
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }
            if started.elapsed() >= LOCK_TIMEOUT {
                return Err(CheckpointError::Locked(thread_id.to_string()));
            }
            tokio::time::sleep(LOCK_POLL).await;
        }
    }

    async fn is_stale(path: &Path) -> bool {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return false;
        };
        meta.modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > STALE_LOCK_AFTER)
    }
}

impl Drop for ThreadLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// One JSON file per thread under a directory.
///
/// Every append rewrites the thread file through a synced temp file and a
/// rename, so a crash leaves either the old or the new history on disk.
/// Appends and deletes hold a per-thread lock file, which also excludes
/// other stores (and processes) sharing the directory.
pub struct FileCheckpointStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", thread_id))
    }

    async fn lock(&self, thread_id: &str) -> Result<ThreadLock> {
        tokio::fs::create_dir_all(&self.dir).await?;
        ThreadLock::acquire(self.dir.join(format!(".{}.lock", thread_id)), thread_id).await
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Thread>> {
        validate_thread_id(thread_id)?;
        let path = self.thread_path(thread_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let thread: Thread = serde_json::from_str(&content)?;
                Ok(Some(thread))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(&self, thread: &Thread) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.thread_path(&thread.id);
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            thread.id,
            uuid::Uuid::new_v4().simple()
        ));
        let content = serde_json::to_vec_pretty(thread)?;

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&content).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Thread> {
        self.load(thread_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(thread_id.to_string()))
    }

    async fn append(
        &self,
        thread_id: &str,
        expected_len: usize,
        message: Message,
    ) -> Result<usize> {
        validate_thread_id(thread_id)?;
        let _guard = self.write_lock.lock().await;
        let _lock = self.lock(thread_id).await?;

        let mut thread = self
            .load(thread_id)
            .await?
            .unwrap_or_else(|| Thread::new(thread_id));
        let len = thread.append_checked(expected_len, message)?;
        self.write_atomic(&thread).await?;

        debug!("checkpoint {} at {} messages", thread_id, len);
        Ok(len)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!("skipping non-utf8 checkpoint file {:?}", entry.path());
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        validate_thread_id(thread_id)?;
        let _guard = self.write_lock.lock().await;
        if !tokio::fs::try_exists(self.thread_path(thread_id)).await? {
            return Ok(false);
        }
        let _lock = self.lock(thread_id).await?;
        match tokio::fs::remove_file(self.thread_path(thread_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
