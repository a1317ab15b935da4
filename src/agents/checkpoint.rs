//! Model Checkpointing
//!
//! Owns the checkpoint directory layout and the storage handle. Every write
//! holds a semaphore permit for its whole duration; the permit is released
//! when the guard drops, on success, failure and task cancellation alike.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::traits::Agent;
use crate::error::CheckpointError;
use crate::training::{AgentType, SessionId};

/// File extension used for checkpoints managed by the store
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

/// Checkpoint storage shared by all runners
pub struct CheckpointStore {
    /// Root directory; one subdirectory per agent type
    root: PathBuf,
    /// Maximum checkpoints kept per agent type (0 = keep all)
    max_per_agent: usize,
    /// Concurrent writers allowed against the storage
    permits: Arc<Semaphore>,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(root: P, max_per_agent: usize, write_concurrency: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_per_agent,
            permits: Arc::new(Semaphore::new(write_concurrency.max(1))),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn agent_dir(&self, agent_type: AgentType) -> PathBuf {
        self.root.join(agent_type.as_str())
    }

    /// Path for the checkpoint written after `episode` in `session_id`
    pub fn checkpoint_path(
        &self,
        agent_type: AgentType,
        session_id: SessionId,
        episode: u32,
    ) -> PathBuf {
        let session = session_id.simple().to_string();
        let prefix = format!("{}_{}", agent_type.as_str(), &session[..8]);
        self.agent_dir(agent_type)
            .join(format!("{}.{}", episode_name(&prefix, episode), CHECKPOINT_EXTENSION))
    }

    /// Persist `agent` through its own writer and prune old checkpoints
    pub async fn save(
        &self,
        agent_type: AgentType,
        session_id: SessionId,
        episode: u32,
        agent: &mut dyn Agent,
    ) -> Result<PathBuf, CheckpointError> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CheckpointError::Unrecoverable("checkpoint storage closed".into()))?;

        let dir = self.agent_dir(agent_type);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.checkpoint_path(agent_type, session_id, episode);
        agent.save_checkpoint(&path).await?;
        info!("Saved {} checkpoint to {:?}", agent_type, path);

        self.cleanup_old_checkpoints(agent_type).await;
        Ok(path)
    }

    /// Checkpoints for `agent_type`, oldest first.
    ///
    /// Ordered by modification time, then episode number, since coarse mtimes
    /// tie and the session prefix in the name is random.
    pub async fn list_checkpoints(&self, agent_type: AgentType) -> Vec<PathBuf> {
        let mut found: Vec<(SystemTime, u32, PathBuf)> = Vec::new();

        let mut entries = match tokio::fs::read_dir(self.agent_dir(agent_type)).await {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let episode = checkpoint_episode(&path).unwrap_or_default();
            found.push((modified, episode, path));
        }

        found.sort();
        found.into_iter().map(|(_, _, path)| path).collect()
    }

    /// Most recently written checkpoint for `agent_type`
    pub async fn latest_checkpoint(&self, agent_type: AgentType) -> Option<PathBuf> {
        self.list_checkpoints(agent_type).await.into_iter().last()
    }

    async fn cleanup_old_checkpoints(&self, agent_type: AgentType) {
        if self.max_per_agent == 0 {
            return;
        }
        let checkpoints = self.list_checkpoints(agent_type).await;
        if checkpoints.len() <= self.max_per_agent {
            return;
        }

        let to_remove = checkpoints.len() - self.max_per_agent;
        for path in checkpoints.into_iter().take(to_remove) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove old checkpoint {:?}: {}", path, e);
            } else {
                debug!("Removed old checkpoint {:?}", path);
            }
        }
    }
}

/// Checkpoint stem with a zero-padded episode number
pub fn episode_name(prefix: &str, episode: u32) -> String {
    format!("{}_ep{:06}", prefix, episode)
}

/// Episode number encoded by `episode_name`
pub fn checkpoint_episode(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let (_, episode) = stem.rsplit_once("_ep")?;
    episode.parse().ok()
}
