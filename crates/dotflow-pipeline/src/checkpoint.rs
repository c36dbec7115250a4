//! Checkpoint save/restore for resumable runs.
//!
//! The engine writes a [`Checkpoint`] after every transition. Resuming a run
//! is loading that snapshot and continuing the loop from `current_node`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dotflow_types::{Context, DotflowError, Result, StageStatus};

/// Snapshot of run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub graph_id: String,
    pub logs_root: String,
    /// The node the engine will execute next.
    pub current_node: String,
    pub completed_nodes: Vec<String>,
    #[serde(default)]
    pub retry_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub node_outcomes: BTreeMap<String, StageStatus>,
    #[serde(default)]
    pub context: Context,
    /// RFC 3339 timestamps.
    pub created_at: String,
    pub updated_at: String,
}

impl Checkpoint {
    pub fn new(graph_id: impl Into<String>, logs_root: &Path, current_node: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            graph_id: graph_id.into(),
            logs_root: logs_root.display().to_string(),
            current_node: current_node.into(),
            completed_nodes: Vec::new(),
            retry_counts: BTreeMap::new(),
            node_outcomes: BTreeMap::new(),
            context: Context::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Refresh `updated_at`; `created_at` is left alone.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

pub fn default_checkpoint_path(logs_root: &Path) -> PathBuf {
    logs_root.join("checkpoint.json")
}

/// Write `checkpoint` as pretty JSON, creating parent directories.
pub async fn save_checkpoint(checkpoint: &Checkpoint, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(checkpoint)?;
    tokio::fs::write(path, json).await?;
    tracing::debug!(path = %path.display(), node = %checkpoint.current_node, "checkpoint saved");
    Ok(())
}

pub async fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DotflowError::Checkpoint(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&json)
        .map_err(|e| DotflowError::Checkpoint(format!("invalid checkpoint {}: {e}", path.display())))
}

/// Load the checkpoint at `path` if the file exists.
pub async fn load_checkpoint_if_exists(path: &Path) -> Result<Option<Checkpoint>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    load_checkpoint(path).await.map(Some)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
