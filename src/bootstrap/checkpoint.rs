//! Resumable bootstrap checkpoints
//!
//! One JSON file per replica under the checkpoint directory records the
//! last completed phase and how many base backups have failed. A restarted
//! controller resumes from the recorded phase instead of starting over.

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{BootstrapError, BootstrapResult};
use crate::topology::{write_atomic, NodeId};

/// Last completed bootstrap phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BootstrapPhase {
    WaitingForPrimary,
    PrimaryReachable,
    CleanSlate,
    BaseBackupComplete,
    StandbyConfigured,
    Ready,
}

impl BootstrapPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapPhase::WaitingForPrimary => "WaitingForPrimary",
            BootstrapPhase::PrimaryReachable => "PrimaryReachable",
            BootstrapPhase::CleanSlate => "CleanSlate",
            BootstrapPhase::BaseBackupComplete => "BaseBackupComplete",
            BootstrapPhase::StandbyConfigured => "StandbyConfigured",
            BootstrapPhase::Ready => "Ready",
        }
    }
}

/// Persisted progress of one replica's bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapCheckpoint {
    pub node_id: NodeId,
    pub phase: BootstrapPhase,
    pub failed_base_backups: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl BootstrapCheckpoint {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            phase: BootstrapPhase::WaitingForPrimary,
            failed_base_backups: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Directory of per-replica checkpoint files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Checkpoint file of `node`; ids are reduced to a safe file name.
    pub fn path(&self, node: &NodeId) -> PathBuf {
        let file: String = node
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file))
    }

    pub fn load(&self, node: &NodeId) -> BootstrapResult<Option<BootstrapCheckpoint>> {
        let path = self.path(node);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BootstrapError::Io(format!("{}: {}", path.display(), e))),
        };
        let checkpoint: BootstrapCheckpoint = serde_json::from_str(&content)
            .map_err(|e| BootstrapError::Checkpoint(format!("{}: {}", path.display(), e)))?;
        if &checkpoint.node_id != node {
            return Err(BootstrapError::Checkpoint(format!(
                "{} belongs to node {}",
                path.display(),
                checkpoint.node_id
            )));
        }
        Ok(Some(checkpoint))
    }

    pub fn save(&self, checkpoint: &mut BootstrapCheckpoint) -> BootstrapResult<()> {
        checkpoint.updated_at = Utc::now();
        let content = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| BootstrapError::Checkpoint(e.to_string()))?;
        write_atomic(&self.path(&checkpoint.node_id), &content)?;
        Ok(())
    }

    /// Forget a replica's progress (used when the replica is removed).
    pub fn remove(&self, node: &NodeId) -> BootstrapResult<()> {
        match fs::remove_file(self.path(node)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_phases_are_ordered() {
        assert!(BootstrapPhase::WaitingForPrimary < BootstrapPhase::CleanSlate);
        assert!(BootstrapPhase::BaseBackupComplete < BootstrapPhase::Ready);
    }

    #[test]
    fn test_save_load_remove() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let id = NodeId::from("replica_1");
        assert!(store.load(&id).unwrap().is_none());

        let mut checkpoint = BootstrapCheckpoint::new(id.clone());
        checkpoint.phase = BootstrapPhase::BaseBackupComplete;
        checkpoint.failed_base_backups = 1;
        store.save(&mut checkpoint).unwrap();

        let loaded = store.load(&id).unwrap().unwrap();
        assert_eq!(loaded.phase, BootstrapPhase::BaseBackupComplete);
        assert_eq!(loaded.failed_base_backups, 1);

        store.remove(&id).unwrap();
        assert!(store.load(&id).unwrap().is_none());
        store.remove(&id).unwrap();
    }

    #[test]
    fn test_unsafe_ids_are_sanitized() {
        let store = CheckpointStore::new("/state/bootstrap");
        let path = store.path(&NodeId::from("../etc/passwd"));
        assert_eq!(path, PathBuf::from("/state/bootstrap/.._etc_passwd.json"));
    }

    #[test]
    fn test_corrupt_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let id = NodeId::from("r1");
        fs::write(store.path(&id), b"not json").unwrap();
        assert!(matches!(store.load(&id), Err(BootstrapError::Checkpoint(_))));
    }
}
