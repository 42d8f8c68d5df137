//! Durable topology storage
//!
//! The topology must survive controller restarts. `FileTopologyStore`
//! writes it as JSON with the atomic replace pattern:
//! 1. Write to a temp file beside the target
//! 2. fsync the temp file
//! 3. Rename over the target (atomic on POSIX)
//! 4. fsync the directory so the rename itself is durable
//!
//! A reader therefore sees either the previous topology or the new one,
//! never a torn write.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::errors::{StoreError, StoreResult};
use super::ClusterTopology;

/// Persistence for the cluster topology.
pub trait TopologyStore: Send + Sync {
    /// Load the persisted topology, `None` if nothing was saved yet.
    fn load(&self) -> StoreResult<Option<ClusterTopology>>;

    /// Replace the persisted topology.
    fn save(&self, topology: &ClusterTopology) -> StoreResult<()>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct FileTopologyStore {
    path: PathBuf,
}

impl FileTopologyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TopologyStore for FileTopologyStore {
    fn load(&self) -> StoreResult<Option<ClusterTopology>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(format!("{}: {}", self.path.display(), e))),
        };
        let topology = serde_json::from_str(&content)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(topology))
    }

    fn save(&self, topology: &ClusterTopology) -> StoreResult<()> {
        let content = serde_json::to_vec_pretty(topology)
            .map_err(|e| StoreError::Io(format!("failed to serialize topology: {}", e)))?;
        write_atomic(&self.path, &content)
            .map_err(|e| StoreError::Io(format!("{}: {}", self.path.display(), e)))
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryTopologyStore {
    inner: Mutex<Option<ClusterTopology>>,
}

impl MemoryTopologyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TopologyStore for MemoryTopologyStore {
    fn load(&self) -> StoreResult<Option<ClusterTopology>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| StoreError::Io("memory store lock poisoned".into()))?;
        Ok(guard.clone())
    }

    fn save(&self, topology: &ClusterTopology) -> StoreResult<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| StoreError::Io("memory store lock poisoned".into()))?;
        *guard = Some(topology.clone());
        Ok(())
    }
}

/// Atomically replace `path` with `content`.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut temp_name = file_name.to_os_string();
    temp_name.push(".tmp");
    let temp_path = parent.join(temp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;

    // Directory fsync is not supported everywhere; the rename already happened.
    if let Ok(dir) = File::open(&parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}
