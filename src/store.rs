//! Artifact stores: where per-test result markers live between runs.
//!
//! A store is addressed only by test id. Reads are lock-free; writes for the
//! same id are serialized, writes for different ids never contend.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::{
    err_io, err_msg,
    result::{ExecutionResult, ResultMarker},
    SimParityError,
};

/// Key-value surface over per-test result markers.
pub trait ArtifactStore: Send + Sync {
    /// Loads the persisted result for `id`, or `None` when nothing was stored.
    fn load(&self, id: &str) -> Result<Option<ExecutionResult>, SimParityError>;

    /// Persists `result` for `id`, replacing any previous marker.
    fn persist(&self, id: &str, result: &ExecutionResult) -> Result<(), SimParityError>;
}

// ============================================================================
// PER-ID LOCKS
// ============================================================================

/// Hands out one lock per test id so that writers for the same id are
/// serialized without a global write lock.
#[derive(Debug, Default)]
struct IdLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdLocks {
    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(id.to_string()).or_default())
    }
}

// ============================================================================
// MARKER STORE
// ============================================================================

/// Stores one YAML marker per test at `<root>/<id><dir_suffix>/<marker_name>`.
///
/// This is the same layout the RTL bench uses for `sim_result.yml`, so a
/// mirrored bench directory can be read directly as a store.
#[derive(Debug)]
pub struct MarkerStore {
    root: PathBuf,
    dir_suffix: String,
    marker_name: String,
    locks: IdLocks,
}

impl MarkerStore {
    pub fn new(
        root: impl Into<PathBuf>,
        dir_suffix: impl Into<String>,
        marker_name: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            dir_suffix: dir_suffix.into(),
            marker_name: marker_name.into(),
            locks: IdLocks::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything recorded for `id`.
    pub fn test_dir(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}{}", self.dir_suffix))
    }

    pub fn marker_path(&self, id: &str) -> PathBuf {
        self.test_dir(id).join(&self.marker_name)
    }
}

impl ArtifactStore for MarkerStore {
    fn load(&self, id: &str) -> Result<Option<ExecutionResult>, SimParityError> {
        let path = self.marker_path(id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(err_io!(e, "failed to read marker {}", path.display())),
        };
        let marker = ResultMarker::parse(&text).map_err(|e| SimParityError::Io {
            message: format!("malformed marker {}", path.display()),
            source: Some(Box::new(e)),
        })?;
        Ok(Some(marker.into_result()))
    }

    fn persist(&self, id: &str, result: &ExecutionResult) -> Result<(), SimParityError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock();

        let dir = self.test_dir(id);
        fs::create_dir_all(&dir)
            .map_err(|e| err_io!(e, "failed to create {}", dir.display()))?;

        let yaml = result
            .to_marker()
            .to_yaml()
            .map_err(|e| err_msg!(Internal, "failed to serialize marker for {id}: {e}"))?;

        let path = self.marker_path(id);
        let staging = dir.join(format!(".{}.tmp", self.marker_name));
        fs::write(&staging, yaml)
            .map_err(|e| err_io!(e, "failed to write {}", staging.display()))?;
        fs::rename(&staging, &path)
            .map_err(|e| err_io!(e, "failed to move marker into {}", path.display()))?;

        debug!(test = id, path = %path.display(), status = %result.status(), "persisted marker");
        Ok(())
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// In-process store, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, ExecutionResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ArtifactStore for MemoryStore {
    fn load(&self, id: &str) -> Result<Option<ExecutionResult>, SimParityError> {
        Ok(self.entries.read().get(id).cloned())
    }

    fn persist(&self, id: &str, result: &ExecutionResult) -> Result<(), SimParityError> {
        self.entries.write().insert(id.to_string(), result.clone());
        Ok(())
    }
}
