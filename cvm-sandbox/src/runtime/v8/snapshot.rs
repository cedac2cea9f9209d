//! Startup snapshots for V8 engines
//!
//! A snapshot carries a pre-initialised heap (typically the script library
//! and the `injectGas` transform) so engines start ready without running
//! bootstrap scripts. Snapshots are produced offline; this module only
//! loads them.

use crate::{Result, SandboxError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Snapshots handed to engines, one per file, kept for the whole process
static LOADED: OnceLock<Mutex<HashMap<PathBuf, &'static [u8]>>> = OnceLock::new();

/// Location of a snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub path: PathBuf,
}

impl SnapshotConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Loads snapshots from disk
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    config: SnapshotConfig,
}

impl SnapshotManager {
    pub fn new(config: SnapshotConfig) -> Self {
        Self { config }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn exists(&self) -> bool {
        self.config.path.exists()
    }

    /// Read the snapshot bytes. A missing or empty file is an error.
    pub fn load(&self) -> Result<Vec<u8>> {
        if !self.exists() {
            return Err(SandboxError::Engine(format!(
                "snapshot not found at {}",
                self.config.path.display()
            )));
        }

        let snapshot = std::fs::read(&self.config.path)?;
        if snapshot.is_empty() {
            return Err(SandboxError::Engine(format!(
                "snapshot at {} is empty",
                self.config.path.display()
            )));
        }

        tracing::info!(
            path = %self.config.path.display(),
            size_kb = snapshot.len() / 1024,
            "Snapshot loaded"
        );

        Ok(snapshot)
    }

    /// Load the snapshot if the file exists
    pub fn load_if_exists(&self) -> Result<Option<Vec<u8>>> {
        if self.exists() {
            Ok(Some(self.load()?))
        } else {
            Ok(None)
        }
    }

    /// The snapshot as the `'static` bytes the engine requires.
    ///
    /// Each file is read once per process; later calls for the same path
    /// return the same bytes, even if the file has changed since.
    pub(crate) fn load_static(&self) -> Result<&'static [u8]> {
        let key = self
            .config
            .path
            .canonicalize()
            .unwrap_or_else(|_| self.config.path.clone());
        let mut loaded = LOADED.get_or_init(|| Mutex::new(HashMap::new())).lock();

        if let Some(&bytes) = loaded.get(&key) {
            tracing::debug!(path = %key.display(), "Reusing loaded snapshot");
            return Ok(bytes);
        }

        let bytes: &'static [u8] = Box::leak(self.load()?.into_boxed_slice());
        loaded.insert(key, bytes);
        Ok(bytes)
    }
}
