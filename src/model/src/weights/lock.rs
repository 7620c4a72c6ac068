//! The weights lock: a build cache of previously hashed weight files.
//!
//! Stored as `weights.lock` (pretty-printed JSON) in the project directory.
//! Every save rewrites the whole file through a temporary sibling and a
//! rename. There is no file locking: concurrent builds of the same project
//! from separate processes are unsupported.
//!
//! Cache hits are decided by `(name, size)` alone, so a same-size edit to a
//! weight file is not detected unless the builder is told to always hash.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cog_core::error::{CogError, Result};
use serde::{Deserialize, Serialize};

/// File name of the lock inside the project directory.
pub const WEIGHTS_LOCK_FILE: &str = "weights.lock";

/// Current lock format version.
pub const WEIGHTS_LOCK_VERSION: &str = "1.0";

/// One hashed weight file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightFile {
    /// Logical handle, not a path
    pub name: String,
    /// Mount path inside the container
    pub dest: String,
    /// SHA-256 of the uncompressed bytes; stable across storage modes
    pub digest_original: String,
    /// SHA-256 of the stored blob (the OCI layer digest)
    pub digest: String,
    /// Stored blob size
    pub size: u64,
    #[serde(default)]
    pub size_uncompressed: u64,
    #[serde(default)]
    pub media_type: String,
}

/// Lock file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightsLock {
    pub version: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<WeightFile>,
}

/// Registry-facing projection of a lock, tied to the artifact that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightsManifest {
    pub version: String,
    pub created: DateTime<Utc>,
    /// Digest of the weights artifact manifest
    pub digest: String,
    pub files: Vec<WeightFile>,
}

impl Default for WeightsLock {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightsLock {
    /// Empty lock stamped with the current time.
    pub fn new() -> Self {
        Self {
            version: WEIGHTS_LOCK_VERSION.to_string(),
            created: Utc::now(),
            files: Vec::new(),
        }
    }

    /// Parse lock JSON. Unknown fields are ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Load a lock file.
    ///
    /// A missing file is an I/O error (see [`CogError::is_missing_file`]);
    /// use [`WeightsLock::load_or_default`] to treat it as an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            CogError::context(
                format!("failed to read weights lock {}", path.display()),
                e.into(),
            )
        })?;
        serde_json::from_slice(&data).map_err(|e| CogError::Lockfile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load a lock file, starting a fresh one if it does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.is_missing_file() => {
                tracing::debug!(path = %path.display(), "No weights lock yet, starting empty");
                Ok(Self::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Write the full lock to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut data = serde_json::to_vec_pretty(self)?;
        data.push(b'\n');

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CogError::context(
                    format!("failed to create directory {}", parent.display()),
                    e.into(),
                )
            })?;
        }

        let tmp_path = tmp_sibling(path);
        std::fs::write(&tmp_path, &data).map_err(|e| {
            CogError::context(
                format!("failed to write weights lock {}", tmp_path.display()),
                e.into(),
            )
        })?;
        std::fs::rename(&tmp_path, path).map_err(|e| {
            CogError::context(
                format!("failed to replace weights lock {}", path.display()),
                e.into(),
            )
        })?;

        tracing::debug!(path = %path.display(), files = self.files.len(), "Saved weights lock");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WeightFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Cached entry for `name` if its recorded uncompressed size is `size`.
    pub fn find_cached_entry(&self, name: &str, size: u64) -> Option<&WeightFile> {
        self.get(name).filter(|f| f.size_uncompressed == size)
    }

    /// Replace the entry with the same name, or append a new one.
    pub fn upsert(&mut self, file: WeightFile) {
        match self.files.iter_mut().find(|f| f.name == file.name) {
            Some(existing) => *existing = file,
            None => self.files.push(file),
        }
    }

    /// Project this lock for the registry, tagged with the artifact digest.
    pub fn to_manifest(&self, artifact_digest: impl Into<String>) -> WeightsManifest {
        WeightsManifest {
            version: self.version.clone(),
            created: self.created,
            digest: artifact_digest.into(),
            files: self.files.clone(),
        }
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| WEIGHTS_LOCK_FILE.into());
    name.push(".tmp");
    path.with_file_name(name)
}
