//! Weight builder: hashes declared weight files through the lock cache.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use cog_core::error::{CogError, Result};
use tokio_util::sync::CancellationToken;

use super::lock::{WeightFile, WeightsLock, WEIGHTS_LOCK_FILE};
use crate::artifact::{
    Artifact, ArtifactKind, ArtifactSpec, Builder, WeightArtifact, WeightConfig, WeightSpec,
    WEIGHT_CONFIG_SCHEMA_VERSION,
};
use crate::cancel;
use crate::digest::sha256_file_cancellable;
use crate::oci::{Descriptor, MEDIA_TYPE_WEIGHT_LAYER};

/// Turns [`WeightSpec`]s into [`WeightArtifact`]s.
pub struct WeightBuilder {
    project_dir: PathBuf,
    lock_path: PathBuf,
    cog_version: String,
    always_hash: bool,
}

impl WeightBuilder {
    /// Builder for a project, using `<project_dir>/weights.lock`.
    pub fn new(project_dir: impl Into<PathBuf>, cog_version: impl Into<String>) -> Self {
        let project_dir = project_dir.into();
        let lock_path = project_dir.join(WEIGHTS_LOCK_FILE);
        Self {
            project_dir,
            lock_path,
            cog_version: cog_version.into(),
            always_hash: false,
        }
    }

    /// Use a lock file at a different location.
    pub fn with_lock_path(mut self, lock_path: impl Into<PathBuf>) -> Self {
        self.lock_path = lock_path.into();
        self
    }

    /// Ignore `(name, size)` cache hits and rehash every file.
    pub fn always_hash(mut self, always_hash: bool) -> Self {
        self.always_hash = always_hash;
        self
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Hash one weight file and record it in the lock.
    pub async fn build_weight(
        &self,
        cancel: &CancellationToken,
        spec: &WeightSpec,
    ) -> Result<WeightArtifact> {
        cancel::check(cancel, &format!("building weight {}", spec.name))?;

        let file_path = self.project_dir.join(&spec.source);
        let metadata = match tokio::fs::metadata(&file_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CogError::WeightSourceNotFound(file_path));
            }
            Err(e) => {
                return Err(CogError::context(
                    format!("failed to stat weight {}", file_path.display()),
                    e.into(),
                ));
            }
        };
        if !metadata.is_file() {
            return Err(CogError::ConfigError(format!(
                "weight source {} is not a regular file",
                file_path.display()
            )));
        }
        let file_size = metadata.len();

        let mut lock = WeightsLock::load_or_default(&self.lock_path)?;

        let cached = if self.always_hash {
            None
        } else {
            lock.find_cached_entry(&spec.name, file_size)
                .map(|entry| (entry.digest_original.clone(), entry.size_uncompressed))
        };

        let (digest, size) = match cached {
            Some(hit) => {
                tracing::debug!(name = %spec.name, digest = %hit.0, "Weight cache hit");
                hit
            }
            None => {
                tracing::info!(
                    name = %spec.name,
                    path = %file_path.display(),
                    size = file_size,
                    "Hashing weight file"
                );
                sha256_file_cancellable(cancel, &file_path).await?
            }
        };

        lock.upsert(WeightFile {
            name: spec.name.clone(),
            dest: spec.target.clone(),
            digest_original: digest.clone(),
            digest: digest.clone(),
            size,
            size_uncompressed: size,
            media_type: MEDIA_TYPE_WEIGHT_LAYER.to_string(),
        });
        lock.save(&self.lock_path)?;

        Ok(WeightArtifact {
            name: spec.name.clone(),
            descriptor: Descriptor::new(MEDIA_TYPE_WEIGHT_LAYER, digest, size),
            file_path,
            target: spec.target.clone(),
            config: WeightConfig {
                schema_version: WEIGHT_CONFIG_SCHEMA_VERSION.to_string(),
                cog_version: self.cog_version.clone(),
                name: spec.name.clone(),
                target: spec.target.clone(),
                created: Utc::now(),
            },
        })
    }
}

#[async_trait]
impl Builder for WeightBuilder {
    async fn build(&self, cancel: &CancellationToken, spec: &ArtifactSpec) -> Result<Artifact> {
        match spec {
            ArtifactSpec::Weight(weight) => Ok(Artifact::Weight(self.build_weight(cancel, weight).await?)),
            other => Err(CogError::ArtifactTypeMismatch {
                builder: "weight",
                expected: ArtifactKind::Weight.as_str(),
                found: other.kind().as_str(),
            }),
        }
    }
}
