//! Push strategies.
//!
//! [`StandalonePusher`] pushes the model image as is. [`BundlePusher`]
//! pushes the image, uploads each weight as its own artifact image, then
//! ties them together with an OCI index under the image's tag.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cog_core::error::{CogError, Result};
use cog_core::settings::{LayerCompression, DEFAULT_PUSH_CONCURRENCY};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::artifact::WeightArtifact;
use crate::docker::DockerClient;
use crate::model::Model;
use crate::oci::{build_weights_artifact, Descriptor, IndexBuilder, Platform};
use crate::reference::ParsedRef;
use crate::registry::RegistryClient;
use crate::weights::{WeightFile, WeightsLock};

/// Options for a push.
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Backing file per weight name; falls back to the artifact's own path
    pub file_paths: HashMap<String, PathBuf>,
    pub compression: LayerCompression,
    /// Maximum concurrent weight uploads
    pub concurrency: usize,
    /// Platform recorded for the image when the image does not report one
    pub platform: Platform,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            file_paths: HashMap::new(),
            compression: LayerCompression::None,
            concurrency: DEFAULT_PUSH_CONCURRENCY,
            platform: Platform::default(),
        }
    }
}

/// A push strategy.
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn push(&self, cancel: &CancellationToken, model: &Model, options: &PushOptions) -> Result<()>;
}

fn require_image(model: &Model) -> Result<&crate::artifact::ImageArtifact> {
    model
        .image_artifact()
        .ok_or_else(|| CogError::Other("model has no image artifact to push".to_string()))
}

/// Pushes the model image through the daemon.
pub struct StandalonePusher {
    docker: Arc<dyn DockerClient>,
}

impl StandalonePusher {
    pub fn new(docker: Arc<dyn DockerClient>) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl Pusher for StandalonePusher {
    async fn push(&self, cancel: &CancellationToken, model: &Model, _options: &PushOptions) -> Result<()> {
        let image = require_image(model)?;
        self.docker.push(cancel, &image.reference).await
    }
}

/// Pushes a model as an OCI index of image plus weights artifacts.
pub struct BundlePusher {
    docker: Arc<dyn DockerClient>,
    registry: Arc<dyn RegistryClient>,
}

impl BundlePusher {
    pub fn new(docker: Arc<dyn DockerClient>, registry: Arc<dyn RegistryClient>) -> Self {
        Self { docker, registry }
    }

    /// Upload every weight artifact, bounded by `options.concurrency`.
    ///
    /// Returns descriptors in the order of `weights`. The first failure
    /// aborts the remaining uploads.
    async fn push_weights(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        weights: &[&WeightArtifact],
        options: &PushOptions,
    ) -> Result<Vec<Descriptor>> {
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let uploads = cancel.child_token();
        let mut tasks = JoinSet::new();

        for (i, weight) in weights.iter().enumerate() {
            let path = options
                .file_paths
                .get(&weight.name)
                .cloned()
                .unwrap_or_else(|| weight.file_path.clone());
            let weight = (*weight).clone();
            let name = weight.name.clone();
            let compression = options.compression;
            let registry = Arc::clone(&self.registry);
            let reference = reference.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = uploads.clone();

            tasks.spawn(async move {
                let result = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| CogError::Other(format!("upload queue closed: {}", e)))?;
                    push_weight(&cancel, registry.as_ref(), &reference, &weight, path, compression).await
                }
                .await;
                (i, name, result)
            });
        }

        let mut descriptors: Vec<Option<Descriptor>> = vec![None; weights.len()];
        while let Some(joined) = tasks.join_next().await {
            let (i, name, result) = joined
                .map_err(|e| CogError::Other(format!("weight upload task failed: {}", e)))?;
            match result {
                Ok(descriptor) => descriptors[i] = Some(descriptor),
                Err(e) => {
                    uploads.cancel();
                    tasks.abort_all();
                    if e.is_cancelled() {
                        return Err(e);
                    }
                    return Err(CogError::WeightPush {
                        name,
                        source: Box::new(e),
                    });
                }
            }
        }

        descriptors
            .into_iter()
            .map(|d| d.ok_or_else(|| CogError::Other("weight upload did not complete".to_string())))
            .collect()
    }
}

/// Pack one weight file into an artifact image and upload it by digest.
///
/// The file is rehashed while packing; content that no longer matches the
/// digest recorded at build time is rejected before anything is uploaded.
async fn push_weight(
    cancel: &CancellationToken,
    registry: &dyn RegistryClient,
    reference: &ParsedRef,
    weight: &WeightArtifact,
    path: PathBuf,
    compression: LayerCompression,
) -> Result<Descriptor> {
    let name = weight.name.as_str();
    let mut lock = WeightsLock::new();
    lock.upsert(WeightFile {
        name: name.to_string(),
        dest: weight.target.clone(),
        digest_original: String::new(),
        digest: String::new(),
        size: 0,
        size_uncompressed: 0,
        media_type: String::new(),
    });
    let file_paths = HashMap::from([(name.to_string(), path)]);

    let pack_cancel = cancel.clone();
    let artifact = tokio::task::spawn_blocking(move || {
        build_weights_artifact(&pack_cancel, &lock, &file_paths, compression)
    })
    .await
    .map_err(|e| CogError::Other(format!("weight packing task failed: {}", e)))??;

    let packed = artifact
        .weights_manifest
        .files
        .first()
        .map(|f| f.digest_original.as_str())
        .unwrap_or_default();
    if packed != weight.descriptor.digest {
        return Err(CogError::Other(format!(
            "weight {} changed since it was built: expected {}, found {}",
            name, weight.descriptor.digest, packed
        )));
    }

    tracing::info!(
        name = %name,
        digest = %artifact.digest,
        reference = %reference,
        "Pushing weights artifact"
    );
    registry
        .push_image(cancel, &reference.with_digest(&artifact.digest), &artifact)
        .await
}

#[async_trait]
impl Pusher for BundlePusher {
    async fn push(&self, cancel: &CancellationToken, model: &Model, options: &PushOptions) -> Result<()> {
        let image = require_image(model)?;
        let reference = ParsedRef::parse(&image.reference)?;

        self.docker.push(cancel, &image.reference).await?;

        let image_descriptor = self
            .registry
            .get_descriptor(cancel, &reference)
            .await
            .map_err(|e| CogError::context(format!("failed to fetch descriptor of {}", reference), e))?;

        let weights = model.weight_artifacts();
        let weight_descriptors = self.push_weights(cancel, &reference, &weights, options).await?;

        let platform = image.platform.clone().unwrap_or_else(|| options.platform.clone());
        let mut builder = IndexBuilder::new().model_image(image_descriptor, platform);
        for descriptor in weight_descriptors {
            builder = builder.weights_artifact(descriptor);
        }
        let index = builder.build()?;

        let pushed = self.registry.push_index(cancel, &reference, &index).await?;
        tracing::info!(
            reference = %reference,
            digest = %pushed.digest,
            weights = weights.len(),
            "Pushed model bundle"
        );
        Ok(())
    }
}
