//! Resolver: finds, pulls, builds and pushes models.
//!
//! A model can come from the local daemon, a remote registry, or a fresh
//! build. Lookups fall back from one source to the other only when the
//! first source reports "not found"; every other failure surfaces as is.

use std::path::PathBuf;
use std::sync::Arc;

use cog_core::config::ProjectConfig;
use cog_core::error::{CogError, Result};
use cog_core::settings::ModelFormat;
use tokio_util::sync::CancellationToken;

use crate::artifact::{Artifact, ArtifactKind, ArtifactSpec, Builder, ImageArtifact, ImageSpec, ModelSource, WeightSpec};
use crate::docker::{DockerClient, ImageInspect};
use crate::image_builder::{Factory, ImageBuilder};
use crate::labels::ModelLabels;
use crate::model::{Model, ModelIndex};
use crate::oci::{Descriptor, Platform};
use crate::pusher::{BundlePusher, PushOptions, Pusher, StandalonePusher};
use crate::reference::ParsedRef;
use crate::registry::RegistryClient;
use crate::weights::WeightBuilder;

/// Error text that daemons and registries use for a missing image.
const NOT_FOUND_PATTERNS: &[&str] = &[
    "no such image",
    "manifest unknown",
    "manifest_unknown",
    "name unknown",
    "name_unknown",
    "not found",
];

/// Which sources a lookup may consult, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourcePolicy {
    LocalOnly,
    RemoteOnly,
    PreferLocal,
    #[default]
    PreferRemote,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub policy: SourcePolicy,
    pub platform: Platform,
}

/// Inputs for [`Resolver::build`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub project_dir: PathBuf,
    pub image_name: String,
    pub secrets: Vec<String>,
    pub no_cache: bool,
    pub dockerfile: Option<PathBuf>,
    pub format: ModelFormat,
    pub config: ProjectConfig,
    /// Rehash weight files even when the lock has a matching entry
    pub always_hash: bool,
}

/// Whether `err` means the image does not exist at the queried source.
///
/// Context wrappers are stripped first so that wrapping text never
/// influences the decision. Cancellation is never "not found".
pub fn is_not_found(err: &CogError) -> bool {
    match err.root() {
        CogError::NotFound { .. } => true,
        CogError::Docker { message, .. } | CogError::RegistryError { message, .. } => {
            let message = message.to_lowercase();
            NOT_FOUND_PATTERNS.iter().any(|p| message.contains(p))
        }
        _ => false,
    }
}

/// Entry point for model lookup, build and push.
pub struct Resolver {
    docker: Arc<dyn DockerClient>,
    registry: Arc<dyn RegistryClient>,
    factory: Arc<dyn Factory>,
    cog_version: String,
}

impl Resolver {
    pub fn new(
        docker: Arc<dyn DockerClient>,
        registry: Arc<dyn RegistryClient>,
        factory: Arc<dyn Factory>,
    ) -> Self {
        Self {
            docker,
            registry,
            factory,
            cog_version: crate::VERSION.to_string(),
        }
    }

    /// Override the version stamped on built images and weights.
    pub fn with_cog_version(mut self, version: impl Into<String>) -> Self {
        self.cog_version = version.into();
        self
    }

    /// Find a model by reference under `options.policy`.
    pub async fn inspect(
        &self,
        cancel: &CancellationToken,
        reference: &str,
        options: &ResolveOptions,
    ) -> Result<Model> {
        let parsed = ParsedRef::parse(reference)?;

        let result = match options.policy {
            SourcePolicy::LocalOnly => self.load_local(cancel, &parsed).await,
            SourcePolicy::RemoteOnly => self.load_remote(cancel, &parsed, &options.platform).await,
            SourcePolicy::PreferLocal => match self.load_local(cancel, &parsed).await {
                Err(e) if is_not_found(&e) => {
                    tracing::debug!(reference = %parsed, error = %e, "Not found locally, trying registry");
                    self.load_remote(cancel, &parsed, &options.platform).await
                }
                other => other,
            },
            SourcePolicy::PreferRemote => {
                match self.load_remote(cancel, &parsed, &options.platform).await {
                    Err(e) if is_not_found(&e) => {
                        tracing::debug!(reference = %parsed, error = %e, "Not found in registry, trying local");
                        self.load_local(cancel, &parsed).await
                    }
                    other => other,
                }
            }
        };

        result.map_err(|e| {
            if is_not_found(&e) {
                CogError::NotFound {
                    reference: parsed.original().to_string(),
                }
            } else {
                e
            }
        })
    }

    /// Load a model from the daemon by image id. No fallback.
    pub async fn inspect_by_id(&self, cancel: &CancellationToken, id: &str) -> Result<Model> {
        let inspect = self
            .docker
            .inspect(cancel, id)
            .await
            .map_err(|e| CogError::context(format!("failed to inspect local image {}", id), e))?;
        Model::from_image(local_image(id, None, inspect, ModelSource::Local))
    }

    /// Make a model available locally, pulling it only if the daemon does
    /// not have it. A local image that is not a model is never re-pulled.
    pub async fn pull(&self, cancel: &CancellationToken, reference: &str) -> Result<Model> {
        let parsed = ParsedRef::parse(reference)?;

        match self.load_local(cancel, &parsed).await {
            Err(e) if is_not_found(&e) => {}
            other => return other,
        }

        tracing::info!(reference = %parsed, "Pulling model");
        let inspect = self
            .docker
            .pull(cancel, parsed.original(), false)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    CogError::NotFound {
                        reference: parsed.original().to_string(),
                    }
                } else {
                    CogError::context(format!("failed to pull {}", parsed), e)
                }
            })?;
        Model::from_image(local_image(parsed.original(), Some(&parsed), inspect, ModelSource::Remote))
    }

    /// Build the image and, for bundle models, every declared weight.
    pub async fn build(&self, cancel: &CancellationToken, options: &BuildOptions) -> Result<Model> {
        let spec = ArtifactSpec::Image(ImageSpec {
            name: "model".to_string(),
            image_name: options.image_name.clone(),
            secrets: options.secrets.clone(),
            no_cache: options.no_cache,
            dockerfile: options.dockerfile.clone(),
            labels: ModelLabels::for_build(&options.config, &self.cog_version)?,
        });

        let image_builder = ImageBuilder::new(
            Arc::clone(&self.factory),
            Arc::clone(&self.docker),
            options.project_dir.clone(),
        );
        let image = match image_builder.build(cancel, &spec).await? {
            Artifact::Image(image) => image,
            other => {
                return Err(CogError::ArtifactTypeMismatch {
                    builder: "image",
                    expected: ArtifactKind::Image.as_str(),
                    found: other.kind().as_str(),
                })
            }
        };

        let mut model = Model::from_image(image)?;
        model.format = options.format;

        let weight_specs = WeightSpec::from_config(&options.config);
        if options.format == ModelFormat::Bundle && !weight_specs.is_empty() {
            let weight_builder = WeightBuilder::new(&options.project_dir, &self.cog_version)
                .always_hash(options.always_hash);
            for spec in weight_specs {
                let artifact = weight_builder.build(cancel, &ArtifactSpec::Weight(spec)).await?;
                model.push_artifact(artifact)?;
            }
        }

        tracing::info!(
            image = %options.image_name,
            format = %model.format,
            weights = model.weight_artifacts().len(),
            "Built model"
        );
        Ok(model)
    }

    /// Push a model using the strategy its format requires.
    pub async fn push(
        &self,
        cancel: &CancellationToken,
        model: &Model,
        options: &PushOptions,
    ) -> Result<()> {
        match model.format {
            ModelFormat::Bundle => {
                BundlePusher::new(Arc::clone(&self.docker), Arc::clone(&self.registry))
                    .push(cancel, model, options)
                    .await
            }
            ModelFormat::Standalone => {
                StandalonePusher::new(Arc::clone(&self.docker))
                    .push(cancel, model, options)
                    .await
            }
        }
    }

    async fn load_local(&self, cancel: &CancellationToken, reference: &ParsedRef) -> Result<Model> {
        let inspect = self
            .docker
            .inspect(cancel, reference.original())
            .await
            .map_err(|e| CogError::context(format!("failed to inspect local image {}", reference), e))?;
        Model::from_image(local_image(
            reference.original(),
            Some(reference),
            inspect,
            ModelSource::Local,
        ))
    }

    async fn load_remote(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        platform: &Platform,
    ) -> Result<Model> {
        let manifest = self
            .registry
            .inspect(cancel, reference, Some(platform))
            .await
            .map_err(|e| CogError::context(format!("failed to inspect remote image {}", reference), e))?;

        if !manifest.is_index() {
            let mut descriptor = Descriptor::new(manifest.media_type, manifest.digest.clone(), manifest.size);
            descriptor.platform = manifest.platform.clone();
            return Model::from_image(ImageArtifact {
                reference: reference.original().to_string(),
                digest: manifest.digest,
                labels: manifest.labels,
                platform: manifest.platform,
                source: ModelSource::Remote,
                descriptor: Some(descriptor),
            });
        }

        let index = ModelIndex::new(manifest.digest.clone(), manifest.media_type.clone(), &manifest.manifests);
        let entry = index.image_manifest(Some(platform)).cloned().ok_or_else(|| {
            CogError::OciError(format!(
                "index {} has no image for platform {}",
                reference, platform
            ))
        })?;

        let mut descriptor = Descriptor::new(entry.media_type.clone(), entry.digest.clone(), entry.size);
        descriptor.platform = entry.platform.clone();
        let mut model = Model::from_image(ImageArtifact {
            reference: reference.original().to_string(),
            digest: entry.digest,
            labels: manifest.labels,
            platform: entry.platform,
            source: ModelSource::Remote,
            descriptor: Some(descriptor),
        })?;

        if index.weights_manifest().is_some() {
            model.format = ModelFormat::Bundle;
        }
        tracing::debug!(
            reference = %reference,
            index = %index.digest,
            entries = index.manifests.len(),
            "Resolved model index"
        );
        model.index = Some(index);
        Ok(model)
    }
}

fn local_image(
    reference: &str,
    parsed: Option<&ParsedRef>,
    inspect: ImageInspect,
    source: ModelSource,
) -> ImageArtifact {
    let digest = parsed
        .and_then(|r| inspect.repo_digest(r))
        .unwrap_or_else(|| inspect.id.clone());
    ImageArtifact {
        reference: reference.to_string(),
        digest,
        platform: inspect.platform(),
        labels: inspect.labels,
        source,
        descriptor: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found_sentinel() {
        assert!(is_not_found(&CogError::NotFound {
            reference: "x".to_string()
        }));
    }

    #[test]
    fn test_is_not_found_daemon_and_registry_text() {
        assert!(is_not_found(&CogError::Docker {
            command: "image".to_string(),
            message: "Error: No such image: r8.im/acme/llama".to_string(),
        }));
        assert!(is_not_found(&CogError::RegistryError {
            registry: "r8.im".to_string(),
            message: "failed to fetch manifest: MANIFEST_UNKNOWN".to_string(),
        }));
        assert!(is_not_found(&CogError::RegistryError {
            registry: "r8.im".to_string(),
            message: "NAME_UNKNOWN: repository name not known to registry".to_string(),
        }));
    }

    #[test]
    fn test_is_not_found_ignores_wrapping_text() {
        let err = CogError::context(
            "image not found in cache, lookup failed",
            CogError::Docker {
                command: "image".to_string(),
                message: "connection refused".to_string(),
            },
        );
        assert!(!is_not_found(&err));

        let wrapped = CogError::context(
            "failed to inspect local image foo",
            CogError::NotFound {
                reference: "foo".to_string(),
            },
        );
        assert!(is_not_found(&wrapped));
    }

    #[test]
    fn test_cancellation_is_not_not_found() {
        let err = CogError::Cancelled("image not found".to_string());
        assert!(!is_not_found(&err));
    }

    #[test]
    fn test_default_policy() {
        assert_eq!(SourcePolicy::default(), SourcePolicy::PreferRemote);
    }
}
