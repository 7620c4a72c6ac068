//! Image builder: produces a model image through a build backend, then
//! inspects the result through the daemon.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cog_core::error::{CogError, Result};
use tokio_util::sync::CancellationToken;

use crate::artifact::{Artifact, ArtifactKind, ArtifactSpec, Builder, ImageArtifact, ImageSpec, ModelSource};
use crate::cancel;
use crate::docker::{DockerCli, DockerClient};
use crate::reference::ParsedRef;

/// Build backend that turns a project directory into an image.
#[async_trait]
pub trait Factory: Send + Sync {
    /// Build `spec` from `project_dir`. The returned artifact's `digest`
    /// may be empty if the backend cannot report one.
    async fn build(
        &self,
        cancel: &CancellationToken,
        project_dir: &Path,
        spec: &ImageSpec,
    ) -> Result<ImageArtifact>;
}

/// [`Factory`] that runs `docker build` against the project's Dockerfile.
#[derive(Debug, Clone, Default)]
pub struct DockerBuildFactory {
    docker: DockerCli,
}

impl DockerBuildFactory {
    pub fn new(docker: DockerCli) -> Self {
        Self { docker }
    }

    fn build_args(project_dir: &Path, spec: &ImageSpec, iid_file: &Path) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--tag".to_string(),
            spec.image_name.clone(),
            "--iidfile".to_string(),
            iid_file.display().to_string(),
        ];
        if let Some(ref dockerfile) = spec.dockerfile {
            args.push("--file".to_string());
            args.push(project_dir.join(dockerfile).display().to_string());
        }
        if spec.no_cache {
            args.push("--no-cache".to_string());
        }
        for secret in &spec.secrets {
            args.push("--secret".to_string());
            args.push(secret.clone());
        }
        // Sorted so identical specs produce identical command lines.
        let labels: BTreeMap<_, _> = spec.labels.iter().collect();
        for (key, value) in labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(project_dir.display().to_string());
        args
    }
}

#[async_trait]
impl Factory for DockerBuildFactory {
    async fn build(
        &self,
        cancel: &CancellationToken,
        project_dir: &Path,
        spec: &ImageSpec,
    ) -> Result<ImageArtifact> {
        let scratch = tempfile::TempDir::new()
            .map_err(|e| CogError::context("failed to create build scratch directory", e.into()))?;
        let iid_file = scratch.path().join("iid");
        let args = Self::build_args(project_dir, spec, &iid_file);

        tracing::info!(image = %spec.image_name, dir = %project_dir.display(), "Building image");
        self.docker.run(cancel, &args).await?;

        let image_id = tokio::fs::read_to_string(&iid_file)
            .await
            .map_err(|e| CogError::context("failed to read built image id", e.into()))?;

        Ok(ImageArtifact {
            reference: spec.image_name.clone(),
            digest: image_id.trim().to_string(),
            labels: spec.labels.clone(),
            platform: None,
            source: ModelSource::Build,
            descriptor: None,
        })
    }
}

/// Turns [`ImageSpec`]s into inspected [`ImageArtifact`]s.
pub struct ImageBuilder {
    factory: Arc<dyn Factory>,
    docker: Arc<dyn DockerClient>,
    project_dir: PathBuf,
}

impl ImageBuilder {
    pub fn new(
        factory: Arc<dyn Factory>,
        docker: Arc<dyn DockerClient>,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            factory,
            docker,
            project_dir: project_dir.into(),
        }
    }

    pub async fn build_image(
        &self,
        cancel: &CancellationToken,
        spec: &ImageSpec,
    ) -> Result<ImageArtifact> {
        cancel::check(cancel, &format!("building image {}", spec.image_name))?;

        let built = self
            .factory
            .build(cancel, &self.project_dir, spec)
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    e
                } else {
                    CogError::ImageBuild {
                        image: spec.image_name.clone(),
                        source: Box::new(e),
                    }
                }
            })?;

        let inspect_key = if built.digest.is_empty() {
            built.reference.as_str()
        } else {
            built.digest.as_str()
        };
        tracing::debug!(image = %spec.image_name, key = %inspect_key, "Inspecting built image");

        let inspect = self.docker.inspect(cancel, inspect_key).await.map_err(|e| {
            if e.is_cancelled() {
                e
            } else {
                CogError::ImageInspect {
                    image: spec.image_name.clone(),
                    source: Box::new(e),
                }
            }
        })?;

        let digest = ParsedRef::parse(&built.reference)
            .ok()
            .and_then(|r| inspect.repo_digest(&r))
            .unwrap_or_else(|| inspect.id.clone());

        tracing::info!(image = %built.reference, digest = %digest, "Built image");

        Ok(ImageArtifact {
            reference: built.reference,
            digest,
            platform: inspect.platform(),
            labels: inspect.labels,
            source: ModelSource::Build,
            descriptor: None,
        })
    }
}

#[async_trait]
impl Builder for ImageBuilder {
    async fn build(&self, cancel: &CancellationToken, spec: &ArtifactSpec) -> Result<Artifact> {
        match spec {
            ArtifactSpec::Image(image) => Ok(Artifact::Image(self.build_image(cancel, image).await?)),
            other => Err(CogError::ArtifactTypeMismatch {
                builder: "image",
                expected: ArtifactKind::Image.as_str(),
                found: other.kind().as_str(),
            }),
        }
    }
}
