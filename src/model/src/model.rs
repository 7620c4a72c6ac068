//! The resolver's output: a model image plus its weight artifacts.

use std::collections::BTreeMap;

use cog_core::config::ProjectConfig;
use cog_core::error::{CogError, Result};
use cog_core::settings::ModelFormat;
use serde::Serialize;

use crate::artifact::{Artifact, ImageArtifact, ModelSource, WeightArtifact};
use crate::labels::ModelLabels;
use crate::oci::{Descriptor, Platform, ANNOTATION_REFERENCE_TYPE, REFERENCE_TYPE_WEIGHTS};

/// Role of an index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Image,
    Weights,
}

/// One entry of a model index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexManifest {
    pub digest: String,
    pub media_type: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    pub kind: ManifestKind,
}

impl From<&Descriptor> for IndexManifest {
    fn from(desc: &Descriptor) -> Self {
        let kind = if desc.annotation(ANNOTATION_REFERENCE_TYPE) == Some(REFERENCE_TYPE_WEIGHTS) {
            ManifestKind::Weights
        } else {
            ManifestKind::Image
        };
        Self {
            digest: desc.digest.clone(),
            media_type: desc.media_type.clone(),
            size: desc.size,
            platform: desc.platform.clone(),
            annotations: desc.annotations.clone().unwrap_or_default(),
            kind,
        }
    }
}

/// Projection of a multi-manifest OCI index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelIndex {
    pub digest: String,
    pub media_type: String,
    pub manifests: Vec<IndexManifest>,
}

impl ModelIndex {
    pub fn new(digest: impl Into<String>, media_type: impl Into<String>, entries: &[Descriptor]) -> Self {
        Self {
            digest: digest.into(),
            media_type: media_type.into(),
            manifests: entries.iter().map(IndexManifest::from).collect(),
        }
    }

    /// The runnable image entry for `platform`, or the first runnable entry
    /// if no platform is given. Entries with the synthetic unknown platform
    /// are never selected.
    pub fn image_manifest(&self, platform: Option<&Platform>) -> Option<&IndexManifest> {
        let mut runnable = self.manifests.iter().filter(|m| {
            m.kind == ManifestKind::Image
                && !m.platform.as_ref().map(Platform::is_unknown).unwrap_or(false)
        });
        match platform {
            Some(wanted) => runnable
                .find(|m| m.platform.as_ref().map(|p| p.matches(wanted)).unwrap_or(false)),
            None => runnable.next(),
        }
    }

    /// The weights artifact entry, if any.
    pub fn weights_manifest(&self) -> Option<&IndexManifest> {
        self.manifests.iter().find(|m| m.kind == ManifestKind::Weights)
    }
}

/// A resolved or built model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Model {
    /// At most one image, then zero or more weights
    pub artifacts: Vec<Artifact>,
    pub config: ProjectConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cog_version: Option<String>,
    pub format: ModelFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<ModelIndex>,
}

impl Model {
    /// Hydrate a model from an image's labels.
    ///
    /// Fails with [`CogError::NotCogModel`] if the configuration label is
    /// absent; malformed labels are serialization errors.
    pub fn from_image(image: ImageArtifact) -> Result<Self> {
        let labels = ModelLabels::from_labels(&image.labels);
        let config = match labels.project_config() {
            Some(config) => config.map_err(|e| {
                CogError::context(format!("invalid configuration label on {}", image.reference), e)
            })?,
            None => {
                return Err(CogError::NotCogModel {
                    reference: image.reference.clone(),
                })
            }
        };
        let schema = labels.schema()?;

        Ok(Self {
            artifacts: vec![Artifact::Image(image)],
            config,
            schema,
            cog_version: labels.version,
            format: ModelFormat::Standalone,
            index: None,
        })
    }

    /// The image artifact, if present.
    pub fn image_artifact(&self) -> Option<&ImageArtifact> {
        self.artifacts.iter().find_map(Artifact::as_image)
    }

    /// All weight artifacts, in build order.
    pub fn weight_artifacts(&self) -> Vec<&WeightArtifact> {
        self.artifacts.iter().filter_map(Artifact::as_weight).collect()
    }

    /// Where the image came from.
    pub fn source(&self) -> Option<ModelSource> {
        self.image_artifact().map(|i| i.source)
    }

    /// Append an artifact. A second image artifact is rejected.
    pub fn push_artifact(&mut self, artifact: Artifact) -> Result<()> {
        if artifact.as_image().is_some() && self.image_artifact().is_some() {
            return Err(CogError::Other(
                "model already has an image artifact".to_string(),
            ));
        }
        self.artifacts.push(artifact);
        Ok(())
    }

    /// Whether this model is packaged (or loaded) as an OCI index.
    pub fn is_oci_index(&self) -> bool {
        self.format == ModelFormat::Bundle || self.index.is_some()
    }
}
