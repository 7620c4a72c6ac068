//! Artifact model.
//!
//! An [`ArtifactSpec`] says what to build; a [`Builder`] turns it into an
//! [`Artifact`]. Both are closed sum types so every consumer matches
//! exhaustively over the image and weight variants.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cog_core::config::ProjectConfig;
use cog_core::error::Result;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::oci::{Descriptor, Platform};

/// Schema version stamped into every [`WeightConfig`].
pub const WEIGHT_CONFIG_SCHEMA_VERSION: &str = "1.0";

/// Artifact type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Weight,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Weight => "weight",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What image to build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSpec {
    /// Artifact name within the model
    pub name: String,
    /// Tag to apply to the built image
    pub image_name: String,
    /// Build secrets, in `docker build --secret` syntax
    pub secrets: Vec<String>,
    pub no_cache: bool,
    /// Dockerfile relative to the project; defaults to `Dockerfile`
    pub dockerfile: Option<PathBuf>,
    /// Extra labels to stamp on the image
    pub labels: HashMap<String, String>,
}

/// What weight file to hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightSpec {
    /// Logical name
    pub name: String,
    /// Path relative to the project directory
    pub source: PathBuf,
    /// Mount path inside the container
    pub target: String,
}

impl WeightSpec {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            target: target.into(),
        }
    }

    /// Specs for every weight declared in the project configuration.
    pub fn from_config(config: &ProjectConfig) -> Vec<WeightSpec> {
        config
            .weights
            .iter()
            .map(|w| WeightSpec::new(w.logical_name(), w.source.clone(), w.target.clone()))
            .collect()
    }
}

/// Build request for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSpec {
    Image(ImageSpec),
    Weight(WeightSpec),
}

impl ArtifactSpec {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Image(_) => ArtifactKind::Image,
            Self::Weight(_) => ArtifactKind::Weight,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Image(spec) => &spec.name,
            Self::Weight(spec) => &spec.name,
        }
    }
}

/// Where a model's image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    Local,
    Remote,
    Build,
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
            Self::Build => write!(f, "build"),
        }
    }
}

/// A runnable model image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageArtifact {
    /// Human reference, as given or as tagged at build time
    pub reference: String,
    /// Registry digest, or the local image id when the image was never pushed
    pub digest: String,
    pub labels: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    pub source: ModelSource,
    /// Registry descriptor, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
}

/// Metadata recorded for a built weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightConfig {
    pub schema_version: String,
    pub cog_version: String,
    pub name: String,
    pub target: String,
    pub created: DateTime<Utc>,
}

/// A hashed weight file, ready to be packed into a weights artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightArtifact {
    pub name: String,
    pub descriptor: Descriptor,
    /// Absolute path of the backing file
    pub file_path: PathBuf,
    pub target: String,
    pub config: WeightConfig,
}

/// A built or resolved artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Artifact {
    Image(ImageArtifact),
    Weight(WeightArtifact),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Image(_) => ArtifactKind::Image,
            Self::Weight(_) => ArtifactKind::Weight,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Image(image) => &image.reference,
            Self::Weight(weight) => &weight.name,
        }
    }

    /// Content descriptor. `None` for an image that has no registry
    /// descriptor yet, such as one only present in the local daemon.
    pub fn descriptor(&self) -> Option<&Descriptor> {
        match self {
            Self::Image(image) => image.descriptor.as_ref(),
            Self::Weight(weight) => Some(&weight.descriptor),
        }
    }

    pub fn as_image(&self) -> Option<&ImageArtifact> {
        match self {
            Self::Image(image) => Some(image),
            Self::Weight(_) => None,
        }
    }

    pub fn as_weight(&self) -> Option<&WeightArtifact> {
        match self {
            Self::Weight(weight) => Some(weight),
            Self::Image(_) => None,
        }
    }
}

/// Produces one artifact per call.
///
/// Implementations reject specs of the wrong variant with
/// [`cog_core::CogError::ArtifactTypeMismatch`].
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(&self, cancel: &CancellationToken, spec: &ArtifactSpec) -> Result<Artifact>;
}
