//! OCI manifest, index and descriptor types.
//!
//! Maps are `BTreeMap` so serialized JSON (and therefore every manifest
//! digest) is deterministic.

use std::collections::BTreeMap;

use cog_core::error::{CogError, Result};
use serde::{Deserialize, Serialize};

use crate::digest::sha256_bytes;

pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Artifact type of a Cog weights manifest.
pub const ARTIFACT_TYPE_WEIGHTS: &str = "application/vnd.cog.weights.v1";
/// Config blob of a weights artifact (the serialized lock projection).
pub const MEDIA_TYPE_WEIGHTS_CONFIG: &str = "application/vnd.cog.weights.config.v1+json";
/// Uncompressed weight layer.
pub const MEDIA_TYPE_WEIGHT_LAYER: &str = "application/vnd.cog.weight.layer.v1";
/// Gzip-compressed weight layer.
pub const MEDIA_TYPE_WEIGHT_LAYER_GZIP: &str = "application/vnd.cog.weight.layer.v1+gzip";

pub const ANNOTATION_WEIGHT_NAME: &str = "vnd.cog.weight.name";
pub const ANNOTATION_WEIGHT_DEST: &str = "vnd.cog.weight.dest";
pub const ANNOTATION_WEIGHT_DIGEST_ORIGINAL: &str = "vnd.cog.weight.digest.original";
pub const ANNOTATION_WEIGHT_SIZE_UNCOMPRESSED: &str = "vnd.cog.weight.size.uncompressed";
pub const ANNOTATION_REFERENCE_TYPE: &str = "vnd.cog.reference.type";
pub const ANNOTATION_REFERENCE_DIGEST: &str = "vnd.cog.reference.digest";
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";

/// Value of [`ANNOTATION_REFERENCE_TYPE`] on weights manifests.
pub const REFERENCE_TYPE_WEIGHTS: &str = "weights";

/// Whether `media_type` names a manifest list / image index.
pub fn is_index_media_type(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_OCI_INDEX || media_type == MEDIA_TYPE_DOCKER_MANIFEST_LIST
}

/// Content descriptor: digest, size and media type, plus optional extras.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            artifact_type: None,
            platform: None,
            annotations: None,
        }
    }

    /// Descriptor for an in-memory blob.
    pub fn for_blob(media_type: impl Into<String>, data: &[u8]) -> Self {
        Self::new(media_type, sha256_bytes(data), data.len() as u64)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
    }
}

/// Target platform of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            variant: None,
        }
    }

    /// Synthetic platform marking a non-runnable artifact.
    pub fn unknown() -> Self {
        Self::new("unknown", "unknown")
    }

    pub fn is_unknown(&self) -> bool {
        self.os == "unknown" && self.architecture == "unknown"
    }

    /// Parse `os/arch[/variant]`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(os), Some(arch), variant, None) if !os.is_empty() && !arch.is_empty() => {
                Ok(Self {
                    architecture: arch.to_string(),
                    os: os.to_string(),
                    variant: variant.filter(|v| !v.is_empty()).map(str::to_string),
                })
            }
            _ => Err(CogError::ConfigError(format!(
                "invalid platform '{}': expected os/arch[/variant]",
                s
            ))),
        }
    }

    /// Whether this platform satisfies `wanted`; a missing variant matches any.
    pub fn matches(&self, wanted: &Platform) -> bool {
        self.os == wanted.os
            && self.architecture == wanted.architecture
            && (wanted.variant.is_none() || self.variant == wanted.variant)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new("linux", "amd64")
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// OCI image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ImageManifest {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// OCI image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ImageIndex {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
