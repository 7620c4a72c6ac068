//! Index builder: composes a model image and its weights artifacts into an
//! OCI image index.
//!
//! The image entry comes first and carries the real platform. Each weights
//! entry carries the synthetic `unknown/unknown` platform so runtimes never
//! select it, plus annotations pointing back at the image digest.

use cog_core::error::{CogError, Result};

use super::types::*;

/// Single-use builder for a model index.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    image: Option<Descriptor>,
    weights: Vec<Descriptor>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the runnable model image and its platform.
    pub fn model_image(mut self, mut descriptor: Descriptor, platform: Platform) -> Self {
        descriptor.platform = Some(platform);
        self.image = Some(descriptor);
        self
    }

    /// Attach a weights artifact manifest.
    pub fn weights_artifact(mut self, descriptor: Descriptor) -> Self {
        self.weights.push(descriptor);
        self
    }

    /// Build the index. Fails if no model image was set.
    pub fn build(self) -> Result<ImageIndex> {
        let image = self.image.ok_or_else(|| {
            CogError::OciError("index requires a model image".to_string())
        })?;

        let mut manifests = Vec::with_capacity(1 + self.weights.len());
        let image_digest = image.digest.clone();
        manifests.push(image);

        for mut weights in self.weights {
            weights.platform = Some(Platform::unknown());
            if weights.artifact_type.is_none() {
                weights.artifact_type = Some(ARTIFACT_TYPE_WEIGHTS.to_string());
            }
            weights.set_annotation(ANNOTATION_REFERENCE_TYPE, REFERENCE_TYPE_WEIGHTS);
            weights.set_annotation(ANNOTATION_REFERENCE_DIGEST, image_digest.clone());
            manifests.push(weights);
        }

        Ok(ImageIndex {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_OCI_INDEX.to_string()),
            manifests,
            annotations: None,
        })
    }
}
