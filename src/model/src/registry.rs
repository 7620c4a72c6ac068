//! Container registry collaborator.
//!
//! [`RegistryClient`] is the seam used by the resolver and the bundle
//! pusher; [`OciRegistry`] implements it over `oci-distribution`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cog_core::error::{CogError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::{Client, Reference, RegistryOperation};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::cancel::run_cancellable;
use crate::credentials::RegistryAuth;
use crate::oci::{
    is_index_media_type, ArtifactImage, Descriptor, ImageIndex, ImageManifest, LayerBlob, Platform,
    MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_OCI_MANIFEST,
};
use crate::reference::ParsedRef;

const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_DOCKER_MANIFEST,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
];

/// Metadata for a remote manifest, without layer content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestResult {
    pub digest: String,
    pub media_type: String,
    pub size: u64,
    /// Config blob digest (image manifests only)
    pub config: Option<String>,
    /// Image labels. For an index, taken from the entry matching the
    /// requested platform, if one was requested and found.
    pub labels: HashMap<String, String>,
    pub platform: Option<Platform>,
    /// Index entries; empty for image manifests
    pub manifests: Vec<Descriptor>,
}

impl ManifestResult {
    pub fn is_index(&self) -> bool {
        is_index_media_type(&self.media_type)
    }
}

/// A resolved remote image manifest and its configuration labels.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteImage {
    pub digest: String,
    pub manifest: ImageManifest,
    pub labels: HashMap<String, String>,
    pub platform: Option<Platform>,
}

/// Operations on a remote registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch manifest metadata. For indexes, labels come from the entry
    /// matching `platform`.
    async fn inspect(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        platform: Option<&Platform>,
    ) -> Result<ManifestResult>;

    /// Fetch an image manifest, resolving indexes to `platform`.
    async fn get_image(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        platform: Option<&Platform>,
    ) -> Result<RemoteImage>;

    /// Descriptor (digest, size, media type) of whatever `reference` names.
    async fn get_descriptor(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
    ) -> Result<Descriptor>;

    /// Upload one layer blob into the repository of `reference`.
    async fn write_layer(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        layer: &LayerBlob,
    ) -> Result<()>;

    /// Upload an artifact image (layers, config, manifest).
    async fn push_image(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        image: &ArtifactImage,
    ) -> Result<Descriptor>;

    /// Upload an image index under `reference`.
    async fn push_index(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        index: &ImageIndex,
    ) -> Result<Descriptor>;
}

/// [`RegistryClient`] over `oci-distribution`.
#[derive(Clone)]
pub struct OciRegistry {
    client: Arc<Client>,
    auth: Option<RegistryAuth>,
}

impl Default for OciRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OciRegistry {
    /// Client resolving credentials per registry host.
    pub fn new() -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        };
        Self {
            client: Arc::new(Client::new(config)),
            auth: None,
        }
    }

    /// Client using fixed credentials for every registry.
    pub fn with_auth(auth: RegistryAuth) -> Self {
        Self {
            auth: Some(auth),
            ..Self::new()
        }
    }

    fn auth_for(&self, reference: &ParsedRef) -> RegistryAuth {
        self.auth
            .clone()
            .unwrap_or_else(|| RegistryAuth::for_registry(reference.registry()))
    }

    fn error(reference: &ParsedRef, message: String) -> CogError {
        CogError::RegistryError {
            registry: reference.registry().to_string(),
            message,
        }
    }

    async fn fetch_manifest(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
    ) -> Result<(Vec<u8>, String)> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(reference).to_oci_auth();
        tracing::debug!(reference = %reference, "Fetching manifest");

        run_cancellable(cancel, &format!("fetching manifest {}", reference), async {
            self.client
                .pull_manifest_raw(&oci_ref, &auth, ACCEPTED_MANIFEST_TYPES)
                .await
                .map_err(|e| Self::error(reference, format!("failed to fetch manifest: {}", e)))
        })
        .await
    }

    async fn fetch_config(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        config: &Descriptor,
    ) -> Result<ImageConfig> {
        let oci_ref = to_oci_reference(reference)?;
        let descriptor: OciDescriptor = serde_json::from_value(serde_json::json!({
            "mediaType": config.media_type,
            "digest": config.digest,
            "size": config.size,
        }))?;

        let mut data: Vec<u8> = Vec::new();
        run_cancellable(cancel, &format!("fetching config {}", config.digest), async {
            self.client
                .pull_blob(&oci_ref, &descriptor, &mut data)
                .await
                .map_err(|e| Self::error(reference, format!("failed to fetch config blob: {}", e)))
        })
        .await?;

        Ok(serde_json::from_slice(&data)?)
    }

    async fn authenticate_push(&self, cancel: &CancellationToken, reference: &ParsedRef) -> Result<Reference> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(reference).to_oci_auth();
        run_cancellable(cancel, &format!("authenticating to {}", reference.registry()), async {
            self.client
                .auth(&oci_ref, &auth, RegistryOperation::Push)
                .await
                .map_err(|e| Self::error(reference, format!("authentication failed: {}", e)))
        })
        .await?;
        Ok(oci_ref)
    }

    async fn push_manifest_bytes(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        oci_ref: &Reference,
        bytes: Vec<u8>,
        media_type: &'static str,
    ) -> Result<String> {
        run_cancellable(cancel, &format!("pushing manifest {}", reference), async {
            self.client
                .push_manifest_raw(oci_ref, bytes, http::HeaderValue::from_static(media_type))
                .await
                .map_err(|e| Self::error(reference, format!("failed to push manifest: {}", e)))
        })
        .await
    }
}

/// The parts of an image config blob this crate reads.
#[derive(Debug, Default, Deserialize)]
struct ImageConfig {
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    os: String,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    config: Option<ImageRuntimeConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageRuntimeConfig {
    #[serde(default, rename = "Labels")]
    labels: Option<HashMap<String, String>>,
}

impl ImageConfig {
    fn platform(&self) -> Option<Platform> {
        if self.os.is_empty() || self.architecture.is_empty() {
            return None;
        }
        let mut platform = Platform::new(self.os.clone(), self.architecture.clone());
        platform.variant = self.variant.clone();
        Some(platform)
    }

    fn into_labels(self) -> HashMap<String, String> {
        self.config.and_then(|c| c.labels).unwrap_or_default()
    }
}

/// Parsed manifest body: either an image manifest or an index.
enum ManifestBody {
    Image(ImageManifest),
    Index(ImageIndex),
}

fn parse_manifest(bytes: &[u8]) -> Result<(String, ManifestBody)> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Probe {
        #[serde(default)]
        media_type: Option<String>,
        #[serde(default)]
        manifests: Option<serde_json::Value>,
    }

    let probe: Probe = serde_json::from_slice(bytes)?;
    let media_type = probe.media_type.unwrap_or_else(|| {
        if probe.manifests.is_some() {
            MEDIA_TYPE_OCI_INDEX.to_string()
        } else {
            MEDIA_TYPE_OCI_MANIFEST.to_string()
        }
    });

    if is_index_media_type(&media_type) {
        Ok((media_type, ManifestBody::Index(serde_json::from_slice(bytes)?)))
    } else {
        Ok((media_type, ManifestBody::Image(serde_json::from_slice(bytes)?)))
    }
}

/// First runnable index entry matching `platform`, or the first runnable entry if none requested.
fn select_entry<'a>(manifests: &'a [Descriptor], platform: Option<&Platform>) -> Option<&'a Descriptor> {
    let runnable = manifests.iter().filter(|m| {
        m.platform
            .as_ref()
            .map(|p| !p.is_unknown())
            .unwrap_or(true)
    });
    match platform {
        Some(wanted) => runnable
            .into_iter()
            .find(|m| m.platform.as_ref().map(|p| p.matches(wanted)).unwrap_or(false)),
        None => runnable.into_iter().next(),
    }
}

/// Convert a parsed reference into an `oci-distribution` reference.
fn to_oci_reference(reference: &ParsedRef) -> Result<Reference> {
    let ref_str = match (reference.digest(), reference.tag()) {
        (Some(digest), _) => format!("{}@{}", reference.name(), digest),
        (None, Some(tag)) => format!("{}:{}", reference.name(), tag),
        (None, None) => format!("{}:latest", reference.name()),
    };
    ref_str
        .parse::<Reference>()
        .map_err(|e| CogError::InvalidReference(format!("'{}': {}", ref_str, e)))
}

#[async_trait]
impl RegistryClient for OciRegistry {
    async fn inspect(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        platform: Option<&Platform>,
    ) -> Result<ManifestResult> {
        let (bytes, digest) = self.fetch_manifest(cancel, reference).await?;
        let size = bytes.len() as u64;

        match parse_manifest(&bytes)? {
            (media_type, ManifestBody::Index(index)) => {
                let mut result = ManifestResult {
                    digest,
                    media_type,
                    size,
                    manifests: index.manifests,
                    ..Default::default()
                };
                if let Some(wanted) = platform {
                    if let Some(entry) = select_entry(&result.manifests, Some(wanted)) {
                        let image = self
                            .get_image(cancel, &reference.with_digest(&entry.digest), None)
                            .await?;
                        result.labels = image.labels;
                        result.platform = image.platform.or_else(|| entry.platform.clone());
                        result.config = Some(image.manifest.config.digest);
                    }
                }
                Ok(result)
            }
            (media_type, ManifestBody::Image(manifest)) => {
                let config = self.fetch_config(cancel, reference, &manifest.config).await?;
                Ok(ManifestResult {
                    digest,
                    media_type,
                    size,
                    config: Some(manifest.config.digest.clone()),
                    platform: config.platform(),
                    labels: config.into_labels(),
                    manifests: Vec::new(),
                })
            }
        }
    }

    async fn get_image(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        platform: Option<&Platform>,
    ) -> Result<RemoteImage> {
        let (bytes, digest) = self.fetch_manifest(cancel, reference).await?;
        let (manifest, digest, reference) = match parse_manifest(&bytes)? {
            (_, ManifestBody::Image(manifest)) => (manifest, digest, reference.clone()),
            (_, ManifestBody::Index(index)) => {
                let entry = select_entry(&index.manifests, platform).ok_or_else(|| {
                    Self::error(
                        reference,
                        format!(
                            "no manifest for platform {} in index",
                            platform.map(|p| p.to_string()).unwrap_or_else(|| "any".to_string())
                        ),
                    )
                })?;
                let by_digest = reference.with_digest(&entry.digest);
                let (bytes, digest) = self.fetch_manifest(cancel, &by_digest).await?;
                let manifest: ImageManifest = serde_json::from_slice(&bytes)?;
                (manifest, digest, by_digest)
            }
        };

        let config = self.fetch_config(cancel, &reference, &manifest.config).await?;
        Ok(RemoteImage {
            digest,
            platform: config.platform(),
            labels: config.into_labels(),
            manifest,
        })
    }

    async fn get_descriptor(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
    ) -> Result<Descriptor> {
        let (bytes, digest) = self.fetch_manifest(cancel, reference).await?;
        let (media_type, _) = parse_manifest(&bytes)?;
        Ok(Descriptor::new(media_type, digest, bytes.len() as u64))
    }

    async fn write_layer(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        layer: &LayerBlob,
    ) -> Result<()> {
        let oci_ref = self.authenticate_push(cancel, reference).await?;

        // oci-distribution uploads from a slice, so the blob is read whole.
        let data = tokio::fs::read(&layer.path).await.map_err(|e| {
            CogError::context(format!("failed to read layer {}", layer.path.display()), e.into())
        })?;

        tracing::debug!(
            reference = %reference,
            digest = %layer.descriptor.digest,
            size = data.len(),
            "Uploading layer"
        );
        run_cancellable(cancel, &format!("uploading layer {}", layer.descriptor.digest), async {
            self.client
                .push_blob(&oci_ref, &data, &layer.descriptor.digest)
                .await
                .map_err(|e| {
                    Self::error(
                        reference,
                        format!("failed to upload layer {}: {}", layer.descriptor.digest, e),
                    )
                })
        })
        .await?;
        Ok(())
    }

    async fn push_image(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        image: &ArtifactImage,
    ) -> Result<Descriptor> {
        for layer in &image.layers {
            self.write_layer(cancel, reference, layer).await?;
        }

        let oci_ref = self.authenticate_push(cancel, reference).await?;
        let config_digest = image.manifest.config.digest.clone();
        run_cancellable(cancel, &format!("uploading config {}", config_digest), async {
            self.client
                .push_blob(&oci_ref, &image.config_bytes, &config_digest)
                .await
                .map_err(|e| Self::error(reference, format!("failed to upload config blob: {}", e)))
        })
        .await?;

        self.push_manifest_bytes(
            cancel,
            reference,
            &oci_ref,
            image.manifest_bytes.clone(),
            MEDIA_TYPE_OCI_MANIFEST,
        )
        .await?;

        tracing::info!(reference = %reference, digest = %image.digest, "Pushed artifact");
        Ok(image.descriptor())
    }

    async fn push_index(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        index: &ImageIndex,
    ) -> Result<Descriptor> {
        let oci_ref = self.authenticate_push(cancel, reference).await?;
        let bytes = index.to_bytes()?;
        let descriptor = Descriptor::for_blob(MEDIA_TYPE_OCI_INDEX, &bytes);

        self.push_manifest_bytes(cancel, reference, &oci_ref, bytes, MEDIA_TYPE_OCI_INDEX)
            .await?;

        tracing::info!(reference = %reference, digest = %descriptor.digest, "Pushed index");
        Ok(descriptor)
    }
}
