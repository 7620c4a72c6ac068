//! In-memory daemon, registry and build backend for integration tests.
//!
//! All fakes append to a shared [`Events`] log so tests can assert call
//! order across collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cog_core::error::{CogError, Result};
use cog_model::cancel;
use cog_model::labels::{LABEL_CONFIG, LABEL_VERSION};
use cog_model::oci::{ArtifactImage, Descriptor, ImageIndex, LayerBlob, Platform};
use cog_model::registry::{ManifestResult, RegistryClient, RemoteImage};
use cog_model::{DockerClient, Factory, ImageArtifact, ImageInspect, ImageSpec, ModelSource, ParsedRef};
use tokio_util::sync::CancellationToken;

pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn snapshot(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}

/// Labels of a minimal model image.
pub fn model_labels() -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(LABEL_CONFIG.to_string(), r#"{"predict":"predict.py:Predictor"}"#.to_string());
    labels.insert(LABEL_VERSION.to_string(), "0.4.0".to_string());
    labels
}

pub fn local_image(id: &str, labels: HashMap<String, String>) -> ImageInspect {
    ImageInspect {
        id: id.to_string(),
        repo_digests: Vec::new(),
        labels,
        os: "linux".to_string(),
        architecture: "amd64".to_string(),
        variant: None,
    }
}

#[derive(Default)]
pub struct FakeDocker {
    pub events: Events,
    /// Images present in the daemon, keyed by reference or id
    pub images: Mutex<HashMap<String, ImageInspect>>,
    /// Images `pull` can fetch, keyed by reference
    pub remote: Mutex<HashMap<String, ImageInspect>>,
    /// Forced inspect failure message
    pub inspect_error: Mutex<Option<String>>,
    pub push_error: Mutex<Option<String>>,
}

impl FakeDocker {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn add_image(&self, key: &str, image: ImageInspect) {
        self.images.lock().unwrap().insert(key.to_string(), image);
    }

    pub fn add_remote(&self, key: &str, image: ImageInspect) {
        self.remote.lock().unwrap().insert(key.to_string(), image);
    }

    pub fn fail_inspect(&self, message: &str) {
        *self.inspect_error.lock().unwrap() = Some(message.to_string());
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl DockerClient for FakeDocker {
    async fn inspect(&self, cancel: &CancellationToken, reference: &str) -> Result<ImageInspect> {
        cancel::check(cancel, "docker inspect")?;
        self.record(format!("docker.inspect {}", reference));
        if let Some(message) = self.inspect_error.lock().unwrap().clone() {
            return Err(CogError::Docker {
                command: "image".to_string(),
                message,
            });
        }
        self.images
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| CogError::Docker {
                command: "image".to_string(),
                message: format!("Error: No such image: {}", reference),
            })
    }

    async fn pull(&self, cancel: &CancellationToken, reference: &str, _force: bool) -> Result<ImageInspect> {
        cancel::check(cancel, "docker pull")?;
        self.record(format!("docker.pull {}", reference));
        let image = self.remote.lock().unwrap().get(reference).cloned().ok_or_else(|| {
            CogError::Docker {
                command: "pull".to_string(),
                message: format!("Error response from daemon: manifest unknown: {}", reference),
            }
        })?;
        self.add_image(reference, image.clone());
        Ok(image)
    }

    async fn push(&self, cancel: &CancellationToken, reference: &str) -> Result<()> {
        cancel::check(cancel, "docker push")?;
        self.record(format!("docker.push {}", reference));
        match self.push_error.lock().unwrap().clone() {
            Some(message) => Err(CogError::Docker {
                command: "push".to_string(),
                message,
            }),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    pub events: Events,
    /// Manifests keyed by canonical reference
    pub manifests: Mutex<HashMap<String, ManifestResult>>,
    /// Descriptors returned by `get_descriptor`, keyed by canonical reference
    pub descriptors: Mutex<HashMap<String, Descriptor>>,
    pub inspect_error: Mutex<Option<String>>,
    /// Weight name whose artifact upload fails
    pub fail_weight: Mutex<Option<String>>,
    /// Delay applied to every artifact upload
    pub upload_delay: Mutex<Option<Duration>>,
    pub pushed_images: Mutex<Vec<(String, ArtifactImage)>>,
    pub pushed_indexes: Mutex<Vec<(String, ImageIndex)>>,
}

impl FakeRegistry {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn add_manifest(&self, reference: &str, manifest: ManifestResult) {
        let key = ParsedRef::parse(reference).unwrap().canonical();
        self.manifests.lock().unwrap().insert(key, manifest);
    }

    pub fn add_descriptor(&self, reference: &str, descriptor: Descriptor) {
        let key = ParsedRef::parse(reference).unwrap().canonical();
        self.descriptors.lock().unwrap().insert(key, descriptor);
    }

    pub fn fail_inspect(&self, message: &str) {
        *self.inspect_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

fn registry_error(reference: &ParsedRef, message: &str) -> CogError {
    CogError::RegistryError {
        registry: reference.registry().to_string(),
        message: message.to_string(),
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn inspect(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        _platform: Option<&Platform>,
    ) -> Result<ManifestResult> {
        cancel::check(cancel, "registry inspect")?;
        self.record(format!("registry.inspect {}", reference));
        if let Some(message) = self.inspect_error.lock().unwrap().clone() {
            return Err(registry_error(reference, &message));
        }
        self.manifests
            .lock()
            .unwrap()
            .get(&reference.canonical())
            .cloned()
            .ok_or_else(|| registry_error(reference, "MANIFEST_UNKNOWN: manifest unknown"))
    }

    async fn get_image(
        &self,
        _cancel: &CancellationToken,
        reference: &ParsedRef,
        _platform: Option<&Platform>,
    ) -> Result<RemoteImage> {
        Err(registry_error(reference, "get_image is not supported by the fake"))
    }

    async fn get_descriptor(&self, cancel: &CancellationToken, reference: &ParsedRef) -> Result<Descriptor> {
        cancel::check(cancel, "registry descriptor")?;
        self.record(format!("registry.get_descriptor {}", reference));
        self.descriptors
            .lock()
            .unwrap()
            .get(&reference.canonical())
            .cloned()
            .ok_or_else(|| registry_error(reference, "MANIFEST_UNKNOWN: manifest unknown"))
    }

    async fn write_layer(&self, cancel: &CancellationToken, reference: &ParsedRef, layer: &LayerBlob) -> Result<()> {
        cancel::check(cancel, "registry write layer")?;
        self.record(format!("registry.write_layer {} {}", reference, layer.descriptor.digest));
        Ok(())
    }

    async fn push_image(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        image: &ArtifactImage,
    ) -> Result<Descriptor> {
        let delay = *self.upload_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        cancel::check(cancel, "registry push image")?;

        let fail = self.fail_weight.lock().unwrap().clone();
        if let Some(name) = fail {
            if image.weights_manifest.files.iter().any(|f| f.name == name) {
                self.record(format!("registry.push_image failed {}", name));
                return Err(registry_error(reference, "blob upload invalid"));
            }
        }

        self.record(format!("registry.push_image {}", reference));
        self.pushed_images
            .lock()
            .unwrap()
            .push((reference.canonical(), image.clone()));
        Ok(image.descriptor())
    }

    async fn push_index(
        &self,
        cancel: &CancellationToken,
        reference: &ParsedRef,
        index: &ImageIndex,
    ) -> Result<Descriptor> {
        cancel::check(cancel, "registry push index")?;
        self.record(format!("registry.push_index {}", reference));
        self.pushed_indexes
            .lock()
            .unwrap()
            .push((reference.canonical(), index.clone()));
        Ok(Descriptor::for_blob(
            cog_model::oci::MEDIA_TYPE_OCI_INDEX,
            &index.to_bytes()?,
        ))
    }
}

/// Build backend that registers the built image with a [`FakeDocker`].
pub struct FakeFactory {
    pub docker: Arc<FakeDocker>,
    pub error: Mutex<Option<String>>,
    /// Skip registering the image, so the post-build inspect fails
    pub forget_image: Mutex<bool>,
}

impl FakeFactory {
    pub fn new(docker: Arc<FakeDocker>) -> Self {
        Self {
            docker,
            error: Mutex::new(None),
            forget_image: Mutex::new(false),
        }
    }
}

#[async_trait]
impl Factory for FakeFactory {
    async fn build(
        &self,
        cancel: &CancellationToken,
        _project_dir: &Path,
        spec: &ImageSpec,
    ) -> Result<ImageArtifact> {
        cancel::check(cancel, "build")?;
        self.docker.record(format!("factory.build {}", spec.image_name));
        if let Some(message) = self.error.lock().unwrap().clone() {
            return Err(CogError::Docker {
                command: "build".to_string(),
                message,
            });
        }

        let id = "sha256:b111";
        if !*self.forget_image.lock().unwrap() {
            self.docker.add_image(id, local_image(id, spec.labels.clone()));
        }
        Ok(ImageArtifact {
            reference: spec.image_name.clone(),
            digest: id.to_string(),
            labels: spec.labels.clone(),
            platform: None,
            source: ModelSource::Build,
            descriptor: None,
        })
    }
}
