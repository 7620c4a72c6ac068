//! Push strategy integration tests.
//!
//! Pushes built models through the standalone and bundle pushers against
//! in-memory daemon and registry fakes, and checks the resulting index and
//! the order of remote writes.
//!
//! Run with:
//!   cargo test -p cog-model --test bundle_push

mod common;

use std::sync::Arc;

use cog_core::error::CogError;
use cog_core::settings::{LayerCompression, ModelFormat};
use cog_model::oci::{
    Descriptor, Platform, ANNOTATION_REFERENCE_DIGEST, ANNOTATION_REFERENCE_TYPE, ARTIFACT_TYPE_WEIGHTS,
    MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST, REFERENCE_TYPE_WEIGHTS,
};
use cog_model::{
    Artifact, ArtifactSpec, Builder, BundlePusher, ImageArtifact, Model, ModelSource, PushOptions,
    Pusher, StandalonePusher, WeightBuilder, WeightSpec,
};
use common::{events, model_labels, snapshot, Events, FakeDocker, FakeRegistry};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const REF: &str = "r8.im/acme/llama:latest";
const IMAGE_DIGEST: &str = "sha256:1111111111111111111111111111111111111111111111111111111111111111";

struct Harness {
    events: Events,
    docker: Arc<FakeDocker>,
    registry: Arc<FakeRegistry>,
    project: TempDir,
}

fn harness() -> Harness {
    let events = events();
    let docker = Arc::new(FakeDocker::new(events.clone()));
    let registry = Arc::new(FakeRegistry::new(events.clone()));
    registry.add_descriptor(REF, Descriptor::new(MEDIA_TYPE_OCI_MANIFEST, IMAGE_DIGEST, 1024));
    Harness {
        events,
        docker,
        registry,
        project: TempDir::new().unwrap(),
    }
}

impl Harness {
    fn bundle_pusher(&self) -> BundlePusher {
        BundlePusher::new(self.docker.clone(), self.registry.clone())
    }

    /// A bundle model with one weight per `(name, contents)`.
    async fn model(&self, weights: &[(&str, &[u8])]) -> Model {
        let mut model = Model::from_image(ImageArtifact {
            reference: REF.to_string(),
            digest: IMAGE_DIGEST.to_string(),
            labels: model_labels(),
            platform: Some(Platform::new("linux", "amd64")),
            source: ModelSource::Build,
            descriptor: None,
        })
        .unwrap();
        model.format = ModelFormat::Bundle;

        let builder = WeightBuilder::new(self.project.path(), "0.4.0");
        for (name, data) in weights {
            std::fs::write(self.project.path().join(name), data).unwrap();
            let spec = WeightSpec::new(*name, *name, format!("/cache/{}", name));
            let artifact = builder
                .build(&CancellationToken::new(), &ArtifactSpec::Weight(spec))
                .await
                .unwrap();
            model.push_artifact(artifact).unwrap();
        }
        model
    }
}

#[tokio::test]
async fn test_bundle_push_single_weight() {
    let h = harness();
    let model = h.model(&[("model.bin", &b"llama weights"[..])]).await;

    h.bundle_pusher()
        .push(&CancellationToken::new(), &model, &PushOptions::default())
        .await
        .unwrap();

    let indexes = h.registry.pushed_indexes.lock().unwrap().clone();
    assert_eq!(indexes.len(), 1);
    let (tag, index) = &indexes[0];
    assert_eq!(tag, REF);
    assert_eq!(index.schema_version, 2);
    assert_eq!(index.media_type.as_deref(), Some(MEDIA_TYPE_OCI_INDEX));
    assert_eq!(index.manifests.len(), 2);

    let image = &index.manifests[0];
    assert_eq!(image.digest, IMAGE_DIGEST);
    assert_eq!(image.platform, Some(Platform::new("linux", "amd64")));

    let weights = &index.manifests[1];
    assert_eq!(weights.platform, Some(Platform::unknown()));
    assert_eq!(weights.artifact_type.as_deref(), Some(ARTIFACT_TYPE_WEIGHTS));
    assert_eq!(weights.annotation(ANNOTATION_REFERENCE_TYPE), Some(REFERENCE_TYPE_WEIGHTS));
    assert_eq!(weights.annotation(ANNOTATION_REFERENCE_DIGEST), Some(IMAGE_DIGEST));

    let pushed = h.registry.pushed_images.lock().unwrap().clone();
    assert_eq!(pushed.len(), 1);
    let (artifact_ref, artifact) = &pushed[0];
    assert_eq!(artifact_ref, &format!("r8.im/acme/llama@{}", artifact.digest));
    assert_eq!(weights.digest, artifact.digest);
    assert_eq!(artifact.weights_manifest.files[0].dest, "/cache/model.bin");
}

#[tokio::test]
async fn test_bundle_push_order() {
    let h = harness();
    let model = h.model(&[("model.bin", &b"llama weights"[..])]).await;

    h.bundle_pusher()
        .push(&CancellationToken::new(), &model, &PushOptions::default())
        .await
        .unwrap();

    let events = snapshot(&h.events);
    let position = |prefix: &str| {
        events
            .iter()
            .position(|e| e.starts_with(prefix))
            .unwrap_or_else(|| panic!("missing event {} in {:?}", prefix, events))
    };
    assert!(position("docker.push") < position("registry.get_descriptor"));
    assert!(position("registry.get_descriptor") < position("registry.push_image"));
    assert!(position("registry.push_image") < position("registry.push_index"));
    assert_eq!(events.last().unwrap(), &format!("registry.push_index {}", REF));
}

#[tokio::test]
async fn test_bundle_push_keeps_weight_order() {
    let h = harness();
    let model = h
        .model(&[
            ("a.bin", &b"first"[..]),
            ("b.bin", &b"second"[..]),
            ("c.bin", &b"third"[..]),
        ])
        .await;
    let options = PushOptions {
        compression: LayerCompression::Gzip,
        concurrency: 2,
        ..Default::default()
    };

    h.bundle_pusher()
        .push(&CancellationToken::new(), &model, &options)
        .await
        .unwrap();

    let pushed = h.registry.pushed_images.lock().unwrap().clone();
    let digest_of = |name: &str| {
        pushed
            .iter()
            .find(|(_, a)| a.weights_manifest.files[0].name == name)
            .map(|(_, a)| a.digest.clone())
            .unwrap()
    };

    let (_, index) = h.registry.pushed_indexes.lock().unwrap()[0].clone();
    let digests: Vec<_> = index.manifests[1..].iter().map(|d| d.digest.clone()).collect();
    assert_eq!(digests, vec![digest_of("a.bin"), digest_of("b.bin"), digest_of("c.bin")]);
}

#[tokio::test]
async fn test_bundle_push_weight_failure() {
    let h = harness();
    let model = h
        .model(&[("a.bin", &b"first"[..]), ("b.bin", &b"second"[..])])
        .await;
    *h.registry.fail_weight.lock().unwrap() = Some("b.bin".to_string());

    let err = h
        .bundle_pusher()
        .push(&CancellationToken::new(), &model, &PushOptions::default())
        .await
        .unwrap_err();

    match err {
        CogError::WeightPush { name, .. } => assert_eq!(name, "b.bin"),
        other => panic!("expected WeightPush, got {:?}", other),
    }
    assert_eq!(h.registry.calls("registry.push_index"), 0);
    assert!(h.registry.pushed_indexes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bundle_push_rejects_weight_changed_since_build() {
    let h = harness();
    let model = h
        .model(&[("a.bin", &b"first"[..]), ("b.bin", &b"second"[..])])
        .await;
    std::fs::write(h.project.path().join("b.bin"), b"SECOND").unwrap();

    let err = h
        .bundle_pusher()
        .push(&CancellationToken::new(), &model, &PushOptions::default())
        .await
        .unwrap_err();

    match &err {
        CogError::WeightPush { name, source } => {
            assert_eq!(name, "b.bin");
            assert!(source.to_string().contains("changed since it was built"), "got: {}", source);
        }
        other => panic!("expected WeightPush, got {:?}", other),
    }
    let pushed = h.registry.pushed_images.lock().unwrap();
    assert!(pushed.iter().all(|(_, image)| image.weights_manifest.files[0].name != "b.bin"));
    assert!(h.registry.pushed_indexes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bundle_push_without_image() {
    let h = harness();
    let mut model = h.model(&[("model.bin", &b"llama weights"[..])]).await;
    model.artifacts.retain(|a| !matches!(a, Artifact::Image(_)));

    let err = h
        .bundle_pusher()
        .push(&CancellationToken::new(), &model, &PushOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CogError::Other(_)));
    assert!(snapshot(&h.events).is_empty());
}

#[tokio::test]
async fn test_bundle_push_cancelled() {
    let h = harness();
    let model = h.model(&[("model.bin", &b"llama weights"[..])]).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .bundle_pusher()
        .push(&cancel, &model, &PushOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(h.registry.pushed_indexes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_standalone_push_uses_daemon_only() {
    let h = harness();
    let mut model = h.model(&[]).await;
    model.format = ModelFormat::Standalone;

    StandalonePusher::new(h.docker.clone())
        .push(&CancellationToken::new(), &model, &PushOptions::default())
        .await
        .unwrap();

    assert_eq!(snapshot(&h.events), vec![format!("docker.push {}", REF)]);
}
