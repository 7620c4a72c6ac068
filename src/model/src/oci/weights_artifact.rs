//! Weights artifact assembly.
//!
//! Packs the files recorded in a [`WeightsLock`] into a standalone OCI
//! artifact image: one layer per weight file, a config blob holding the
//! updated lock, and a manifest whose `artifactType` marks it as Cog
//! weights. Each source file is read exactly once; the raw-bytes digest and
//! the stored-blob digest are computed in the same pass.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cog_core::error::{CogError, Result};
use cog_core::settings::LayerCompression;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::types::*;
use crate::cancel;
use crate::digest::{self, sha256_bytes, HashingWriter};
use crate::weights::{WeightFile, WeightsLock, WeightsManifest};

/// A layer blob and where its bytes live on disk.
#[derive(Debug, Clone)]
pub struct LayerBlob {
    pub descriptor: Descriptor,
    /// Source file for uncompressed layers, scratch file for gzip layers
    pub path: PathBuf,
}

/// A fully assembled weights artifact, ready to push.
#[derive(Debug, Clone)]
pub struct ArtifactImage {
    pub manifest: ImageManifest,
    /// Exact bytes that were digested; push these, never re-serialize
    pub manifest_bytes: Vec<u8>,
    pub config_bytes: Vec<u8>,
    /// Digest of `manifest_bytes`
    pub digest: String,
    pub layers: Vec<LayerBlob>,
    pub weights_manifest: WeightsManifest,
    // Keeps compressed layer files alive until the artifact is dropped.
    _scratch: Option<Arc<TempDir>>,
}

impl ArtifactImage {
    /// Descriptor of the artifact manifest, for use in an index.
    pub fn descriptor(&self) -> Descriptor {
        let mut desc = Descriptor::new(
            MEDIA_TYPE_OCI_MANIFEST,
            self.digest.clone(),
            self.manifest_bytes.len() as u64,
        );
        desc.artifact_type = Some(ARTIFACT_TYPE_WEIGHTS.to_string());
        desc
    }
}

/// Layer media type for a compression mode.
pub fn layer_media_type(compression: LayerCompression) -> &'static str {
    match compression {
        LayerCompression::None => MEDIA_TYPE_WEIGHT_LAYER,
        LayerCompression::Gzip => MEDIA_TYPE_WEIGHT_LAYER_GZIP,
    }
}

/// Assemble a weights artifact from a lock and the files backing it.
///
/// `file_paths` maps each weight's logical name to its file. Blocking:
/// run it under `spawn_blocking` from async code.
pub fn build_weights_artifact(
    cancel: &CancellationToken,
    lock: &WeightsLock,
    file_paths: &HashMap<String, PathBuf>,
    compression: LayerCompression,
) -> Result<ArtifactImage> {
    if lock.files.is_empty() {
        return Err(CogError::OciError(
            "weights artifact needs at least one weight file".to_string(),
        ));
    }

    let scratch = match compression {
        LayerCompression::None => None,
        LayerCompression::Gzip => Some(Arc::new(TempDir::new().map_err(|e| {
            CogError::context("failed to create scratch directory for weight layers", e.into())
        })?)),
    };

    let mut files = Vec::with_capacity(lock.files.len());
    let mut layers = Vec::with_capacity(lock.files.len());

    for (i, entry) in lock.files.iter().enumerate() {
        cancel::check(cancel, &format!("packing weight {}", entry.name))?;

        let source = file_paths.get(&entry.name).ok_or_else(|| {
            CogError::OciError(format!("no file path provided for weight {}", entry.name))
        })?;

        let packed = match scratch {
            Some(ref dir) => {
                let blob_path = dir.path().join(format!("layer-{}.gz", i));
                pack_gzip(cancel, source, &blob_path)?
            }
            None => pack_raw(cancel, source)?,
        };

        let file = WeightFile {
            name: entry.name.clone(),
            dest: entry.dest.clone(),
            digest_original: packed.digest_original,
            digest: packed.digest,
            size: packed.size,
            size_uncompressed: packed.size_uncompressed,
            media_type: layer_media_type(compression).to_string(),
        };

        let mut descriptor = Descriptor::new(file.media_type.clone(), file.digest.clone(), file.size);
        descriptor.set_annotation(ANNOTATION_WEIGHT_NAME, file.name.clone());
        descriptor.set_annotation(ANNOTATION_WEIGHT_DEST, file.dest.clone());
        descriptor.set_annotation(ANNOTATION_WEIGHT_DIGEST_ORIGINAL, file.digest_original.clone());
        descriptor.set_annotation(
            ANNOTATION_WEIGHT_SIZE_UNCOMPRESSED,
            file.size_uncompressed.to_string(),
        );

        tracing::debug!(
            name = %file.name,
            digest = %file.digest,
            size = file.size,
            "Packed weight layer"
        );

        layers.push(LayerBlob {
            descriptor,
            path: packed.path,
        });
        files.push(file);
    }

    let packed_lock = WeightsLock {
        version: lock.version.clone(),
        created: lock.created,
        files,
    };
    let config_bytes = serde_json::to_vec(&packed_lock)?;

    let mut annotations = BTreeMap::new();
    annotations.insert(ANNOTATION_CREATED.to_string(), lock.created.to_rfc3339());

    let manifest = ImageManifest {
        schema_version: 2,
        media_type: Some(MEDIA_TYPE_OCI_MANIFEST.to_string()),
        artifact_type: Some(ARTIFACT_TYPE_WEIGHTS.to_string()),
        config: Descriptor::for_blob(MEDIA_TYPE_WEIGHTS_CONFIG, &config_bytes),
        layers: layers.iter().map(|l| l.descriptor.clone()).collect(),
        annotations: Some(annotations),
    };
    let manifest_bytes = manifest.to_bytes()?;
    let digest = sha256_bytes(&manifest_bytes);
    let weights_manifest = packed_lock.to_manifest(digest.clone());

    Ok(ArtifactImage {
        manifest,
        manifest_bytes,
        config_bytes,
        digest,
        layers,
        weights_manifest,
        _scratch: scratch,
    })
}

struct PackedLayer {
    path: PathBuf,
    digest_original: String,
    digest: String,
    size: u64,
    size_uncompressed: u64,
}

fn open_source(source: &Path) -> Result<std::fs::File> {
    std::fs::File::open(source).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CogError::WeightSourceNotFound(source.to_path_buf())
        } else {
            CogError::context(format!("failed to open weight {}", source.display()), e.into())
        }
    })
}

/// Stream `source` into `sink`, returning the raw digest and byte count.
fn copy_hashed<W: Write>(
    cancel: &CancellationToken,
    source: &Path,
    sink: &mut W,
) -> Result<(String, u64)> {
    let mut file = open_source(source)?;
    digest::copy_hashed(cancel, source, &mut file, sink)
}

fn pack_raw(cancel: &CancellationToken, source: &Path) -> Result<PackedLayer> {
    let (digest, size) = copy_hashed(cancel, source, &mut std::io::sink())?;
    Ok(PackedLayer {
        path: source.to_path_buf(),
        digest_original: digest.clone(),
        digest,
        size,
        size_uncompressed: size,
    })
}

fn pack_gzip(cancel: &CancellationToken, source: &Path, blob_path: &Path) -> Result<PackedLayer> {
    let blob = std::fs::File::create(blob_path).map_err(|e| {
        CogError::context(format!("failed to create layer {}", blob_path.display()), e.into())
    })?;
    let mut encoder = GzEncoder::new(HashingWriter::new(blob), Compression::default());

    let (digest_original, size_uncompressed) = copy_hashed(cancel, source, &mut encoder)?;

    let hashing = encoder.finish().map_err(|e| {
        CogError::context(format!("failed to finish layer {}", blob_path.display()), e.into())
    })?;
    let (mut blob, digest, size) = hashing.finish();
    blob.flush()?;

    Ok(PackedLayer {
        path: blob_path.to_path_buf(),
        digest_original,
        digest,
        size,
        size_uncompressed,
    })
}
