//! OCI artifact construction.
//!
//! - [`types`]: manifest, index and descriptor types plus Cog media types
//! - [`weights_artifact`]: packs weight files into an artifact image
//! - [`index`]: composes a model image and weights artifacts into an index

pub mod index;
pub mod types;
pub mod weights_artifact;

pub use index::IndexBuilder;
pub use types::*;
pub use weights_artifact::{build_weights_artifact, layer_media_type, ArtifactImage, LayerBlob};
