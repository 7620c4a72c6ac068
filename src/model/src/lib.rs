//! Cog model packaging engine.
//!
//! Builds, resolves and pushes models: a runnable image plus, in bundle
//! format, content-addressed weight artifacts tied together by an OCI
//! image index.
//!
//! - [`artifact`]: artifact specs, artifacts and the [`Builder`] seam
//! - [`weights`]: the `weights.lock` cache and the weight builder
//! - [`image_builder`]: image builds through a pluggable [`Factory`]
//! - [`oci`]: weights artifact and index construction
//! - [`pusher`]: standalone and bundle push strategies
//! - [`resolver`]: local/remote/build lookup with not-found fallback

pub mod artifact;
pub mod cancel;
pub mod credentials;
pub mod digest;
pub mod docker;
pub mod image_builder;
pub mod labels;
pub mod model;
pub mod oci;
pub mod pusher;
pub mod reference;
pub mod registry;
pub mod resolver;
pub mod weights;

pub use artifact::{
    Artifact, ArtifactKind, ArtifactSpec, Builder, ImageArtifact, ImageSpec, ModelSource,
    WeightArtifact, WeightConfig, WeightSpec,
};
pub use credentials::RegistryAuth;
pub use docker::{DockerCli, DockerClient, ImageInspect};
pub use image_builder::{DockerBuildFactory, Factory, ImageBuilder};
pub use model::{IndexManifest, ManifestKind, Model, ModelIndex};
pub use pusher::{BundlePusher, PushOptions, Pusher, StandalonePusher};
pub use reference::ParsedRef;
pub use registry::{ManifestResult, OciRegistry, RegistryClient, RemoteImage};
pub use resolver::{is_not_found, BuildOptions, ResolveOptions, Resolver, SourcePolicy};
pub use weights::{WeightBuilder, WeightFile, WeightsLock, WeightsManifest};

/// Version stamped into built images and weight configs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
