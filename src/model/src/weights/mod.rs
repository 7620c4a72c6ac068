//! Weight files: the lock cache and the builder that maintains it.

mod builder;
mod lock;

pub use builder::WeightBuilder;
pub use lock::{WeightFile, WeightsLock, WeightsManifest, WEIGHTS_LOCK_FILE, WEIGHTS_LOCK_VERSION};
