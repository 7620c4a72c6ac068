//! Cog Core - Foundational Types
//!
//! Error taxonomy, project configuration (`cog.yaml`) and environment
//! settings shared by the model packaging crates.

pub mod config;
pub mod error;
pub mod settings;

// Re-export commonly used types
pub use config::{BuildSection, ProjectConfig, WeightSource};
pub use error::{CogError, Result, ResultExt};
pub use settings::{LayerCompression, ModelFormat, Settings};
