use std::path::PathBuf;

use thiserror::Error;

/// Cog error types
#[derive(Error, Debug)]
pub enum CogError {
    /// Image or manifest does not exist at the queried source
    #[error("Image not found: {reference}")]
    NotFound { reference: String },

    /// Image exists but carries no Cog configuration label
    #[error("Image {reference} is not a Cog model")]
    NotCogModel { reference: String },

    /// Caller cancelled the operation
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Container daemon error
    #[error("Docker error: {command} - {message}")]
    Docker { command: String, message: String },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// The build backend failed to produce an image
    #[error("Failed to build image {image}: {source}")]
    ImageBuild {
        image: String,
        #[source]
        source: Box<CogError>,
    },

    /// The image was built but could not be inspected afterwards
    #[error("Image {image} was built but inspection failed: {source}")]
    ImageInspect {
        image: String,
        #[source]
        source: Box<CogError>,
    },

    /// A declared weight file does not exist
    #[error("Weight source not found: {}", .0.display())]
    WeightSourceNotFound(PathBuf),

    /// Upload of a single weight artifact failed
    #[error("Failed to push weight {name}: {source}")]
    WeightPush {
        name: String,
        #[source]
        source: Box<CogError>,
    },

    /// A builder was handed a spec of the wrong variant
    #[error("{builder} builder cannot build a {found} spec (expected {expected})")]
    ArtifactTypeMismatch {
        builder: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    /// Malformed image reference
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Malformed weights lock file
    #[error("Invalid weights lock {}: {message}", .path.display())]
    Lockfile { path: PathBuf, message: String },

    /// OCI artifact or index construction error
    #[error("OCI error: {0}")]
    OciError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation context wrapped around an underlying cause
    #[error("{message}: {source}")]
    Context {
        message: String,
        #[source]
        source: Box<CogError>,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CogError {
    /// Wrap `source` with a description of the operation that failed.
    pub fn context(message: impl Into<String>, source: CogError) -> Self {
        CogError::Context {
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Innermost error beneath any `Context` wrappers.
    pub fn root(&self) -> &CogError {
        let mut current = self;
        while let CogError::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Whether the root cause is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), CogError::Cancelled(_))
    }

    /// Whether the root cause is an I/O "file does not exist" error.
    pub fn is_missing_file(&self) -> bool {
        matches!(
            self.root(),
            CogError::IoError(e) if e.kind() == std::io::ErrorKind::NotFound
        )
    }
}

impl From<serde_json::Error> for CogError {
    fn from(err: serde_json::Error) -> Self {
        CogError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CogError {
    fn from(err: serde_yaml::Error) -> Self {
        CogError::SerializationError(err.to_string())
    }
}

/// Result type alias for Cog operations
pub type Result<T> = std::result::Result<T, CogError>;

/// Attach operation context to a fallible result.
pub trait ResultExt<T> {
    fn context(self, message: impl Into<String>) -> Result<T>;

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<CogError>,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| CogError::context(message, e.into()))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| CogError::context(f(), e.into()))
    }
}
