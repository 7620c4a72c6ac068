//! Process settings read from the environment.

use serde::{Deserialize, Serialize};

use crate::error::{CogError, Result};

/// Default number of concurrent weight uploads.
pub const DEFAULT_PUSH_CONCURRENCY: usize = 4;

/// Default target platform.
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// Packaging format of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFormat {
    /// A single runnable image; weights (if any) are baked in.
    #[default]
    Standalone,
    /// An OCI image index: runnable image plus weight artifacts.
    Bundle,
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone => write!(f, "standalone"),
            Self::Bundle => write!(f, "bundle"),
        }
    }
}

/// Storage mode for weight layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerCompression {
    /// Raw bytes; stored digest equals the original digest.
    #[default]
    None,
    /// Gzip-compressed layer.
    Gzip,
}

impl std::str::FromStr for LayerCompression {
    type Err = CogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "uncompressed" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            other => Err(CogError::ConfigError(format!(
                "unknown weights compression '{}' (supported: none, gzip)",
                other
            ))),
        }
    }
}

/// Settings resolved from `COG_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub format: ModelFormat,
    pub compression: LayerCompression,
    pub push_concurrency: usize,
    pub platform: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            format: ModelFormat::Standalone,
            compression: LayerCompression::None,
            push_concurrency: DEFAULT_PUSH_CONCURRENCY,
            platform: DEFAULT_PLATFORM.to_string(),
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(value) = lookup("COG_OCI_INDEX") {
            if matches!(value.trim(), "1" | "true" | "TRUE" | "yes") {
                settings.format = ModelFormat::Bundle;
            }
        }
        if let Some(value) = lookup("COG_WEIGHTS_COMPRESSION") {
            settings.compression = value.parse()?;
        }
        if let Some(value) = lookup("COG_PUSH_CONCURRENCY") {
            let n: usize = value.trim().parse().map_err(|_| {
                CogError::ConfigError(format!("COG_PUSH_CONCURRENCY must be a number, got '{}'", value))
            })?;
            settings.push_concurrency = n.max(1);
        }
        if let Some(value) = lookup("COG_PLATFORM") {
            if !value.contains('/') {
                return Err(CogError::ConfigError(format!(
                    "COG_PLATFORM must be os/arch, got '{}'",
                    value
                )));
            }
            settings.platform = value;
        }

        tracing::debug!(
            format = %settings.format,
            compression = ?settings.compression,
            push_concurrency = settings.push_concurrency,
            platform = %settings.platform,
            "Resolved settings"
        );
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.format, ModelFormat::Standalone);
    }

    #[test]
    fn test_oci_index_enables_bundle() {
        let settings = Settings::from_lookup(lookup(&[("COG_OCI_INDEX", "1")])).unwrap();
        assert_eq!(settings.format, ModelFormat::Bundle);

        let settings = Settings::from_lookup(lookup(&[("COG_OCI_INDEX", "0")])).unwrap();
        assert_eq!(settings.format, ModelFormat::Standalone);
    }

    #[test]
    fn test_compression_parse() {
        assert_eq!("gzip".parse::<LayerCompression>().unwrap(), LayerCompression::Gzip);
        assert_eq!("none".parse::<LayerCompression>().unwrap(), LayerCompression::None);
        assert!("zstd".parse::<LayerCompression>().is_err());
    }

    #[test]
    fn test_push_concurrency_floor() {
        let settings = Settings::from_lookup(lookup(&[("COG_PUSH_CONCURRENCY", "0")])).unwrap();
        assert_eq!(settings.push_concurrency, 1);
        assert!(Settings::from_lookup(lookup(&[("COG_PUSH_CONCURRENCY", "many")])).is_err());
    }

    #[test]
    fn test_platform_validation() {
        let settings = Settings::from_lookup(lookup(&[("COG_PLATFORM", "linux/arm64")])).unwrap();
        assert_eq!(settings.platform, "linux/arm64");
        assert!(Settings::from_lookup(lookup(&[("COG_PLATFORM", "arm64")])).is_err());
    }

    #[test]
    fn test_format_display() {
        assert_eq!(ModelFormat::Bundle.to_string(), "bundle");
        assert_eq!(ModelFormat::Standalone.to_string(), "standalone");
    }
}
