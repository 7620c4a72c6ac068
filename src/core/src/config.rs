//! Project configuration (`cog.yaml`).
//!
//! The same structure is embedded as JSON in the `run.cog.config` image
//! label, which is how a built image is recognized as a model.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CogError, Result};

/// File name of the project configuration.
pub const CONFIG_FILE: &str = "cog.yaml";

/// Project configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Build environment
    #[serde(default)]
    pub build: BuildSection,

    /// Default image name for build and push
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Predictor reference (e.g., "predict.py:Predictor")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predict: Option<String>,

    /// Trainer reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train: Option<String>,

    /// Weight files shipped beside the image in bundle format
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weights: Vec<WeightSource>,
}

/// Build environment section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSection {
    #[serde(default)]
    pub gpu: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub python_packages: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_packages: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuda: Option<String>,
}

/// A declared weight file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSource {
    /// Logical name; defaults to the source file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Path relative to the project directory
    pub source: PathBuf,

    /// Mount path inside the container
    pub target: String,
}

impl WeightSource {
    /// Logical name of this weight.
    pub fn logical_name(&self) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.to_string_lossy().into_owned())
    }
}

impl ProjectConfig {
    /// Parse configuration from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: ProjectConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `cog.yaml` from a project directory.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(CONFIG_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            CogError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Parse the JSON form stored in the `run.cog.config` label.
    pub fn from_label(value: &str) -> Result<Self> {
        Ok(serde_json::from_str(value)?)
    }

    /// JSON form for the `run.cog.config` label.
    pub fn to_label(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for weight in &self.weights {
            if weight.source.as_os_str().is_empty() {
                return Err(CogError::ConfigError(
                    "weights entry has an empty source".to_string(),
                ));
            }
            if !weight.target.starts_with('/') {
                return Err(CogError::ConfigError(format!(
                    "weight target '{}' must be an absolute path",
                    weight.target
                )));
            }
            let name = weight.logical_name();
            if !seen.insert(name.clone()) {
                return Err(CogError::ConfigError(format!(
                    "duplicate weight name '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}
