//! Model metadata carried in image labels.
//!
//! Labels follow the `run.cog.*` namespace. Images built by older releases
//! used `org.cogmodel.*`; both are read, only the new keys are written.
//!
//! # Label Schema
//!
//! - `run.cog.config` - project configuration as JSON (required for a model)
//! - `run.cog.version` - version of the tool that built the image
//! - `run.cog.openapi_schema` - OpenAPI schema of the predictor, as JSON

use std::collections::HashMap;

use cog_core::config::ProjectConfig;
use cog_core::error::{CogError, Result};

pub const LABEL_CONFIG: &str = "run.cog.config";
pub const LABEL_VERSION: &str = "run.cog.version";
pub const LABEL_OPENAPI_SCHEMA: &str = "run.cog.openapi_schema";

const LEGACY_LABEL_CONFIG: &str = "org.cogmodel.config";
const LEGACY_LABEL_VERSION: &str = "org.cogmodel.cog_version";
const LEGACY_LABEL_OPENAPI_SCHEMA: &str = "org.cogmodel.openapi_schema";

/// Model metadata parsed from image labels.
#[derive(Debug, Clone, Default)]
pub struct ModelLabels {
    /// Raw configuration JSON
    pub config: Option<String>,

    /// Tool version that built the image
    pub version: Option<String>,

    /// Raw OpenAPI schema JSON
    pub openapi_schema: Option<String>,
}

impl ModelLabels {
    /// Parse model metadata from image labels.
    pub fn from_labels(labels: &HashMap<String, String>) -> Self {
        let mut parsed = Self::default();

        for (key, value) in labels {
            match key.as_str() {
                LABEL_CONFIG => parsed.config = Some(value.clone()),
                LABEL_VERSION => parsed.version = Some(value.clone()),
                LABEL_OPENAPI_SCHEMA => parsed.openapi_schema = Some(value.clone()),
                LEGACY_LABEL_CONFIG if parsed.config.is_none() => {
                    parsed.config = Some(value.clone())
                }
                LEGACY_LABEL_VERSION if parsed.version.is_none() => {
                    parsed.version = Some(value.clone())
                }
                LEGACY_LABEL_OPENAPI_SCHEMA if parsed.openapi_schema.is_none() => {
                    parsed.openapi_schema = Some(value.clone())
                }
                _ => {}
            }
        }

        parsed
    }

    /// An image is a model iff it carries a configuration label.
    pub fn is_model(&self) -> bool {
        self.config.is_some()
    }

    /// Decode the configuration label.
    pub fn project_config(&self) -> Option<Result<ProjectConfig>> {
        self.config.as_deref().map(ProjectConfig::from_label)
    }

    /// Decode the schema label. An empty label means no schema.
    pub fn schema(&self) -> Result<Option<serde_json::Value>> {
        match self.openapi_schema.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => serde_json::from_str(raw).map(Some).map_err(|e| {
                CogError::SerializationError(format!("invalid {} label: {}", LABEL_OPENAPI_SCHEMA, e))
            }),
        }
    }

    /// Labels to stamp on a freshly built image.
    pub fn for_build(config: &ProjectConfig, version: &str) -> Result<HashMap<String, String>> {
        let mut labels = HashMap::new();
        labels.insert(LABEL_CONFIG.to_string(), config.to_label()?);
        labels.insert(LABEL_VERSION.to_string(), version.to_string());
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_labels() {
        let mut labels = HashMap::new();
        labels.insert(LABEL_CONFIG.to_string(), r#"{"predict":"predict.py:Predictor"}"#.to_string());
        labels.insert(LABEL_VERSION.to_string(), "0.9.0".to_string());
        labels.insert("maintainer".to_string(), "someone".to_string());

        let parsed = ModelLabels::from_labels(&labels);
        assert!(parsed.is_model());
        assert_eq!(parsed.version.as_deref(), Some("0.9.0"));

        let config = parsed.project_config().unwrap().unwrap();
        assert_eq!(config.predict.as_deref(), Some("predict.py:Predictor"));
    }

    #[test]
    fn test_not_a_model_without_config() {
        let mut labels = HashMap::new();
        labels.insert(LABEL_VERSION.to_string(), "0.9.0".to_string());
        let parsed = ModelLabels::from_labels(&labels);
        assert!(!parsed.is_model());
        assert!(parsed.project_config().is_none());
    }

    #[test]
    fn test_legacy_labels() {
        let mut labels = HashMap::new();
        labels.insert(LEGACY_LABEL_CONFIG.to_string(), "{}".to_string());
        labels.insert(LEGACY_LABEL_VERSION.to_string(), "0.3.0".to_string());
        let parsed = ModelLabels::from_labels(&labels);
        assert!(parsed.is_model());
        assert_eq!(parsed.version.as_deref(), Some("0.3.0"));
    }

    #[test]
    fn test_new_label_wins_over_legacy() {
        let mut labels = HashMap::new();
        labels.insert(LABEL_VERSION.to_string(), "0.9.0".to_string());
        labels.insert(LEGACY_LABEL_VERSION.to_string(), "0.3.0".to_string());
        let parsed = ModelLabels::from_labels(&labels);
        assert_eq!(parsed.version.as_deref(), Some("0.9.0"));
    }

    #[test]
    fn test_schema() {
        let mut labels = HashMap::new();
        labels.insert(LABEL_OPENAPI_SCHEMA.to_string(), r#"{"openapi":"3.0.2"}"#.to_string());
        let schema = ModelLabels::from_labels(&labels).schema().unwrap().unwrap();
        assert_eq!(schema["openapi"], "3.0.2");

        labels.insert(LABEL_OPENAPI_SCHEMA.to_string(), "not json".to_string());
        assert!(ModelLabels::from_labels(&labels).schema().is_err());

        assert!(ModelLabels::default().schema().unwrap().is_none());
    }

    #[test]
    fn test_for_build() {
        let config = ProjectConfig::default();
        let labels = ModelLabels::for_build(&config, "0.9.0").unwrap();
        let parsed = ModelLabels::from_labels(&labels);
        assert!(parsed.is_model());
        assert_eq!(parsed.version.as_deref(), Some("0.9.0"));
    }
}
