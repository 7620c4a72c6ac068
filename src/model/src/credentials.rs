//! Registry credentials.
//!
//! Resolution order for a registry host: `REGISTRY_USERNAME` /
//! `REGISTRY_PASSWORD`, then the `auths` map of the Docker CLI config
//! (`$DOCKER_CONFIG/config.json` or `~/.docker/config.json`), then anonymous.
//! Credential helpers (`credsStore`, `credHelpers`) are not consulted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use cog_core::error::{CogError, Result};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use serde::Deserialize;

/// Key Docker uses for Docker Hub in `config.json`.
const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

/// Authentication credentials for a container registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Credentials from `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`, if both are set.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("REGISTRY_USERNAME").ok()?;
        let password = std::env::var("REGISTRY_PASSWORD").ok()?;
        Some(Self::basic(username, password))
    }

    /// Credentials for `registry`: environment, then Docker config, then anonymous.
    pub fn for_registry(registry: &str) -> Self {
        if let Some(auth) = Self::from_env() {
            return auth;
        }
        match DockerConfig::load_default() {
            Ok(Some(config)) => config.auth_for(registry).unwrap_or_else(Self::anonymous),
            Ok(None) => Self::anonymous(),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable Docker config");
                Self::anonymous()
            }
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// The `auths` section of a Docker CLI config file.
#[derive(Debug, Default, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

impl DockerConfig {
    /// Default config path, honouring `$DOCKER_CONFIG`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Some(PathBuf::from(dir).join("config.json"));
        }
        dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
    }

    /// Load the default config. Returns `None` if there is no config file.
    pub fn load_default() -> Result<Option<Self>> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).map(Some),
            _ => Ok(None),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            CogError::context(format!("failed to read {}", path.display()), e.into())
        })?;
        Self::parse(&data)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Credentials stored for `registry`, if any.
    pub fn auth_for(&self, registry: &str) -> Option<RegistryAuth> {
        let wanted = normalize_registry(registry);
        let entry = self
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry)?;

        if let (Some(u), Some(p)) = (&entry.username, &entry.password) {
            return Some(RegistryAuth::basic(u.clone(), p.clone()));
        }

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(entry.auth.as_deref()?.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(RegistryAuth::basic(username, password))
    }
}

/// Normalize a registry key: strip scheme and path, map Docker Hub aliases.
fn normalize_registry(registry: &str) -> String {
    if registry == DOCKER_HUB_AUTH_KEY {
        return "docker.io".to_string();
    }
    let host = registry
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host);
    match host {
        "index.docker.io" | "registry-1.docker.io" | "docker.io" => "docker.io".to_string(),
        other => other.to_string(),
    }
}
