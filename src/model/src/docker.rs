//! Container daemon collaborator.
//!
//! [`DockerClient`] is the seam the resolver and builders talk to;
//! [`DockerCli`] implements it by shelling out to the `docker` binary.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use cog_core::error::{CogError, Result};
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::cancel::run_cancellable;
use crate::oci::Platform;
use crate::reference::ParsedRef;
use crate::resolver::is_not_found;

/// Result of inspecting a local image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInspect {
    /// Local image id (`sha256:...`)
    pub id: String,
    /// `name@digest` entries for every registry the image was pushed to or pulled from
    pub repo_digests: Vec<String>,
    pub labels: HashMap<String, String>,
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl ImageInspect {
    pub fn platform(&self) -> Option<Platform> {
        if self.os.is_empty() || self.architecture.is_empty() {
            return None;
        }
        let mut platform = Platform::new(self.os.clone(), self.architecture.clone());
        platform.variant = self.variant.clone();
        Some(platform)
    }

    /// Registry digest recorded for the repository of `reference`, if any.
    pub fn repo_digest(&self, reference: &ParsedRef) -> Option<String> {
        self.repo_digests.iter().find_map(|entry| {
            let parsed = ParsedRef::parse(entry).ok()?;
            if parsed.name() == reference.name() {
                parsed.digest().map(str::to_string)
            } else {
                None
            }
        })
    }
}

/// Operations on the local container daemon.
#[async_trait]
pub trait DockerClient: Send + Sync {
    /// Inspect a local image by reference or id.
    async fn inspect(&self, cancel: &CancellationToken, reference: &str) -> Result<ImageInspect>;

    /// Pull an image and inspect it. Without `force`, an image already
    /// present locally is returned as is.
    async fn pull(
        &self,
        cancel: &CancellationToken,
        reference: &str,
        force: bool,
    ) -> Result<ImageInspect>;

    /// Push a tagged image to its registry.
    async fn push(&self, cancel: &CancellationToken, reference: &str) -> Result<()>;
}

/// [`DockerClient`] backed by the `docker` command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Run a docker subcommand, returning stdout on success.
    pub(crate) async fn run(&self, cancel: &CancellationToken, args: &[String]) -> Result<Vec<u8>> {
        let command = args.first().cloned().unwrap_or_default();
        tracing::debug!(binary = %self.binary, args = ?args, "Running docker");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = run_cancellable(cancel, &format!("docker {}", command), async {
            cmd.output().await.map_err(|e| CogError::Docker {
                command: command.clone(),
                message: format!("failed to run {}: {}", self.binary, e),
            })
        })
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CogError::Docker {
                command,
                message: if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }
        Ok(output.stdout)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInspect {
    id: String,
    #[serde(default)]
    repo_digests: Option<Vec<String>>,
    #[serde(default)]
    config: Option<RawConfig>,
    #[serde(default)]
    os: String,
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    variant: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfig {
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

/// Parse `docker image inspect` output (a JSON array).
pub(crate) fn parse_inspect(reference: &str, stdout: &[u8]) -> Result<ImageInspect> {
    let mut entries: Vec<RawInspect> = serde_json::from_slice(stdout)?;
    if entries.is_empty() {
        return Err(CogError::NotFound {
            reference: reference.to_string(),
        });
    }
    let raw = entries.swap_remove(0);
    Ok(ImageInspect {
        id: raw.id,
        repo_digests: raw.repo_digests.unwrap_or_default(),
        labels: raw.config.and_then(|c| c.labels).unwrap_or_default(),
        os: raw.os,
        architecture: raw.architecture,
        variant: raw.variant,
    })
}

#[async_trait]
impl DockerClient for DockerCli {
    async fn inspect(&self, cancel: &CancellationToken, reference: &str) -> Result<ImageInspect> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            reference.to_string(),
        ];
        let stdout = self.run(cancel, &args).await?;
        parse_inspect(reference, &stdout)
    }

    async fn pull(
        &self,
        cancel: &CancellationToken,
        reference: &str,
        force: bool,
    ) -> Result<ImageInspect> {
        if !force {
            match self.inspect(cancel, reference).await {
                Ok(existing) => {
                    tracing::debug!(reference = %reference, "Image already present, skipping pull");
                    return Ok(existing);
                }
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!(reference = %reference, "Pulling image");
        let args = vec!["pull".to_string(), "--quiet".to_string(), reference.to_string()];
        self.run(cancel, &args).await?;
        self.inspect(cancel, reference).await
    }

    async fn push(&self, cancel: &CancellationToken, reference: &str) -> Result<()> {
        tracing::info!(reference = %reference, "Pushing image");
        let args = vec!["push".to_string(), reference.to_string()];
        self.run(cancel, &args).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSPECT: &str = r#"[{
        "Id": "sha256:1111",
        "RepoDigests": ["r8.im/acme/llama@sha256:2222", "acme/llama@sha256:3333"],
        "Config": {"Labels": {"run.cog.config": "{}"}},
        "Os": "linux",
        "Architecture": "arm64",
        "Variant": "v8"
    }]"#;

    #[test]
    fn test_parse_inspect() {
        let inspect = parse_inspect("r8.im/acme/llama", INSPECT.as_bytes()).unwrap();
        assert_eq!(inspect.id, "sha256:1111");
        assert_eq!(inspect.labels.get("run.cog.config").map(String::as_str), Some("{}"));

        let platform = inspect.platform().unwrap();
        assert_eq!(platform.to_string(), "linux/arm64/v8");
    }

    #[test]
    fn test_parse_inspect_null_labels() {
        let raw = r#"[{"Id": "sha256:1111", "RepoDigests": null, "Config": {"Labels": null}}]"#;
        let inspect = parse_inspect("alpine", raw.as_bytes()).unwrap();
        assert!(inspect.labels.is_empty());
        assert!(inspect.repo_digests.is_empty());
        assert!(inspect.platform().is_none());
    }

    #[test]
    fn test_parse_inspect_empty_array() {
        let err = parse_inspect("alpine", b"[]").unwrap_err();
        assert!(matches!(err, CogError::NotFound { .. }));
    }

    #[test]
    fn test_repo_digest_matches_repository() {
        let inspect = parse_inspect("r8.im/acme/llama", INSPECT.as_bytes()).unwrap();

        let r8 = ParsedRef::parse("r8.im/acme/llama:v1").unwrap();
        assert_eq!(inspect.repo_digest(&r8).as_deref(), Some("sha256:2222"));

        let hub = ParsedRef::parse("acme/llama").unwrap();
        assert_eq!(inspect.repo_digest(&hub).as_deref(), Some("sha256:3333"));

        let other = ParsedRef::parse("r8.im/acme/other").unwrap();
        assert!(inspect.repo_digest(&other).is_none());
    }

    /// Write a stand-in `docker` that logs its arguments. `image inspect`
    /// fails with `inspect_error` until `pull` has run.
    #[cfg(unix)]
    fn fake_docker(dir: &std::path::Path, inspect_error: &str) -> DockerCli {
        use std::os::unix::fs::PermissionsExt;

        let script = format!(
            r#"#!/bin/sh
echo "$*" >> {dir}/calls.log
case "$1" in
  image)
    if [ -f {dir}/pulled ]; then echo '[{{"Id": "sha256:1111"}}]'; exit 0; fi
    echo "{inspect_error}" >&2
    exit 1
    ;;
  pull)
    touch {dir}/pulled
    ;;
esac
"#,
            dir = dir.display(),
            inspect_error = inspect_error,
        );
        let path = dir.join("docker");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DockerCli::new(path.display().to_string())
    }

    #[cfg(unix)]
    fn calls(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pull_missing_image_pulls() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cli = fake_docker(tmp.path(), "Error: No such image: alpine");

        let inspect = cli
            .pull(&CancellationToken::new(), "alpine", false)
            .await
            .unwrap();
        assert_eq!(inspect.id, "sha256:1111");
        assert_eq!(
            calls(tmp.path()),
            vec!["image inspect alpine", "pull --quiet alpine", "image inspect alpine"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pull_surfaces_daemon_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cli = fake_docker(
            tmp.path(),
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
        );

        let err = cli
            .pull(&CancellationToken::new(), "alpine", false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Cannot connect"), "got: {}", err);
        assert_eq!(calls(tmp.path()), vec!["image inspect alpine"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pull_cancelled_before_inspect() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cli = fake_docker(tmp.path(), "Error: No such image: alpine");
        let token = CancellationToken::new();
        token.cancel();

        let err = cli.pull(&token, "alpine", false).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(calls(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_is_docker_error() {
        let cli = DockerCli::new("/nonexistent/docker-binary");
        let err = cli
            .inspect(&CancellationToken::new(), "alpine")
            .await
            .unwrap_err();
        assert!(matches!(err, CogError::Docker { .. }));
    }
}
