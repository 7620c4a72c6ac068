//! CLI command definitions and dispatch.

mod build;
mod inspect;
mod pull;
mod push;
mod weights;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cog_core::config::ProjectConfig;
use cog_core::settings::Settings;
use cog_model::oci::Platform;
use cog_model::{DockerBuildFactory, DockerCli, OciRegistry, PushOptions, Resolver};
use tokio_util::sync::CancellationToken;

/// Cog - package machine learning models as OCI images.
#[derive(Parser)]
#[command(name = "cog", version, about)]
pub struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build a model image from the project in the current directory
    Build(build::BuildArgs),
    /// Push a model image, as a bundle when OCI index mode is on
    Push(push::PushArgs),
    /// Make a model image available locally
    Pull(pull::PullArgs),
    /// Show model metadata
    Inspect(inspect::InspectArgs),
    /// Manage weight files and weights.lock
    Weights(weights::WeightsArgs),
}

/// Resolver wired to the local docker CLI and the OCI registry client.
pub(crate) fn resolver() -> Resolver {
    let docker = Arc::new(DockerCli::default());
    Resolver::new(
        docker,
        Arc::new(OciRegistry::new()),
        Arc::new(DockerBuildFactory::new(DockerCli::default())),
    )
}

/// Canonicalized project directory.
pub(crate) fn project_dir(path: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let dir = path
        .canonicalize()
        .map_err(|e| format!("Invalid project directory '{}': {}", path.display(), e))?;
    if !dir.is_dir() {
        return Err(format!("Project path '{}' is not a directory", dir.display()).into());
    }
    Ok(dir)
}

/// Load `cog.yaml`, or an empty config if the directory has none.
pub(crate) fn load_config(dir: &Path) -> Result<ProjectConfig, Box<dyn std::error::Error>> {
    if !dir.join(cog_core::config::CONFIG_FILE).exists() {
        tracing::debug!(dir = %dir.display(), "No cog.yaml, using an empty configuration");
        return Ok(ProjectConfig::default());
    }
    Ok(ProjectConfig::load(dir)?)
}

/// Push options derived from settings.
pub(crate) fn push_options(settings: &Settings) -> Result<PushOptions, Box<dyn std::error::Error>> {
    Ok(PushOptions {
        compression: settings.compression,
        concurrency: settings.push_concurrency,
        platform: Platform::parse(&settings.platform)?,
        ..Default::default()
    })
}

/// Token cancelled on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = cancel_on_interrupt();
    match cli.command {
        Command::Build(args) => build::execute(&cancel, args).await,
        Command::Push(args) => push::execute(&cancel, args).await,
        Command::Pull(args) => pull::execute(&cancel, args).await,
        Command::Inspect(args) => inspect::execute(&cancel, args).await,
        Command::Weights(args) => weights::execute(&cancel, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build() {
        let cli = Cli::try_parse_from(["cog", "build", "-t", "r8.im/acme/llama", "--oci-index"]).unwrap();
        match cli.command {
            Command::Build(args) => {
                assert_eq!(args.tag.as_deref(), Some("r8.im/acme/llama"));
                assert!(args.oci_index);
                assert!(!args.no_cache);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_parse_inspect_policy_conflict() {
        assert!(Cli::try_parse_from(["cog", "inspect", "x", "--local", "--remote"]).is_err());
        assert!(Cli::try_parse_from(["cog", "inspect", "x", "--prefer-local", "--json"]).is_ok());
    }

    #[test]
    fn test_parse_weights_subcommands() {
        assert!(Cli::try_parse_from(["cog", "weights", "build"]).is_ok());
        assert!(Cli::try_parse_from(["cog", "-v", "weights", "inspect", "--json"]).is_ok());
        assert!(Cli::try_parse_from(["cog", "weights"]).is_err());
    }

    #[test]
    fn test_load_config_missing_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config, ProjectConfig::default());
    }

    #[test]
    fn test_push_options_from_settings() {
        let settings = Settings {
            platform: "linux/arm64".to_string(),
            push_concurrency: 2,
            ..Default::default()
        };
        let options = push_options(&settings).unwrap();
        assert_eq!(options.platform, Platform::new("linux", "arm64"));
        assert_eq!(options.concurrency, 2);
    }
}
