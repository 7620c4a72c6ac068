//! `cog build` command - Build a model image from a project directory.
//!
//! Builds the image through the docker build backend and, in OCI index
//! mode, hashes every declared weight into `weights.lock`.

use std::path::PathBuf;

use clap::Args;
use cog_core::settings::{ModelFormat, Settings};
use cog_model::BuildOptions;
use tokio_util::sync::CancellationToken;

use crate::output::short_digest;

#[derive(Args)]
pub struct BuildArgs {
    /// Project directory (contains cog.yaml)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Image name (defaults to `image` in cog.yaml)
    #[arg(short = 't', long = "tag")]
    pub tag: Option<String>,

    /// Path to Dockerfile (default: <PATH>/Dockerfile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Do not use the build cache
    #[arg(long)]
    pub no_cache: bool,

    /// Build secret passed to docker (id=NAME,src=PATH), can be repeated
    #[arg(long = "secret")]
    pub secret: Vec<String>,

    /// Build a bundle: image plus weight artifacts under an OCI index
    #[arg(long)]
    pub oci_index: bool,

    /// Rehash weight files even if weights.lock has a matching entry
    #[arg(long)]
    pub rehash: bool,
}

pub async fn execute(
    cancel: &CancellationToken,
    args: BuildArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let project_dir = super::project_dir(&args.path)?;
    let config = super::load_config(&project_dir)?;
    let settings = Settings::from_env()?;

    let image_name = args
        .tag
        .clone()
        .or_else(|| config.image.clone())
        .ok_or("No image name: pass -t or set `image` in cog.yaml")?;

    let format = if args.oci_index {
        ModelFormat::Bundle
    } else {
        settings.format
    };

    let options = BuildOptions {
        project_dir,
        image_name: image_name.clone(),
        secrets: args.secret,
        no_cache: args.no_cache,
        dockerfile: args.file,
        format,
        config,
        always_hash: args.rehash,
    };

    println!("Building {}...", image_name);
    let model = super::resolver().build(cancel, &options).await?;

    let digest = model
        .image_artifact()
        .map(|image| image.digest.clone())
        .unwrap_or_default();
    println!("Built: {} ({})", image_name, short_digest(&digest));

    for weight in model.weight_artifacts() {
        println!(
            "  weight {} -> {} ({})",
            weight.name,
            weight.target,
            short_digest(&weight.descriptor.digest)
        );
    }

    Ok(())
}
