//! `cog push` command - Push a local model image to a registry.
//!
//! In OCI index mode the declared weights are hashed (reusing
//! `weights.lock`), uploaded as weights artifacts, and tied to the image
//! with an OCI index pushed under the image tag.

use std::path::PathBuf;

use clap::Args;
use cog_core::settings::{ModelFormat, Settings};
use cog_model::{ArtifactSpec, Builder, ResolveOptions, SourcePolicy, WeightBuilder, WeightSpec};
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct PushArgs {
    /// Image reference (e.g., "r8.im/acme/llama:latest")
    pub image: String,

    /// Push a bundle: image plus weight artifacts under an OCI index
    #[arg(long)]
    pub oci_index: bool,

    /// Project directory holding cog.yaml and the weight files
    #[arg(long, default_value = ".")]
    pub project: PathBuf,
}

pub async fn execute(
    cancel: &CancellationToken,
    args: PushArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    let resolver = super::resolver();

    let resolve = ResolveOptions {
        policy: SourcePolicy::LocalOnly,
        ..Default::default()
    };
    let mut model = resolver.inspect(cancel, &args.image, &resolve).await?;
    model.format = if args.oci_index {
        ModelFormat::Bundle
    } else {
        settings.format
    };

    if model.format == ModelFormat::Bundle {
        let project_dir = super::project_dir(&args.project)?;
        let config = super::load_config(&project_dir)?;
        let cog_version = model
            .cog_version
            .clone()
            .unwrap_or_else(|| cog_model::VERSION.to_string());
        let builder = WeightBuilder::new(&project_dir, cog_version);
        for spec in WeightSpec::from_config(&config) {
            let artifact = builder.build(cancel, &ArtifactSpec::Weight(spec)).await?;
            model.push_artifact(artifact)?;
        }
    }

    println!("Pushing {} ({})...", args.image, model.format);
    resolver
        .push(cancel, &model, &super::push_options(&settings)?)
        .await?;

    let weights = model.weight_artifacts().len();
    if weights > 0 {
        println!("Pushed: {} with {} weight artifact(s)", args.image, weights);
    } else {
        println!("Pushed: {}", args.image);
    }
    Ok(())
}
