//! `cog weights` commands - Hash declared weights and show `weights.lock`.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use cog_model::weights::WEIGHTS_LOCK_FILE;
use cog_model::{ArtifactSpec, Builder, WeightBuilder, WeightSpec, WeightsLock};
use tokio_util::sync::CancellationToken;

use crate::output::{format_bytes, new_table, short_digest};

#[derive(Args)]
pub struct WeightsArgs {
    #[command(subcommand)]
    pub command: WeightsCommand,
}

#[derive(Subcommand)]
pub enum WeightsCommand {
    /// Hash every weight declared in cog.yaml and update weights.lock
    Build(WeightsBuildArgs),
    /// Print the entries of weights.lock
    Inspect(WeightsInspectArgs),
}

#[derive(Args)]
pub struct WeightsBuildArgs {
    /// Project directory (contains cog.yaml)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Rehash every file even if weights.lock has a matching entry
    #[arg(long)]
    pub rehash: bool,
}

#[derive(Args)]
pub struct WeightsInspectArgs {
    /// Project directory (contains weights.lock)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Print the lock file as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(
    cancel: &CancellationToken,
    args: WeightsArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        WeightsCommand::Build(args) => build(cancel, args).await,
        WeightsCommand::Inspect(args) => inspect(args),
    }
}

async fn build(
    cancel: &CancellationToken,
    args: WeightsBuildArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let project_dir = super::project_dir(&args.path)?;
    let config = super::load_config(&project_dir)?;
    let specs = WeightSpec::from_config(&config);
    if specs.is_empty() {
        println!("No weights declared in cog.yaml");
        return Ok(());
    }

    let builder = WeightBuilder::new(&project_dir, cog_model::VERSION).always_hash(args.rehash);
    for spec in specs {
        let artifact = builder.build(cancel, &ArtifactSpec::Weight(spec)).await?;
        if let Some(weight) = artifact.as_weight() {
            println!(
                "{} {} ({})",
                short_digest(&weight.descriptor.digest),
                weight.name,
                format_bytes(weight.descriptor.size)
            );
        }
    }
    println!("Updated {}", builder.lock_path().display());
    Ok(())
}

fn inspect(args: WeightsInspectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let project_dir = super::project_dir(&args.path)?;
    let lock = WeightsLock::load(&project_dir.join(WEIGHTS_LOCK_FILE))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&lock)?);
        return Ok(());
    }

    let mut table = new_table(&["NAME", "DEST", "DIGEST", "SIZE"]);
    for file in &lock.files {
        table.add_row(vec![
            file.name.clone(),
            file.dest.clone(),
            short_digest(&file.digest_original).to_string(),
            format_bytes(file.size_uncompressed),
        ]);
    }
    println!("{table}");
    Ok(())
}
