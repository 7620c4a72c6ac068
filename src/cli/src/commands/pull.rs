//! `cog pull` command.

use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::output::short_digest;

#[derive(Args)]
pub struct PullArgs {
    /// Model image reference (e.g., "r8.im/acme/llama:latest")
    pub image: String,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    cancel: &CancellationToken,
    args: PullArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if !args.quiet {
        println!("Pulling {}...", args.image);
    }
    let model = super::resolver().pull(cancel, &args.image).await?;

    let digest = model
        .image_artifact()
        .map(|image| image.digest.clone())
        .unwrap_or_default();
    if args.quiet {
        println!("{}", digest);
    } else {
        let source = model.source().map(|s| s.to_string()).unwrap_or_default();
        println!("Pulled: {} ({}, {})", args.image, short_digest(&digest), source);
    }

    Ok(())
}
