//! `cog inspect` command - Show model metadata from the daemon or registry.

use clap::Args;
use cog_core::settings::Settings;
use cog_model::oci::Platform;
use cog_model::{Model, ResolveOptions, SourcePolicy};
use tokio_util::sync::CancellationToken;

use crate::output::{format_bytes, new_table, short_digest};

#[derive(Args)]
pub struct InspectArgs {
    /// Model image reference
    pub image: String,

    /// Only look in the local daemon
    #[arg(long, group = "source")]
    pub local: bool,

    /// Only look in the registry
    #[arg(long, group = "source")]
    pub remote: bool,

    /// Try the local daemon first, then the registry
    #[arg(long, group = "source")]
    pub prefer_local: bool,

    /// Try the registry first, then the local daemon (default)
    #[arg(long, group = "source")]
    pub prefer_remote: bool,

    /// Print the full model as JSON
    #[arg(long)]
    pub json: bool,
}

impl InspectArgs {
    fn policy(&self) -> SourcePolicy {
        if self.local {
            SourcePolicy::LocalOnly
        } else if self.remote {
            SourcePolicy::RemoteOnly
        } else if self.prefer_local {
            SourcePolicy::PreferLocal
        } else {
            SourcePolicy::PreferRemote
        }
    }
}

pub async fn execute(
    cancel: &CancellationToken,
    args: InspectArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    let options = ResolveOptions {
        policy: args.policy(),
        platform: Platform::parse(&settings.platform)?,
    };

    let model = super::resolver().inspect(cancel, &args.image, &options).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&model)?);
    } else {
        print_summary(&args.image, &model);
    }
    Ok(())
}

fn print_summary(reference: &str, model: &Model) {
    println!("Reference:   {}", reference);
    if let Some(image) = model.image_artifact() {
        println!("Digest:      {}", image.digest);
        println!("Source:      {}", image.source);
        if let Some(ref platform) = image.platform {
            println!("Platform:    {}", platform);
        }
    }
    println!("Format:      {}", model.format);
    if let Some(ref version) = model.cog_version {
        println!("Cog version: {}", version);
    }
    if let Some(ref predict) = model.config.predict {
        println!("Predictor:   {}", predict);
    }

    if let Some(ref index) = model.index {
        println!();
        println!("Index {}:", index.digest);
        let mut table = new_table(&["KIND", "DIGEST", "PLATFORM", "SIZE"]);
        for entry in &index.manifests {
            let kind = match entry.kind {
                cog_model::ManifestKind::Image => "image",
                cog_model::ManifestKind::Weights => "weights",
            };
            table.add_row(vec![
                kind.to_string(),
                short_digest(&entry.digest).to_string(),
                entry
                    .platform
                    .as_ref()
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
                format_bytes(entry.size),
            ]);
        }
        println!("{table}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> InspectArgs {
        InspectArgs {
            image: "r8.im/acme/llama".to_string(),
            local: false,
            remote: false,
            prefer_local: false,
            prefer_remote: false,
            json: false,
        }
    }

    #[test]
    fn test_policy_default_prefers_remote() {
        assert_eq!(args().policy(), SourcePolicy::PreferRemote);
    }

    #[test]
    fn test_policy_flags() {
        let mut a = args();
        a.local = true;
        assert_eq!(a.policy(), SourcePolicy::LocalOnly);

        let mut a = args();
        a.remote = true;
        assert_eq!(a.policy(), SourcePolicy::RemoteOnly);

        let mut a = args();
        a.prefer_local = true;
        assert_eq!(a.policy(), SourcePolicy::PreferLocal);
    }
}
