use anyhow::Result;
use clap::Parser;
use console::style;

use super::{print_banner, Context};

/// Apply pending versions as a new batch.
#[derive(Parser)]
pub struct UpgradeCommand {
    /// Treat the database as being at this version instead of what the
    /// ledger says.
    #[arg(long)]
    pub from_version: Option<i32>,

    /// Last version to apply (defaults to the latest).
    #[arg(long)]
    pub to_version: Option<i32>,
}

impl UpgradeCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let mut versioning = ctx.versioning(self.from_version).await?;
        let to_version = self.to_version.unwrap_or_else(|| versioning.latest());

        print_banner("Upgrade");

        if versioning.current_version() >= to_version {
            println!(
                "  {} Already at version {}, nothing to apply",
                style("ℹ").blue(),
                versioning.current_version()
            );
            println!();
            return Ok(());
        }

        println!(
            "  {} Upgrading from version {} to {}...",
            style("→").dim(),
            versioning.current_version(),
            to_version
        );

        let outcome = ctx
            .bounded(versioning.apply_new_batch(Some(to_version)))
            .await?;

        for id in &outcome.versions {
            println!(
                "  {} Applied: {}",
                style("✓").green(),
                style(versioning.label(*id)).cyan()
            );
        }
        println!();
        println!(
            "  {} Batch {} applied {} version(s)",
            style("✓").green(),
            outcome.batch_id,
            outcome.versions.len()
        );
        println!();

        Ok(())
    }
}
