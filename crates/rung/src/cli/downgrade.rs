use anyhow::Result;
use clap::Parser;
use console::style;

use super::{print_banner, Context};

/// Revert to an earlier batch.
#[derive(Parser)]
pub struct DowngradeCommand {
    /// Batch to revert to (defaults to the one before the current batch).
    #[arg(long)]
    pub to_batch: Option<i32>,

    /// Treat the database as being at this version instead of what the
    /// ledger says.
    #[arg(long)]
    pub from_version: Option<i32>,
}

impl DowngradeCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let mut versioning = ctx.versioning(self.from_version).await?;

        print_banner("Downgrade");

        if versioning.current_batch() == 0 && self.to_batch.is_none() {
            println!("  {} No batch applied, nothing to revert", style("ℹ").blue());
            println!();
            return Ok(());
        }
        let to_batch = self
            .to_batch
            .unwrap_or_else(|| versioning.current_batch() - 1);

        println!(
            "  {} Reverting batch {} to batch {}...",
            style("→").dim(),
            versioning.current_batch(),
            to_batch
        );

        let outcome = ctx
            .bounded(versioning.revert_to_old_batch(to_batch))
            .await?;

        if outcome.is_empty() {
            println!("  {} Nothing to revert", style("ℹ").blue());
        } else {
            for id in &outcome.versions {
                println!(
                    "  {} Reverted: {}",
                    style("✓").green(),
                    style(versioning.label(*id)).cyan()
                );
            }
            println!();
            println!(
                "  {} Reverted {} version(s), now at version {}",
                style("✓").green(),
                outcome.versions.len(),
                versioning.current_version()
            );
        }
        println!();

        Ok(())
    }
}
