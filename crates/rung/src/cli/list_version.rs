use anyhow::Result;
use clap::Parser;
use console::style;

use rung_runtime::VersionStatus;

use super::{print_banner, Context};

const HEADERS: [&str; 4] = ["id", "filename", "batch_id", "applied_time"];

/// Show every known version and whether it is applied.
#[derive(Parser)]
pub struct ListVersionCommand {
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

impl ListVersionCommand {
    pub async fn execute(self, ctx: &Context) -> Result<()> {
        let versioning = ctx.versioning(None).await?;
        let info = versioning.information();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
            return Ok(());
        }

        print_banner("Versions");
        print!("{}", render_table(&info));
        println!();
        println!(
            "  {} version {} of {}, batch {}",
            style("ℹ").blue(),
            versioning.current_version(),
            versioning.latest(),
            versioning.current_batch()
        );
        println!();

        Ok(())
    }
}

/// Render the listing as an aligned plain-text table, one row per line.
pub fn render_table(info: &[VersionStatus]) -> String {
    let rows: Vec<[String; 4]> = info
        .iter()
        .map(|v| {
            [
                v.id.to_string(),
                v.filename.clone(),
                v.batch_id.map(|b| b.to_string()).unwrap_or_default(),
                v.applied_time
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_line(&mut out, &HEADERS.map(String::from), &widths);
    push_line(&mut out, &widths.map(|w| "-".repeat(w)), &widths);
    for row in &rows {
        push_line(&mut out, row, &widths);
    }
    out
}

fn push_line(out: &mut String, cells: &[String; 4], widths: &[usize; 4]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str("  ");
    out.push_str(line.trim_end());
    out.push('\n');
}
