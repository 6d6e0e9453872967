mod downgrade;
mod list_version;
mod upgrade;

pub use downgrade::DowngradeCommand;
pub use list_version::ListVersionCommand;
pub use upgrade::UpgradeCommand;

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use console::style;
use tracing::debug;

use rung_core::config::RungConfig;
use rung_runtime::{ConnectionPool, Versioning};

/// rung - batch-based PostgreSQL schema migrations
#[derive(Parser)]
#[command(name = "rung")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path.
    #[arg(short, long, default_value = "rung.toml", global = true)]
    pub config: PathBuf,

    /// Migrations directory path (overrides the configured one).
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Log every executed statement.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show every known version and whether it is applied.
    ListVersion(ListVersionCommand),

    /// Apply pending versions as a new batch.
    Upgrade(UpgradeCommand),

    /// Revert to an earlier batch.
    Downgrade(DowngradeCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        // Load .env if present
        dotenvy::dotenv().ok();

        let mut config = RungConfig::load(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?;
        if let Some(dir) = self.migrations_dir {
            config.migrations.path = dir;
        }

        init_tracing(self.verbose || config.logging.debug);

        let ctx = Context::connect(config).await?;
        let result = match self.command {
            Commands::ListVersion(cmd) => cmd.execute(&ctx).await,
            Commands::Upgrade(cmd) => cmd.execute(&ctx).await,
            Commands::Downgrade(cmd) => cmd.execute(&ctx).await,
        };
        ctx.pool.close().await;

        result
    }
}

fn init_tracing(debug: bool) {
    let log_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()))
        .init();
}

/// What every command runs against.
pub struct Context {
    pub config: RungConfig,
    pub pool: ConnectionPool,
}

impl Context {
    async fn connect(config: RungConfig) -> Result<Self> {
        let pool = ConnectionPool::connect(&config.database)
            .await
            .context("Cannot reach the database")?;

        if let Err(e) = pool.health_check_connection().await {
            pool.close().await;
            return Err(anyhow::Error::new(e).context("Database health check failed"));
        }

        Ok(Self { config, pool })
    }

    /// Load the versioning engine from the configured directory.
    pub async fn versioning(&self, from_version: Option<i32>) -> Result<Versioning> {
        let dir = &self.config.migrations.path;
        debug!("Loading migrations from {}", dir.display());
        Versioning::load_migrations(&self.pool, dir, from_version)
            .await
            .with_context(|| format!("Failed to load migrations from {}", dir.display()))
    }

    /// Run `op` under the configured operation timeout, if any.
    pub async fn bounded<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = rung_core::Result<T>>,
    {
        match self.config.migrations.operation_timeout() {
            Some(limit) => match tokio::time::timeout(limit, op).await {
                Ok(result) => Ok(result?),
                Err(_) => anyhow::bail!("Operation did not finish within {:?}", limit),
            },
            None => Ok(op.await?),
        }
    }
}

pub(crate) fn print_banner(title: &str) {
    println!();
    println!(
        "  {}  {}",
        style("rung").bold().cyan(),
        style(title).bold()
    );
    println!();
}
