mod database;

pub use database::{DatabaseConfig, KeepaliveConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, RungError};

/// Environment variable holding the database DSN.
pub const ENV_POSTGRES_DSN: &str = "POSTGRES_DNS";
/// Fallback environment variable for the database DSN.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Environment variable holding the migration directory.
pub const ENV_MIGRATION_PATH: &str = "MIGRATION_PATH";
/// Environment variable enabling debug logging.
pub const ENV_DEBUG: &str = "DEBUG";

/// Root configuration for rung.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RungConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration discovery and execution.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RungConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| RungError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| RungError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from `path` when it exists, otherwise start from defaults, then
    /// apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            tracing::debug!("Loading configuration from {}", path.display());
            Self::from_file(path)?
        } else {
            tracing::debug!(
                "No configuration file at {}, using environment",
                path.display()
            );
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_POSTGRES_DSN).or_else(|| non_empty(ENV_DATABASE_URL)) {
            self.database.url = url;
        }

        if let Some(path) = non_empty(ENV_MIGRATION_PATH) {
            self.migrations.path = PathBuf::from(path);
        }

        if let Some(debug) = non_empty(ENV_DEBUG) {
            self.logging.debug = matches!(
                debug.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    /// Reject configurations the pool cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(RungError::Config(format!(
                "database url is empty; set [database].url, {} or {}",
                ENV_POSTGRES_DSN, ENV_DATABASE_URL
            )));
        }

        if self.database.max_connections == 0 {
            return Err(RungError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(RungError::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        Ok(())
    }
}

/// Migration discovery and execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding `<label>.up.sql` / `<label>.down.sql` pairs.
    #[serde(default = "default_migrations_path")]
    pub path: PathBuf,

    /// Deadline for a whole upgrade or downgrade, in seconds. Zero disables it.
    #[serde(default)]
    pub operation_timeout_secs: u64,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            path: default_migrations_path(),
            operation_timeout_secs: 0,
        }
    }
}

impl MigrationsConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_secs > 0).then(|| Duration::from_secs(self.operation_timeout_secs))
    }
}

fn default_migrations_path() -> PathBuf {
    PathBuf::from("migrations")
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit debug-level logs.
    #[serde(default)]
    pub debug: bool,
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
