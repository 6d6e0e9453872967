use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL (DSN).
    #[serde(default)]
    pub url: String,

    /// Connections kept open by the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Upper bound on concurrently checked out connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long `acquire` may wait for a free slot, in seconds.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Reconnects attempted when a checked out connection is dead.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// TCP keepalive tuning.
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            reconnect_attempts: default_reconnect_attempts(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

fn default_min_connections() -> u32 {
    2
}

fn default_max_connections() -> u32 {
    4
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_reconnect_attempts() -> u32 {
    1
}

/// TCP keepalive settings, applied as server-side run-time parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Seconds of idleness before the first probe.
    #[serde(default = "default_keepalive_idle")]
    pub idle_secs: u32,

    /// Seconds between probes.
    #[serde(default = "default_keepalive_interval")]
    pub interval_secs: u32,

    /// Unanswered probes before the connection is considered dead.
    #[serde(default = "default_keepalive_count")]
    pub count: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            idle_secs: default_keepalive_idle(),
            interval_secs: default_keepalive_interval(),
            count: default_keepalive_count(),
        }
    }
}

impl KeepaliveConfig {
    /// Startup parameters understood by PostgreSQL.
    pub fn as_runtime_params(&self) -> [(&'static str, String); 3] {
        [
            ("tcp_keepalives_idle", self.idle_secs.to_string()),
            ("tcp_keepalives_interval", self.interval_secs.to_string()),
            ("tcp_keepalives_count", self.count.to_string()),
        ]
    }
}

fn default_keepalive_idle() -> u32 {
    30
}

fn default_keepalive_interval() -> u32 {
    10
}

fn default_keepalive_count() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_database_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.reconnect_attempts, 1);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(30));
        assert_eq!(config.keepalive.idle_secs, 30);
        assert_eq!(config.keepalive.interval_secs, 10);
        assert_eq!(config.keepalive.count, 5);
    }

    #[test]
    fn test_parse_database_config() {
        let toml = r#"
            url = "postgres://localhost/test"
            max_connections = 8

            [keepalive]
            idle_secs = 60
        "#;

        let config: DatabaseConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.keepalive.idle_secs, 60);
        assert_eq!(config.keepalive.count, 5);
    }

    #[test]
    fn test_keepalive_runtime_params() {
        let params = KeepaliveConfig::default().as_runtime_params();
        assert_eq!(params[0], ("tcp_keepalives_idle", "30".to_string()));
        assert_eq!(params[2], ("tcp_keepalives_count", "5".to_string()));
    }
}
