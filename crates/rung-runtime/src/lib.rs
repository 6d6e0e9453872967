pub mod db;
pub mod migrations;

pub use db::{ConnectionPool, PooledConnection, ReconnectPolicy, Session};
pub use migrations::{BatchOutcome, MigrationSource, VersionStatus, Versioning};
