#![allow(dead_code)]

use std::fs;
use std::path::Path;

use rung_core::config::DatabaseConfig;
use rung_core::testing::{IsolatedTestDb, TestDatabase};
use rung_runtime::ConnectionPool;

/// A fresh database for one test, or `None` when no test server is configured.
pub async fn isolated_db(test_name: &str) -> Option<IsolatedTestDb> {
    let server = match TestDatabase::from_env().await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("skipping {test_name}: {e}");
            return None;
        }
    };
    Some(server.isolated(test_name).await.expect("create isolated database"))
}

pub fn database_config(url: &str, max_connections: u32) -> DatabaseConfig {
    DatabaseConfig {
        url: url.to_string(),
        min_connections: 0,
        max_connections,
        acquire_timeout_secs: 10,
        ..Default::default()
    }
}

pub async fn pool_for(db: &IsolatedTestDb, max_connections: u32) -> ConnectionPool {
    ConnectionPool::connect(&database_config(db.url(), max_connections))
        .await
        .expect("connect pool")
}

pub fn write_pair(dir: &Path, label: &str, up: &str, down: &str) {
    fs::write(dir.join(format!("{label}.up.sql")), up).unwrap();
    fs::write(dir.join(format!("{label}.down.sql")), down).unwrap();
}

pub async fn ledger_count(db: &IsolatedTestDb) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM migration")
        .fetch_one(db.pool())
        .await
        .unwrap()
}
