//! Throwaway databases for migration tests.
//!
//! The server comes from `TEST_DATABASE_URL` only. `POSTGRES_DNS` and
//! `DATABASE_URL` are never read here, so a test run cannot reach the
//! database the CLI is pointed at.

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::{Result, RungError};

/// Environment variable naming the test server.
pub const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

/// Admin connection to the test server.
pub struct TestDatabase {
    admin: PgPool,
    url: String,
}

impl TestDatabase {
    pub async fn from_url(url: &str) -> Result<Self> {
        let admin = PgPoolOptions::new().max_connections(1).connect(url).await?;
        Ok(Self {
            admin,
            url: url.to_string(),
        })
    }

    /// Connect to the server named by [`TEST_DATABASE_URL`].
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var(TEST_DATABASE_URL)
            .map_err(|_| RungError::Config(format!("{} is not set", TEST_DATABASE_URL)))?;
        Self::from_url(&url).await
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Create an empty database for one test.
    ///
    /// Names carry a random suffix, so tests that create and drop the
    /// ledger table can run in parallel.
    pub async fn isolated(&self, test_name: &str) -> Result<IsolatedTestDb> {
        let db_name = format!(
            "rung_test_{}_{}",
            sanitize_db_name(test_name),
            uuid::Uuid::new_v4().simple()
        );
        sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name))
            .execute(&self.admin)
            .await?;

        let url = replace_db_name(&self.url, &db_name);
        let pool = PgPoolOptions::new().max_connections(2).connect(&url).await?;

        Ok(IsolatedTestDb {
            pool,
            db_name,
            url,
            admin: self.admin.clone(),
        })
    }
}

/// A database owned by a single test. Call [`IsolatedTestDb::cleanup`] at
/// the end of the test to drop it.
pub struct IsolatedTestDb {
    pool: PgPool,
    db_name: String,
    url: String,
    admin: PgPool,
}

impl IsolatedTestDb {
    /// Pool for inspecting the database independently of the code under test.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run a SQL script, possibly several statements.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Whether `table` exists in the current schema.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT FROM pg_tables WHERE schemaname = current_schema() AND tablename = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Drop the database, disconnecting anything still attached to it.
    pub async fn cleanup(self) -> Result<()> {
        self.pool.close().await;

        sqlx::query(&format!(
            "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
            self.db_name
        ))
        .execute(&self.admin)
        .await?;
        Ok(())
    }
}

/// Keep `[A-Za-z0-9]`, replace the rest, cap the length so the full name
/// stays under the 63 byte identifier limit.
fn sanitize_db_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(20)
        .collect()
}

/// Point `url` at database `db`, keeping any query string.
fn replace_db_name(url: &str, db: &str) -> String {
    let (base, query) = url.split_at(url.find('?').unwrap_or(url.len()));
    let authority = base.find("://").map_or(0, |i| i + 3);

    match base[authority..].rfind('/') {
        Some(slash) => format!("{}{}{}", &base[..=authority + slash], db, query),
        None => format!("{}/{}{}", base, db, query),
    }
}
