//! The `migration` ledger table.
//!
//! One row per applied version. Every function runs on the caller's
//! connection so ledger writes share the transaction of the SQL they record.

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::postgres::PgConnection;

use rung_core::error::Result;

pub const LEDGER_TABLE: &str = "migration";

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LedgerRow {
    /// Version index.
    pub id: i32,
    pub filename: Option<String>,
    pub batch_id: i32,
    pub applied_time: NaiveDateTime,
}

/// Whether the ledger table exists in the current schema.
pub async fn exists(conn: &mut PgConnection) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT FROM pg_tables WHERE schemaname = current_schema() AND tablename = $1)",
    )
    .bind(LEDGER_TABLE)
    .fetch_one(conn)
    .await?;
    Ok(exists)
}

/// All rows in the order they were applied.
pub async fn fetch_rows(conn: &mut PgConnection) -> Result<Vec<LedgerRow>> {
    let rows = sqlx::query_as::<_, LedgerRow>(
        "SELECT id, filename, batch_id, applied_time FROM migration ORDER BY applied_time, id",
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Create the ledger table if it is missing.
pub async fn bootstrap(conn: &mut PgConnection) -> Result<()> {
    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS migration (
            id INTEGER NOT NULL CONSTRAINT migration_pk PRIMARY KEY,
            filename TEXT,
            batch_id INTEGER NOT NULL,
            applied_time TIMESTAMP NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(conn)
    .await?;
    Ok(())
}

/// Start time of the current transaction, in the session time zone.
///
/// The same clock the `applied_time` column default uses.
pub async fn transaction_time(conn: &mut PgConnection) -> Result<NaiveDateTime> {
    let now: NaiveDateTime = sqlx::query_scalar("SELECT LOCALTIMESTAMP")
        .fetch_one(conn)
        .await?;
    Ok(now)
}

/// Record `versions` (index, filename) as one batch applied at `applied_time`.
pub async fn insert_batch(
    conn: &mut PgConnection,
    versions: &[(i32, String)],
    batch_id: i32,
    applied_time: NaiveDateTime,
) -> Result<u64> {
    if versions.is_empty() {
        return Ok(0);
    }

    let ids: Vec<i32> = versions.iter().map(|(id, _)| *id).collect();
    let filenames: Vec<String> = versions.iter().map(|(_, name)| name.clone()).collect();

    let result = sqlx::query(
        r#"
        INSERT INTO migration (id, filename, batch_id, applied_time)
        SELECT v.id, v.filename, $3, $4
        FROM UNNEST($1::INTEGER[], $2::TEXT[]) AS v(id, filename)
        "#,
    )
    .bind(ids)
    .bind(filenames)
    .bind(batch_id)
    .bind(applied_time)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Forget reverted versions.
pub async fn delete_versions(conn: &mut PgConnection, ids: &[i32]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query("DELETE FROM migration WHERE id = ANY($1)")
        .bind(ids.to_vec())
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Drop the ledger table.
pub async fn drop_table(conn: &mut PgConnection) -> Result<()> {
    sqlx::raw_sql("DROP TABLE IF EXISTS migration")
        .execute(conn)
        .await?;
    Ok(())
}
