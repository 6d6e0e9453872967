//! Versioning engine: moves the database forward by batches and back to
//! an earlier batch.
//!
//! Each call runs every script plus its ledger bookkeeping in one session,
//! so a batch is either fully applied or not at all. The in-memory state is
//! only advanced after a commit; after a failure it is stale and the engine
//! should be loaded again.

use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::postgres::PgConnection;
use tracing::{debug, info};

use rung_core::error::{Result, RungError};

use super::ledger::{self, LedgerRow};
use super::source::{MigrationSource, MigrationVersion};
use super::state::VersioningState;
use super::statements::split_statements;
use crate::db::ConnectionPool;

/// What one upgrade or downgrade call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Batch applied, or batch reverted to.
    pub batch_id: i32,
    /// Versions touched, in execution order.
    pub versions: Vec<i32>,
}

impl BatchOutcome {
    fn nothing(batch_id: i32) -> Self {
        Self {
            batch_id,
            versions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// One line of the version listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionStatus {
    pub id: i32,
    pub filename: String,
    pub batch_id: Option<i32>,
    pub applied_time: Option<NaiveDateTime>,
}

impl VersionStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_time.is_some()
    }
}

/// Migration state machine over `(current_version, current_batch)`.
pub struct Versioning {
    pool: ConnectionPool,
    source: MigrationSource,
    state: VersioningState,
}

impl Versioning {
    /// Discover migrations under `dir` and reconcile them with the ledger.
    ///
    /// `current_version` replaces the version derived from the ledger; the
    /// caller is responsible for it matching the database.
    pub async fn load_migrations(
        pool: &ConnectionPool,
        dir: impl AsRef<Path>,
        current_version: Option<i32>,
    ) -> Result<Self> {
        let source = MigrationSource::load(dir.as_ref())?;

        let mut session = pool.begin_session().await?;
        let outcome = read_ledger(session.conn()).await;
        let rows = session.finish(outcome).await?;

        let mut state = VersioningState::reconcile(rows, &source)?;

        if let Some(version) = current_version {
            if !(0..=source.latest()).contains(&version) {
                return Err(RungError::InvalidArgument(format!(
                    "starting version {} is outside 0..={}",
                    version,
                    source.latest()
                )));
            }
            debug!(
                ledger_version = state.current_version(),
                version, "Overriding current version"
            );
            state.override_current_version(version);
        }

        info!(
            current_version = state.current_version(),
            current_batch = state.current_batch(),
            latest = source.latest(),
            "Loaded migrations"
        );

        Ok(Self {
            pool: pool.clone(),
            source,
            state,
        })
    }

    pub fn current_version(&self) -> i32 {
        self.state.current_version()
    }

    pub fn current_batch(&self) -> i32 {
        self.state.current_batch()
    }

    /// Highest known version.
    pub fn latest(&self) -> i32 {
        self.source.latest()
    }

    pub fn last_version_of_batch(&self, batch_id: i32) -> Result<i32> {
        self.state.last_version_of_batch(batch_id)
    }

    pub fn state(&self) -> &VersioningState {
        &self.state
    }

    /// Known versions in order, sentinel excluded.
    pub fn versions(&self) -> impl Iterator<Item = &MigrationVersion> {
        self.source.iter()
    }

    /// Label of a version, empty for the sentinel.
    pub fn label(&self, version: i32) -> &str {
        self.source.label(version)
    }

    /// Every version, sentinel first, with ledger details where applied.
    pub fn information(&self) -> Vec<VersionStatus> {
        (0..=self.source.latest())
            .map(|id| match self.state.migration_info().get(&id) {
                Some(entry) => VersionStatus {
                    id,
                    filename: entry
                        .filename
                        .clone()
                        .unwrap_or_else(|| self.source.label(id).to_string()),
                    batch_id: Some(entry.batch_id),
                    applied_time: Some(entry.applied_time),
                },
                None => VersionStatus {
                    id,
                    filename: self.source.label(id).to_string(),
                    batch_id: None,
                    applied_time: None,
                },
            })
            .collect()
    }

    /// Apply every version after the current one up to `to_version` as a
    /// new batch.
    pub async fn apply_new_batch(&mut self, to_version: Option<i32>) -> Result<BatchOutcome> {
        let current = self.state.current_version();
        let to_version = to_version.unwrap_or(current);

        if to_version < current {
            return Err(RungError::InvalidArgument(format!(
                "cannot upgrade to version {} from version {}; downgrade instead",
                to_version, current
            )));
        }
        if to_version > self.source.latest() {
            return Err(RungError::InvalidArgument(format!(
                "version {} does not exist (latest is {})",
                to_version,
                self.source.latest()
            )));
        }

        let batch_id = self.state.next_batch_id();
        if to_version == current {
            info!(version = current, "Already at target version, nothing to apply");
            return Ok(BatchOutcome::nothing(batch_id));
        }

        let mut scripts = Vec::new();
        for index in (current + 1)..=to_version {
            let version = self.version(index)?;
            scripts.push((version.index, version.filename.clone(), version.upgrade_sql().await?));
        }

        let mut session = self.pool.begin_session().await?;
        let outcome = upgrade(session.conn(), &scripts, batch_id).await;
        let (applied, applied_time) = session.finish(outcome).await?;

        self.state.record_batch(batch_id, applied_time, &applied);
        info!(
            batch_id,
            current_version = self.state.current_version(),
            "Applied batch"
        );

        Ok(BatchOutcome {
            batch_id,
            versions: applied.into_iter().map(|(id, _)| id).collect(),
        })
    }

    /// Revert every version newer than the last version of `batch_id`.
    ///
    /// Reverting to batch 0 also drops the ledger table.
    pub async fn revert_to_old_batch(&mut self, batch_id: i32) -> Result<BatchOutcome> {
        let reversed_version = self.state.last_version_of_batch(batch_id)?;
        let current = self.state.current_version();

        if current <= reversed_version {
            info!(batch_id, "Nothing to revert");
            return Ok(BatchOutcome::nothing(batch_id));
        }

        let mut scripts = Vec::new();
        for index in ((reversed_version + 1)..=current).rev() {
            let version = self.version(index)?;
            scripts.push((version.index, version.filename.clone(), version.downgrade_sql().await?));
        }

        let mut session = self.pool.begin_session().await?;
        let outcome = downgrade(session.conn(), &scripts, batch_id == 0).await;
        let reverted = session.finish(outcome).await?;

        self.state.rewind_to_batch(batch_id, reversed_version);
        info!(
            batch_id,
            current_version = self.state.current_version(),
            "Reverted to batch"
        );

        Ok(BatchOutcome {
            batch_id,
            versions: reverted,
        })
    }

    fn version(&self, index: i32) -> Result<&MigrationVersion> {
        self.source.get(index).ok_or_else(|| {
            RungError::InvalidArgument(format!("version {} has no migration files", index))
        })
    }
}

/// (index, filename, sql)
type Script = (i32, String, String);

async fn read_ledger(conn: &mut PgConnection) -> Result<Vec<LedgerRow>> {
    if ledger::exists(conn).await? {
        ledger::fetch_rows(conn).await
    } else {
        Ok(Vec::new())
    }
}

async fn upgrade(
    conn: &mut PgConnection,
    scripts: &[Script],
    batch_id: i32,
) -> Result<(Vec<(i32, String)>, NaiveDateTime)> {
    for (index, filename, sql) in scripts {
        execute_script(conn, filename, sql).await?;
        info!(version = index, filename = %filename, "Upgraded");
    }

    let applied: Vec<(i32, String)> = scripts
        .iter()
        .map(|(index, filename, _)| (*index, filename.clone()))
        .collect();

    // One timestamp for the whole batch, from the server clock.
    let applied_time = ledger::transaction_time(conn).await?;
    ledger::bootstrap(conn).await?;
    ledger::insert_batch(conn, &applied, batch_id, applied_time).await?;

    Ok((applied, applied_time))
}

async fn downgrade(
    conn: &mut PgConnection,
    scripts: &[Script],
    drop_ledger: bool,
) -> Result<Vec<i32>> {
    for (index, filename, sql) in scripts {
        execute_script(conn, filename, sql).await?;
        info!(version = index, filename = %filename, "Downgraded");
    }

    let reverted: Vec<i32> = scripts.iter().map(|(index, _, _)| *index).collect();
    ledger::delete_versions(conn, &reverted).await?;

    if drop_ledger {
        ledger::drop_table(conn).await?;
        info!("Dropped migration ledger");
    }

    Ok(reverted)
}

async fn execute_script(conn: &mut PgConnection, filename: &str, sql: &str) -> Result<()> {
    for (n, statement) in split_statements(sql).iter().enumerate() {
        debug!(filename, statement = n + 1, "{}", statement);
        sqlx::raw_sql(statement).execute(&mut *conn).await?;
    }
    Ok(())
}
