use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::warn;

use rung_core::error::{Result, RungError};

use super::ledger::LedgerRow;
use super::source::MigrationSource;

/// Ledger details of one applied version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub filename: Option<String>,
    pub batch_id: i32,
    pub applied_time: NaiveDateTime,
}

/// Where the database stands, derived from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersioningState {
    current_version: i32,
    current_batch: i32,
    /// Batch id to the highest version in it. Always holds `0 -> 0`.
    batch_info: BTreeMap<i32, i32>,
    migration_info: BTreeMap<i32, LedgerEntry>,
}

impl Default for VersioningState {
    fn default() -> Self {
        Self {
            current_version: 0,
            current_batch: 0,
            batch_info: BTreeMap::from([(0, 0)]),
            migration_info: BTreeMap::new(),
        }
    }
}

impl VersioningState {
    /// Replay ledger rows in applied order.
    ///
    /// Rows must have strictly increasing versions that exist in `source`,
    /// and batch ids that start at 1 and never skip or go back.
    pub fn reconcile(rows: Vec<LedgerRow>, source: &MigrationSource) -> Result<Self> {
        let mut state = Self::default();

        for row in rows {
            if row.id < 1 || row.id > source.latest() {
                return Err(RungError::CorruptLedger(format!(
                    "version {} has no migration files (latest known is {})",
                    row.id,
                    source.latest()
                )));
            }
            if row.id <= state.current_version {
                return Err(RungError::CorruptLedger(format!(
                    "version {} was applied after version {}",
                    row.id, state.current_version
                )));
            }
            if row.batch_id < state.current_batch || row.batch_id > state.current_batch + 1 {
                return Err(RungError::CorruptLedger(format!(
                    "version {} is in batch {} but follows batch {}",
                    row.id, row.batch_id, state.current_batch
                )));
            }

            let label = source.label(row.id);
            if row.filename.as_deref() != Some(label) {
                warn!(
                    version = row.id,
                    recorded = ?row.filename,
                    on_disk = label,
                    "Ledger filename differs from migration file"
                );
            }

            state.batch_info.insert(row.batch_id, row.id);
            state.current_version = row.id;
            state.current_batch = row.batch_id;
            state.migration_info.insert(
                row.id,
                LedgerEntry {
                    filename: row.filename,
                    batch_id: row.batch_id,
                    applied_time: row.applied_time,
                },
            );
        }

        Ok(state)
    }

    pub fn current_version(&self) -> i32 {
        self.current_version
    }

    pub fn current_batch(&self) -> i32 {
        self.current_batch
    }

    pub fn batch_info(&self) -> &BTreeMap<i32, i32> {
        &self.batch_info
    }

    pub fn migration_info(&self) -> &BTreeMap<i32, LedgerEntry> {
        &self.migration_info
    }

    /// Highest version recorded in `batch_id`.
    pub fn last_version_of_batch(&self, batch_id: i32) -> Result<i32> {
        self.batch_info
            .get(&batch_id)
            .copied()
            .ok_or(RungError::BatchNotFound(batch_id))
    }

    /// Batch id for the next upgrade.
    ///
    /// `batch_info` counts the sentinel, so its length is one more than the
    /// number of recorded batches.
    pub fn next_batch_id(&self) -> i32 {
        if self.current_batch == 0 {
            1
        } else {
            self.batch_info.len() as i32
        }
    }

    /// Point the state at another starting version without touching the
    /// ledger view.
    pub(crate) fn override_current_version(&mut self, version: i32) {
        self.current_version = version;
    }

    /// Account for a committed upgrade.
    pub(crate) fn record_batch(
        &mut self,
        batch_id: i32,
        applied_time: NaiveDateTime,
        versions: &[(i32, String)],
    ) {
        let Some((last, _)) = versions.last() else {
            return;
        };

        for (id, filename) in versions {
            self.migration_info.insert(
                *id,
                LedgerEntry {
                    filename: Some(filename.clone()),
                    batch_id,
                    applied_time,
                },
            );
        }
        self.batch_info.insert(batch_id, *last);
        self.current_version = *last;
        self.current_batch = batch_id;
    }

    /// Account for a committed revert down to `batch_id`.
    pub(crate) fn rewind_to_batch(&mut self, batch_id: i32, version: i32) {
        self.migration_info.retain(|id, _| *id <= version);
        self.batch_info.retain(|batch, _| *batch <= batch_id);
        self.current_version = version;
        self.current_batch = batch_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    fn source_with(count: usize) -> (TempDir, MigrationSource) {
        let dir = TempDir::new().unwrap();
        for i in 1..=count {
            fs::write(dir.path().join(format!("{i:03}_v.up.sql")), "").unwrap();
            fs::write(dir.path().join(format!("{i:03}_v.down.sql")), "").unwrap();
        }
        let source = MigrationSource::load(dir.path()).unwrap();
        (dir, source)
    }

    fn at(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, minute, 0)
            .unwrap()
    }

    fn row(id: i32, batch_id: i32, minute: u32) -> LedgerRow {
        LedgerRow {
            id,
            filename: Some(format!("{id:03}_v")),
            batch_id,
            applied_time: at(minute),
        }
    }

    #[test]
    fn test_empty_ledger() {
        let (_dir, source) = source_with(2);
        let state = VersioningState::reconcile(Vec::new(), &source).unwrap();

        assert_eq!(state.current_version(), 0);
        assert_eq!(state.current_batch(), 0);
        assert_eq!(state.last_version_of_batch(0).unwrap(), 0);
        assert_eq!(state.next_batch_id(), 1);
        assert!(state.migration_info().is_empty());
    }

    #[test]
    fn test_reconcile_batches() {
        let (_dir, source) = source_with(4);
        let rows = vec![row(1, 1, 0), row(2, 1, 0), row(3, 2, 5)];

        let state = VersioningState::reconcile(rows, &source).unwrap();
        assert_eq!(state.current_version(), 3);
        assert_eq!(state.current_batch(), 2);
        assert_eq!(state.last_version_of_batch(1).unwrap(), 2);
        assert_eq!(state.last_version_of_batch(2).unwrap(), 3);
        assert_eq!(state.next_batch_id(), 3);
        assert_eq!(state.migration_info()[&2].batch_id, 1);
    }

    #[test]
    fn test_unknown_batch() {
        let (_dir, source) = source_with(1);
        let state = VersioningState::reconcile(vec![row(1, 1, 0)], &source).unwrap();

        assert!(matches!(
            state.last_version_of_batch(5),
            Err(RungError::BatchNotFound(5))
        ));
        assert!(matches!(
            state.last_version_of_batch(-1),
            Err(RungError::BatchNotFound(-1))
        ));
    }

    #[test]
    fn test_rejects_version_going_backwards() {
        let (_dir, source) = source_with(3);
        let rows = vec![row(2, 1, 0), row(1, 2, 5)];

        assert!(matches!(
            VersioningState::reconcile(rows, &source),
            Err(RungError::CorruptLedger(_))
        ));
    }

    #[test]
    fn test_rejects_batch_gap() {
        let (_dir, source) = source_with(3);
        let rows = vec![row(1, 1, 0), row(2, 3, 5)];

        assert!(matches!(
            VersioningState::reconcile(rows, &source),
            Err(RungError::CorruptLedger(_))
        ));
    }

    #[test]
    fn test_rejects_first_batch_not_one() {
        let (_dir, source) = source_with(1);

        assert!(matches!(
            VersioningState::reconcile(vec![row(1, 2, 0)], &source),
            Err(RungError::CorruptLedger(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let (_dir, source) = source_with(1);

        assert!(matches!(
            VersioningState::reconcile(vec![row(1, 1, 0), row(2, 1, 0)], &source),
            Err(RungError::CorruptLedger(_))
        ));
    }

    #[test]
    fn test_renamed_file_is_tolerated() {
        let (_dir, source) = source_with(1);
        let mut renamed = row(1, 1, 0);
        renamed.filename = Some("001_old_name".to_string());

        let state = VersioningState::reconcile(vec![renamed], &source).unwrap();
        assert_eq!(state.current_version(), 1);
    }

    #[test]
    fn test_record_then_rewind() {
        let (_dir, source) = source_with(3);
        let mut state = VersioningState::reconcile(vec![row(1, 1, 0)], &source).unwrap();

        state.record_batch(
            2,
            at(10),
            &[(2, "002_v".to_string()), (3, "003_v".to_string())],
        );
        assert_eq!(state.current_version(), 3);
        assert_eq!(state.current_batch(), 2);
        assert_eq!(state.last_version_of_batch(2).unwrap(), 3);
        assert_eq!(state.next_batch_id(), 3);

        state.rewind_to_batch(1, 1);
        assert_eq!(state.current_version(), 1);
        assert_eq!(state.current_batch(), 1);
        assert!(state.last_version_of_batch(2).is_err());
        assert_eq!(state.migration_info().len(), 1);

        state.rewind_to_batch(0, 0);
        assert_eq!(state, VersioningState::default());
    }
}
