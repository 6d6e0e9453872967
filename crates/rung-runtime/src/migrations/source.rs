//! Discovery of paired upgrade/downgrade files.
//!
//! Migrations are named `<label>.up.sql` and `<label>.down.sql`, anywhere
//! under the migration directory. Labels sorted lexicographically give the
//! version order: the first label is version 1. Version 0 is the "nothing
//! applied" sentinel and has no files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rung_core::error::{Result, RungError};
use tracing::{debug, warn};

pub const UP_SUFFIX: &str = ".up.sql";
pub const DOWN_SUFFIX: &str = ".down.sql";

/// One known migration version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationVersion {
    /// 1-based position in label order.
    pub index: i32,
    /// File name without suffix.
    pub filename: String,
    pub up_path: PathBuf,
    pub down_path: PathBuf,
}

impl MigrationVersion {
    pub async fn upgrade_sql(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.up_path).await?)
    }

    pub async fn downgrade_sql(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.down_path).await?)
    }
}

/// Every version found in a migration directory, in order.
#[derive(Debug, Clone, Default)]
pub struct MigrationSource {
    versions: Vec<MigrationVersion>,
}

impl MigrationSource {
    /// Scan `dir` recursively. A missing directory holds no migrations.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            debug!("Migrations directory does not exist: {:?}", dir);
            return Ok(Self::default());
        }

        let mut files = Vec::new();
        collect_files(dir, &mut files)?;

        let mut upgrades = BTreeMap::new();
        let mut downgrades = BTreeMap::new();

        for path in files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!("Skipping migration file with a non UTF-8 name: {:?}", path);
                continue;
            };

            let (label, target) = if let Some(label) = name.strip_suffix(UP_SUFFIX) {
                (label.to_string(), &mut upgrades)
            } else if let Some(label) = name.strip_suffix(DOWN_SUFFIX) {
                (label.to_string(), &mut downgrades)
            } else {
                continue;
            };

            if let Some(previous) = target.insert(label.clone(), path.clone()) {
                return Err(RungError::ConfigMismatch(format!(
                    "label '{}' appears twice: {:?} and {:?}",
                    label, previous, path
                )));
            }
        }

        Self::pair(upgrades, downgrades)
    }

    fn pair(
        upgrades: BTreeMap<String, PathBuf>,
        mut downgrades: BTreeMap<String, PathBuf>,
    ) -> Result<Self> {
        let missing_down: Vec<&str> = upgrades
            .keys()
            .filter(|label| !downgrades.contains_key(*label))
            .map(String::as_str)
            .collect();
        let missing_up: Vec<&str> = downgrades
            .keys()
            .filter(|label| !upgrades.contains_key(*label))
            .map(String::as_str)
            .collect();

        if !missing_down.is_empty() || !missing_up.is_empty() {
            return Err(RungError::ConfigMismatch(format!(
                "no downgrade for {:?}, no upgrade for {:?}",
                missing_down, missing_up
            )));
        }

        let versions = upgrades
            .into_iter()
            .enumerate()
            .map(|(i, (label, up_path))| {
                let down_path = downgrades.remove(&label).unwrap_or_default();
                MigrationVersion {
                    index: i as i32 + 1,
                    filename: label,
                    up_path,
                    down_path,
                }
            })
            .collect::<Vec<_>>();

        debug!("Loaded {} migration versions", versions.len());
        Ok(Self { versions })
    }

    /// Highest known version index; 0 when there are none.
    pub fn latest(&self) -> i32 {
        self.versions.len() as i32
    }

    /// Version at `index`; the sentinel and out-of-range indexes have none.
    pub fn get(&self, index: i32) -> Option<&MigrationVersion> {
        if index < 1 {
            return None;
        }
        self.versions.get(index as usize - 1)
    }

    /// Label of `index`, empty for the sentinel.
    pub fn label(&self, index: i32) -> &str {
        self.get(index).map(|v| v.filename.as_str()).unwrap_or("")
    }

    pub fn iter(&self) -> impl Iterator<Item = &MigrationVersion> {
        self.versions.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_pair(dir: &Path, label: &str) {
        fs::write(dir.join(format!("{label}.up.sql")), "SELECT 1;").unwrap();
        fs::write(dir.join(format!("{label}.down.sql")), "SELECT 2;").unwrap();
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let source = MigrationSource::load(Path::new("/nonexistent/migrations")).unwrap();
        assert!(source.is_empty());
        assert_eq!(source.latest(), 0);
    }

    #[test]
    fn test_versions_sorted_by_label() {
        let dir = TempDir::new().unwrap();
        write_pair(dir.path(), "003_third");
        write_pair(dir.path(), "001_first");
        write_pair(dir.path(), "002_second");

        let source = MigrationSource::load(dir.path()).unwrap();
        let labels: Vec<_> = source.iter().map(|v| v.filename.as_str()).collect();
        assert_eq!(labels, vec!["001_first", "002_second", "003_third"]);
        assert_eq!(source.latest(), 3);
        assert_eq!(source.get(2).unwrap().index, 2);
        assert!(source.get(2).unwrap().up_path.ends_with("002_second.up.sql"));
        assert!(source.get(2).unwrap().down_path.ends_with("002_second.down.sql"));
    }

    #[test]
    fn test_sentinel_has_no_files() {
        let dir = TempDir::new().unwrap();
        write_pair(dir.path(), "001_init");

        let source = MigrationSource::load(dir.path()).unwrap();
        assert!(source.get(0).is_none());
        assert!(source.get(2).is_none());
        assert_eq!(source.label(0), "");
        assert_eq!(source.label(1), "001_init");
    }

    #[test]
    fn test_nested_directories_are_scanned() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("2024");
        fs::create_dir(&nested).unwrap();
        write_pair(&nested, "002_nested");
        write_pair(dir.path(), "001_top");

        let source = MigrationSource::load(dir.path()).unwrap();
        assert_eq!(source.label(1), "001_top");
        assert_eq!(source.label(2), "002_nested");
    }

    #[test]
    fn test_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        write_pair(dir.path(), "001_init");
        fs::write(dir.path().join("README.md"), "notes").unwrap();
        fs::write(dir.path().join("002_plain.sql"), "SELECT 1;").unwrap();

        let source = MigrationSource::load(dir.path()).unwrap();
        assert_eq!(source.latest(), 1);
    }

    #[test]
    fn test_missing_downgrade_is_rejected() {
        let dir = TempDir::new().unwrap();
        write_pair(dir.path(), "001_init");
        fs::write(dir.path().join("002_users.up.sql"), "CREATE TABLE users();").unwrap();

        let err = MigrationSource::load(dir.path()).unwrap_err();
        match err {
            RungError::ConfigMismatch(msg) => assert!(msg.contains("002_users")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_labels_are_rejected_deterministically() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("001_a.up.sql"), "").unwrap();
        fs::write(dir.path().join("001_b.down.sql"), "").unwrap();

        let first = MigrationSource::load(dir.path()).unwrap_err().to_string();
        let second = MigrationSource::load(dir.path()).unwrap_err().to_string();
        assert_eq!(first, second);
        assert!(first.contains("001_a"));
        assert!(first.contains("001_b"));
    }

    #[test]
    fn test_duplicate_label_is_rejected() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("old");
        fs::create_dir(&nested).unwrap();
        write_pair(dir.path(), "001_init");
        write_pair(&nested, "001_init");

        assert!(matches!(
            MigrationSource::load(dir.path()),
            Err(RungError::ConfigMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_sql_text() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("001_init.up.sql"), "CREATE TABLE t(x int);").unwrap();
        fs::write(dir.path().join("001_init.down.sql"), "DROP TABLE t;").unwrap();

        let source = MigrationSource::load(dir.path()).unwrap();
        let version = source.get(1).unwrap();
        assert_eq!(version.upgrade_sql().await.unwrap(), "CREATE TABLE t(x int);");
        assert_eq!(version.downgrade_sql().await.unwrap(), "DROP TABLE t;");
    }
}
