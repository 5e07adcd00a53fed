// src/review/progress.rs - Per-interval completion state
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data;
use crate::error::PersistenceError;

pub const PROGRESS_FILE: &str = "proofread_progress.csv";
const PROGRESS_HEADER: [&str; 2] = ["error_position", "is_completed"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRow {
    #[serde(alias = "Error")]
    pub error_position: usize,
    #[serde(deserialize_with = "lenient_bool")]
    pub is_completed: bool,
}

/// Accepts `true`/`True`/`1` and their negatives.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid completion flag `{}`", other))),
    }
}

/// One row per interval, persisted after every change.
#[derive(Debug, Clone)]
pub struct ProgressTable {
    path: PathBuf,
    rows: Vec<ProgressRow>,
}

impl ProgressTable {
    /// Loads the table at `path`, or creates and persists a fresh one with
    /// every interval incomplete. A table whose row count disagrees with
    /// `interval_count` is padded or truncated.
    pub fn load_or_create(path: &Path, interval_count: usize) -> Result<Self, PersistenceError> {
        if !path.exists() {
            let table = Self::fresh(path, interval_count);
            table.persist()?;
            info!("Created progress table {} with {} rows", path.display(), interval_count);
            return Ok(table);
        }

        let mut rows: Vec<ProgressRow> = data::read_csv(path)?;
        if rows.len() != interval_count {
            warn!(
                "Progress table {} has {} rows for {} intervals, reconciling",
                path.display(),
                rows.len(),
                interval_count
            );
            rows.truncate(interval_count);
            let existing = rows.len();
            rows.extend((existing..interval_count).map(|i| ProgressRow {
                error_position: i + 1,
                is_completed: false,
            }));
        }
        Ok(Self {
            path: path.to_path_buf(),
            rows,
        })
    }

    fn fresh(path: &Path, interval_count: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            rows: (0..interval_count)
                .map(|i| ProgressRow {
                    error_position: i + 1,
                    is_completed: false,
                })
                .collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_completed(&self, position: usize) -> bool {
        self.rows.get(position).is_some_and(|r| r.is_completed)
    }

    pub fn completed_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_completed).count()
    }

    /// Position to resume at: the first incomplete row, or 0.
    pub fn first_incomplete(&self) -> usize {
        self.rows.iter().position(|r| !r.is_completed).unwrap_or(0)
    }

    /// Marks `position` complete in memory. Returns false when out of range.
    pub fn mark_completed(&mut self, position: usize) -> bool {
        match self.rows.get_mut(position) {
            Some(row) => {
                row.is_completed = true;
                true
            }
            None => false,
        }
    }

    pub fn persist(&self) -> Result<(), PersistenceError> {
        data::write_csv_atomic(&self.path, &PROGRESS_HEADER, &self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);
        let table = ProgressTable::load_or_create(&path, 3).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.first_incomplete(), 0);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "error_position,is_completed\n1,false\n2,false\n3,false\n");
    }

    #[test]
    fn test_resume_at_first_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);
        let mut table = ProgressTable::load_or_create(&path, 4).unwrap();
        table.mark_completed(0);
        table.mark_completed(1);
        table.mark_completed(3);
        table.persist().unwrap();

        let reloaded = ProgressTable::load_or_create(&path, 4).unwrap();
        assert_eq!(reloaded.first_incomplete(), 2);
        assert_eq!(reloaded.completed_count(), 3);
    }

    #[test]
    fn test_all_complete_resumes_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);
        let mut table = ProgressTable::load_or_create(&path, 2).unwrap();
        table.mark_completed(0);
        table.mark_completed(1);
        assert_eq!(table.first_incomplete(), 0);
        assert!(!table.mark_completed(2));
    }

    #[test]
    fn test_legacy_column_name_and_reconcile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);
        std::fs::write(&path, "Error,is_completed\n1,True\n").unwrap();
        let table = ProgressTable::load_or_create(&path, 3).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.is_completed(0));
        assert!(!table.is_completed(2));
        assert_eq!(table.first_incomplete(), 1);
    }
}
