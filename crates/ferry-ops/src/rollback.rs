//! Best-effort reversal of a journal.

use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::journal::{CreatedKind, CreatedPath};

/// Outcome of a rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    /// Files and symlinks removed or restored, counting every file inside a
    /// renamed directory.
    pub files_rolled_back: u64,
    /// Created directories removed.
    pub dirs_removed: u64,
    /// Entries that could not be reversed.
    pub failed: u64,
}

/// Reverses journaled creations, newest first.
#[derive(Debug, Default, Clone, Copy)]
pub struct RollbackManager;

impl RollbackManager {
    /// Undo `entries`. Renamed items are moved back to their origin when
    /// `restore_moved` is set and left in place otherwise. Failures are
    /// logged and counted; processing continues.
    pub fn rollback(entries: &[CreatedPath], restore_moved: bool) -> RollbackReport {
        let mut report = RollbackReport::default();

        for entry in entries.iter().rev() {
            let result = match &entry.kind {
                CreatedKind::File | CreatedKind::Symlink => remove_file(&entry.path),
                CreatedKind::Directory => remove_dir(&entry.path),
                CreatedKind::Renamed { from, .. } if restore_moved => rename_back(&entry.path, from),
                CreatedKind::Renamed { .. } => continue,
            };

            match result {
                Ok(()) if entry.kind == CreatedKind::Directory => report.dirs_removed += 1,
                Ok(()) => report.files_rolled_back += entry.items(),
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Rollback step failed");
                    report.failed += 1;
                }
            }
        }

        debug!(
            files = report.files_rolled_back,
            dirs = report.dirs_removed,
            failed = report.failed,
            "Rollback finished"
        );
        report
    }
}

fn remove_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Directories are removed only when empty; anything left inside was not
/// ours to delete.
fn remove_dir(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn rename_back(path: &Path, from: &Path) -> std::io::Result<()> {
    if let Some(parent) = from.parent()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(path, from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::Journal;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_rollback_removes_in_reverse() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("out");
        let file = dir.join("a.txt");

        let mut journal = Journal::new();
        fs::create_dir(&dir).unwrap();
        journal.record_dir(&dir);
        fs::write(&file, "a").unwrap();
        journal.record_file(&file);

        let report = RollbackManager::rollback(journal.entries(), true);
        assert_eq!(report.files_rolled_back, 1);
        assert_eq!(report.dirs_removed, 1);
        assert_eq!(report.failed, 0);
        assert!(!dir.exists());
    }

    #[test]
    fn test_rollback_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        let mut journal = Journal::new();
        journal.record_file(temp.path().join("gone.txt"));

        let report = RollbackManager::rollback(journal.entries(), true);
        assert_eq!(report.files_rolled_back, 1);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_rollback_keeps_foreign_contents() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("out");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("theirs.txt"), "keep").unwrap();

        let mut journal = Journal::new();
        journal.record_dir(&dir);

        let report = RollbackManager::rollback(journal.entries(), true);
        assert_eq!(report.failed, 1);
        assert!(dir.join("theirs.txt").exists());
    }

    #[test]
    fn test_rollback_restores_renamed() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("src/notes");
        let to = temp.path().join("dst/notes");
        fs::create_dir_all(&to).unwrap();
        fs::write(to.join("a.txt"), "a").unwrap();
        fs::write(to.join("b.txt"), "b").unwrap();

        let mut journal = Journal::new();
        journal.record_rename(&to, &from, 2);

        let report = RollbackManager::rollback(journal.entries(), false);
        assert_eq!(report.files_rolled_back, 0);
        assert!(to.exists());

        let report = RollbackManager::rollback(journal.entries(), true);
        assert_eq!(report.files_rolled_back, 2);
        assert!(from.join("b.txt").exists());
        assert!(!to.exists());
    }
}
