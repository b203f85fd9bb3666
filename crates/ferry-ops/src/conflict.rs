//! Name-collision detection against a destination directory.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use ferry_core::{ConflictRecord, Result, SourceItem, TransferError};
use ferry_scan::{PlannedFile, TransferPlan};

/// Advisory conflict list for a whole plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictPreview {
    /// The first conflicts found, capped.
    pub conflicts: Vec<ConflictRecord>,
    /// Number of conflicts found in total.
    pub total: usize,
}

/// Finds destination entries whose name matches an incoming item.
///
/// Matching is by exact name against a snapshot of the directory taken at
/// call time; nothing is compared by content.
#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector {
    cap: usize,
}

impl ConflictDetector {
    /// `cap` bounds the number of records returned.
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    /// Check `items` against the current entries of `destination_dir`.
    /// A missing destination has no conflicts.
    pub fn check(&self, destination_dir: &Path, items: &[SourceItem]) -> Result<Vec<ConflictRecord>> {
        let Some(names) = snapshot(destination_dir)? else {
            return Ok(Vec::new());
        };

        let mut conflicts = Vec::new();
        for item in items {
            if conflicts.len() >= self.cap {
                break;
            }
            if !names.contains(&OsString::from(item.name.as_str())) {
                continue;
            }
            let path = destination_dir.join(item.name.as_str());
            // Gone since the snapshot: not a conflict any more.
            let Ok(meta) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            conflicts.push(record_for(item, None, path, &meta, meta.is_dir()));
        }
        Ok(conflicts)
    }

    /// Run the check over every file of a plan, one snapshot per
    /// destination directory.
    pub fn preview(&self, plan: &TransferPlan, destination: &Path) -> ConflictPreview {
        let mut snapshots: HashMap<PathBuf, Option<HashSet<OsString>>> = HashMap::new();
        let mut preview = ConflictPreview::default();

        for file in &plan.files {
            let dest = file.dest_path(destination);
            let (Some(parent), Some(name)) = (dest.parent(), dest.file_name()) else {
                continue;
            };
            let names = snapshots
                .entry(parent.to_path_buf())
                .or_insert_with(|| snapshot(parent).ok().flatten());
            if !names.as_ref().is_some_and(|n| n.contains(name)) {
                continue;
            }
            let Ok(meta) = std::fs::symlink_metadata(&dest) else {
                continue;
            };

            preview.total += 1;
            if preview.conflicts.len() < self.cap {
                let record = Self::probe_record(file, dest, &meta);
                preview.conflicts.push(record);
            }
        }

        preview
    }

    /// Record for a planned file whose destination already exists.
    pub fn probe_record(file: &PlannedFile, dest: PathBuf, existing: &Metadata) -> ConflictRecord {
        let item = SourceItem::new(
            file.name.clone(),
            file.size,
            file.modified.map(DateTime::<Utc>::from),
        );
        record_for(&item, Some(file.path.clone()), dest, existing, existing.is_dir())
    }

    /// Record for a directory the executor must create where a
    /// non-directory already sits.
    pub fn directory_record(
        source_dir: &Path,
        dest: PathBuf,
        existing: &Metadata,
    ) -> ConflictRecord {
        let source_meta = std::fs::symlink_metadata(source_dir).ok();
        let item = SourceItem::new(
            source_dir
                .file_name()
                .map(|n| CompactString::new(n.to_string_lossy()))
                .unwrap_or_default(),
            0,
            source_meta
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from),
        );
        record_for(&item, Some(source_dir.to_path_buf()), dest, existing, true)
    }

    /// First free sibling of `path` named `stem (N).ext`, counting from 1.
    pub fn unique_name(path: &Path) -> PathBuf {
        let parent = path.parent().unwrap_or(Path::new(""));
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

        (1u64..)
            .map(|n| match &extension {
                Some(ext) => parent.join(format!("{stem} ({n}).{ext}")),
                None => parent.join(format!("{stem} ({n})")),
            })
            .find(|candidate| std::fs::symlink_metadata(candidate).is_err())
            .unwrap_or_else(|| path.to_path_buf())
    }
}

fn record_for(
    item: &SourceItem,
    source_path: Option<PathBuf>,
    dest: PathBuf,
    existing: &Metadata,
    is_directory: bool,
) -> ConflictRecord {
    let size = if existing.is_dir() { 0 } else { existing.len() };
    let modified = existing.modified().ok().map(DateTime::<Utc>::from);
    ConflictRecord::new(item, source_path, dest, size, modified, is_directory)
}

/// Entry names of `dir`, or `None` when it does not exist.
fn snapshot(dir: &Path) -> Result<Option<HashSet<OsString>>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TransferError::io(dir, e)),
    };

    let mut names = HashSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| TransferError::io(dir, e))?;
        names.insert(entry.file_name());
    }
    Ok(Some(names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_check_matches_by_name() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "existing").unwrap();
        fs::create_dir(temp.path().join("photos")).unwrap();

        let items = vec![
            SourceItem::new("a.txt", 3, None),
            SourceItem::new("b.txt", 3, None),
            SourceItem::new("photos", 0, None),
        ];
        let conflicts = ConflictDetector::new(100).check(temp.path(), &items).unwrap();

        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].name, "a.txt");
        assert_eq!(conflicts[0].destination_size, 8);
        assert!(!conflicts[0].is_larger);
        assert!(conflicts[1].is_directory);
    }

    #[test]
    fn test_check_is_case_sensitive_exact() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Report.txt"), "x").unwrap();

        let items = vec![SourceItem::new("report.txt", 1, None)];
        let conflicts = ConflictDetector::new(100).check(temp.path(), &items).unwrap();
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_check_cap() {
        let temp = TempDir::new().unwrap();
        let mut items = Vec::new();
        for i in 0..5 {
            let name = format!("f{i}");
            fs::write(temp.path().join(&name), "x").unwrap();
            items.push(SourceItem::new(name, 1, None));
        }

        let conflicts = ConflictDetector::new(3).check(temp.path(), &items).unwrap();
        assert_eq!(conflicts.len(), 3);
    }

    #[test]
    fn test_unique_name() {
        let temp = TempDir::new().unwrap();
        let report = temp.path().join("report.txt");
        fs::write(&report, "x").unwrap();
        fs::write(temp.path().join("report (1).txt"), "x").unwrap();
        fs::create_dir(temp.path().join("photos")).unwrap();

        assert_eq!(
            ConflictDetector::unique_name(&report),
            temp.path().join("report (2).txt")
        );
        assert_eq!(
            ConflictDetector::unique_name(&temp.path().join("photos")),
            temp.path().join("photos (1)")
        );
    }

    #[test]
    fn test_check_missing_destination() {
        let temp = TempDir::new().unwrap();
        let items = vec![SourceItem::new("a", 1, None)];
        let conflicts = ConflictDetector::new(10)
            .check(&temp.path().join("nope"), &items)
            .unwrap();
        assert!(conflicts.is_empty());
    }
}
