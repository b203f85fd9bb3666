//! JWalk-based source walker.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use compact_str::CompactString;
use dashmap::DashSet;
use jwalk::{Parallelism, WalkDir};
use tracing::{debug, warn};

use ferry_core::{InodeInfo, SortSpec, TransferError};

use crate::inode::DirTracker;
use crate::plan::{EntryKind, PlannedDir, PlannedFile, TransferPlan, relative_to_source};
use crate::progress::ScanProgress;

/// What to do with an entry that cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    /// Abort the walk with the error.
    Strict,
    /// Log the error and continue with the siblings.
    Lenient,
}

/// Result of a walk that did not fail.
#[derive(Debug)]
pub enum WalkOutcome {
    /// Every source was walked.
    Completed(TransferPlan),
    /// The observer asked to stop; carries the totals reached.
    Cancelled(ScanProgress),
}

/// Walks top-level sources into a [`TransferPlan`].
///
/// Symlinks are recorded as links and never followed. Sockets, FIFOs and
/// device nodes are skipped. Directories are visited depth-first in name
/// order; the flat file list is then sorted by the requested spec.
#[derive(Debug)]
pub struct Walker {
    mode: WalkMode,
}

impl Walker {
    pub fn new(mode: WalkMode) -> Self {
        Self { mode }
    }

    /// Walk `sources`, calling `observe` after every entry. Returning
    /// `ControlFlow::Break` stops the walk.
    ///
    /// A missing top-level source is an error in either mode.
    pub fn walk<F>(
        &self,
        sources: &[PathBuf],
        sort: SortSpec,
        mut observe: F,
    ) -> Result<WalkOutcome, TransferError>
    where
        F: FnMut(&ScanProgress) -> ControlFlow<()>,
    {
        let mut progress = ScanProgress::new();
        let mut plan = TransferPlan {
            sources: sources.to_vec(),
            ..Default::default()
        };

        for (index, source) in sources.iter().enumerate() {
            let metadata =
                std::fs::symlink_metadata(source).map_err(|e| TransferError::io(source, e))?;
            let file_type = metadata.file_type();

            if file_type.is_dir() {
                let flow =
                    self.walk_dir(source, index, &mut plan, &mut progress, &mut observe)?;
                if flow.is_break() {
                    return Ok(WalkOutcome::Cancelled(progress));
                }
                continue;
            }

            if file_type.is_symlink() || file_type.is_file() {
                let file = planned_file(source, source, index, &metadata);
                progress.record_file(file.size);
                plan.bytes_total += file.size;
                plan.files.push(file);
            } else {
                warn!(path = %source.display(), "Skipping special file");
            }

            progress.current_path = source.clone();
            if observe(&progress).is_break() {
                return Ok(WalkOutcome::Cancelled(progress));
            }
        }

        plan.sort_by(sort);
        debug!(
            files = plan.files.len(),
            dirs = plan.dirs.len(),
            bytes = plan.bytes_total,
            "Walk complete"
        );
        Ok(WalkOutcome::Completed(plan))
    }

    /// Walk one directory source. A directory met twice inside it (a bind
    /// mount or hardlinked directory cycle) is reported as a loop and not
    /// descended into.
    fn walk_dir<F>(
        &self,
        source: &Path,
        index: usize,
        plan: &mut TransferPlan,
        progress: &mut ScanProgress,
        observe: &mut F,
    ) -> Result<ControlFlow<()>, TransferError>
    where
        F: FnMut(&ScanProgress) -> ControlFlow<()>,
    {
        let tracker = Arc::new(DirTracker::new());
        if let Some(info) = std::fs::metadata(source)
            .ok()
            .and_then(|m| InodeInfo::from_metadata(&m))
        {
            tracker.first_visit(info);
        }
        let loops: Arc<DashSet<PathBuf>> = Arc::new(DashSet::new());

        let walker = WalkDir::new(source)
            .parallelism(Parallelism::Serial)
            .sort(true)
            .skip_hidden(false)
            .follow_links(false)
            .min_depth(0)
            .process_read_dir({
                let loops = Arc::clone(&loops);
                move |_depth, _path, _state, children| {
                    for entry in children.iter_mut().flatten() {
                        if !entry.file_type().is_dir() {
                            continue;
                        }
                        if let Some(info) =
                            entry.metadata().ok().and_then(|m| InodeInfo::from_metadata(&m))
                            && !tracker.first_visit(info)
                        {
                            entry.read_children_path = None;
                            loops.insert(entry.path());
                        }
                    }
                }
            });

        for entry_result in walker {
            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    self.fail(walk_error(source, err))?;
                    continue;
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if loops.contains(&path) {
                    self.fail(TransferError::SymlinkLoop { path: path.clone() })?;
                    continue;
                }
                progress.record_dir();
                plan.dirs.push(PlannedDir {
                    relative: relative_to_source(source, &path),
                    path: path.clone(),
                    source_index: index,
                });
            } else if file_type.is_file() || file_type.is_symlink() {
                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(err) => {
                        self.fail(TransferError::other(&path, err.to_string()))?;
                        continue;
                    }
                };
                let file = planned_file(source, &path, index, &metadata);
                progress.record_file(file.size);
                plan.bytes_total += file.size;
                plan.files.push(file);
            } else {
                warn!(path = %path.display(), "Skipping special file");
            }

            progress.current_path = path;
            if observe(progress).is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    fn fail(&self, err: TransferError) -> Result<(), TransferError> {
        match self.mode {
            WalkMode::Strict => Err(err),
            WalkMode::Lenient => {
                warn!(error = %err, "Scan error, continuing");
                Ok(())
            }
        }
    }
}

fn planned_file(
    source: &Path,
    path: &Path,
    index: usize,
    metadata: &std::fs::Metadata,
) -> PlannedFile {
    let is_symlink = metadata.file_type().is_symlink();
    let name = path
        .file_name()
        .map(|n| CompactString::new(n.to_string_lossy()))
        .unwrap_or_default();

    PlannedFile {
        name,
        path: path.to_path_buf(),
        relative: relative_to_source(source, path),
        source_index: index,
        kind: if is_symlink {
            EntryKind::Symlink
        } else {
            EntryKind::File
        },
        size: if is_symlink { 0 } else { metadata.len() },
        modified: metadata.modified().ok(),
        created: metadata.created().ok(),
    }
}

fn walk_error(source: &Path, err: jwalk::Error) -> TransferError {
    let path = err
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| source.to_path_buf());
    let message = err.to_string();
    match err.into_io_error() {
        Some(io) => TransferError::io(path, io),
        None => TransferError::other(path, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("src");

        fs::create_dir_all(root.join("dir1/subdir")).unwrap();
        fs::create_dir(root.join("dir2")).unwrap();

        fs::write(root.join("file1.txt"), "hello").unwrap();
        fs::write(root.join("dir1/file2.txt"), "world world world").unwrap();
        fs::write(root.join("dir1/subdir/file3.txt"), "test").unwrap();
        fs::write(root.join(".hidden"), "h").unwrap();

        temp
    }

    fn complete(outcome: WalkOutcome) -> TransferPlan {
        match outcome {
            WalkOutcome::Completed(plan) => plan,
            WalkOutcome::Cancelled(_) => panic!("walk was cancelled"),
        }
    }

    #[test]
    fn test_walk_counts() {
        let temp = create_test_tree();
        let sources = vec![temp.path().join("src")];

        let outcome = Walker::new(WalkMode::Strict)
            .walk(&sources, SortSpec::default(), |_| ControlFlow::Continue(()))
            .unwrap();
        let plan = complete(outcome);

        assert_eq!(plan.files_total(), 4);
        // src, dir1, subdir, dir2
        assert_eq!(plan.dirs_total(), 4);
        assert_eq!(plan.bytes_total, 5 + 17 + 4 + 1);
        assert!(plan.dirs.iter().any(|d| d.relative == Path::new("src/dir1/subdir")));
    }

    #[test]
    fn test_walk_single_file_source() {
        let temp = create_test_tree();
        let sources = vec![temp.path().join("src/file1.txt")];

        let plan = complete(
            Walker::new(WalkMode::Strict)
                .walk(&sources, SortSpec::default(), |_| ControlFlow::Continue(()))
                .unwrap(),
        );

        assert_eq!(plan.files_total(), 1);
        assert_eq!(plan.files[0].relative, PathBuf::from("file1.txt"));
        assert_eq!(plan.dirs_total(), 0);
    }

    #[test]
    fn test_missing_source_fails() {
        let temp = TempDir::new().unwrap();
        let sources = vec![temp.path().join("nope")];

        let err = Walker::new(WalkMode::Lenient)
            .walk(&sources, SortSpec::default(), |_| ControlFlow::Continue(()))
            .unwrap_err();
        assert!(matches!(err, TransferError::SourceNotFound { .. }));
    }

    #[test]
    fn test_observer_can_stop() {
        let temp = create_test_tree();
        let sources = vec![temp.path().join("src")];

        let mut seen = 0;
        let outcome = Walker::new(WalkMode::Strict)
            .walk(&sources, SortSpec::default(), |_| {
                seen += 1;
                if seen == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();

        match outcome {
            WalkOutcome::Cancelled(progress) => {
                assert_eq!(progress.files_found + progress.dirs_found, 2);
            }
            WalkOutcome::Completed(_) => panic!("expected cancellation"),
        }
    }

    #[test]
    fn test_overlapping_sources_are_walked_independently() {
        let temp = create_test_tree();
        let root = temp.path().join("src");
        let sources = vec![root.clone(), root.join("dir1")];

        let plan = complete(
            Walker::new(WalkMode::Strict)
                .walk(&sources, SortSpec::default(), |_| ControlFlow::Continue(()))
                .unwrap(),
        );

        // src: 4 files, 4 dirs; dir1 again: 2 files, 2 dirs
        assert_eq!(plan.files_total(), 6);
        assert_eq!(plan.dirs_total(), 6);
        assert!(plan.dirs.iter().any(|d| d.source_index == 1 && d.relative == Path::new("dir1/subdir")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let temp = create_test_tree();
        let root = temp.path().join("src");
        std::os::unix::fs::symlink(root.join("dir1"), root.join("link")).unwrap();

        let plan = complete(
            Walker::new(WalkMode::Strict)
                .walk(&[root], SortSpec::default(), |_| ControlFlow::Continue(()))
                .unwrap(),
        );

        let link = plan.files.iter().find(|f| f.name == "link").unwrap();
        assert!(link.is_symlink());
        assert_eq!(link.size, 0);
        // dir1 contents are not walked twice through the link
        assert_eq!(plan.files_total(), 5);
    }
}
