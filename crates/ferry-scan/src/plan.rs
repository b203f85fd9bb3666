//! The ordered file plan produced by a walk.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use compact_str::CompactString;
use ferry_core::{SortKey, SortSpec};

/// What a planned entry is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Symlink,
}

/// One file (or symlink) to transfer.
#[derive(Debug, Clone)]
pub struct PlannedFile {
    /// Entry name.
    pub name: CompactString,
    /// Absolute source path.
    pub path: PathBuf,
    /// Path relative to the destination directory, starting with the
    /// name of the top-level source it came from.
    pub relative: PathBuf,
    /// Index of the top-level source in the request.
    pub source_index: usize,
    pub kind: EntryKind,
    /// Size in bytes (0 for symlinks).
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl PlannedFile {
    /// Where this entry lands under `destination`.
    pub fn dest_path(&self, destination: &Path) -> PathBuf {
        destination.join(&self.relative)
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }
}

impl SortKey for PlannedFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    fn created(&self) -> Option<SystemTime> {
        self.created
    }
}

/// One directory to recreate, in walk order (parents first).
#[derive(Debug, Clone)]
pub struct PlannedDir {
    pub path: PathBuf,
    pub relative: PathBuf,
    pub source_index: usize,
}

impl PlannedDir {
    pub fn dest_path(&self, destination: &Path) -> PathBuf {
        destination.join(&self.relative)
    }
}

/// Everything a transfer needs to know about its sources.
///
/// Totals are fixed when the plan is built and never recomputed.
#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    /// Top-level sources, as given.
    pub sources: Vec<PathBuf>,
    /// Files in processing order.
    pub files: Vec<PlannedFile>,
    /// Directories in walk order.
    pub dirs: Vec<PlannedDir>,
    /// Sum of file sizes.
    pub bytes_total: u64,
    /// The order `files` is currently in.
    pub sort: SortSpec,
}

impl TransferPlan {
    pub fn files_total(&self) -> u64 {
        self.files.len() as u64
    }

    pub fn dirs_total(&self) -> u64 {
        self.dirs.len() as u64
    }

    /// Reorder the files. The sort is stable, so equal keys keep walk order.
    pub fn sort_by(&mut self, sort: SortSpec) {
        sort.sort(&mut self.files);
        self.sort = sort;
    }

    /// Whether this plan was built from exactly these sources.
    pub fn matches_sources(&self, sources: &[PathBuf]) -> bool {
        self.sources == sources
    }
}

/// Path of `entry` relative to the parent of its top-level `source`.
pub(crate) fn relative_to_source(source: &Path, entry: &Path) -> PathBuf {
    let base = source.parent().unwrap_or(source);
    entry
        .strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| entry.file_name().map(PathBuf::from).unwrap_or_default())
}
