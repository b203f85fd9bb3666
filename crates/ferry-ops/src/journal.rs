//! Record of destination paths created by an operation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How a journaled path came to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreatedKind {
    File,
    Symlink,
    Directory,
    /// Moved here by rename from `from`; `items` files travelled with it.
    Renamed { from: PathBuf, items: u64 },
}

/// One created destination path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPath {
    pub path: PathBuf,
    #[serde(flatten)]
    pub kind: CreatedKind,
}

impl CreatedPath {
    /// Transferred files this entry stands for. Directories created only
    /// to hold items count zero.
    pub fn items(&self) -> u64 {
        match self.kind {
            CreatedKind::File | CreatedKind::Symlink => 1,
            CreatedKind::Directory => 0,
            CreatedKind::Renamed { items, .. } => items,
        }
    }
}

/// Append-only list of created paths, in creation order.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Vec<CreatedPath>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_file(&mut self, path: impl Into<PathBuf>) {
        self.push(path.into(), CreatedKind::File);
    }

    pub fn record_symlink(&mut self, path: impl Into<PathBuf>) {
        self.push(path.into(), CreatedKind::Symlink);
    }

    pub fn record_dir(&mut self, path: impl Into<PathBuf>) {
        self.push(path.into(), CreatedKind::Directory);
    }

    /// Record a rename of `from` to `path` carrying `items` files.
    pub fn record_rename(&mut self, path: impl Into<PathBuf>, from: &Path, items: u64) {
        self.push(
            path.into(),
            CreatedKind::Renamed {
                from: from.to_path_buf(),
                items,
            },
        );
    }

    fn push(&mut self, path: PathBuf, kind: CreatedKind) {
        self.entries.push(CreatedPath { path, kind });
    }

    pub fn entries(&self) -> &[CreatedPath] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
