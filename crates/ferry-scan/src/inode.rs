//! Directory identity tracking for cycle detection.

use dashmap::DashSet;
use ferry_core::InodeInfo;

/// Tracks directory identities seen during a walk.
///
/// Symlinks are never followed, so the only way to meet the same
/// directory twice is a filesystem cycle (bind mounts, hardlinked
/// directories). A repeat is reported as a loop.
#[derive(Debug, Default)]
pub struct DirTracker {
    seen: DashSet<InodeInfo>,
}

impl DirTracker {
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
        }
    }

    /// Record a directory. `false` means it was already visited.
    pub fn first_visit(&self, info: InodeInfo) -> bool {
        self.seen.insert(info)
    }
}
