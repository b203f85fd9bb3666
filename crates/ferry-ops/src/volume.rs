//! Volume registry.
//!
//! A volume maps volume-relative paths onto the local filesystem. The
//! engine only needs that mapping for conflict checks by volume id; the
//! transfer itself works on resolved paths.

use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use ferry_core::{InodeInfo, Result, TransferError, VolumeId};

use crate::space::nearest_existing;

/// A mounted location that paths can be resolved against.
pub trait Volume: Send + Sync + Debug {
    fn id(&self) -> &VolumeId;

    fn root(&self) -> &Path;

    /// Map a volume path onto the local filesystem. Absolute paths are
    /// taken relative to the volume root.
    fn resolve(&self, path: &Path) -> PathBuf {
        let relative: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        self.root().join(relative)
    }
}

/// A directory on a locally mounted filesystem.
#[derive(Debug, Clone)]
pub struct LocalVolume {
    id: VolumeId,
    root: PathBuf,
}

impl LocalVolume {
    pub fn new(id: VolumeId, root: impl Into<PathBuf>) -> Self {
        Self {
            id,
            root: root.into(),
        }
    }
}

impl Volume for LocalVolume {
    fn id(&self) -> &VolumeId {
        &self.id
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

/// Volumes by id. Always contains the root volume.
#[derive(Debug)]
pub struct VolumeRegistry {
    volumes: DashMap<VolumeId, Arc<dyn Volume>>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        let volumes: DashMap<VolumeId, Arc<dyn Volume>> = DashMap::new();
        volumes.insert(
            VolumeId::root(),
            Arc::new(LocalVolume::new(VolumeId::root(), "/")),
        );
        Self { volumes }
    }

    /// Add or replace a volume.
    pub fn register(&self, volume: Arc<dyn Volume>) {
        self.volumes.insert(volume.id().clone(), volume);
    }

    pub fn get(&self, id: &VolumeId) -> Result<Arc<dyn Volume>> {
        self.volumes
            .get(id)
            .map(|v| Arc::clone(v.value()))
            .ok_or_else(|| TransferError::VolumeNotFound {
                volume_id: id.to_string(),
            })
    }
}

impl Default for VolumeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether two paths live on the same device. Missing paths are judged by
/// their nearest existing ancestor; unknown means different.
pub fn same_device(a: &Path, b: &Path) -> bool {
    match (device_of(a), device_of(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn device_of(path: &Path) -> Option<u64> {
    let existing = nearest_existing(path)?;
    let meta = std::fs::symlink_metadata(existing).ok()?;
    InodeInfo::from_metadata(&meta).map(|info| info.device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_strips_root() {
        let volume = LocalVolume::new(VolumeId::new("share"), "/mnt/share");
        assert_eq!(
            volume.resolve(Path::new("/docs/a.txt")),
            PathBuf::from("/mnt/share/docs/a.txt")
        );
        assert_eq!(
            volume.resolve(Path::new("docs")),
            PathBuf::from("/mnt/share/docs")
        );
    }

    #[test]
    fn test_registry_lookup() {
        let registry = VolumeRegistry::new();
        assert!(registry.get(&VolumeId::root()).is_ok());

        let err = registry.get(&VolumeId::new("usb")).unwrap_err();
        assert_eq!(err.kind(), "volume_not_found");

        registry.register(Arc::new(LocalVolume::new(VolumeId::new("usb"), "/media/usb")));
        assert_eq!(
            registry.get(&VolumeId::new("usb")).unwrap().root(),
            Path::new("/media/usb")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_same_device_for_missing_child() {
        let temp = TempDir::new().unwrap();
        assert!(same_device(temp.path(), &temp.path().join("not/yet")));
    }
}
