//! Identifier types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque token naming one transfer operation.
///
/// Minted when an execution starts and never reused. Every transfer event
/// and command carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Mint a fresh operation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0.simple())
    }
}

/// Identifier of one scan preview, independent from any operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreviewId(Uuid);

impl PreviewId {
    /// Mint a fresh preview id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PreviewId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PreviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan-{}", self.0.simple())
    }
}

/// Name of a registered volume (local disk, share, device mount).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(String);

impl VolumeId {
    /// Id of the default volume rooted at `/`.
    pub const ROOT: &'static str = "root";

    /// Create a volume id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The default root volume.
    pub fn root() -> Self {
        Self::new(Self::ROOT)
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inode identity of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeInfo {
    /// Inode number.
    pub inode: u64,
    /// Device ID.
    pub device: u64,
}

impl InodeInfo {
    /// Create new inode info.
    pub fn new(inode: u64, device: u64) -> Self {
        Self { inode, device }
    }

    /// Read the identity from metadata. Returns `None` where the platform
    /// has no inode numbers.
    #[cfg(unix)]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self::new(metadata.ino(), metadata.dev()))
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_ids_are_unique() {
        let a = OperationId::new();
        let b = OperationId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("op-"));
    }

    #[test]
    fn test_preview_id_display() {
        let id = PreviewId::new();
        assert!(id.to_string().starts_with("scan-"));
    }

    #[test]
    fn test_volume_id_root() {
        assert_eq!(VolumeId::root().as_str(), "root");
    }
}
