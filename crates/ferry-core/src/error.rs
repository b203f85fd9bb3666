//! Error types for transfer operations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error surfaced by the engine.
///
/// Validation errors are returned synchronously from the start commands.
/// Runtime errors travel inside a single `error` event, so the type is
/// `Clone` and serializable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TransferError {
    /// A source path does not exist.
    #[error("Source not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// The destination entry already exists and could not be replaced.
    #[error("Destination already exists: {path}")]
    DestinationExists { path: PathBuf },

    /// Permission denied for a path.
    #[error("Permission denied: {path}: {message}")]
    PermissionDenied { path: PathBuf, message: String },

    /// Not enough free space on the destination volume.
    #[error("Insufficient space on {volume_name}: {required} bytes required, {available} available")]
    InsufficientSpace {
        required: u64,
        available: u64,
        volume_name: String,
    },

    /// Destination is the source itself, or the directory it already lives in.
    #[error("Source and destination are the same location: {path}")]
    SameLocation { path: PathBuf },

    /// Destination lies inside a source directory.
    #[error("Cannot transfer {source_path} into its own subdirectory {destination}")]
    DestinationInsideSource {
        #[serde(rename = "source")]
        source_path: PathBuf,
        destination: PathBuf,
    },

    /// A symlink or directory cycle was found.
    #[error("Symbolic link loop at {path}")]
    SymlinkLoop { path: PathBuf },

    /// The operation was cancelled.
    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    /// Generic I/O error.
    #[error("I/O error at {path}: {message}")]
    #[serde(rename = "io_error")]
    Io { path: PathBuf, message: String },

    /// No volume is registered under the given id.
    #[error("Volume not found: {volume_id}")]
    VolumeNotFound { volume_id: String },
}

impl TransferError {
    /// Create an I/O error with path context, classified by error kind.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if is_loop_error(&source) {
            return Self::SymlinkLoop { path };
        }
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::SourceNotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path,
                message: source.to_string(),
            },
            std::io::ErrorKind::AlreadyExists => Self::DestinationExists { path },
            _ => Self::Io {
                path,
                message: source.to_string(),
            },
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Create an unclassified I/O error.
    pub fn other(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Stable snake_case name of the variant, as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceNotFound { .. } => "source_not_found",
            Self::DestinationExists { .. } => "destination_exists",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::InsufficientSpace { .. } => "insufficient_space",
            Self::SameLocation { .. } => "same_location",
            Self::DestinationInsideSource { .. } => "destination_inside_source",
            Self::SymlinkLoop { .. } => "symlink_loop",
            Self::Cancelled { .. } => "cancelled",
            Self::Io { .. } => "io_error",
            Self::VolumeNotFound { .. } => "volume_not_found",
        }
    }
}

#[cfg(unix)]
fn is_loop_error(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::ELOOP as i32)
}

#[cfg(not(unix))]
fn is_loop_error(_err: &std::io::Error) -> bool {
    false
}

/// Result alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_io() {
        let err = TransferError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, TransferError::PermissionDenied { .. }));

        let err = TransferError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, TransferError::SourceNotFound { .. }));

        let err = TransferError::io("/test/path", std::io::Error::other("boom"));
        assert_eq!(err.kind(), "io_error");
    }

    #[cfg(unix)]
    #[test]
    fn test_transfer_error_loop() {
        let err = TransferError::io(
            "/loop",
            std::io::Error::from_raw_os_error(nix::errno::Errno::ELOOP as i32),
        );
        assert!(matches!(err, TransferError::SymlinkLoop { .. }));
    }

    #[test]
    fn test_inside_source_message() {
        let err = TransferError::DestinationInsideSource {
            source_path: "/a".into(),
            destination: "/a/sub".into(),
        };
        assert_eq!(err.kind(), "destination_inside_source");
        assert!(err.to_string().contains("/a/sub"));
    }
}
