//! Request validation before any I/O begins.

use std::path::{Path, PathBuf};

use ferry_core::path::{is_strictly_inside, normalize, normalize_entry};
use ferry_core::{Result, TransferError, TransferRequest};

/// Rejects requests that can never succeed.
///
/// Checks run synchronously, in request order, so no worker is started and
/// no scan is wasted on an invalid destination.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathPlanner;

impl PathPlanner {
    /// Validate a full request: path relations first, then existence.
    pub fn validate(request: &TransferRequest) -> Result<()> {
        Self::check_paths(&request.sources, &request.destination)?;
        Self::check_exists(&request.sources, &request.destination)
    }

    /// Pure path checks. For every source, reject when the destination is
    /// the source itself, lies inside it, or is the directory the source
    /// already lives in.
    pub fn check_paths(sources: &[PathBuf], destination: &Path) -> Result<()> {
        let dest = normalize(destination);

        for source in sources {
            let src = normalize_entry(source);

            if src == dest {
                return Err(TransferError::SameLocation {
                    path: source.clone(),
                });
            }
            if is_strictly_inside(&dest, &src) {
                return Err(TransferError::DestinationInsideSource {
                    source_path: source.clone(),
                    destination: destination.to_path_buf(),
                });
            }
            if src.parent() == Some(dest.as_path()) {
                return Err(TransferError::SameLocation {
                    path: source.clone(),
                });
            }
        }

        Ok(())
    }

    /// Every source must exist. The destination may be missing (it is
    /// created) but must not be something other than a directory.
    pub fn check_exists(sources: &[PathBuf], destination: &Path) -> Result<()> {
        for source in sources {
            std::fs::symlink_metadata(source).map_err(|e| TransferError::io(source, e))?;
        }

        match std::fs::metadata(destination) {
            Ok(meta) if !meta.is_dir() => Err(TransferError::other(
                destination,
                "Destination is not a directory",
            )),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransferError::io(destination, e)),
        }
    }
}
