//! Free-space checks on the destination volume.

use std::path::{Path, PathBuf};

use ferry_core::{Result, TransferError};

/// The closest ancestor of `path` that exists, `path` itself included.
pub(crate) fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && std::fs::symlink_metadata(p).is_ok())
        .map(Path::to_path_buf)
}

/// Bytes available to unprivileged writers on the volume holding `path`.
#[cfg(unix)]
pub fn available_space(path: &Path) -> Result<u64> {
    let probe = nearest_existing(path).unwrap_or_else(|| PathBuf::from("/"));
    let stat = nix::sys::statvfs::statvfs(probe.as_path())
        .map_err(|errno| TransferError::io(&probe, std::io::Error::from(errno)))?;
    #[allow(clippy::unnecessary_cast)]
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

#[cfg(not(unix))]
pub fn available_space(_path: &Path) -> Result<u64> {
    Ok(u64::MAX)
}

/// Fail with `InsufficientSpace` when `required` bytes do not fit.
pub fn ensure_space(destination: &Path, required: u64) -> Result<()> {
    if required == 0 {
        return Ok(());
    }
    let available = available_space(destination)?;
    if available < required {
        return Err(TransferError::InsufficientSpace {
            required,
            available,
            volume_name: destination.display().to_string(),
        });
    }
    Ok(())
}
